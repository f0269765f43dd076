use std::cell::RefCell;
use std::rc::Rc;

use lex::ErrorSink;
use pp::{Preprocessor, PpFlags};

fn preprocess(src: &str) -> String {
    let mut pp = Preprocessor::new();
    pp.init_from_str(src, "(test)", PpFlags::empty()).unwrap();
    pp.preprocess().unwrap()
}

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[test]
fn simple_replacement() {
    let out = preprocess("#define COUNT 64\nint a[COUNT];\n");
    assert!(squash(&out).contains("inta[64];"), "output was:\n{out}");
}

#[test]
fn multi_token_body() {
    let out = preprocess("#define EXPR (1 + 2)\nint x = EXPR;\n");
    assert!(squash(&out).contains("intx=(1+2);"), "output was:\n{out}");
}

#[test]
fn nested_replacement() {
    let out = preprocess("#define A B\n#define B C\n#define C 9\nint v = A;\n");
    assert!(squash(&out).contains("intv=9;"), "output was:\n{out}");
}

#[test]
fn body_with_line_continuation() {
    let out = preprocess("#define LONG 1 + \\\n2\nint x = LONG;\n");
    assert!(squash(&out).contains("intx=1+2;"), "output was:\n{out}");
}

#[test]
fn undef_removes_the_macro() {
    let out = preprocess("#define GONE 1\n#undef GONE\nGONE\n");
    assert!(out.contains("GONE"), "output was:\n{out}");
}

#[test]
fn redefinition_replaces_silently_by_default() {
    let out = preprocess("#define V 1\n#define V 2\nV\n");
    assert!(squash(&out).contains('2'));
    assert!(!squash(&out).contains('1'));
}

#[derive(Default)]
struct CountingSink {
    warnings: RefCell<Vec<String>>,
}

impl ErrorSink for CountingSink {
    fn error(&self, _message: &str, _fatal: bool) {}
    fn warning(&self, message: &str) {
        self.warnings.borrow_mut().push(message.to_string());
    }
}

#[test]
fn redefinition_warns_when_asked() {
    let sink = Rc::new(CountingSink::default());
    let mut pp = Preprocessor::new();
    pp.set_error_sink(sink.clone());
    pp.init_from_str(
        "#define V 1\n#define V 2\n",
        "(test)",
        PpFlags::WARN_MACRO_REDEFINITIONS,
    )
    .unwrap();
    pp.preprocess().unwrap();
    let warnings = sink.warnings.borrow();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("'V'"), "got: {}", warnings[0]);
}

#[test]
fn file_builtin_expands_to_quoted_name() {
    let mut pp = Preprocessor::new();
    pp.init_from_str("__FILE__\n", "script.src", PpFlags::empty())
        .unwrap();
    let out = pp.preprocess().unwrap();
    assert!(out.contains("\"script.src\""), "output was:\n{out}");
}

#[test]
fn line_builtin_expands_to_the_line_number() {
    let out = preprocess("\n\nfirst __LINE__\n");
    assert!(squash(&out).contains("first3"), "output was:\n{out}");
}

#[test]
fn line_directive_overrides_the_counter() {
    let out = preprocess("#line 100\n__LINE__\n");
    assert!(squash(&out).contains("101"), "output was:\n{out}");
}

#[test]
fn date_and_time_are_quoted() {
    let out = preprocess("__DATE__ __TIME__\n");
    // "Mmm dd yyyy" and "hh:mm:ss"
    let quoted = out.matches('"').count();
    assert_eq!(quoted, 4, "output was:\n{out}");
    assert!(out.contains(':'));
}

#[test]
fn builtins_can_be_undefined() {
    let out = preprocess("#undef __LINE__\n__LINE__\n");
    assert!(out.contains("__LINE__"), "output was:\n{out}");
}

#[test]
fn define_string_api() {
    let mut pp = Preprocessor::new();
    assert!(pp.define("#define DOUBLE(x) ((x) + (x))", false));
    assert!(!pp.define("#define DOUBLE(x) (2 * (x))", false));
    assert!(pp.define("#define DOUBLE(x) (2 * (x))", true));
    assert!(pp.is_defined("DOUBLE"));

    pp.init_from_str("DOUBLE(4)\n", "(test)", PpFlags::empty())
        .unwrap();
    let out = pp.preprocess().unwrap();
    assert!(squash(&out).contains("(2*(4))"), "output was:\n{out}");
}

#[test]
fn value_define_apis() {
    let mut pp = Preprocessor::new();
    assert!(pp.define_value_i64("N", 7, false));
    assert!(pp.define_value_f64("F", 0.5, false));
    assert!(pp.define_value_string("S", "hi", false));
    assert_eq!(pp.find_macro_i64("N"), Some(7));
    assert_eq!(pp.find_macro_f64("F"), Some(0.5));
    assert_eq!(pp.find_macro_string("S").as_deref(), Some("hi"));
    assert_eq!(pp.find_macro_i64("S"), None);
    assert!(pp.find_macro_token("MISSING").is_none());
}

#[test]
fn undef_all_keeps_builtins_when_asked() {
    let mut pp = Preprocessor::new();
    pp.define_value_i64("A", 1, false);
    pp.undef_all(true);
    assert!(!pp.is_defined("A"));
    assert!(pp.is_defined("__FILE__"));
    pp.undef_all(false);
    assert!(!pp.is_defined("__FILE__"));
}

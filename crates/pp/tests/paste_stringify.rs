use pp::{Preprocessor, PpFlags};

fn preprocess(src: &str) -> String {
    let mut pp = Preprocessor::new();
    pp.init_from_str(src, "(test)", PpFlags::empty()).unwrap();
    pp.preprocess().unwrap()
}

fn preprocess_err(src: &str) -> anyhow::Error {
    let mut pp = Preprocessor::new();
    pp.init_from_str(src, "(test)", PpFlags::NO_ERRORS).unwrap();
    pp.preprocess().unwrap_err()
}

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[test]
fn paste_builds_a_single_identifier() {
    let out = preprocess("#define A(x) x##_tag\nA(foo)\n");
    assert!(squash(&out).contains("foo_tag"), "output was:\n{out}");
    // No space may sneak in between the halves.
    assert!(out.contains("foo_tag"), "output was:\n{out}");
}

#[test]
fn paste_with_leading_literal() {
    let out = preprocess("#define GLUE(x) pre_##x\nGLUE(fix)\n");
    assert!(out.contains("pre_fix"), "output was:\n{out}");
}

#[test]
fn paste_two_parameters() {
    let out = preprocess("#define JOIN(a, b) a##b\nJOIN(left, right)\n");
    assert!(out.contains("leftright"), "output was:\n{out}");
}

#[test]
fn stringize_wraps_the_argument() {
    let out = preprocess("#define STR(x) #x\nSTR(hello)\n");
    assert!(out.contains("\"hello\""), "output was:\n{out}");
}

#[test]
fn stringize_keeps_argument_spacing_trimmed() {
    let out = preprocess("#define STR(x) #x\nSTR( 1 + 2 )\n");
    assert!(out.contains("\"1 + 2\""), "output was:\n{out}");
}

#[test]
fn stringize_of_a_string_double_escapes() {
    let out = preprocess("#define STR(x) #x\nSTR(\"quoted\")\n");
    assert!(out.contains("\\\"quoted\\\""), "output was:\n{out}");
}

#[test]
fn stringize_and_paste_in_one_body() {
    let out = preprocess("#define BOTH(x) #x x##7\nBOTH(val)\n");
    assert!(out.contains("\"val\""), "output was:\n{out}");
    assert!(out.contains("val7"), "output was:\n{out}");
}

#[test]
fn paste_cannot_open_or_close_a_body() {
    let err = preprocess_err("#define BAD(x) ##x\nBAD(1)\n");
    assert!(err.to_string().contains("'##'"), "error was: {err}");

    let err = preprocess_err("#define BAD(x) x##\nBAD(1)\n");
    assert!(err.to_string().contains("'##'"), "error was: {err}");
}

#[test]
fn stringize_cannot_close_a_body() {
    let err = preprocess_err("#define BAD(x) x#\nBAD(1)\n");
    assert!(err.to_string().contains("'#'"), "error was: {err}");
}

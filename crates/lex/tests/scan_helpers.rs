use std::cell::RefCell;
use std::rc::Rc;

use lex::{ErrorSink, Lexer, ScanFlags};

fn lexer(src: &str) -> Lexer<'_> {
    Lexer::from_str(src, "test", ScanFlags::empty(), 1)
}

#[test]
fn scan_scalar_helpers() {
    let mut lx = lexer("true 42 -17 2.5 -0.5 \"text\"");
    assert!(lx.scan_bool().unwrap());
    assert_eq!(lx.scan_u64().unwrap(), 42);
    assert_eq!(lx.scan_i64().unwrap(), -17);
    assert_eq!(lx.scan_f64().unwrap(), 2.5);
    assert_eq!(lx.scan_f64().unwrap(), -0.5);
    assert_eq!(lx.scan_string().unwrap(), "text");
}

#[test]
fn scan_float_truncation_warns_for_integers() {
    let mut lx = Lexer::from_str("1.9", "test", ScanFlags::NO_WARNINGS, 1);
    assert_eq!(lx.scan_i64().unwrap(), 1);
    assert_eq!(lx.warning_count(), 1);
}

#[test]
fn hex_cannot_be_scanned_as_float() {
    let mut lx = Lexer::from_str("0x10", "test", ScanFlags::NO_ERRORS, 1);
    assert!(lx.scan_f64().is_err());
}

#[test]
fn scan_matrix_1d() {
    let mut lx = lexer("( 1, 2, 3 )");
    let mut out = [0i64; 3];
    lx.scan_matrix1d(&mut out, "(", ")", true).unwrap();
    assert_eq!(out, [1, 2, 3]);
}

#[test]
fn scan_matrix_1d_trailing_comma() {
    let mut lx = lexer("( 1, 2, 3, )");
    let mut out = [0i64; 3];
    lx.scan_matrix1d(&mut out, "(", ")", true).unwrap();
    assert_eq!(out, [1, 2, 3]);
}

#[test]
fn scan_matrix_2d() {
    let mut lx = lexer("( ( 1.0, 2.0 ), ( 3.0, 4.0 ), ( 5.0, 6.0 ) )");
    let mut out = [0.0f64; 6];
    lx.scan_matrix2d(3, 2, &mut out, "(", ")", true).unwrap();
    assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn scan_matrix_3d() {
    let mut lx = lexer("( ( ( 1, 2 ), ( 3, 4 ) ), ( ( 5, 6 ), ( 7, 8 ) ) )");
    let mut out = [0i32; 8];
    lx.scan_matrix3d(2, 2, 2, &mut out, "(", ")", true).unwrap();
    assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn scan_matrix_custom_delimiters() {
    let mut lx = lexer("[ 1 2 3 ]");
    let mut out = [0u32; 3];
    lx.scan_matrix1d(&mut out, "[", "]", false).unwrap();
    assert_eq!(out, [1, 2, 3]);
}

#[test]
fn scan_matrix_wrong_delimiter_is_an_error() {
    let mut lx = Lexer::from_str("{ 1, 2 }", "test", ScanFlags::NO_ERRORS, 1);
    let mut out = [0i64; 2];
    assert!(lx.scan_matrix1d(&mut out, "(", ")", true).is_err());
}

#[test]
fn skip_bracketed_section_tracks_depth() {
    let mut lx = lexer("{ a { b } c } after");
    assert!(lx.skip_bracketed_section(true).unwrap());
    assert_eq!(lx.next_token().unwrap().unwrap().text(), "after");
}

#[test]
fn scan_bracketed_section_collects_tokens() {
    let mut lx = lexer("{ x = 1; { y } }");
    let out = lx.scan_bracketed_section().unwrap();
    let squashed: String = out.chars().filter(|c| !c.is_whitespace()).collect();
    assert_eq!(squashed, "{x=1;{y}}");
}

#[test]
fn scan_bracketed_section_exact_keeps_newlines() {
    let mut lx = lexer("{\n    a;\n    b;\n}");
    let out = lx.scan_bracketed_section_exact(0).unwrap();
    assert!(out.starts_with('{'));
    assert!(out.contains('\n'));
    assert!(out.ends_with('}'));
}

#[test]
fn scan_rest_of_line_joins_tokens() {
    let mut lx = lexer("keep these three\nnext");
    assert_eq!(lx.scan_rest_of_line().unwrap(), "keep these three");
    assert_eq!(lx.next_token().unwrap().unwrap().text(), "next");
}

#[test]
fn scan_complete_line_is_raw() {
    let mut lx = lexer("  raw line  \nnext");
    let line = lx.scan_complete_line();
    assert_eq!(line, "  raw line  \n");
    assert_eq!(lx.next_token().unwrap().unwrap().text(), "next");
}

#[test]
fn last_whitespace_span() {
    let mut lx = lexer("a   b");
    lx.next_token().unwrap();
    lx.next_token().unwrap();
    assert_eq!(lx.last_whitespace(), "   ");
    assert_eq!(lx.last_whitespace_length(), 3);
}

#[derive(Default)]
struct CapturingSink {
    errors: RefCell<Vec<String>>,
    warnings: RefCell<Vec<String>>,
}

impl ErrorSink for CapturingSink {
    fn error(&self, message: &str, _fatal: bool) {
        self.errors.borrow_mut().push(message.to_string());
    }

    fn warning(&self, message: &str) {
        self.warnings.borrow_mut().push(message.to_string());
    }
}

#[test]
fn custom_sink_receives_formatted_messages() {
    let sink = Rc::new(CapturingSink::default());
    let mut lx = Lexer::from_str("\n\n@", "script.txt", ScanFlags::empty(), 1);
    lx.set_error_sink(sink.clone());
    assert!(lx.next_token().is_err());

    let errors = sink.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("script.txt(1):"), "got: {}", errors[0]);
    assert!(errors[0].contains("error:"));
}

#[test]
fn counters_are_monotone_even_when_suppressed() {
    let mut lx = Lexer::from_str("@ @ @", "test", ScanFlags::NO_ERRORS, 1);
    let mut last = 0;
    for _ in 0..3 {
        let _ = lx.next_token();
        assert!(lx.error_count() >= last);
        last = lx.error_count();
    }
    assert_eq!(lx.error_count(), 3);
}

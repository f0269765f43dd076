use lex::{Lexer, ScanFlags, Token, TokenKind};

fn scan_one(src: &str, flags: ScanFlags) -> Token {
    let mut lx = Lexer::from_str(src, "test", flags, 1);
    lx.next_token().unwrap().unwrap()
}

#[test]
fn plain_string_drops_the_quotes() {
    let tok = scan_one("\"hello\"", ScanFlags::empty());
    assert!(tok.is_string());
    assert_eq!(tok.text(), "hello");
}

#[test]
fn escape_sequences() {
    let tok = scan_one(r#""a\n\t\r\\\"\'b""#, ScanFlags::empty());
    assert_eq!(tok.text(), "a\n\t\r\\\"'b");
}

#[test]
fn hex_escapes() {
    let tok = scan_one(r#""\x41\x42""#, ScanFlags::empty());
    assert_eq!(tok.text(), "AB");
}

#[test]
fn numeric_escapes_are_decimal_not_octal() {
    // "\65" is decimal 65 ('A'), not octal.
    let tok = scan_one(r#""\65""#, ScanFlags::empty());
    assert_eq!(tok.text(), "A");
    let twelve = scan_one(r#""\12""#, ScanFlags::empty());
    assert_eq!(twelve.text(), "\x0C");
}

#[test]
fn oversized_escape_warns_and_saturates() {
    let mut lx = Lexer::from_str(r#""foo \x1FF""#, "test", ScanFlags::empty(), 1);
    let tok = lx.next_token().unwrap().unwrap();
    assert_eq!(lx.warning_count(), 1);
    assert_eq!(tok.text().chars().last(), Some('\u{FF}'));

    let mut lx = Lexer::from_str(r#""\999""#, "test", ScanFlags::empty(), 1);
    let tok = lx.next_token().unwrap().unwrap();
    assert_eq!(lx.warning_count(), 1);
    assert_eq!(tok.text(), "\u{FF}");
}

#[test]
fn escapes_can_be_disabled() {
    let tok = scan_one(r#""a\nb""#, ScanFlags::NO_STRING_ESCAPE_CHARS);
    assert_eq!(tok.text(), "a\\nb");
}

#[test]
fn whitespace_separated_strings_concatenate() {
    let tok = scan_one("\"a\" \"b\"", ScanFlags::empty());
    assert_eq!(tok.text(), "ab");
}

#[test]
fn strings_on_consecutive_lines_concatenate() {
    let tok = scan_one("\"a\"\n\"b\"", ScanFlags::empty());
    assert_eq!(tok.text(), "ab");
}

#[test]
fn no_string_concat_keeps_them_separate() {
    let mut lx = Lexer::from_str("\"a\" \"b\"", "test", ScanFlags::NO_STRING_CONCAT, 1);
    assert_eq!(lx.next_token().unwrap().unwrap().text(), "a");
    assert_eq!(lx.next_token().unwrap().unwrap().text(), "b");
}

#[test]
fn backslash_continuation_concat() {
    let flags = ScanFlags::NO_STRING_CONCAT | ScanFlags::ALLOW_BACKSLASH_STRING_CONCAT;
    let tok = scan_one("\"a\" \\\n \"b\"", flags);
    assert_eq!(tok.text(), "ab");
}

#[test]
fn newline_inside_string_is_fatal() {
    let mut lx = Lexer::from_str("\"a\nb\"", "test", ScanFlags::NO_ERRORS, 1);
    let err = lx.next_token().unwrap_err();
    assert!(err.message.contains("newline"), "message: {}", err.message);
}

#[test]
fn unterminated_string_is_an_error() {
    let mut lx = Lexer::from_str("\"abc", "test", ScanFlags::NO_ERRORS, 1);
    assert!(lx.next_token().is_err());
}

#[test]
fn char_literals() {
    let tok = scan_one("'A'", ScanFlags::empty());
    assert!(tok.is_literal());
    assert_eq!(tok.text(), "A");
    let esc = scan_one(r"'\n'", ScanFlags::empty());
    assert_eq!(esc.text(), "\n");
}

#[test]
fn multi_char_literals_need_the_flag() {
    let mut lx = Lexer::from_str("'ab'", "test", ScanFlags::NO_ERRORS, 1);
    assert!(lx.next_token().is_err());

    let tok = scan_one("'ab'", ScanFlags::ALLOW_MULTI_CHAR_LITERALS);
    assert!(tok.is_literal());
    assert_eq!(tok.text(), "ab");
}

#[test]
fn path_names() {
    let tok = scan_one("textures/base\\wall.tga", ScanFlags::ALLOW_PATH_NAMES);
    assert!(tok.is_identifier());
    assert_eq!(tok.text(), "textures/base\\wall.tga");
}

#[test]
fn only_strings_mode() {
    let mut lx = Lexer::from_str(
        "--flag \"quoted words\" plain-text",
        "test",
        ScanFlags::ONLY_STRINGS,
        1,
    );
    let first = lx.next_token().unwrap().unwrap();
    assert_eq!(first.text(), "--flag");
    assert_eq!(first.kind(), TokenKind::Identifier);
    let second = lx.next_token().unwrap().unwrap();
    assert!(second.is_string());
    assert_eq!(second.text(), "quoted words");
    let third = lx.next_token().unwrap().unwrap();
    assert_eq!(third.text(), "plain-text");
}

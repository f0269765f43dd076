use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::{ErrorSink, ScanError, ScanResult, StderrSink};
use crate::punct::{PunctId, PunctTable};
use crate::token::{NumberFlags, Token, TokenKind};

bitflags! {
    /// Scanning behavior switches. Can be ORed together.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ScanFlags: u32 {
        /// Don't report errors (counters still increment).
        const NO_ERRORS                     = 1 << 0;
        /// Don't report warnings (counters still increment).
        const NO_WARNINGS                   = 1 << 1;
        /// Errors are returned but not marked fatal. By default all errors are fatal.
        const NO_FATAL_ERRORS               = 1 << 2;
        /// Multiple strings separated by whitespace are not concatenated.
        const NO_STRING_CONCAT              = 1 << 3;
        /// No escape characters inside strings.
        const NO_STRING_ESCAPE_CHARS        = 1 << 4;
        /// Allow path separators in names, e.g. `textures/base/metal`.
        const ALLOW_PATH_NAMES              = 1 << 5;
        /// Allow names to start with a number, e.g. `3lite`.
        const ALLOW_NUMBER_NAMES            = 1 << 6;
        /// Allow IPv4 addresses to be scanned as numbers.
        const ALLOW_IP_ADDRESSES            = 1 << 7;
        /// Allow float exceptions like `1.#INF` or `1.#IND`.
        const ALLOW_FLOAT_EXCEPTIONS        = 1 << 8;
        /// Allow multi-character literals.
        const ALLOW_MULTI_CHAR_LITERALS     = 1 << 9;
        /// Allow strings separated by `\` to be concatenated.
        const ALLOW_BACKSLASH_STRING_CONCAT = 1 << 10;
        /// Scan as whitespace-delimited strings.
        const ONLY_STRINGS                  = 1 << 11;
    }
}

/// Lexical scanner over a character buffer.
///
/// The buffer is owned when loaded from a file and borrowed when supplied by
/// the caller. Scanning is byte-indexed; reading past the end yields a
/// synthetic NUL so the sub-scanners need no explicit bounds checks.
pub struct Lexer<'a> {
    buf: Cow<'a, str>,
    pos: usize,
    last_pos: usize,
    ws_start: usize,
    ws_end: usize,
    line: u32,
    last_line: u32,
    flags: ScanFlags,
    filename: String,
    pushback: Option<Token>,
    error_count: u32,
    warning_count: u32,
    sink: Rc<dyn ErrorSink>,
    table: &'static PunctTable,
    initialized: bool,
}

impl Lexer<'static> {
    /// Loads the whole file into an owned buffer.
    pub fn from_file(path: impl AsRef<Path>, flags: ScanFlags) -> ScanResult<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            ScanError::new(
                format!("failed to load script file \"{}\": {}", path.display(), e),
                !flags.contains(ScanFlags::NO_FATAL_ERRORS),
            )
        })?;
        let text = String::from_utf8_lossy(&data).into_owned();
        Ok(Self::from_string(
            text,
            path.to_string_lossy().into_owned(),
            flags,
            1,
        ))
    }

    /// Scans an owned string buffer.
    pub fn from_string(
        src: String,
        filename: impl Into<String>,
        flags: ScanFlags,
        starting_line: u32,
    ) -> Self {
        Lexer::build(Cow::Owned(src), filename.into(), flags, starting_line)
    }
}

impl<'a> Lexer<'a> {
    /// Scans a borrowed buffer. The caller keeps ownership; the buffer must
    /// outlive the lexer, which the lifetime enforces.
    pub fn from_str(
        src: &'a str,
        filename: impl Into<String>,
        flags: ScanFlags,
        starting_line: u32,
    ) -> Self {
        Lexer::build(Cow::Borrowed(src), filename.into(), flags, starting_line)
    }

    fn build(buf: Cow<'a, str>, mut filename: String, flags: ScanFlags, starting_line: u32) -> Self {
        if filename.is_empty() {
            filename = "(memory)".to_string();
        }
        Self {
            buf,
            pos: 0,
            last_pos: 0,
            ws_start: 0,
            ws_end: 0,
            line: starting_line,
            last_line: starting_line,
            flags,
            filename,
            pushback: None,
            error_count: 0,
            warning_count: 0,
            sink: Rc::new(StderrSink),
            table: PunctTable::default_table(),
            initialized: true,
        }
    }

    pub fn set_error_sink(&mut self, sink: Rc<dyn ErrorSink>) {
        self.sink = sink;
    }

    pub fn set_punct_table(&mut self, table: &'static PunctTable) {
        self.table = table;
    }

    pub fn punct_table(&self) -> &'static PunctTable {
        self.table
    }

    pub fn flags(&self) -> ScanFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ScanFlags) {
        self.flags = flags;
    }

    /// Changes the line number without moving within the buffer.
    pub fn set_line_number(&mut self, line: u32) {
        self.line = line;
        self.last_line = line;
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn line_number(&self) -> u32 {
        self.line
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn script_offset(&self) -> usize {
        self.pos
    }

    pub fn script_length(&self) -> usize {
        self.buf.len()
    }

    /// Rewinds to the beginning of the buffer and clears the counters.
    /// Flags stay as they are.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.last_pos = 0;
        self.ws_start = 0;
        self.ws_end = 0;
        self.line = 1;
        self.last_line = 1;
        self.error_count = 0;
        self.warning_count = 0;
        self.pushback = None;
    }

    /// Drops the buffer. The filename, flags and counters stay queryable,
    /// but no further tokens can be read.
    pub fn clear(&mut self) {
        self.buf = Cow::Owned(String::new());
        self.pos = 0;
        self.last_pos = 0;
        self.ws_start = 0;
        self.ws_end = 0;
        self.line = 0;
        self.last_line = 0;
        self.pushback = None;
        self.initialized = false;
    }

    /// Reports an error, bumps the counter and returns the error value for
    /// the caller to propagate.
    pub fn error(&mut self, message: impl fmt::Display) -> ScanError {
        self.error_count += 1;
        let fatal = !self.flags.contains(ScanFlags::NO_FATAL_ERRORS);
        let err = ScanError::new(
            format!("{}({}): error: {}", self.filename, self.last_line, message),
            fatal,
        );
        if !self.flags.contains(ScanFlags::NO_ERRORS) {
            self.sink.error(&err.message, fatal);
        }
        err
    }

    pub fn warning(&mut self, message: impl fmt::Display) {
        self.warning_count += 1;
        if self.flags.contains(ScanFlags::NO_WARNINGS) {
            return;
        }
        self.sink.warning(&format!(
            "{}({}): warning: {}",
            self.filename, self.last_line, message
        ));
    }

    fn at(&self, i: usize) -> u8 {
        self.buf.as_bytes().get(i).copied().unwrap_or(0)
    }

    fn cur(&self) -> u8 {
        self.at(self.pos)
    }

    fn rewind_last(&mut self) {
        self.pos = self.last_pos;
        self.line = self.last_line;
    }

    /// Reads the next token. `Ok(None)` means the input is exhausted; an
    /// empty or comment-only buffer is not an error.
    pub fn next_token(&mut self) -> ScanResult<Option<Token>> {
        if !self.initialized {
            return Err(self.error("no script loaded"));
        }

        if let Some(tok) = self.pushback.take() {
            return Ok(Some(tok));
        }

        // Snapshot the position so one token can be unread by rewinding.
        self.last_line = self.line;
        self.last_pos = self.pos;
        self.ws_start = self.pos;

        if !self.read_whitespace() {
            return Ok(None);
        }
        self.ws_end = self.pos;

        let mut tok = Token::new();
        tok.set_line_number(self.line);
        tok.set_lines_crossed(self.line - self.last_line);

        let c = self.cur();
        if self.flags.contains(ScanFlags::ONLY_STRINGS) {
            // Whitespace-delimited string mode; quoted strings still go
            // through the string reader.
            if c == b'\'' || c == b'"' {
                self.read_string(c, &mut tok)?;
            } else {
                self.read_name(&mut tok);
            }
        } else if c.is_ascii_digit() || (c == b'.' && self.at(self.pos + 1).is_ascii_digit()) {
            self.read_number(&mut tok)?;
            // Names are allowed to start with a number when the flag is set.
            if self.flags.contains(ScanFlags::ALLOW_NUMBER_NAMES) {
                let c = self.cur();
                if c.is_ascii_alphabetic() || c == b'_' {
                    self.read_name(&mut tok);
                }
            }
        } else if c == b'\'' || c == b'"' {
            self.read_string(c, &mut tok)?;
        } else if c.is_ascii_alphabetic() || c == b'_' {
            self.read_name(&mut tok);
        } else if self.flags.contains(ScanFlags::ALLOW_PATH_NAMES)
            && (c == b'/' || c == b'\\' || c == b'.')
        {
            self.read_name(&mut tok);
        } else if !self.read_punctuation(&mut tok) {
            return Err(self.error(format!("unknown punctuation character '{}'", c as char)));
        }

        Ok(Some(tok))
    }

    /// Reads a token only if it is on the current line.
    pub fn next_token_on_line(&mut self) -> ScanResult<Option<Token>> {
        match self.next_token() {
            Ok(Some(tok)) => {
                if tok.lines_crossed() == 0 {
                    Ok(Some(tok))
                } else {
                    self.rewind_last();
                    Ok(None)
                }
            }
            Ok(None) => {
                self.rewind_last();
                Ok(None)
            }
            Err(e) => {
                self.rewind_last();
                Err(e)
            }
        }
    }

    /// Unreads a token; the next `next_token` call returns it verbatim.
    /// Only one slot exists: a second unget overwrites with a warning.
    pub fn unget_token(&mut self, tok: Token) {
        if self.pushback.is_some() {
            self.warning("unget_token() called twice in a row");
        }
        self.pushback = Some(tok);
    }

    pub fn expect_token_text(&mut self, text: &str) -> ScanResult<Token> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error(format!("couldn't find expected token '{text}'")));
        };
        if tok != text {
            return Err(self.error(format!("expected '{}' but found '{}'", text, tok.text())));
        }
        Ok(tok)
    }

    pub fn expect_token_kind(&mut self, kind: TokenKind, subtype: NumberFlags) -> ScanResult<Token> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error("couldn't read expected token"));
        };
        if tok.kind() != kind {
            return Err(self.error(format!(
                "expected a {} but found '{}'",
                kind.name(),
                tok.text()
            )));
        }
        if kind == TokenKind::Number && !tok.flags().contains(subtype) {
            let mut wanted = Token::flags_string(subtype);
            if wanted.is_empty() {
                wanted = "number".to_string();
            }
            return Err(self.error(format!("expected {} but found '{}'", wanted, tok.text())));
        }
        Ok(tok)
    }

    pub fn expect_punct(&mut self, id: PunctId) -> ScanResult<Token> {
        let wanted = self.table.text_of(id);
        let Some(tok) = self.next_token()? else {
            return Err(self.error(format!("couldn't find expected token '{wanted}'")));
        };
        if !tok.is_punct(id) {
            return Err(self.error(format!("expected '{}' but found '{}'", wanted, tok.text())));
        }
        Ok(tok)
    }

    pub fn expect_any_token(&mut self) -> ScanResult<Token> {
        match self.next_token()? {
            Some(tok) => Ok(tok),
            None => Err(self.error("couldn't read expected token")),
        }
    }

    /// Reads the token if it matches; rewinds otherwise.
    pub fn check_token_text(&mut self, text: &str) -> bool {
        match self.next_token() {
            Ok(Some(tok)) => {
                if tok == text {
                    true
                } else {
                    self.rewind_last();
                    false
                }
            }
            _ => false,
        }
    }

    pub fn check_token_kind(&mut self, kind: TokenKind, subtype: NumberFlags) -> Option<Token> {
        match self.next_token() {
            Ok(Some(tok)) => {
                if tok.kind() == kind && tok.flags().contains(subtype) {
                    Some(tok)
                } else {
                    self.rewind_last();
                    None
                }
            }
            _ => None,
        }
    }

    pub fn check_punct(&mut self, id: PunctId) -> Option<Token> {
        match self.next_token() {
            Ok(Some(tok)) => {
                if tok.is_punct(id) {
                    Some(tok)
                } else {
                    self.rewind_last();
                    None
                }
            }
            _ => None,
        }
    }

    /// Looks at the next token without removing it from the stream.
    pub fn peek_token_text(&mut self, text: &str) -> bool {
        match self.next_token() {
            Ok(Some(tok)) => {
                self.rewind_last();
                tok == text
            }
            _ => false,
        }
    }

    pub fn peek_token_kind(&mut self, kind: TokenKind, subtype: NumberFlags) -> Option<Token> {
        match self.next_token() {
            Ok(Some(tok)) => {
                self.rewind_last();
                if tok.kind() == kind && tok.flags().contains(subtype) {
                    Some(tok)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Skips tokens until the given token text is read. Returns false when
    /// the end of input is reached first.
    pub fn skip_until(&mut self, text: &str) -> ScanResult<bool> {
        while let Some(tok) = self.next_token()? {
            if tok == text {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Skips the remaining tokens on the current line.
    pub fn skip_rest_of_line(&mut self) -> ScanResult<bool> {
        while let Some(tok) = self.next_token()? {
            if tok.lines_crossed() != 0 {
                self.rewind_last();
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Skips a `{}` bracketed section, tracking nested depth.
    pub fn skip_bracketed_section(&mut self, scan_first_bracket: bool) -> ScanResult<bool> {
        let mut depth = if scan_first_bracket { 0i32 } else { 1 };
        loop {
            let Some(tok) = self.next_token()? else {
                return Ok(false);
            };
            if tok.is_punct(PunctId::OpenBrace) {
                depth += 1;
            } else if tok.is_punct(PunctId::CloseBrace) {
                depth -= 1;
            }
            if depth == 0 {
                return Ok(true);
            }
        }
    }

    /// Skips whitespace and comments. With `current_line` set, stops right
    /// after a newline. Returns false at end of input.
    pub fn skip_whitespace(&mut self, current_line: bool) -> bool {
        loop {
            while self.cur() <= b' ' {
                if self.cur() == 0 {
                    return false;
                }
                if self.cur() == b'\n' {
                    self.line += 1;
                    if current_line {
                        self.pos += 1;
                        return true;
                    }
                }
                self.pos += 1;
            }
            if self.cur() == b'/' && self.at(self.pos + 1) == b'/' {
                self.pos += 2;
                loop {
                    if self.cur() == 0 {
                        return false;
                    }
                    let c = self.cur();
                    self.pos += 1;
                    if c == b'\n' {
                        self.line += 1;
                        break;
                    }
                }
                if current_line {
                    return true;
                }
                continue;
            }
            if self.cur() == b'/' && self.at(self.pos + 1) == b'*' {
                if !self.skip_block_comment() {
                    return false;
                }
                continue;
            }
            break;
        }
        true
    }

    fn read_whitespace(&mut self) -> bool {
        loop {
            while self.cur() <= b' ' {
                if self.cur() == 0 {
                    return false;
                }
                if self.cur() == b'\n' {
                    self.line += 1;
                }
                self.pos += 1;
            }
            if self.cur() == b'/' && self.at(self.pos + 1) == b'/' {
                self.pos += 2;
                loop {
                    if self.cur() == 0 {
                        return false;
                    }
                    let c = self.cur();
                    self.pos += 1;
                    if c == b'\n' {
                        self.line += 1;
                        break;
                    }
                }
                continue;
            }
            if self.cur() == b'/' && self.at(self.pos + 1) == b'*' {
                if !self.skip_block_comment() {
                    return false;
                }
                continue;
            }
            break;
        }
        true
    }

    fn skip_block_comment(&mut self) -> bool {
        self.pos += 2;
        loop {
            let c = self.cur();
            if c == 0 {
                return false;
            }
            if c == b'*' && self.at(self.pos + 1) == b'/' {
                self.pos += 2;
                return true;
            }
            if c == b'/' && self.at(self.pos + 1) == b'*' {
                self.warning("nested multi-line comment");
            }
            if c == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
    }

    fn read_escape_character(&mut self) -> ScanResult<u8> {
        self.pos += 1; // leading backslash
        let value: u32;
        match self.cur() {
            b'0' => {
                value = 0;
                self.pos += 1;
            }
            b'n' => {
                value = b'\n' as u32;
                self.pos += 1;
            }
            b'r' => {
                value = b'\r' as u32;
                self.pos += 1;
            }
            b't' => {
                value = b'\t' as u32;
                self.pos += 1;
            }
            b'v' => {
                value = 0x0B;
                self.pos += 1;
            }
            b'b' => {
                value = 0x08;
                self.pos += 1;
            }
            b'f' => {
                value = 0x0C;
                self.pos += 1;
            }
            b'a' => {
                value = 0x07;
                self.pos += 1;
            }
            b'\\' => {
                value = b'\\' as u32;
                self.pos += 1;
            }
            b'\'' => {
                value = b'\'' as u32;
                self.pos += 1;
            }
            b'"' => {
                value = b'"' as u32;
                self.pos += 1;
            }
            b'?' => {
                value = b'?' as u32;
                self.pos += 1;
            }
            b'x' => {
                self.pos += 1;
                let mut v: u32 = 0;
                while self.cur().is_ascii_hexdigit() {
                    let c = self.cur();
                    let digit = match c {
                        b'a'..=b'f' => c - b'a' + 10,
                        b'A'..=b'F' => c - b'A' + 10,
                        _ => c - b'0',
                    };
                    v = v.saturating_mul(16).saturating_add(digit as u32);
                    self.pos += 1;
                }
                if v > 0xFF {
                    self.warning("hexadecimal value in escape character is too big, truncating to 0xFF");
                    v = 0xFF;
                }
                value = v;
            }
            b'1'..=b'9' => {
                // Decimal ASCII code, NOT octal.
                let mut v: u32 = 0;
                while self.cur().is_ascii_digit() {
                    v = v.saturating_mul(10).saturating_add((self.cur() - b'0') as u32);
                    self.pos += 1;
                }
                if v > 0xFF {
                    self.warning("value in escape character is too big, truncating to 0xFF");
                    v = 0xFF;
                }
                value = v;
            }
            _ => {
                return Err(self.error("unknown escape character"));
            }
        }
        Ok(value as u8)
    }

    fn read_string(&mut self, quote: u8, tok: &mut Token) -> ScanResult<()> {
        tok.set_kind(if quote == b'"' {
            TokenKind::String
        } else {
            TokenKind::Literal
        });

        self.pos += 1; // leading quote
        loop {
            if self.cur() == b'\\' && !self.flags.contains(ScanFlags::NO_STRING_ESCAPE_CHARS) {
                let c = self.read_escape_character()?;
                tok.append_byte(c);
            } else if self.cur() == quote {
                self.pos += 1;

                // Strings separated only by whitespace concatenate unless
                // disabled; with the backslash flag a '\' continuation still
                // concatenates double-quoted strings.
                if self.flags.contains(ScanFlags::NO_STRING_CONCAT)
                    && (!self.flags.contains(ScanFlags::ALLOW_BACKSLASH_STRING_CONCAT)
                        || quote != b'"')
                {
                    break;
                }

                let save_pos = self.pos;
                let save_line = self.line;
                if !self.read_whitespace() {
                    self.pos = save_pos;
                    self.line = save_line;
                    break;
                }

                if self.flags.contains(ScanFlags::NO_STRING_CONCAT) {
                    if self.cur() != b'\\' {
                        self.pos = save_pos;
                        self.line = save_line;
                        break;
                    }
                    self.pos += 1;
                    if !self.read_whitespace() || self.cur() != quote {
                        return Err(self.error("expecting string after '\\' terminated line"));
                    }
                }

                if self.cur() != quote {
                    self.pos = save_pos;
                    self.line = save_line;
                    break;
                }
                self.pos += 1; // the new leading quote
            } else {
                if self.cur() == 0 {
                    return Err(self.error("missing trailing quote"));
                }
                if self.cur() == b'\n' {
                    return Err(self.error("newline inside string"));
                }
                let ch = self.buf[self.pos..].chars().next().unwrap_or('\0');
                tok.append_char(ch);
                self.pos += ch.len_utf8();
            }
        }

        if tok.kind() == TokenKind::Literal
            && !self.flags.contains(ScanFlags::ALLOW_MULTI_CHAR_LITERALS)
            && tok.len() > 1
        {
            return Err(self.error("character literal is longer than one character"));
        }

        Ok(())
    }

    fn read_name(&mut self, tok: &mut Token) {
        tok.set_kind(TokenKind::Identifier);
        loop {
            tok.append_byte(self.cur());
            self.pos += 1;
            let c = self.cur();
            let valid = c.is_ascii_alphanumeric()
                || c == b'_'
                || (self.flags.contains(ScanFlags::ONLY_STRINGS) && c == b'-')
                || (self.flags.contains(ScanFlags::ALLOW_PATH_NAMES)
                    && matches!(c, b'/' | b'\\' | b':' | b'.'));
            if !valid {
                break;
            }
        }
        // The boolean constants are the only reserved names.
        tok.set_flags(if tok.text() == "true" || tok.text() == "false" {
            NumberFlags::BOOLEAN
        } else {
            NumberFlags::empty()
        });
    }

    fn read_number(&mut self, tok: &mut Token) -> ScanResult<()> {
        let c1 = self.cur();
        let c2 = self.at(self.pos + 1);
        let mut flags = NumberFlags::empty();

        if c1 == b'0' && c2 != b'.' {
            if c2 == b'x' || c2 == b'X' {
                tok.append_byte(self.cur());
                self.pos += 1;
                tok.append_byte(self.cur());
                self.pos += 1;
                while self.cur().is_ascii_hexdigit() {
                    tok.append_byte(self.cur());
                    self.pos += 1;
                }
                flags = NumberFlags::HEXADECIMAL | NumberFlags::INTEGER;
            } else if c2 == b'b' || c2 == b'B' {
                tok.append_byte(self.cur());
                self.pos += 1;
                tok.append_byte(self.cur());
                self.pos += 1;
                while self.cur() == b'0' || self.cur() == b'1' {
                    tok.append_byte(self.cur());
                    self.pos += 1;
                }
                flags = NumberFlags::BINARY | NumberFlags::INTEGER;
            } else {
                tok.append_byte(self.cur());
                self.pos += 1;
                while (b'0'..=b'7').contains(&self.cur()) {
                    tok.append_byte(self.cur());
                    self.pos += 1;
                }
                flags = NumberFlags::OCTAL | NumberFlags::INTEGER;
            }
        } else {
            // Decimal integer, floating point or an IPv4 address.
            let mut dots = 0;
            loop {
                let c = self.cur();
                if c.is_ascii_digit() {
                    // part of the number
                } else if c == b'.' {
                    dots += 1;
                } else {
                    break;
                }
                tok.append_byte(c);
                self.pos += 1;
            }

            if self.cur() == b'e' && dots == 0 {
                // Scientific notation without a decimal point.
                dots = 1;
            }

            if dots == 1 {
                flags = NumberFlags::DECIMAL | NumberFlags::FLOATING_POINT;
                if self.cur() == b'e' {
                    tok.append_byte(self.cur());
                    self.pos += 1;
                    if self.cur() == b'-' || self.cur() == b'+' {
                        tok.append_byte(self.cur());
                        self.pos += 1;
                    }
                    while self.cur().is_ascii_digit() {
                        tok.append_byte(self.cur());
                        self.pos += 1;
                    }
                } else if self.cur() == b'#' {
                    // 1.#INF, 1.#IND, 1.#NAN, 1.#QNAN, 1.#SNAN
                    let rest = &self.buf.as_bytes()[self.pos + 1..];
                    let (len, exception) = if rest.starts_with(b"QNAN") || rest.starts_with(b"SNAN")
                    {
                        (5, NumberFlags::NAN)
                    } else if rest.starts_with(b"INF") {
                        (4, NumberFlags::INFINITE)
                    } else if rest.starts_with(b"IND") {
                        (4, NumberFlags::INDEFINITE)
                    } else if rest.starts_with(b"NAN") {
                        (4, NumberFlags::NAN)
                    } else {
                        (4, NumberFlags::empty())
                    };
                    flags |= exception;
                    for _ in 0..len {
                        if self.cur() == 0 {
                            break;
                        }
                        tok.append_byte(self.cur());
                        self.pos += 1;
                    }
                    while self.cur().is_ascii_digit() {
                        tok.append_byte(self.cur());
                        self.pos += 1;
                    }
                    if !self.flags.contains(ScanFlags::ALLOW_FLOAT_EXCEPTIONS) {
                        return Err(self.error(format!(
                            "floating-point exception scanned: {}",
                            tok.text()
                        )));
                    }
                }
            } else if dots > 1 {
                if !self.flags.contains(ScanFlags::ALLOW_IP_ADDRESSES) {
                    return Err(self.error("more than one dot in number"));
                }
                if dots != 3 {
                    return Err(self.error("IP address must have three dots"));
                }
                flags = NumberFlags::IP_ADDRESS;
            } else {
                flags = NumberFlags::DECIMAL | NumberFlags::INTEGER;
            }
        }

        if flags.contains(NumberFlags::FLOATING_POINT) {
            let c = self.cur();
            if c > b' ' {
                if c == b'f' || c == b'F' {
                    flags |= NumberFlags::SINGLE_PRECISION;
                    self.pos += 1;
                } else if c == b'l' || c == b'L' {
                    flags |= NumberFlags::EXTENDED_PRECISION;
                    self.pos += 1;
                } else {
                    flags |= NumberFlags::DOUBLE_PRECISION;
                }
            } else {
                flags |= NumberFlags::DOUBLE_PRECISION;
            }
        } else if flags.contains(NumberFlags::INTEGER) {
            let mut int_flag = NumberFlags::SIGNED_INTEGER;
            if self.cur() > b' ' {
                // Up to two of u|U|l|L in either order: 1u, 1l, 1ul, 1lu.
                for _ in 0..2 {
                    let c = self.cur();
                    if c == b'u' || c == b'U' {
                        int_flag = NumberFlags::UNSIGNED_INTEGER;
                    } else if c == b'l' || c == b'L' {
                        // long: signedness unchanged
                    } else {
                        break;
                    }
                    self.pos += 1;
                }
            }
            flags |= int_flag;
        } else if flags.contains(NumberFlags::IP_ADDRESS) {
            if self.cur() == b':' {
                tok.append_byte(self.cur());
                self.pos += 1;
                while self.cur().is_ascii_digit() {
                    tok.append_byte(self.cur());
                    self.pos += 1;
                }
                flags |= NumberFlags::IP_PORT;
            }
        }

        tok.set_kind(TokenKind::Number);
        tok.set_flags(flags);
        Ok(())
    }

    fn read_punctuation(&mut self, tok: &mut Token) -> bool {
        let rest = &self.buf[self.pos..];
        let Some(def) = self.table.match_longest(rest) else {
            return false;
        };
        tok.append_str(def.text);
        tok.set_kind(TokenKind::Punctuation);
        tok.set_punct(def.id);
        self.pos += def.text.len();
        true
    }

    /// Reads a boolean token; `true|false` and numbers qualify.
    pub fn scan_bool(&mut self) -> ScanResult<bool> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error("couldn't read expected boolean literal"));
        };
        if !tok.is_boolean() && !tok.is_number() {
            return Err(self.error(format!(
                "expected boolean literal or number, found '{}'",
                tok.text()
            )));
        }
        if tok.as_u64() > 1 {
            self.warning("expected 0 or 1 for numerical boolean literal");
        }
        Ok(tok.as_bool())
    }

    /// Reads a signed or unsigned decimal floating-point number.
    pub fn scan_f64(&mut self) -> ScanResult<f64> {
        const BAD: NumberFlags = NumberFlags::BINARY
            .union(NumberFlags::OCTAL)
            .union(NumberFlags::HEXADECIMAL)
            .union(NumberFlags::IP_ADDRESS)
            .union(NumberFlags::IP_PORT);

        let Some(tok) = self.next_token()? else {
            return Err(self.error("couldn't read expected floating-point number"));
        };

        if tok.is_number() && tok.flags().intersects(BAD) {
            return Err(self.error("number format cannot be scanned as a floating-point value"));
        }

        if tok.is_punct(PunctId::Sub) {
            let tok = self.expect_token_kind(TokenKind::Number, NumberFlags::empty())?;
            if tok.flags().intersects(BAD) {
                return Err(self.error("number format cannot be scanned as a floating-point value"));
            }
            Ok(-tok.as_f64())
        } else if !tok.is_number() {
            Err(self.error(format!("expected float value, found '{}'", tok.text())))
        } else {
            Ok(tok.as_f64())
        }
    }

    pub fn scan_f32(&mut self) -> ScanResult<f32> {
        Ok(self.scan_f64()? as f32)
    }

    pub fn scan_u64(&mut self) -> ScanResult<u64> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error("couldn't read expected unsigned integer number"));
        };
        if tok.is_float() {
            self.warning("expected unsigned integer number, got float; truncating it");
        }
        if tok.is_punct(PunctId::Sub) {
            self.warning("expected unsigned integer number, got a negative value");
            let tok = self.expect_token_kind(TokenKind::Number, NumberFlags::empty())?;
            if tok.is_float() {
                self.warning("expected unsigned integer number, got float; truncating it");
            }
            Ok((-tok.as_i64()) as u64)
        } else if !tok.is_number() {
            Err(self.error(format!(
                "expected unsigned integer value, found '{}'",
                tok.text()
            )))
        } else {
            Ok(tok.as_u64())
        }
    }

    pub fn scan_i64(&mut self) -> ScanResult<i64> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error("couldn't read expected integer number"));
        };
        if tok.is_float() {
            self.warning("expected integer number, got float; truncating it");
        }
        if tok.is_punct(PunctId::Sub) {
            let tok = self.expect_token_kind(TokenKind::Number, NumberFlags::empty())?;
            if tok.is_float() {
                self.warning("expected integer number, got float; truncating it");
            }
            Ok(-tok.as_i64())
        } else if !tok.is_number() {
            Err(self.error(format!("expected integer value, found '{}'", tok.text())))
        } else {
            Ok(tok.as_i64())
        }
    }

    /// Reads a quoted string or character literal; quotes are not included
    /// in the output.
    pub fn scan_string(&mut self) -> ScanResult<String> {
        let Some(mut tok) = self.next_token()? else {
            return Err(self.error("couldn't read expected string"));
        };
        if !tok.is_string() && !tok.is_literal() {
            return Err(self.error(format!(
                "expected string or character literal, found '{}'",
                tok.text()
            )));
        }
        Ok(tok.take_text())
    }

    /// Scans any number or boolean, picking the conversion by target type.
    pub fn scan_number<T: ScanNumber>(&mut self) -> ScanResult<T> {
        T::scan(self)
    }

    fn ignore_trailing_comma(&mut self, i: usize, count: usize) -> ScanResult<()> {
        if i + 1 != count {
            self.expect_punct(PunctId::Comma)?;
        } else {
            // Last value: a trailing comma is tolerated.
            if let Some(tok) = self.next_token()? {
                if !tok.is_punct(PunctId::Comma) {
                    self.unget_token(tok);
                }
            }
        }
        Ok(())
    }

    /// Scans `open v, v, ... close`, filling `out`.
    pub fn scan_matrix1d<T: ScanNumber>(
        &mut self,
        out: &mut [T],
        open_delim: &str,
        close_delim: &str,
        comma_separated: bool,
    ) -> ScanResult<()> {
        self.expect_token_text(open_delim)?;
        let count = out.len();
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.scan_number()?;
            if comma_separated {
                self.ignore_trailing_comma(i, count)?;
            }
        }
        self.expect_token_text(close_delim)?;
        Ok(())
    }

    /// Scans a `y`-by-`x` nested tuple into the row-major `out` slice.
    pub fn scan_matrix2d<T: ScanNumber>(
        &mut self,
        y: usize,
        x: usize,
        out: &mut [T],
        open_delim: &str,
        close_delim: &str,
        comma_separated: bool,
    ) -> ScanResult<()> {
        self.expect_token_text(open_delim)?;
        for i in 0..y {
            self.scan_matrix1d(
                &mut out[i * x..(i + 1) * x],
                open_delim,
                close_delim,
                comma_separated,
            )?;
            if comma_separated {
                self.ignore_trailing_comma(i, y)?;
            }
        }
        self.expect_token_text(close_delim)?;
        Ok(())
    }

    /// Scans a `z`-by-`y`-by-`x` nested tuple into the row-major `out` slice.
    pub fn scan_matrix3d<T: ScanNumber>(
        &mut self,
        z: usize,
        y: usize,
        x: usize,
        out: &mut [T],
        open_delim: &str,
        close_delim: &str,
        comma_separated: bool,
    ) -> ScanResult<()> {
        self.expect_token_text(open_delim)?;
        for i in 0..z {
            self.scan_matrix2d(
                y,
                x,
                &mut out[i * x * y..(i + 1) * x * y],
                open_delim,
                close_delim,
                comma_separated,
            )?;
            if comma_separated {
                self.ignore_trailing_comma(i, z)?;
            }
        }
        self.expect_token_text(close_delim)?;
        Ok(())
    }

    /// Reads a `{}` bracketed section into a string, one space per token.
    pub fn scan_bracketed_section(&mut self) -> ScanResult<String> {
        self.expect_punct(PunctId::OpenBrace)?;

        let mut out = String::from("{");
        let mut depth = 1;
        while depth > 0 {
            let Some(tok) = self.next_token()? else {
                return Err(self.error("missing closing '}'"));
            };
            for _ in 0..tok.lines_crossed() {
                out.push('\n');
            }
            if tok.is_punct(PunctId::OpenBrace) {
                depth += 1;
            } else if tok.is_punct(PunctId::CloseBrace) {
                depth -= 1;
            }
            if tok.is_string() {
                out.push('"');
                out.push_str(tok.text());
                out.push('"');
            } else {
                out.push_str(tok.text());
            }
            out.push(' ');
        }
        Ok(out)
    }

    /// Reads a `{}` bracketed section keeping newlines; with `tabs >= 0`
    /// indentation is redone with that many leading tabs per depth.
    pub fn scan_bracketed_section_exact(&mut self, mut tabs: i32) -> ScanResult<String> {
        self.expect_token_text("{")?;

        let mut out = String::from("{");
        let mut depth = 1;
        let mut skip_white = false;
        let do_tabs = tabs >= 0;

        while depth > 0 && self.cur() != 0 {
            let ch = self.buf[self.pos..].chars().next().unwrap_or('\0');
            self.pos += ch.len_utf8();

            match ch {
                '\t' | ' ' => {
                    if skip_white {
                        continue;
                    }
                }
                '\n' => {
                    self.line += 1;
                    if do_tabs {
                        out.push('\n');
                        skip_white = true;
                        continue;
                    }
                }
                '{' => {
                    depth += 1;
                    tabs += 1;
                }
                '}' => {
                    depth -= 1;
                    tabs -= 1;
                }
                _ => {}
            }

            if skip_white {
                let mut i = tabs;
                if ch == '{' {
                    i -= 1;
                }
                skip_white = false;
                while i > 0 {
                    out.push('\t');
                    i -= 1;
                }
            }
            out.push(ch);
        }

        Ok(out)
    }

    /// Reads the rest of the line via tokenization, space separated.
    pub fn scan_rest_of_line(&mut self) -> ScanResult<String> {
        let mut out = String::new();
        while let Some(tok) = self.next_token()? {
            if tok.lines_crossed() != 0 {
                self.rewind_last();
                break;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(tok.text());
        }
        Ok(out)
    }

    /// Pulls the raw remainder of the current line including the newline,
    /// without eating any whitespace at the start of the next one.
    pub fn scan_complete_line(&mut self) -> String {
        let start = self.pos;
        while self.cur() != 0 {
            let c = self.cur();
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
                break;
            }
        }
        self.buf[start..self.pos].to_string()
    }

    pub fn last_whitespace(&self) -> &str {
        &self.buf[self.ws_start..self.ws_end]
    }

    pub fn last_whitespace_length(&self) -> usize {
        self.ws_end - self.ws_start
    }

    pub fn last_whitespace_start(&self) -> usize {
        self.ws_start
    }

    pub fn last_whitespace_end(&self) -> usize {
        self.ws_end
    }
}

/// Conversion selector for `Lexer::scan_number` and the matrix helpers.
pub trait ScanNumber: Sized {
    fn scan(lexer: &mut Lexer<'_>) -> ScanResult<Self>;
}

impl ScanNumber for f64 {
    fn scan(lexer: &mut Lexer<'_>) -> ScanResult<Self> {
        lexer.scan_f64()
    }
}

impl ScanNumber for f32 {
    fn scan(lexer: &mut Lexer<'_>) -> ScanResult<Self> {
        lexer.scan_f32()
    }
}

impl ScanNumber for i64 {
    fn scan(lexer: &mut Lexer<'_>) -> ScanResult<Self> {
        lexer.scan_i64()
    }
}

impl ScanNumber for i32 {
    fn scan(lexer: &mut Lexer<'_>) -> ScanResult<Self> {
        Ok(lexer.scan_i64()? as i32)
    }
}

impl ScanNumber for u64 {
    fn scan(lexer: &mut Lexer<'_>) -> ScanResult<Self> {
        lexer.scan_u64()
    }
}

impl ScanNumber for u32 {
    fn scan(lexer: &mut Lexer<'_>) -> ScanResult<Self> {
        Ok(lexer.scan_u64()? as u32)
    }
}

impl ScanNumber for bool {
    fn scan(lexer: &mut Lexer<'_>) -> ScanResult<Self> {
        lexer.scan_bool()
    }
}

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use bitflags::bitflags;
use log::debug;

use lex::{ErrorSink, Lexer, NumberFlags, PunctId, ScanFlags, StderrSink, Token, TokenKind};

use crate::eval::{value_to_token, EvalFlags, ExprEvaluator};
use crate::macros::{hash_name, MacroDef, MacroTable, BUILTIN_DATE, BUILTIN_FILE, BUILTIN_LINE, BUILTIN_TIME, BUILTIN_VA_ARGS};

bitflags! {
    /// Preprocessor behavior switches. The error controls are forwarded to
    /// every scanner the preprocessor creates.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PpFlags: u32 {
        const NO_ERRORS                = 1 << 0;
        const NO_WARNINGS              = 1 << 1;
        const NO_FATAL_ERRORS          = 1 << 2;
        /// Don't accept `$` as a directive introducer.
        const NO_DOLLAR_PREPROC        = 1 << 3;
        /// Don't include files enclosed in `< >`.
        const NO_BASE_INCLUDES         = 1 << 4;
        /// Disable the #include directive entirely.
        const NO_INCLUDES              = 1 << 5;
        /// Warn when a #defined macro is #defined again.
        const WARN_MACRO_REDEFINITIONS = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CondKind {
    If,
    Ifdef,
    Ifndef,
    Elif,
    Else,
}

#[derive(Clone, Copy, Debug)]
struct Conditional {
    kind: CondKind,
    skip_body: bool,
    parent_state: bool,
}

/// Recursive macro expansion is cut off here; direct self-reference is a
/// dedicated error before the cap is reached.
const MAX_EXPANSION_DEPTH: usize = 128;

/// Where a macro invocation pulls its argument tokens from: the active
/// script, a slice of body tokens of the enclosing expansion, or the
/// parameter names/expansions of the enclosing invocation.
enum ParamPack {
    Script,
    Slice {
        toks: Vec<Token>,
        consumed: usize,
    },
    Params {
        names: Vec<Token>,
        expands: Vec<Token>,
        available: usize,
        consumed: usize,
    },
}

impl ParamPack {
    fn find_param(&self, wanted: &Token) -> Option<Token> {
        if let ParamPack::Params {
            names,
            expands,
            available,
            ..
        } = self
        {
            for t in 0..*available {
                let Some(name) = names.get(t) else {
                    break;
                };
                if name.kind() == wanted.kind() && name.text() == wanted.text() {
                    return expands.get(t).cloned();
                }
            }
        }
        None
    }

    fn tokens_left(&self) -> usize {
        match self {
            ParamPack::Script => 0,
            ParamPack::Slice { toks, consumed } => toks.len() - consumed,
            ParamPack::Params {
                available, consumed, ..
            } => available - consumed,
        }
    }

    fn consumed(&self) -> usize {
        match self {
            ParamPack::Script => 0,
            ParamPack::Slice { consumed, .. } => *consumed,
            ParamPack::Params { consumed, .. } => *consumed,
        }
    }

    fn reset(&mut self) {
        match self {
            ParamPack::Script => {}
            ParamPack::Slice { consumed, .. } => *consumed = 0,
            ParamPack::Params { consumed, .. } => *consumed = 0,
        }
    }
}

/// C-like source preprocessor built on the `lex` scanner.
///
/// Pulls tokens from a stack of scanners (the top is the active include),
/// dispatches `#` and `$` directives, expands macros and emits a minified
/// token stream.
pub struct Preprocessor<'a> {
    scripts: Vec<Lexer<'a>>,
    /// Every file name ever opened, in order. Backs `#pragma once`.
    seen_files: Vec<String>,
    flags: PpFlags,
    skipping: i32,
    out_line_len: usize,
    max_line_len: usize,
    prev_kind: TokenKind,
    macros: MacroTable,
    cond_stack: Vec<Conditional>,
    search_paths: Vec<String>,
    sink: Rc<dyn ErrorSink>,
    acc_errors: u32,
    acc_warnings: u32,
}

impl<'a> Preprocessor<'a> {
    pub fn new() -> Self {
        Self {
            scripts: Vec::new(),
            seen_files: Vec::new(),
            flags: PpFlags::empty(),
            skipping: 0,
            out_line_len: 0,
            max_line_len: 128,
            prev_kind: TokenKind::None,
            macros: MacroTable::new(),
            cond_stack: Vec::new(),
            search_paths: Vec::new(),
            sink: Rc::new(StderrSink),
            acc_errors: 0,
            acc_warnings: 0,
        }
    }

    pub fn set_error_sink(&mut self, sink: Rc<dyn ErrorSink>) {
        self.sink = sink;
    }

    pub fn is_initialized(&self) -> bool {
        !self.scripts.is_empty()
    }

    pub fn allow_dollar_preproc(&self) -> bool {
        !self.flags.contains(PpFlags::NO_DOLLAR_PREPROC)
    }

    pub fn allow_base_includes(&self) -> bool {
        !self.flags.contains(PpFlags::NO_BASE_INCLUDES)
    }

    pub fn allow_includes(&self) -> bool {
        !self.flags.contains(PpFlags::NO_INCLUDES)
    }

    /// Hint for the output minifier; lines only actually break at
    /// semicolons.
    pub fn max_output_line_length(&self) -> usize {
        self.max_line_len
    }

    pub fn set_max_output_line_length(&mut self, value: usize) {
        self.max_line_len = value;
    }

    /// Default search paths are prepended to filenames included with `< >`.
    pub fn add_default_search_path(&mut self, path: impl Into<String>) -> bool {
        let mut path = path.into();
        if path.is_empty() {
            return false;
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        self.search_paths.push(path);
        true
    }

    pub fn clear_default_search_paths(&mut self) {
        self.search_paths.clear();
    }

    pub fn error_count(&self) -> u32 {
        self.acc_errors + self.scripts.iter().map(|s| s.error_count()).sum::<u32>()
    }

    pub fn warning_count(&self) -> u32 {
        self.acc_warnings + self.scripts.iter().map(|s| s.warning_count()).sum::<u32>()
    }

    pub fn enable_warnings(&mut self) {
        self.flags.remove(PpFlags::NO_WARNINGS);
        if let Some(script) = self.scripts.last_mut() {
            let flags = script.flags() & !ScanFlags::NO_WARNINGS;
            script.set_flags(flags);
        }
    }

    pub fn disable_warnings(&mut self) {
        self.flags.insert(PpFlags::NO_WARNINGS);
        if let Some(script) = self.scripts.last_mut() {
            let flags = script.flags() | ScanFlags::NO_WARNINGS;
            script.set_flags(flags);
        }
    }

    /// Flags, line-length hint and search paths are preserved. Macros are
    /// reset to just the built-ins.
    pub fn clear(&mut self) {
        self.scripts.clear();
        self.seen_files.clear();
        self.skipping = 0;
        self.out_line_len = 0;
        self.prev_kind = TokenKind::None;
        self.cond_stack.clear();
        self.macros.undef_all(true);
        self.acc_errors = 0;
        self.acc_warnings = 0;
    }

    fn lex_flags(&self) -> ScanFlags {
        // The preprocessor re-emits strings itself, so consecutive strings
        // must stay separate tokens.
        let mut flags = ScanFlags::NO_STRING_CONCAT;
        if self.flags.contains(PpFlags::NO_ERRORS) {
            flags |= ScanFlags::NO_ERRORS;
        }
        if self.flags.contains(PpFlags::NO_WARNINGS) {
            flags |= ScanFlags::NO_WARNINGS;
        }
        if self.flags.contains(PpFlags::NO_FATAL_ERRORS) {
            flags |= ScanFlags::NO_FATAL_ERRORS;
        }
        flags
    }

    /// Loads the initial script from a file.
    pub fn init_from_file(&mut self, path: impl AsRef<Path>, flags: PpFlags) -> Result<()> {
        if !self.scripts.is_empty() {
            return Err(self.error("another script is already loaded"));
        }
        self.flags = flags;
        let mut script = Lexer::from_file(path, self.lex_flags())?;
        script.set_error_sink(self.sink.clone());
        self.push_script(script);
        Ok(())
    }

    /// Preprocesses an external buffer. The caller keeps ownership.
    pub fn init_from_str(
        &mut self,
        src: &'a str,
        filename: impl Into<String>,
        flags: PpFlags,
    ) -> Result<()> {
        if !self.scripts.is_empty() {
            return Err(self.error("another script is already loaded"));
        }
        self.flags = flags;
        let mut script = Lexer::from_str(src, filename, self.lex_flags(), 1);
        script.set_error_sink(self.sink.clone());
        self.push_script(script);
        Ok(())
    }

    /// Takes over an externally prepared scanner.
    pub fn init_from_lexer(&mut self, mut script: Lexer<'a>, flags: PpFlags) -> Result<()> {
        if !self.scripts.is_empty() {
            return Err(self.error("another script is already loaded"));
        }
        if !script.is_initialized() {
            return Err(anyhow!("scanner has no script loaded"));
        }
        self.flags = flags;
        let mut scan_flags = script.flags();
        if self.flags.contains(PpFlags::NO_ERRORS) {
            scan_flags |= ScanFlags::NO_ERRORS;
        }
        if self.flags.contains(PpFlags::NO_WARNINGS) {
            scan_flags |= ScanFlags::NO_WARNINGS;
        }
        if self.flags.contains(PpFlags::NO_FATAL_ERRORS) {
            scan_flags |= ScanFlags::NO_FATAL_ERRORS;
        }
        script.set_flags(scan_flags);
        script.set_error_sink(self.sink.clone());
        self.push_script(script);
        Ok(())
    }

    fn push_script(&mut self, script: Lexer<'a>) {
        debug!("entering \"{}\"", script.filename());
        self.seen_files.push(script.filename().to_string());
        self.scripts.push(script);
    }

    fn pop_script(&mut self) {
        if let Some(script) = self.scripts.pop() {
            debug!("leaving \"{}\"", script.filename());
            self.acc_errors += script.error_count();
            self.acc_warnings += script.warning_count();
        }
    }

    /// Runs the preprocessor over the loaded script and all includes,
    /// producing the flattened minified output.
    pub fn preprocess(&mut self) -> Result<String> {
        if self.scripts.is_empty() {
            return Err(anyhow!("no script loaded"));
        }

        let mut out = String::new();
        out.reserve(self.scripts.last().map(|s| s.script_length()).unwrap_or(0));

        loop {
            let Some(script) = self.scripts.last_mut() else {
                break;
            };
            let tok = match script.next_token() {
                Ok(tok) => tok,
                Err(e) if e.fatal => return Err(e.into()),
                // A non-fatal scan error was already reported; the rest of
                // this script is abandoned.
                Err(_) => None,
            };

            let Some(tok) = tok else {
                if self.scripts.len() > 1 {
                    self.pop_script();
                    continue;
                }
                break;
            };

            if self.check_preproc(&tok) {
                if let Err(e) = self.resolve_preproc_and_append(&tok, &mut out) {
                    // Errors were already reported and counted; without
                    // fatal errors the loop keeps going.
                    if !self.flags.contains(PpFlags::NO_FATAL_ERRORS) {
                        return Err(e);
                    }
                }
                continue;
            }

            // Inside a skipped conditional block.
            if self.skipping > 0 {
                continue;
            }

            if tok.is_identifier() {
                if let Some(macro_index) = self.macros.find_index(hash_name(tok.text())) {
                    let mut pack = ParamPack::Script;
                    if let Err(e) =
                        self.expand_macro_and_append(macro_index, &mut out, &mut pack, None, 0)
                    {
                        if !self.flags.contains(PpFlags::NO_FATAL_ERRORS) {
                            return Err(e);
                        }
                    }
                    continue;
                }
            }

            self.output_append_token_text(&tok, &mut out, false, false);
        }

        Ok(out)
    }

    /// Reports an error through the active script (which counts and formats
    /// it) and returns the error value for the caller to propagate.
    fn error(&mut self, message: impl fmt::Display) -> anyhow::Error {
        match self.scripts.last_mut() {
            Some(script) => script.error(message).into(),
            None => anyhow!("{message}"),
        }
    }

    fn warning(&mut self, message: impl fmt::Display) {
        if let Some(script) = self.scripts.last_mut() {
            script.warning(message);
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        match self.scripts.last_mut() {
            Some(script) => Ok(script.next_token()?),
            None => Ok(None),
        }
    }

    fn next_token_on_line(&mut self) -> Result<Option<Token>> {
        match self.scripts.last_mut() {
            Some(script) => Ok(script.next_token_on_line()?),
            None => Ok(None),
        }
    }

    fn unget_token(&mut self, tok: Token) {
        if let Some(script) = self.scripts.last_mut() {
            script.unget_token(tok);
        }
    }

    fn skip_rest_of_line(&mut self) -> Result<()> {
        if let Some(script) = self.scripts.last_mut() {
            script.skip_rest_of_line()?;
        }
        Ok(())
    }

    /// Reads tokens to the end of the line, honoring `\` continuations.
    /// Token texts are appended without separators.
    fn read_line(&mut self) -> Result<String> {
        let mut out = String::new();
        let mut got_backslash = false;
        while let Some(tok) = self.next_token()? {
            if tok.is_punct(PunctId::Backslash) {
                got_backslash = true;
                continue;
            }
            if !got_backslash && tok.lines_crossed() != 0 {
                self.unget_token(tok);
                break;
            }
            out.push_str(tok.text());
            got_backslash = false;
        }
        Ok(out)
    }

    fn check_preproc(&self, tok: &Token) -> bool {
        tok.is_punct(PunctId::Hash)
            || (tok.is_punct(PunctId::Dollar) && self.allow_dollar_preproc())
    }

    fn resolve_preproc_and_append(&mut self, tok: &Token, out: &mut String) -> Result<()> {
        if tok.is_punct(PunctId::Hash) {
            self.resolve_hash_directive()
        } else {
            self.resolve_dollar_directive(out)
        }
    }

    fn resolve_hash_directive(&mut self) -> Result<()> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error("found preprocessor directive without a following command"));
        };
        if tok.lines_crossed() != 0 {
            self.unget_token(tok);
            return Err(self.error("preprocessor command found at end of line"));
        }
        if !tok.is_identifier() {
            return Err(self.error(format!(
                "invalid preprocessor directive '{}'; expected an identifier after the preprocessor symbol",
                tok.text()
            )));
        }

        match tok.text() {
            "if" => self.resolve_if_directive(),
            "ifdef" => self.resolve_ifdef_directive(),
            "ifndef" => self.resolve_ifndef_directive(),
            "elif" => self.resolve_elif_directive(),
            "else" => self.resolve_else_directive(),
            "endif" => self.resolve_endif_directive(),
            // Everything but the conditional set is suppressed inside a
            // skipped block.
            _ if self.skipping > 0 => {
                self.skip_rest_of_line()?;
                Ok(())
            }
            "include" => self.resolve_include_directive(),
            "define" => self.resolve_define_directive(),
            "undef" => self.resolve_undef_directive(),
            "line" => self.resolve_line_directive(),
            "error" => self.resolve_error_directive(),
            // #warn is an extension.
            "warning" | "warn" => self.resolve_warning_directive(),
            "pragma" => self.resolve_pragma_directive(),
            "eval" | "evalint" | "evalfloat" => Err(self.error(format!(
                "'{}' preprocessor directive must be preceded by '$'",
                tok.text()
            ))),
            other => {
                let message = format!("unknown preprocessor directive '{other}'");
                Err(self.error(message))
            }
        }
    }

    fn resolve_dollar_directive(&mut self, out: &mut String) -> Result<()> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error("found preprocessor directive without a following command"));
        };
        if tok.lines_crossed() != 0 {
            self.unget_token(tok);
            return Err(self.error("preprocessor command found at end of line"));
        }

        // $eval() resolves the predefined math functions and constants.
        let mut flags = EvalFlags::ALLOW_MATH_FUNCS | EvalFlags::ALLOW_MATH_CONSTS;
        if tok == "eval" {
            flags |= EvalFlags::DETECT_TYPE;
        } else if tok == "evalint" {
            flags |= EvalFlags::FORCE_INT;
        } else if tok == "evalfloat" {
            flags |= EvalFlags::FORCE_FLOAT;
        } else {
            return Err(self.error(
                "expected 'eval', 'evalint' or 'evalfloat' after the '$' preprocessor directive",
            ));
        }

        match self.next_token()? {
            Some(t) if t.is_punct(PunctId::OpenParen) => {}
            _ => return Err(self.error("expected '(' after the 'eval' directive")),
        }

        let mut depth = 1;
        let mut closed = false;
        let mut tokens = Vec::new();
        while let Some(t) = self.next_token()? {
            if t.is_punct(PunctId::OpenParen) {
                depth += 1;
            } else if t.is_punct(PunctId::CloseParen) {
                depth -= 1;
                if depth == 0 {
                    closed = true;
                    break;
                }
            }
            // Parentheses are kept; the evaluator uses them for grouping.
            tokens.push(t);
        }
        if !closed {
            return Err(self.error("expected ')' at the end of the 'eval' directive"));
        }

        if self.skipping > 0 {
            return Ok(());
        }
        if tokens.is_empty() {
            self.warning("empty preprocessor eval directive");
            return Ok(());
        }

        let result = ExprEvaluator::with_tokens(&self.macros, tokens).evaluate(flags);
        let value = match result {
            Ok(value) => value,
            Err(e) => return Err(self.error(e.to_string())),
        };

        let tok = value_to_token(value, flags);
        self.output_append_token_text(&tok, out, false, false);
        Ok(())
    }

    //
    // Conditional directives:
    //

    fn push_conditional(&mut self, kind: CondKind, skip_body: bool, parent_state: Option<bool>) {
        self.cond_stack.push(Conditional {
            kind,
            skip_body,
            parent_state: parent_state.unwrap_or(skip_body),
        });
        self.skipping += skip_body as i32;
    }

    fn pop_conditional(&mut self) -> Option<Conditional> {
        let top = self.cond_stack.pop()?;
        self.skipping -= top.skip_body as i32;
        Some(top)
    }

    fn evaluate_preproc_conditional(&mut self) -> Result<bool> {
        let mut tokens = Vec::new();
        let mut got_backslash = false;
        let mut depth = 0i32;

        // Tokens to the end of the line; a trailing '\' continues on the
        // next line.
        while let Some(tok) = self.next_token()? {
            if tok.is_punct(PunctId::Backslash) {
                got_backslash = true;
                continue;
            }
            if !got_backslash && tok.lines_crossed() != 0 {
                self.unget_token(tok);
                break;
            }
            if tok.is_punct(PunctId::OpenParen) {
                depth += 1;
            } else if tok.is_punct(PunctId::CloseParen) {
                depth -= 1;
            }
            tokens.push(tok);
            got_backslash = false;
        }

        if depth != 0 {
            return Err(self.error("unbalanced parentheses in #if/#elif directive"));
        }
        if tokens.is_empty() {
            return Err(self.error("no expression after #if/#elif directive"));
        }

        let result = ExprEvaluator::with_tokens(&self.macros, tokens)
            .evaluate(EvalFlags::DETECT_TYPE | EvalFlags::UNDEFINED_CONSTS_ARE_ZERO);
        match result {
            Ok(value) => Ok(value.is_truthy()),
            Err(e) => Err(self.error(e.to_string())),
        }
    }

    fn resolve_if_directive(&mut self) -> Result<()> {
        let result = self.evaluate_preproc_conditional()?;
        self.push_conditional(CondKind::If, !result, None);
        Ok(())
    }

    fn resolve_ifdef_directive(&mut self) -> Result<()> {
        let Some(tok) = self.next_token_on_line()? else {
            return Err(self.error("expected a name/identifier after the #ifdef directive"));
        };
        if !tok.is_identifier() {
            return Err(self.error("expected a name/identifier after the #ifdef directive"));
        }
        let defined = self.macros.is_defined(tok.text());
        self.push_conditional(CondKind::Ifdef, !defined, None);
        Ok(())
    }

    fn resolve_ifndef_directive(&mut self) -> Result<()> {
        let Some(tok) = self.next_token_on_line()? else {
            return Err(self.error("expected a name/identifier after the #ifndef directive"));
        };
        if !tok.is_identifier() {
            return Err(self.error("expected a name/identifier after the #ifndef directive"));
        }
        let defined = self.macros.is_defined(tok.text());
        self.push_conditional(CondKind::Ifndef, defined, None);
        Ok(())
    }

    fn resolve_elif_directive(&mut self) -> Result<()> {
        let prev = match self.pop_conditional() {
            Some(prev) if prev.kind != CondKind::Else => prev,
            _ => return Err(self.error("misplaced #elif directive")),
        };

        let result = self.evaluate_preproc_conditional()?;

        // A taken branch anywhere in the chain clears the parent state so
        // the optional trailing #else stays suppressed.
        let old_parent_state = prev.parent_state;
        let mut parent_state = prev.parent_state;
        if result && prev.skip_body {
            parent_state = false;
        }

        let skip_elif = !result || !prev.skip_body || !old_parent_state;
        self.push_conditional(CondKind::Elif, skip_elif, Some(parent_state));
        Ok(())
    }

    fn resolve_else_directive(&mut self) -> Result<()> {
        let Some(prev) = self.pop_conditional() else {
            return Err(self.error("misplaced #else directive"));
        };
        if prev.kind == CondKind::Else {
            return Err(self.error("#else directive followed by #else"));
        }

        // Skip unless every previous branch of the chain was skipped.
        let skip_else = !prev.skip_body || !prev.parent_state;
        self.push_conditional(CondKind::Else, skip_else, None);
        Ok(())
    }

    fn resolve_endif_directive(&mut self) -> Result<()> {
        if self.pop_conditional().is_none() {
            return Err(self.error("misplaced #endif directive"));
        }
        Ok(())
    }

    //
    // #define / #undef:
    //

    fn resolve_define_directive(&mut self) -> Result<()> {
        let Some(mut tok) = self.next_token()? else {
            return Err(self.error("empty #define directive"));
        };
        if tok.lines_crossed() != 0 {
            self.unget_token(tok);
            return Err(self.error("empty #define directive"));
        }
        if !tok.is_identifier() {
            return Err(self.error("#define directive must be followed by a name/identifier"));
        }

        let macro_name = tok.take_text();
        let mut def = MacroDef::default();

        // A parameter list only when the '(' directly follows the name with
        // no whitespace in between; otherwise the '(' belongs to the body.
        let next = self.next_token()?;
        let ws_len = self
            .scripts
            .last()
            .map(|s| s.last_whitespace_length())
            .unwrap_or(1);
        match next {
            Some(t) if ws_len == 0 && t.is_punct(PunctId::OpenParen) => {
                self.collect_macro_params(&mut def)?;
            }
            Some(t) => self.unget_token(t),
            None => {}
        }

        // Body tokens to the end of the line; '\' continues the body.
        let mut got_backslash = false;
        def.first_body = self.macros.token_count() as u32;
        while let Some(t) = self.next_token()? {
            if t.is_punct(PunctId::Backslash) {
                got_backslash = true;
                continue;
            }
            if !got_backslash && t.lines_crossed() != 0 {
                self.unget_token(t);
                break;
            }
            self.macros.push_token(t);
            def.body_count += 1;
            got_backslash = false;
        }
        if def.body_count == 0 {
            def.first_body = 0;
        }

        self.macro_define(&macro_name, def);
        Ok(())
    }

    fn collect_macro_params(&mut self, def: &mut MacroDef) -> Result<()> {
        let mut expect_comma = false;
        let mut has_va_args = false;
        def.first_param = self.macros.token_count() as u32;

        let mut last: Option<Token> = None;
        while let Some(t) = self.next_token()? {
            if t.lines_crossed() != 0 || t.is_punct(PunctId::CloseParen) {
                last = Some(t);
                break;
            }
            if t.is_punct(PunctId::Ellipsis) {
                has_va_args = true;
                expect_comma = true;
                def.va_args = true;
                continue;
            }
            if expect_comma && t.is_punct(PunctId::Comma) {
                expect_comma = false;
                continue;
            }
            if t.is_identifier() {
                if has_va_args {
                    return Err(
                        self.error("'...' can only be the last parameter in a macro declaration")
                    );
                }
                self.macros.push_token(t);
                def.param_count += 1;
                expect_comma = true;
            } else {
                return Err(self.error(format!(
                    "unexpected token '{}' in macro parameter list",
                    t.text()
                )));
            }
        }

        if !matches!(&last, Some(t) if t.is_punct(PunctId::CloseParen)) {
            return Err(self.error("missing closing ')' in function-like macro definition"));
        }

        if def.param_count == 0 {
            def.first_param = 0;
            if !def.va_args {
                def.empty_func_like = true;
            }
        } else {
            if !expect_comma {
                return Err(self.error("trailing comma in macro parameter list"));
            }
            def.empty_func_like = false;
        }
        Ok(())
    }

    fn macro_define(&mut self, name: &str, mut def: MacroDef) {
        def.hashed_name = hash_name(name);
        if self.flags.contains(PpFlags::WARN_MACRO_REDEFINITIONS)
            && self.macros.find_index(def.hashed_name).is_some()
        {
            self.warning(format!(
                "macro '{name}' is already defined and will be overwritten"
            ));
        }
        self.macros.insert(def);
        debug!("defined macro '{name}'");
    }

    fn resolve_undef_directive(&mut self) -> Result<()> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error("empty #undef directive"));
        };
        if tok.lines_crossed() != 0 {
            self.unget_token(tok);
            return Err(self.error("empty #undef directive"));
        }
        if !tok.is_identifier() {
            return Err(self.error("#undef directive must be followed by a name/identifier"));
        }
        self.macros.undefine(tok.text());
        Ok(())
    }

    //
    // #line / #error / #warning / #pragma:
    //

    fn resolve_line_directive(&mut self) -> Result<()> {
        let Some(tok) = self.next_token()? else {
            return Err(self.error("empty #line directive"));
        };
        if tok.lines_crossed() != 0 {
            self.unget_token(tok);
            return Err(self.error("empty #line directive"));
        }
        if !tok.is_number() {
            return Err(self.error("#line directive must be followed by a non-negative line number"));
        }
        let line = tok.as_u64() as u32;
        if let Some(script) = self.scripts.last_mut() {
            script.set_line_number(line);
        }
        Ok(())
    }

    fn resolve_error_directive(&mut self) -> Result<()> {
        let message = self.read_line()?;
        Err(self.error(message))
    }

    fn resolve_warning_directive(&mut self) -> Result<()> {
        let message = self.read_line()?;
        self.warning(message);
        Ok(())
    }

    fn resolve_pragma_directive(&mut self) -> Result<()> {
        let Some(mut tok) = self.next_token()? else {
            self.warning("empty #pragma directive");
            return Ok(());
        };
        if tok.lines_crossed() != 0 {
            self.unget_token(tok);
            self.warning("empty #pragma directive");
            return Ok(());
        }

        // Parentheses are optional: #pragma once and #pragma(once) agree.
        let open_paren = tok.is_punct(PunctId::OpenParen);
        if open_paren {
            match self.next_token()? {
                Some(t) => tok = t,
                None => {
                    return Err(self.error("nothing after the opening parenthesis in a #pragma directive"))
                }
            }
        }

        if !tok.is_identifier() {
            if tok.is_punct(PunctId::CloseParen) {
                self.warning("empty #pragma directive");
                return Ok(());
            }
            return Err(self.error(format!(
                "expected an identifier/name after the #pragma directive, got '{}'",
                tok.text()
            )));
        }

        if tok == "once" {
            // If this file name was opened more than once, the body has
            // already been scanned and the file is abandoned on the spot.
            let current = self
                .scripts
                .last()
                .map(|s| s.filename().to_string())
                .unwrap_or_default();
            let scans = self.seen_files.iter().filter(|f| **f == current).count();
            if scans > 1 && self.scripts.len() > 1 {
                self.pop_script();
                return Ok(());
            }
        } else if tok == "warning" {
            match self.next_token()? {
                Some(t) if t.is_punct(PunctId::Colon) => {}
                _ => return Err(self.error("'#pragma warning' must be followed by a colon")),
            }
            let Some(tok) = self.next_token()? else {
                return Err(self.error("incomplete #pragma warning command"));
            };
            if tok == "enable" {
                self.enable_warnings();
            } else if tok == "disable" {
                self.disable_warnings();
            } else {
                return Err(self.error(format!(
                    "unknown #pragma warning command: '{}'",
                    tok.text()
                )));
            }
        } else {
            self.warning(format!("ignoring unknown #pragma directive: '{}'", tok.text()));
            self.skip_rest_of_line()?;
            return Ok(());
        }

        if open_paren {
            match self.next_token()? {
                Some(t) if t.is_punct(PunctId::CloseParen) => {}
                _ => return Err(self.error("#pragma directive missing closing parenthesis")),
            }
        }
        Ok(())
    }

    //
    // #include:
    //

    fn resolve_include_directive(&mut self) -> Result<()> {
        if !self.allow_includes() {
            return Err(self.error("file inclusion via the #include directive is disabled"));
        }

        let Some(mut tok) = self.next_token_on_line()? else {
            return Err(self.error("expected a filename after the #include directive"));
        };
        if !tok.is_string() && !tok.is_punct(PunctId::Less) {
            return Err(self.error(
                "expected a string enclosed in double-quotes or '< >' after the #include directive",
            ));
        }

        let filename;
        let default_search_path;
        if tok.is_string() {
            if tok.is_empty() {
                return Err(self.error("empty string after the #include directive"));
            }
            filename = tok.take_text();
            default_search_path = false;
        } else {
            // The filename may contain path separators and dots, so the rest
            // of the line is read raw and the closing '>' stripped.
            let mut name = self.read_line()?;
            if name.is_empty() || !name.ends_with('>') {
                return Err(self.error("missing closing '>' in #include directive"));
            }
            name.pop();
            if name.is_empty() {
                return Err(self.error("empty string after the #include directive"));
            }
            filename = name;
            default_search_path = true;
        }

        if default_search_path && !self.search_paths.is_empty() {
            if !self.allow_base_includes() {
                return Err(self.error("base includes (#include <>) are not allowed"));
            }
            let paths = self.search_paths.clone();
            let mut opened = false;
            for path in paths {
                if self.try_open_include_file(&format!("{path}{filename}")) {
                    opened = true;
                    break;
                }
            }
            if !opened {
                return Err(self.error(format!(
                    "unable to open included file \"{filename}\" using the default search paths"
                )));
            }
        } else if !self.try_open_include_file(&filename) {
            return Err(self.error(format!("unable to open included file \"{filename}\"")));
        }

        Ok(())
    }

    fn try_open_include_file(&mut self, filename: &str) -> bool {
        let mut lex_flags = self
            .scripts
            .last()
            .map(|s| s.flags())
            .unwrap_or(ScanFlags::empty());
        lex_flags |= self.lex_flags();

        match Lexer::from_file(filename, lex_flags) {
            Ok(mut script) => {
                script.set_error_sink(self.sink.clone());
                self.push_script(script);
                true
            }
            Err(_) => false,
        }
    }

    //
    // Macro expansion:
    //

    fn pack_next(&mut self, pack: &mut ParamPack) -> Result<Option<Token>> {
        match pack {
            ParamPack::Script => self.next_token(),
            ParamPack::Slice { toks, consumed } => {
                if *consumed < toks.len() {
                    let tok = toks[*consumed].clone();
                    *consumed += 1;
                    Ok(Some(tok))
                } else {
                    Ok(None)
                }
            }
            ParamPack::Params {
                names,
                available,
                consumed,
                ..
            } => {
                if *consumed < *available {
                    let tok = names[*consumed].clone();
                    *consumed += 1;
                    Ok(Some(tok))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn macro_expand_builtin(
        &mut self,
        def: &MacroDef,
        out: &mut String,
        va_args: Option<&mut ParamPack>,
    ) -> Result<()> {
        match def.hashed_name {
            BUILTIN_FILE => {
                let Some(script) = self.scripts.last() else {
                    return Err(self.error("no script loaded"));
                };
                out.push('"');
                out.push_str(script.filename());
                out.push('"');
            }
            BUILTIN_LINE => {
                let Some(script) = self.scripts.last() else {
                    return Err(self.error("no script loaded"));
                };
                out.push_str(&script.line_number().to_string());
            }
            BUILTIN_DATE => {
                let now = chrono::Local::now();
                out.push('"');
                out.push_str(&now.format("%b %e %Y").to_string());
                out.push('"');
            }
            BUILTIN_TIME => {
                let now = chrono::Local::now();
                out.push('"');
                out.push_str(&now.format("%H:%M:%S").to_string());
                out.push('"');
            }
            BUILTIN_VA_ARGS => {
                let Some(pack) = va_args else {
                    return Err(self.error("'__VA_ARGS__' macro expansion failed"));
                };
                while let Some(tok) = self.pack_next(pack)? {
                    string_append_token(&tok, out);
                    if pack.tokens_left() != 0 {
                        out.push_str(", ");
                    }
                }
                pack.reset();
            }
            _ => return Err(self.error("undefined built-in macro expansion")),
        }
        Ok(())
    }

    fn expand_macro_and_append(
        &mut self,
        macro_index: usize,
        out: &mut String,
        pack: &mut ParamPack,
        mut parent: Option<&mut ParamPack>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(self.error("macro expansion is nested too deeply"));
        }

        let mac = self.macros.get(macro_index);

        if mac.va_args || mac.param_count != 0 {
            // Function-like macro: collect the call arguments, each one
            // flattened to a single text token.
            match self.pack_next(pack)? {
                Some(t) if t.is_punct(PunctId::OpenParen) => {}
                _ => {
                    return Err(
                        self.error("missing opening parenthesis in function-like macro invocation")
                    )
                }
            }

            let mut expect_comma = false;
            let mut parens = 1i32;
            let mut current_text = String::new();
            let mut provided: Vec<Token> = Vec::new();
            let mut closing: Option<Token> = None;

            while let Some(t) = self.pack_next(pack)? {
                if t.is_punct(PunctId::OpenParen) {
                    parens += 1;
                } else if t.is_punct(PunctId::CloseParen) {
                    parens -= 1;
                    if parens <= 0 {
                        closing = Some(t);
                        break;
                    }
                }

                if parens == 1 && expect_comma && t.is_punct(PunctId::Comma) {
                    let mut arg = Token::new();
                    arg.set_kind(TokenKind::Identifier);
                    arg.set_text(std::mem::take(&mut current_text));
                    provided.push(arg);
                    expect_comma = false;
                    continue;
                }

                if t.is_identifier() {
                    if let Some(other) = self.macros.find_index(hash_name(t.text())) {
                        if other == macro_index {
                            return Err(self.error("macro parameter references itself"));
                        }
                        if self.macros.get(other).hashed_name == BUILTIN_VA_ARGS {
                            // A __VA_ARGS__ reference in an argument list
                            // splices the parent varargs in with their commas
                            // preserved.
                            let Some(parent_pack) = parent.as_deref_mut() else {
                                return Err(self.error("'__VA_ARGS__' macro expansion failed"));
                            };
                            while let Some(va_tok) = self.pack_next(parent_pack)? {
                                provided.push(va_tok);
                            }
                            parent_pack.reset();
                            current_text.clear();
                        } else {
                            let mut other_pack = ParamPack::Script;
                            self.expand_macro_and_append(
                                other,
                                &mut current_text,
                                &mut other_pack,
                                parent.as_deref_mut(),
                                depth + 1,
                            )?;
                        }
                        current_text = current_text.trim().to_string();
                        expect_comma = true;
                        continue;
                    }
                    if let Some(parent_pack) = parent.as_deref_mut() {
                        if let Some(param_tok) = parent_pack.find_param(&t) {
                            string_append_token(&param_tok, &mut current_text);
                            current_text.push(' ');
                            expect_comma = true;
                            continue;
                        }
                    }
                }

                string_append_token(&t, &mut current_text);
                current_text.push(' ');
                expect_comma = true;
            }

            if closing.is_none() {
                return Err(
                    self.error("missing closing parenthesis in function-like macro invocation")
                );
            }

            if !current_text.is_empty() {
                let mut arg = Token::new();
                arg.set_kind(TokenKind::Identifier);
                arg.set_text(current_text);
                provided.push(arg);
            }
            if !expect_comma {
                return Err(self.error("trailing comma in macro argument list"));
            }

            if provided.len() != mac.param_count as usize
                && !(mac.va_args && provided.len() > mac.param_count as usize)
            {
                return Err(self.error(format!(
                    "function-like macro expected {} parameters, but got {}",
                    mac.param_count,
                    provided.len()
                )));
            }

            let body: Vec<Token> = self.macros.body_tokens(&mac).to_vec();
            if let (Some(first), Some(last)) = (body.first(), body.last()) {
                if last.is_punct(PunctId::Hash) {
                    return Err(self.error("'#' cannot appear at the end of a macro expansion"));
                }
                if first.is_punct(PunctId::HashHash) {
                    return Err(self.error("'##' cannot appear at the start of a macro expansion"));
                }
                if last.is_punct(PunctId::HashHash) {
                    return Err(self.error("'##' cannot appear at the end of a macro expansion"));
                }
            }

            let params: Vec<Token> = self.macros.param_tokens(&mac).to_vec();
            let mut next_is_merge = false;
            let mut prev_was_stringize = false;

            out.push(' ');
            let mut b = 0;
            while b < body.len() {
                let body_token = &body[b];

                if body_token.is_punct(PunctId::Hash) {
                    prev_was_stringize = true;
                    b += 1;
                    continue;
                }
                if body_token.is_punct(PunctId::HashHash) {
                    b += 1;
                    continue;
                }

                // A body identifier that names another macro re-enters the
                // expansion recursively.
                if body_token.is_identifier() {
                    if let Some(other) = self.macros.find_index(hash_name(body_token.text())) {
                        let consumed = self.expand_recursive_macro_and_append(
                            macro_index,
                            other,
                            b,
                            Some(&provided),
                            out,
                            depth,
                        )?;
                        b += consumed + 1;
                        continue;
                    }
                }

                // A merge op ahead means no whitespace after this token.
                if b != body.len() - 1 {
                    next_is_merge = body[b + 1].is_punct(PunctId::HashHash);
                }

                let mut is_param = false;
                for (p, param_name) in params.iter().enumerate() {
                    if body_token.is_identifier() && body_token.text() == param_name.text() {
                        if prev_was_stringize {
                            let stringized = provided[p].stringize();
                            self.output_append_token_text(&stringized, out, true, true);
                            out.push(' ');
                            prev_was_stringize = false;
                        } else if next_is_merge {
                            let trimmed = provided[p].trimmed();
                            self.output_append_token_text(&trimmed, out, false, true);
                        } else {
                            let arg = provided[p].clone();
                            self.output_append_token_text(&arg, out, false, true);
                        }
                        is_param = true;
                        break;
                    }
                }

                if !is_param {
                    self.output_append_token_text(body_token, out, false, true);
                    if !next_is_merge {
                        out.push(' ');
                    }
                }
                b += 1;
            }
            out.push(' ');
        } else if MacroTable::is_builtin(&mac) {
            self.macro_expand_builtin(&mac, out, parent.as_deref_mut())?;
        } else {
            // Object-like macro. Declared as `NAME()`, the call site must
            // supply the empty pair.
            if mac.empty_func_like {
                match self.pack_next(pack)? {
                    Some(t) if t.is_punct(PunctId::OpenParen) => {}
                    _ => {
                        return Err(self
                            .error("missing opening parenthesis in function-like macro invocation"))
                    }
                }
                match self.pack_next(pack)? {
                    Some(t) if t.is_punct(PunctId::CloseParen) => {}
                    Some(t) if t.is_punctuation() => {
                        return Err(self
                            .error("missing closing parenthesis in function-like macro invocation"))
                    }
                    Some(_) => return Err(self.error("function-like macro takes no arguments")),
                    None => {
                        return Err(self
                            .error("missing closing parenthesis in function-like macro invocation"))
                    }
                }
            }

            let body: Vec<Token> = self.macros.body_tokens(&mac).to_vec();
            if let (Some(first), Some(last)) = (body.first(), body.last()) {
                if first.is_punct(PunctId::Hash) {
                    return Err(self.error("'#' cannot appear at the start of a macro expansion"));
                }
                if last.is_punct(PunctId::Hash) {
                    return Err(self.error("'#' cannot appear at the end of a macro expansion"));
                }
                if first.is_punct(PunctId::HashHash) {
                    return Err(self.error("'##' cannot appear at the start of a macro expansion"));
                }
                if last.is_punct(PunctId::HashHash) {
                    return Err(self.error("'##' cannot appear at the end of a macro expansion"));
                }
            }

            out.push(' ');
            let mut i = 0;
            while i < body.len() {
                let body_token = &body[i];
                if body_token.is_identifier() {
                    if let Some(other) = self.macros.find_index(hash_name(body_token.text())) {
                        let consumed = self.expand_recursive_macro_and_append(
                            macro_index,
                            other,
                            i,
                            None,
                            out,
                            depth,
                        )?;
                        i += consumed + 1;
                        continue;
                    }
                }
                self.output_append_token_text(body_token, out, false, false);
                out.push(' ');
                i += 1;
            }
        }

        Ok(())
    }

    /// Expands a macro referenced from inside another macro's body. Returns
    /// how many body tokens past the reference were consumed as arguments.
    fn expand_recursive_macro_and_append(
        &mut self,
        macro_index: usize,
        other_index: usize,
        token_index: usize,
        provided: Option<&[Token]>,
        out: &mut String,
        depth: usize,
    ) -> Result<usize> {
        if macro_index == other_index {
            return Err(self.error("macro expansion references itself"));
        }

        let mac = self.macros.get(macro_index);
        let next_token = token_index + 1;
        let remaining: Vec<Token> = if next_token < mac.body_count as usize {
            self.macros.body_tokens(&mac)[next_token..].to_vec()
        } else {
            Vec::new()
        };

        let mut pack = ParamPack::Slice {
            toks: remaining,
            consumed: 0,
        };

        let mut parent_pack = match provided {
            Some(provided) if mac.param_count != 0 || mac.va_args => {
                if mac.va_args {
                    // Varargs start after the last named parameter.
                    let skip = mac.param_count as usize;
                    ParamPack::Params {
                        names: provided.get(skip..).unwrap_or(&[]).to_vec(),
                        expands: provided.to_vec(),
                        available: provided.len().saturating_sub(skip),
                        consumed: 0,
                    }
                } else {
                    ParamPack::Params {
                        names: self.macros.param_tokens(&mac).to_vec(),
                        expands: provided.to_vec(),
                        available: provided.len(),
                        consumed: 0,
                    }
                }
            }
            _ => ParamPack::Params {
                names: Vec::new(),
                expands: Vec::new(),
                available: 0,
                consumed: 0,
            },
        };

        self.expand_macro_and_append(other_index, out, &mut pack, Some(&mut parent_pack), depth + 1)?;
        Ok(pack.consumed())
    }

    //
    // Output emission:
    //

    fn output_append_token_text(
        &mut self,
        tok: &Token,
        out: &mut String,
        no_string_escape: bool,
        no_whitespace: bool,
    ) {
        if !no_whitespace && !tok.is_punctuation() && self.prev_kind != TokenKind::Punctuation {
            out.push(' ');
        }

        if no_string_escape {
            out.push_str(tok.text());
        } else {
            string_append_token(tok, out);
        }

        self.prev_kind = tok.kind();
        self.out_line_len += tok.len();

        // Long lines break, but only at semicolons, so the maximum is a
        // hint rather than a hard limit.
        if self.out_line_len > self.max_line_len && tok.is_punct(PunctId::Semicolon) {
            out.push('\n');
            self.out_line_len = 0;
        }
    }

    //
    // Programmatic macro API:
    //

    /// Defines a `NAME=token` macro. Returns false if the macro exists and
    /// redefinition is not allowed.
    pub fn define_value_token(&mut self, name: &str, value: Token, allow_redefinition: bool) -> bool {
        let hashed = hash_name(name);
        if self.macros.find_index(hashed).is_some() && !allow_redefinition {
            return false;
        }
        let first_body = self.macros.token_count() as u32;
        self.macros.push_token(value);
        self.macros.insert(MacroDef {
            hashed_name: hashed,
            first_body,
            body_count: 1,
            ..MacroDef::default()
        });
        true
    }

    pub fn define_value_string(&mut self, name: &str, value: &str, allow_redefinition: bool) -> bool {
        let mut tok = Token::new();
        tok.set_kind(TokenKind::String);
        tok.set_text(value);
        self.define_value_token(name, tok, allow_redefinition)
    }

    pub fn define_value_i64(&mut self, name: &str, value: i64, allow_redefinition: bool) -> bool {
        let mut tok = Token::new();
        tok.set_kind(TokenKind::Number);
        tok.set_flags(NumberFlags::INTEGER | NumberFlags::DECIMAL | NumberFlags::SIGNED_INTEGER);
        tok.set_text(value.to_string());
        self.define_value_token(name, tok, allow_redefinition)
    }

    pub fn define_value_f64(&mut self, name: &str, value: f64, allow_redefinition: bool) -> bool {
        let mut tok = Token::new();
        tok.set_kind(TokenKind::Number);
        tok.set_flags(NumberFlags::FLOATING_POINT | NumberFlags::DOUBLE_PRECISION);
        tok.set_text(format!("{value:.20}"));
        self.define_value_token(name, tok, allow_redefinition)
    }

    /// Defines a macro from a whole `#define ...` line, covering
    /// function-like and variadic macros.
    pub fn define(&mut self, define_string: &str, allow_redefinition: bool) -> bool {
        if define_string.is_empty() {
            return false;
        }

        let lex_flags = ScanFlags::NO_FATAL_ERRORS
            | ScanFlags::NO_ERRORS
            | ScanFlags::NO_WARNINGS
            | ScanFlags::NO_STRING_CONCAT;
        let mut script = Lexer::from_string(
            define_string.to_string(),
            "(define-string)",
            lex_flags,
            1,
        );

        // The string must start with "#define".
        match script.next_token() {
            Ok(Some(t)) if t.is_punct(PunctId::Hash) => {}
            _ => return false,
        }
        match script.next_token() {
            Ok(Some(t)) if t == "define" => {}
            _ => return false,
        }

        if !allow_redefinition {
            match script.next_token() {
                Ok(Some(t)) => {
                    if self.macros.is_defined(t.text()) {
                        return false;
                    }
                    script.unget_token(t);
                }
                _ => return false,
            }
        }

        self.scripts.push(script);
        let ok = self.resolve_define_directive().is_ok();
        self.scripts.pop();
        ok
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.is_defined(name)
    }

    /// Undefines the macro if it exists; built-in names are removed too.
    pub fn undef(&mut self, name: &str) {
        self.macros.undefine(name);
    }

    pub fn undef_all(&mut self, keep_builtins: bool) {
        self.macros.undef_all(keep_builtins);
    }

    /// The value of a `#define NAME value` macro as a token. Fails for
    /// function-like and multi-token macros.
    pub fn find_macro_token(&self, name: &str) -> Option<Token> {
        self.macros.find_single_token(name)
    }

    /// The body tokens of a macro. The slice stays valid while the
    /// preprocessor is alive and the macro is not undefined.
    pub fn find_macro_tokens(&self, name: &str) -> Option<&[Token]> {
        self.macros.find_tokens(name)
    }

    pub fn find_macro_string(&self, name: &str) -> Option<String> {
        Some(self.macros.find_single_token(name)?.text().to_string())
    }

    pub fn find_macro_i64(&self, name: &str) -> Option<i64> {
        let tok = self.macros.find_single_token(name)?;
        tok.is_number().then(|| tok.as_i64())
    }

    pub fn find_macro_f64(&self, name: &str) -> Option<f64> {
        let tok = self.macros.find_single_token(name)?;
        tok.is_number().then(|| tok.as_f64())
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    /// Evaluates a logical/arithmetical expression string with the same
    /// evaluator that backs `#if` and the `$eval` extensions.
    pub fn eval(
        &mut self,
        expression: &str,
        math_consts: bool,
        math_funcs: bool,
        undefined_consts_are_zero: bool,
    ) -> Result<crate::eval::EvalValue> {
        if expression.is_empty() {
            return Err(anyhow!("empty expression"));
        }

        let mut script = Lexer::from_string(
            expression.to_string(),
            "(eval-string)",
            self.lex_flags(),
            1,
        );
        script.set_error_sink(self.sink.clone());

        let mut tokens = Vec::new();
        loop {
            match script.next_token() {
                Ok(Some(tok)) => tokens.push(tok),
                Ok(None) => break,
                Err(e) => return Err(e.into()),
            }
        }

        let mut flags = EvalFlags::DETECT_TYPE;
        if math_consts {
            flags |= EvalFlags::ALLOW_MATH_CONSTS;
        }
        if math_funcs {
            flags |= EvalFlags::ALLOW_MATH_FUNCS;
        }
        if undefined_consts_are_zero {
            flags |= EvalFlags::UNDEFINED_CONSTS_ARE_ZERO;
        }

        let result = ExprEvaluator::with_tokens(&self.macros, tokens).evaluate(flags);
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.error(e.to_string())),
        }
    }
}

impl Default for Preprocessor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends a token's text, re-quoting and re-escaping strings and character
/// literals into source form.
fn string_append_token(tok: &Token, out: &mut String) {
    if tok.is_string() {
        out.push('"');
        for ch in tok.text().chars() {
            append_escaped_char(ch, out);
        }
        out.push('"');
    } else if tok.is_literal() {
        out.push('\'');
        match tok.text().chars().next() {
            Some(ch) => append_escaped_char(ch, out),
            None => out.push_str("\\0"),
        }
        out.push('\'');
    } else {
        out.push_str(tok.text());
    }
}

fn append_escaped_char(ch: char, out: &mut String) {
    match ch {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\x0B' => out.push_str("\\v"),
        '\x08' => out.push_str("\\b"),
        '\x0C' => out.push_str("\\f"),
        '\x07' => out.push_str("\\a"),
        '\\' => out.push_str("\\\\"),
        '\'' => out.push_str("\\'"),
        '"' => out.push_str("\\\""),
        '?' => out.push_str("\\?"),
        _ => out.push(ch),
    }
}

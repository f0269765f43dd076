use bitflags::bitflags;

use lex::{NumberFlags, PunctId, PunctTable, Token, TokenKind};

use crate::macros::MacroTable;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EvalFlags: u32 {
        /// Result type inferred from the operands.
        const DETECT_TYPE               = 1 << 0;
        /// Result cast to integer.
        const FORCE_INT                 = 1 << 1;
        /// Result cast to floating-point.
        const FORCE_FLOAT               = 1 << 2;
        /// Resolve the built-in unary math functions.
        const ALLOW_MATH_FUNCS          = 1 << 3;
        /// Resolve the built-in math constants.
        const ALLOW_MATH_CONSTS         = 1 << 4;
        /// Identifiers that name nothing evaluate to integer zero.
        const UNDEFINED_CONSTS_ARE_ZERO = 1 << 5;
    }
}

/// Result of an expression: a 64-bit integer or a double. Mixed-type
/// arithmetic promotes to double; relational and logical operators always
/// produce an integer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EvalValue {
    Int(i64),
    Double(f64),
}

impl EvalValue {
    pub fn as_i64(self) -> i64 {
        match self {
            EvalValue::Int(v) => v,
            EvalValue::Double(v) => v as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            EvalValue::Int(v) => v as f64,
            EvalValue::Double(v) => v,
        }
    }

    pub fn is_truthy(self) -> bool {
        match self {
            EvalValue::Int(v) => v != 0,
            EvalValue::Double(v) => v != 0.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct EvalError(pub String);

type MathFn = fn(f64) -> f64;

const MATH_FUNCS: &[(&str, MathFn)] = &[
    ("abs", f64::abs),
    ("sqrt", f64::sqrt),
    ("sin", f64::sin),
    ("cos", f64::cos),
    ("tan", f64::tan),
    ("asin", f64::asin),
    ("acos", f64::acos),
    ("atan", f64::atan),
    ("ceil", f64::ceil),
    ("floor", f64::floor),
    ("round", f64::round),
    ("exp", f64::exp),
    ("exp2", f64::exp2),
    ("ln", f64::ln),
    ("log2", f64::log2),
    ("log10", f64::log10),
];

const MATH_CONSTS: &[(&str, f64)] = &[
    ("PI", std::f64::consts::PI),
    ("E", std::f64::consts::E),
    ("TAU", std::f64::consts::TAU),
    ("INV_TAU", 1.0 / std::f64::consts::TAU),
    ("HALF_PI", std::f64::consts::FRAC_PI_2),
    ("INV_PI", std::f64::consts::FRAC_1_PI),
    ("DEG2RAD", std::f64::consts::PI / 180.0),
    ("RAD2DEG", 180.0 / std::f64::consts::PI),
];

fn find_math_func(name: &str) -> Option<MathFn> {
    MATH_FUNCS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
}

fn find_math_const(name: &str) -> Option<f64> {
    MATH_CONSTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
}

fn punct_text(id: PunctId) -> &'static str {
    PunctTable::default_table().text_of(id)
}

/// Expressions are bounded so evaluation never allocates past this many
/// value or operator nodes.
const MAX_EVAL_NODES: usize = 128;

#[derive(Clone, Copy, Default)]
struct Links {
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked list over a fixed-capacity node arena. Nodes are removed from
/// the chain but never deallocated, so indices stay stable during reduction.
struct NodeList<T> {
    nodes: Vec<(T, Links)>,
    first: Option<usize>,
    last: Option<usize>,
}

impl<T> NodeList<T> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            first: None,
            last: None,
        }
    }

    fn push_back(&mut self, value: T) -> Result<usize, EvalError> {
        if self.nodes.len() >= MAX_EVAL_NODES {
            return Err(EvalError(
                "preprocessor expression is too long".to_string(),
            ));
        }
        let index = self.nodes.len();
        self.nodes.push((
            value,
            Links {
                prev: self.last,
                next: None,
            },
        ));
        match self.last {
            Some(last) => self.nodes[last].1.next = Some(index),
            None => self.first = Some(index),
        }
        self.last = Some(index);
        Ok(index)
    }

    fn remove(&mut self, index: usize) {
        let links = self.nodes[index].1;
        match links.prev {
            Some(prev) => self.nodes[prev].1.next = links.next,
            None => self.first = links.next,
        }
        match links.next {
            Some(next) => self.nodes[next].1.prev = links.prev,
            None => self.last = links.prev,
        }
    }

    fn next_of(&self, index: usize) -> Option<usize> {
        self.nodes[index].1.next
    }

    fn get(&self, index: usize) -> &T {
        &self.nodes[index].0
    }

    fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self.nodes[index].0
    }
}

#[derive(Clone, Copy)]
struct ValueNode {
    value: EvalValue,
    parens: i32,
}

#[derive(Clone, Copy)]
struct OpNode {
    op: PunctId,
    mathfunc: Option<MathFn>,
    precedence: i32,
    parens: i32,
}

fn operator_precedence(op: PunctId) -> i32 {
    match op {
        PunctId::Colon => 5,
        PunctId::Question => 5,
        PunctId::LogicOr => 6,
        PunctId::LogicAnd => 7,
        PunctId::BitOr => 8,
        PunctId::BitXor => 9,
        PunctId::BitAnd => 10,
        PunctId::LogicEq => 11,
        PunctId::LogicNotEq => 11,
        PunctId::GreaterEq => 12,
        PunctId::LessEq => 12,
        PunctId::Greater => 12,
        PunctId::Less => 12,
        PunctId::Shr => 13,
        PunctId::Shl => 13,
        PunctId::Add => 14,
        PunctId::Sub => 14,
        PunctId::Mul => 15,
        PunctId::Div => 15,
        PunctId::Mod => 15,
        PunctId::BitNot => 16,
        PunctId::LogicNot => 17,
        _ => 0,
    }
}

/// Evaluates a collected token sequence to an integer or double.
///
/// The token list includes any parentheses. Macro constants are resolved
/// through the macro table (single-token object macros only); `defined`
/// checks the table and, when enabled, the math constants.
pub struct ExprEvaluator<'m> {
    macros: &'m MacroTable,
    tokens: Vec<Token>,
    next: usize,
}

impl<'m> ExprEvaluator<'m> {
    pub fn new(macros: &'m MacroTable) -> Self {
        Self {
            macros,
            tokens: Vec::new(),
            next: 0,
        }
    }

    pub fn with_tokens(macros: &'m MacroTable, tokens: Vec<Token>) -> Self {
        Self {
            macros,
            tokens,
            next: 0,
        }
    }

    pub fn push_token(&mut self, tok: Token) {
        self.tokens.push(tok);
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    fn next_token(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.next).cloned();
        if tok.is_some() {
            self.next += 1;
        }
        tok
    }

    pub fn evaluate(&mut self, flags: EvalFlags) -> Result<EvalValue, EvalError> {
        if self.tokens.is_empty() {
            return Err(EvalError("empty preprocessor expression".to_string()));
        }
        self.next = 0;
        self.process_tokens(flags)
    }

    fn process_tokens(&mut self, flags: EvalFlags) -> Result<EvalValue, EvalError> {
        let mut values: NodeList<ValueNode> = NodeList::new();
        let mut ops: NodeList<OpNode> = NodeList::new();

        let mut last_was_value = false;
        let mut negative = false;
        let mut parens: i32 = 0;

        while let Some(tok) = self.next_token() {
            match tok.kind() {
                TokenKind::Identifier => {
                    if last_was_value {
                        return Err(EvalError(
                            "syntax error in preprocessor expression".to_string(),
                        ));
                    }

                    if negative {
                        emit_mul_by_minus_one(&mut values, &mut ops, parens)?;
                        negative = false;
                    }

                    if tok == "defined" {
                        self.resolve_defined(&mut values, parens, flags)?;
                    } else if tok.is_boolean() {
                        values.push_back(ValueNode {
                            value: EvalValue::Int(tok.as_bool() as i64),
                            parens,
                        })?;
                    } else {
                        if flags.contains(EvalFlags::ALLOW_MATH_FUNCS) {
                            if let Some(func) = find_math_func(tok.text()) {
                                // A function call becomes a dummy value plus
                                // a maximum-precedence operator carrying the
                                // function pointer.
                                values.push_back(ValueNode {
                                    value: EvalValue::Int(0),
                                    parens,
                                })?;
                                ops.push_back(OpNode {
                                    op: PunctId::None,
                                    mathfunc: Some(func),
                                    precedence: 999,
                                    parens,
                                })?;
                                last_was_value = false;
                                continue;
                            }
                        }

                        let math_const = if flags.contains(EvalFlags::ALLOW_MATH_CONSTS) {
                            find_math_const(tok.text())
                        } else {
                            None
                        };
                        let value = if let Some(macro_tok) =
                            self.macros.find_single_token(tok.text())
                        {
                            token_to_value(&macro_tok, false)?
                        } else if let Some(constant) = math_const {
                            EvalValue::Double(constant)
                        } else if flags.contains(EvalFlags::UNDEFINED_CONSTS_ARE_ZERO) {
                            EvalValue::Int(0)
                        } else {
                            return Err(EvalError(format!(
                                "reference to undefined preprocessor constant '{}'",
                                tok.text()
                            )));
                        };
                        values.push_back(ValueNode { value, parens })?;
                    }

                    last_was_value = true;
                }
                TokenKind::Number => {
                    if last_was_value {
                        return Err(EvalError(
                            "syntax error in preprocessor expression".to_string(),
                        ));
                    }
                    let value = token_to_value(&tok, negative)?;
                    values.push_back(ValueNode { value, parens })?;
                    last_was_value = true;
                    negative = false;
                }
                TokenKind::Punctuation => {
                    if tok.is_punct(PunctId::OpenParen) {
                        // '-(...)' negates the whole subexpression: prefix a
                        // multiplication by -1.
                        if negative {
                            emit_mul_by_minus_one(&mut values, &mut ops, parens)?;
                            last_was_value = false;
                            negative = false;
                        }
                        parens += 1;
                        continue;
                    }
                    if tok.is_punct(PunctId::CloseParen) {
                        parens -= 1;
                        if parens < 0 {
                            return Err(EvalError(
                                "too many ')' in preprocessor directive".to_string(),
                            ));
                        }
                        continue;
                    }

                    let id = tok.punct();
                    if negative {
                        match id {
                            PunctId::Sub => {
                                // Double negation cancels.
                                negative = false;
                                continue;
                            }
                            PunctId::Add => {
                                // Unary plus is a no-op.
                                continue;
                            }
                            PunctId::LogicNot | PunctId::BitNot => {
                                emit_mul_by_minus_one(&mut values, &mut ops, parens)?;
                                last_was_value = false;
                                negative = false;
                            }
                            _ => {
                                return Err(EvalError(
                                    "misplaced minus sign in preprocessor expression".to_string(),
                                ));
                            }
                        }
                    }

                    let mut unary_plus = false;
                    match id {
                        PunctId::LogicNot | PunctId::BitNot => {
                            if last_was_value {
                                return Err(EvalError(
                                    "invalid logic not or two's complement after value in preprocessor expression"
                                        .to_string(),
                                ));
                            }
                        }
                        PunctId::Sub if !last_was_value => {
                            negative = true;
                        }
                        PunctId::Add if !last_was_value => {
                            unary_plus = true;
                        }
                        PunctId::Sub
                        | PunctId::Add
                        | PunctId::Mul
                        | PunctId::Div
                        | PunctId::Mod
                        | PunctId::Shr
                        | PunctId::Shl
                        | PunctId::Greater
                        | PunctId::Less
                        | PunctId::GreaterEq
                        | PunctId::LessEq
                        | PunctId::LogicEq
                        | PunctId::LogicNotEq
                        | PunctId::LogicAnd
                        | PunctId::LogicOr
                        | PunctId::BitAnd
                        | PunctId::BitOr
                        | PunctId::BitXor
                        | PunctId::Colon
                        | PunctId::Question => {
                            if !last_was_value {
                                return Err(EvalError(format!(
                                    "invalid operator '{}' after operator in preprocessor expression",
                                    tok.text()
                                )));
                            }
                        }
                        _ => {
                            return Err(EvalError(format!(
                                "invalid operator '{}' in preprocessor expression",
                                tok.text()
                            )));
                        }
                    }

                    if !negative && !unary_plus {
                        ops.push_back(OpNode {
                            op: id,
                            mathfunc: None,
                            precedence: operator_precedence(id),
                            parens,
                        })?;
                        last_was_value = false;
                    }
                }
                _ => {
                    return Err(EvalError(format!(
                        "unexpected token '{}' in preprocessor directive",
                        tok.text()
                    )));
                }
            }
        }

        if !last_was_value {
            return Err(EvalError(
                "trailing operator in preprocessor expression".to_string(),
            ));
        }
        if parens > 0 {
            return Err(EvalError(
                "too many '(' in preprocessor directive".to_string(),
            ));
        }

        self.reduce(values, ops)
    }

    /// Executes the collected subexpressions in precedence order: repeatedly
    /// apply the operator with the deepest parentheses and, within a depth,
    /// the highest precedence.
    fn reduce(
        &self,
        mut values: NodeList<ValueNode>,
        mut ops: NodeList<OpNode>,
    ) -> Result<EvalValue, EvalError> {
        let mut ternary_condition: Option<EvalValue> = None;

        while let Some(first_op) = ops.first {
            let mut v = values
                .first
                .ok_or_else(|| EvalError("expected more values in preprocessor expression".to_string()))?;
            let mut o = first_op;

            loop {
                let Some(next_o) = ops.next_of(o) else {
                    break;
                };
                let cur = *ops.get(o);
                let nxt = *ops.get(next_o);
                if cur.parens > nxt.parens {
                    break;
                }
                if cur.parens == nxt.parens && cur.precedence >= nxt.precedence {
                    break;
                }
                if !matches!(cur.op, PunctId::LogicNot | PunctId::BitNot) {
                    v = values.next_of(v).ok_or_else(|| {
                        EvalError("expected more values in preprocessor expression".to_string())
                    })?;
                }
                o = next_o;
            }

            let op = *ops.get(o);
            let v1 = v;
            let v2 = values.next_of(v);

            match op.op {
                PunctId::LogicNot => {
                    let node = values.get_mut(v1);
                    node.value = match node.value {
                        EvalValue::Int(i) => EvalValue::Int((i == 0) as i64),
                        EvalValue::Double(d) => EvalValue::Double((d == 0.0) as i64 as f64),
                    };
                }
                PunctId::BitNot => {
                    let node = values.get_mut(v1);
                    node.value = match node.value {
                        EvalValue::Int(i) => EvalValue::Int(!i),
                        EvalValue::Double(_) => {
                            return Err(EvalError(format!(
                                "operator '{}' cannot be applied to a floating-point value",
                                punct_text(op.op)
                            )));
                        }
                    };
                }
                PunctId::Question => {
                    if ternary_condition.is_some() {
                        return Err(EvalError(
                            "'?' after '?' in preprocessor directive".to_string(),
                        ));
                    }
                    ternary_condition = Some(values.get(v1).value);
                }
                PunctId::Colon => {
                    let Some(condition) = ternary_condition.take() else {
                        return Err(EvalError(
                            "':' without '?' in preprocessor directive".to_string(),
                        ));
                    };
                    let v2 = v2.ok_or_else(|| {
                        EvalError("expected more values in preprocessor expression".to_string())
                    })?;
                    if !condition.is_truthy() {
                        values.get_mut(v1).value = values.get(v2).value;
                    }
                }
                _ => {
                    let v2_index = v2.ok_or_else(|| {
                        EvalError("expected more values in preprocessor expression".to_string())
                    })?;
                    let result = if let Some(func) = op.mathfunc {
                        EvalValue::Double(func(values.get(v2_index).value.as_f64()))
                    } else {
                        resolve_subexpr(values.get(v1).value, values.get(v2_index).value, op.op)?
                    };
                    values.get_mut(v1).value = result;
                }
            }

            if !matches!(op.op, PunctId::LogicNot | PunctId::BitNot) {
                // The ternary '?' consumes its condition value; every other
                // binary operator consumes the second operand.
                let removed = if op.op == PunctId::Question {
                    v1
                } else {
                    v2.ok_or_else(|| {
                        EvalError("expected more values in preprocessor expression".to_string())
                    })?
                };
                values.remove(removed);
            }
            ops.remove(o);
        }

        let first = values
            .first
            .ok_or_else(|| EvalError("expected more values in preprocessor expression".to_string()))?;
        Ok(values.get(first).value)
    }

    fn resolve_defined(
        &mut self,
        values: &mut NodeList<ValueNode>,
        parens: i32,
        flags: EvalFlags,
    ) -> Result<(), EvalError> {
        let mut tok = self.next_token();
        let open_paren = matches!(&tok, Some(t) if t.is_punct(PunctId::OpenParen));
        if open_paren {
            tok = self.next_token();
        }

        // Parentheses are optional around the 'defined' argument.
        let Some(name) = tok.filter(|t| t.is_identifier()) else {
            return Err(EvalError(
                "'defined' directive without an identifier".to_string(),
            ));
        };

        let mut defined = flags.contains(EvalFlags::ALLOW_MATH_CONSTS)
            && find_math_const(name.text()).is_some();
        if !defined {
            defined = self.macros.is_defined(name.text());
        }

        values.push_back(ValueNode {
            value: EvalValue::Int(defined as i64),
            parens,
        })?;

        if open_paren {
            let close = self.next_token();
            if !matches!(&close, Some(t) if t.is_punct(PunctId::CloseParen)) {
                return Err(EvalError(
                    "'defined' directive missing closing parenthesis".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn emit_mul_by_minus_one(
    values: &mut NodeList<ValueNode>,
    ops: &mut NodeList<OpNode>,
    parens: i32,
) -> Result<(), EvalError> {
    values.push_back(ValueNode {
        value: EvalValue::Int(-1),
        parens,
    })?;
    ops.push_back(OpNode {
        op: PunctId::Mul,
        mathfunc: None,
        precedence: operator_precedence(PunctId::Mul),
        parens,
    })?;
    Ok(())
}

fn token_to_value(tok: &Token, negate: bool) -> Result<EvalValue, EvalError> {
    if tok.is_integer() || tok.is_boolean() {
        Ok(EvalValue::Int(tok.as_i64() * if negate { -1 } else { 1 }))
    } else if tok.is_float() {
        Ok(EvalValue::Double(
            tok.as_f64() * if negate { -1.0 } else { 1.0 },
        ))
    } else {
        Err(EvalError(format!(
            "expected number or boolean value in preprocessor expression, got '{}'",
            tok.text()
        )))
    }
}

fn apply_op_int(lhs: i64, rhs: i64, op: PunctId) -> Result<EvalValue, EvalError> {
    if (op == PunctId::Div || op == PunctId::Mod) && rhs == 0 {
        return Err(EvalError(
            "integer division by zero in preprocessor expression".to_string(),
        ));
    }
    let v = match op {
        PunctId::Add => lhs.wrapping_add(rhs),
        PunctId::Sub => lhs.wrapping_sub(rhs),
        PunctId::Mul => lhs.wrapping_mul(rhs),
        PunctId::Div => lhs.wrapping_div(rhs),
        PunctId::Mod => lhs.wrapping_rem(rhs),
        PunctId::Shr => lhs.wrapping_shr(rhs as u32),
        PunctId::Shl => lhs.wrapping_shl(rhs as u32),
        PunctId::LogicAnd => (lhs != 0 && rhs != 0) as i64,
        PunctId::LogicOr => (lhs != 0 || rhs != 0) as i64,
        PunctId::LogicEq => (lhs == rhs) as i64,
        PunctId::LogicNotEq => (lhs != rhs) as i64,
        PunctId::Greater => (lhs > rhs) as i64,
        PunctId::Less => (lhs < rhs) as i64,
        PunctId::GreaterEq => (lhs >= rhs) as i64,
        PunctId::LessEq => (lhs <= rhs) as i64,
        PunctId::BitAnd => lhs & rhs,
        PunctId::BitOr => lhs | rhs,
        PunctId::BitXor => lhs ^ rhs,
        _ => {
            return Err(EvalError(format!(
                "operator '{}' is not legal in an integer preprocessor expression",
                punct_text(op)
            )));
        }
    };
    Ok(EvalValue::Int(v))
}

fn apply_op_double(lhs: f64, rhs: f64, op: PunctId) -> Result<EvalValue, EvalError> {
    if op == PunctId::Div && rhs == 0.0 {
        return Err(EvalError(
            "floating-point division by zero in preprocessor expression".to_string(),
        ));
    }
    // Arithmetic stays double; relational and logical results are integer.
    let v = match op {
        PunctId::Add => EvalValue::Double(lhs + rhs),
        PunctId::Sub => EvalValue::Double(lhs - rhs),
        PunctId::Mul => EvalValue::Double(lhs * rhs),
        PunctId::Div => EvalValue::Double(lhs / rhs),
        PunctId::LogicAnd => EvalValue::Int((lhs != 0.0 && rhs != 0.0) as i64),
        PunctId::LogicOr => EvalValue::Int((lhs != 0.0 || rhs != 0.0) as i64),
        PunctId::LogicEq => EvalValue::Int((lhs == rhs) as i64),
        PunctId::LogicNotEq => EvalValue::Int((lhs != rhs) as i64),
        PunctId::Greater => EvalValue::Int((lhs > rhs) as i64),
        PunctId::Less => EvalValue::Int((lhs < rhs) as i64),
        PunctId::GreaterEq => EvalValue::Int((lhs >= rhs) as i64),
        PunctId::LessEq => EvalValue::Int((lhs <= rhs) as i64),
        _ => {
            return Err(EvalError(format!(
                "operator '{}' is not legal in a floating-point preprocessor expression",
                punct_text(op)
            )));
        }
    };
    Ok(v)
}

fn resolve_subexpr(lhs: EvalValue, rhs: EvalValue, op: PunctId) -> Result<EvalValue, EvalError> {
    match (lhs, rhs) {
        (EvalValue::Int(a), EvalValue::Int(b)) => apply_op_int(a, b, op),
        _ => apply_op_double(lhs.as_f64(), rhs.as_f64(), op),
    }
}

/// Renders an evaluation result as a number token for text emission.
pub fn value_to_token(value: EvalValue, flags: EvalFlags) -> Token {
    let token_flags = if flags.contains(EvalFlags::FORCE_INT) {
        NumberFlags::INTEGER | NumberFlags::DECIMAL | NumberFlags::SIGNED_INTEGER
    } else if flags.contains(EvalFlags::FORCE_FLOAT) {
        NumberFlags::FLOATING_POINT | NumberFlags::DOUBLE_PRECISION
    } else {
        match value {
            EvalValue::Int(_) => {
                NumberFlags::INTEGER | NumberFlags::DECIMAL | NumberFlags::SIGNED_INTEGER
            }
            EvalValue::Double(_) => NumberFlags::FLOATING_POINT | NumberFlags::DOUBLE_PRECISION,
        }
    };

    let text = match value {
        EvalValue::Int(v) => {
            if flags.contains(EvalFlags::FORCE_FLOAT) {
                format!("{:.6}", v as f64)
            } else {
                format!("{v}")
            }
        }
        EvalValue::Double(v) => {
            if flags.contains(EvalFlags::FORCE_INT) {
                format!("{}", v as i64)
            } else {
                format!("{v:.20}")
            }
        }
    };

    let mut tok = Token::new();
    tok.set_kind(TokenKind::Number);
    tok.set_flags(token_flags);
    tok.set_text(text);
    tok
}

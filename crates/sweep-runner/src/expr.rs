//! A small sandboxed expression language shared by weak arguments and row
//! filters.
//!
//! Supported: number and string literals, `true`/`false`/`null`, variables,
//! `+ - * / % ^`, unary `-` and `!`, comparisons, `&&`, `||`, parentheses and a
//! fixed set of numeric functions and constants. Identifiers are resolved to
//! slots when the expression is compiled, so evaluation never looks names up
//! and cannot reach anything outside the bound values.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("{message} at position {position} in expression \"{source_text}\"")]
    Syntax {
        message: String,
        position: usize,
        source_text: String,
    },
    #[error("unknown identifier \"{name}\" in expression \"{source_text}\"")]
    UnknownIdentifier { name: String, source_text: String },
}

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl ExprValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => n.as_f64().map(ExprValue::Num).unwrap_or(ExprValue::Null),
            Value::String(s) => ExprValue::Str(s.clone()),
            Value::Bool(b) => ExprValue::Bool(*b),
            _ => ExprValue::Null,
        }
    }

    /// Integral numbers become JSON integers so they print without a fraction.
    pub fn to_json(&self) -> Value {
        match self {
            ExprValue::Num(n) => number_to_json(*n),
            ExprValue::Str(s) => Value::String(s.clone()),
            ExprValue::Bool(b) => Value::Bool(*b),
            ExprValue::Null => Value::Null,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            ExprValue::Num(n) => *n != 0.0 && !n.is_nan(),
            ExprValue::Str(s) => !s.is_empty(),
            ExprValue::Bool(b) => *b,
            ExprValue::Null => false,
        }
    }

    fn as_num(&self) -> Option<f64> {
        match self {
            ExprValue::Num(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Num(n) => write!(f, "{}", number_to_json(*n)),
            ExprValue::Str(s) => write!(f, "{}", s),
            ExprValue::Bool(b) => write!(f, "{}", b),
            ExprValue::Null => write!(f, "null"),
        }
    }
}

pub fn number_to_json(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sqrt,
    Cbrt,
    Exp,
    Ln,
    Log2,
    Log10,
    Floor,
    Ceil,
    Round,
    Trunc,
    Sin,
    Cos,
    Tan,
    Sign,
    Min,
    Max,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        let found = match name {
            "abs" => (Func::Abs, 1),
            "sqrt" => (Func::Sqrt, 1),
            "cbrt" => (Func::Cbrt, 1),
            "exp" => (Func::Exp, 1),
            "ln" | "log" => (Func::Ln, 1),
            "log2" => (Func::Log2, 1),
            "log10" => (Func::Log10, 1),
            "floor" => (Func::Floor, 1),
            "ceil" => (Func::Ceil, 1),
            "round" => (Func::Round, 1),
            "trunc" => (Func::Trunc, 1),
            "sin" => (Func::Sin, 1),
            "cos" => (Func::Cos, 1),
            "tan" => (Func::Tan, 1),
            "sign" => (Func::Sign, 1),
            "min" => (Func::Min, 0),
            "max" => (Func::Max, 0),
            "pow" => (Func::Pow, 2),
            _ => return None,
        };
        Some(found)
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Func::Abs => args[0].abs(),
            Func::Sqrt => args[0].sqrt(),
            Func::Cbrt => args[0].cbrt(),
            Func::Exp => args[0].exp(),
            Func::Ln => args[0].ln(),
            Func::Log2 => args[0].log2(),
            Func::Log10 => args[0].log10(),
            Func::Floor => args[0].floor(),
            Func::Ceil => args[0].ceil(),
            Func::Round => args[0].round(),
            Func::Trunc => args[0].trunc(),
            Func::Sin => args[0].sin(),
            Func::Cos => args[0].cos(),
            Func::Tan => args[0].tan(),
            Func::Sign => {
                if args[0] == 0.0 {
                    0.0
                } else {
                    args[0].signum()
                }
            }
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Pow => args[0].powf(args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Lit(ExprValue),
    Slot(usize),
    Neg(Box<Node>),
    Not(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    source: String,
    root: Node,
}

impl Program {
    /// Parse `source`, mapping every free identifier to a slot via `resolve`.
    pub fn compile<F>(source: &str, mut resolve: F) -> Result<Program, ExprError>
    where
        F: FnMut(&str) -> Option<usize>,
    {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            depth: 0,
            resolve: &mut resolve,
        };
        let root = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(parser.error(format!("unexpected token {}", tok.kind), tok.offset));
        }
        Ok(Program {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval<F>(&self, slot: F) -> ExprValue
    where
        F: Fn(usize) -> ExprValue,
    {
        eval_node(&self.root, &slot)
    }
}

fn eval_node<F>(node: &Node, slot: &F) -> ExprValue
where
    F: Fn(usize) -> ExprValue,
{
    match node {
        Node::Lit(v) => v.clone(),
        Node::Slot(i) => slot(*i),
        Node::Neg(inner) => match eval_node(inner, slot) {
            ExprValue::Num(n) => ExprValue::Num(-n),
            _ => ExprValue::Null,
        },
        Node::Not(inner) => ExprValue::Bool(!eval_node(inner, slot).truthy()),
        Node::Bin(BinOp::And, l, r) => {
            ExprValue::Bool(eval_node(l, slot).truthy() && eval_node(r, slot).truthy())
        }
        Node::Bin(BinOp::Or, l, r) => {
            ExprValue::Bool(eval_node(l, slot).truthy() || eval_node(r, slot).truthy())
        }
        Node::Bin(op, l, r) => binary(*op, eval_node(l, slot), eval_node(r, slot)),
        Node::Call(func, args) => {
            let mut nums = Vec::with_capacity(args.len());
            for arg in args {
                match eval_node(arg, slot).as_num() {
                    Some(n) => nums.push(n),
                    None => return ExprValue::Null,
                }
            }
            ExprValue::Num(func.apply(&nums))
        }
    }
}

fn compare(l: &ExprValue, r: &ExprValue) -> Option<Ordering> {
    match (l, r) {
        (ExprValue::Num(a), ExprValue::Num(b)) => a.partial_cmp(b),
        (ExprValue::Str(a), ExprValue::Str(b)) => Some(a.cmp(b)),
        (ExprValue::Bool(a), ExprValue::Bool(b)) => Some(a.cmp(b)),
        (ExprValue::Null, ExprValue::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn binary(op: BinOp, l: ExprValue, r: ExprValue) -> ExprValue {
    match op {
        BinOp::Eq => ExprValue::Bool(compare(&l, &r) == Some(Ordering::Equal)),
        BinOp::Ne => ExprValue::Bool(compare(&l, &r) != Some(Ordering::Equal)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            if l == ExprValue::Null || r == ExprValue::Null {
                return ExprValue::Bool(false);
            }
            let result = match compare(&l, &r) {
                Some(ord) => match op {
                    BinOp::Lt => ord == Ordering::Less,
                    BinOp::Le => ord != Ordering::Greater,
                    BinOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                },
                None => false,
            };
            ExprValue::Bool(result)
        }
        BinOp::Add => match (&l, &r) {
            (ExprValue::Num(a), ExprValue::Num(b)) => ExprValue::Num(a + b),
            (ExprValue::Str(_), _) | (_, ExprValue::Str(_)) => {
                ExprValue::Str(format!("{}{}", l, r))
            }
            _ => ExprValue::Null,
        },
        _ => match (l.as_num(), r.as_num()) {
            (Some(a), Some(b)) => ExprValue::Num(match op {
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => a % b,
                _ => a.powf(b),
            }),
            _ => ExprValue::Null,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Num(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Num(n) => write!(f, "'{}'", n),
            TokenKind::Str(s) => write!(f, "'\"{}\"'", s),
            TokenKind::Ident(s) => write!(f, "'{}'", s),
            TokenKind::Op(s) => write!(f, "'{}'", s),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Comma => write!(f, "','"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

const OPERATORS: [&str; 20] = [
    "===", "!==", "**", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "^", "<",
    ">", "!", "=", "~",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let syntax = |message: String, position: usize| ExprError::Syntax {
        message,
        position,
        source_text: source.to_string(),
    };
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text = &source[start..i];
            let n: f64 = text
                .parse()
                .map_err(|_| syntax(format!("malformed number '{}'", text), start))?;
            tokens.push(Token {
                kind: TokenKind::Num(n),
                offset: start,
            });
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(source[start..i].to_string()),
                offset: start,
            });
            continue;
        }
        if c == '"' || c == '\'' {
            i += 1;
            while i < bytes.len() && bytes[i] as char != c {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(syntax("unterminated string".to_string(), start));
            }
            tokens.push(Token {
                kind: TokenKind::Str(source[start + 1..i].to_string()),
                offset: start,
            });
            i += 1;
            continue;
        }
        let kind = match c {
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            ',' => Some(TokenKind::Comma),
            _ => None,
        };
        if let Some(kind) = kind {
            tokens.push(Token { kind, offset: start });
            i += 1;
            continue;
        }
        match OPERATORS.iter().find(|op| source[i..].starts_with(**op)) {
            Some(op) if *op != "=" && *op != "~" => {
                tokens.push(Token {
                    kind: TokenKind::Op(op),
                    offset: start,
                });
                i += op.len();
            }
            _ => {
                let ch = source[i..].chars().next().unwrap_or(c);
                return Err(syntax(format!("unexpected character '{}'", ch), start));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    resolve: &'a mut dyn FnMut(&str) -> Option<usize>,
}

/// Deepest nesting of parentheses, calls and unary operators accepted.
const MAX_DEPTH: usize = 128;

impl Parser<'_> {
    fn error(&self, message: String, position: usize) -> ExprError {
        ExprError::Syntax {
            message,
            position,
            source_text: self.source.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        if let Some(Token {
            kind: TokenKind::Op(op),
            ..
        }) = self.peek()
        {
            let op = *op;
            if ops.contains(&op) {
                self.pos += 1;
                return Some(op);
            }
        }
        None
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let rhs = self.parse_and()?;
            node = Node::Bin(BinOp::Or, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_cmp()?;
        while self.eat_op(&["&&"]).is_some() {
            let rhs = self.parse_cmp()?;
            node = Node::Bin(BinOp::And, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_cmp(&mut self) -> Result<Node, ExprError> {
        let node = self.parse_add()?;
        let op = match self.eat_op(&["==", "===", "!=", "!==", "<", "<=", ">", ">="]) {
            Some("==") | Some("===") => BinOp::Eq,
            Some("!=") | Some("!==") => BinOp::Ne,
            Some("<") => BinOp::Lt,
            Some("<=") => BinOp::Le,
            Some(">") => BinOp::Gt,
            Some(">=") => BinOp::Ge,
            _ => return Ok(node),
        };
        let rhs = self.parse_add()?;
        Ok(Node::Bin(op, Box::new(node), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_mul()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.parse_mul()?;
            let op = if op == "+" { BinOp::Add } else { BinOp::Sub };
            node = Node::Bin(op, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_mul(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let rhs = self.parse_unary()?;
            let op = match op {
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                _ => BinOp::Rem,
            };
            node = Node::Bin(op, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        if self.depth >= MAX_DEPTH {
            let position = self.peek().map_or(self.source.len(), |t| t.offset);
            return Err(self.error(
                format!("expression nests deeper than {} levels", MAX_DEPTH),
                position,
            ));
        }
        self.depth += 1;
        let node = self.parse_unary_operand();
        self.depth -= 1;
        node
    }

    fn parse_unary_operand(&mut self) -> Result<Node, ExprError> {
        match self.eat_op(&["-", "!"]) {
            Some("-") => Ok(Node::Neg(Box::new(self.parse_unary()?))),
            Some(_) => Ok(Node::Not(Box::new(self.parse_unary()?))),
            None => self.parse_pow(),
        }
    }

    fn parse_pow(&mut self) -> Result<Node, ExprError> {
        let base = self.parse_primary()?;
        if self.eat_op(&["^", "**"]).is_some() {
            let exponent = self.parse_unary()?;
            return Ok(Node::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        let token = match self.tokens.get(self.pos).cloned() {
            Some(tok) => tok,
            None => {
                return Err(self.error("unexpected end of expression".into(), self.source.len()))
            }
        };
        self.pos += 1;
        match token.kind {
            TokenKind::Num(n) => Ok(Node::Lit(ExprValue::Num(n))),
            TokenKind::Str(s) => Ok(Node::Lit(ExprValue::Str(s))),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::LParen)) {
                    self.pos += 1;
                    return self.parse_call(&name, token.offset);
                }
                self.identifier(name)
            }
            other => Err(self.error(format!("unexpected token {}", other), token.offset)),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Node, ExprError> {
        if let Some(slot) = (self.resolve)(&name) {
            return Ok(Node::Slot(slot));
        }
        let lit = match name.as_str() {
            "true" => ExprValue::Bool(true),
            "false" => ExprValue::Bool(false),
            "null" => ExprValue::Null,
            "PI" => ExprValue::Num(std::f64::consts::PI),
            "E" => ExprValue::Num(std::f64::consts::E),
            _ => {
                return Err(ExprError::UnknownIdentifier {
                    name,
                    source_text: self.source.to_string(),
                })
            }
        };
        Ok(Node::Lit(lit))
    }

    fn parse_call(&mut self, name: &str, offset: usize) -> Result<Node, ExprError> {
        let (func, arity) = Func::lookup(name)
            .ok_or_else(|| self.error(format!("unknown function '{}'", name), offset))?;
        let mut args = Vec::new();
        if !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RParen)) {
            loop {
                args.push(self.parse_or()?);
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Comma)) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
        }
        self.expect_rparen()?;
        let arity_ok = if arity == 0 {
            !args.is_empty()
        } else {
            args.len() == arity
        };
        if !arity_ok {
            return Err(self.error(
                format!("wrong number of arguments ({}) to '{}'", args.len(), name),
                offset,
            ));
        }
        Ok(Node::Call(func, args))
    }

    fn expect_rparen(&mut self) -> Result<(), ExprError> {
        match self.tokens.get(self.pos) {
            Some(Token {
                kind: TokenKind::RParen,
                ..
            }) => {
                self.pos += 1;
                Ok(())
            }
            Some(tok) => Err(self.error(format!("expected ')' but found {}", tok.kind), tok.offset)),
            None => Err(self.error("expected ')'".into(), self.source.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_with(src: &str, names: &[&str], values: &[ExprValue]) -> ExprValue {
        let program = Program::compile(src, |n| names.iter().position(|x| *x == n))
            .expect("compiles");
        program.eval(|i| values[i].clone())
    }

    #[test]
    fn arithmetic_respects_precedence() {
        let v = eval_with("2 + 3 * p ^ 2 - 1", &["p"], &[ExprValue::Num(2.0)]);
        assert_eq!(v, ExprValue::Num(13.0));
        let v = eval_with("-(p + 1) % 4", &["p"], &[ExprValue::Num(6.0)]);
        assert_eq!(v, ExprValue::Num(-3.0));
    }

    #[test]
    fn functions_and_constants() {
        let v = eval_with("ceil(p / 24) + max(1, depth, 3)", &["p", "depth"], &[
            ExprValue::Num(100.0),
            ExprValue::Num(2.0),
        ]);
        assert_eq!(v, ExprValue::Num(8.0));
        assert_eq!(eval_with("floor(PI)", &[], &[]), ExprValue::Num(3.0));
    }

    #[test]
    fn comparisons_and_logic() {
        let names = ["p", "cmd"];
        let values = [ExprValue::Num(8.0), ExprValue::Str("heat".into())];
        assert!(eval_with("p >= 8 && cmd == 'heat'", &names, &values).truthy());
        assert!(eval_with("p < 4 || cmd === \"heat\"", &names, &values).truthy());
        assert!(!eval_with("!(p == 8)", &names, &values).truthy());
        assert!(!eval_with("cmd > 3", &names, &values).truthy());
    }

    #[test]
    fn nulls_never_satisfy_ordering() {
        let v = eval_with("t < 5", &["t"], &[ExprValue::Null]);
        assert_eq!(v, ExprValue::Bool(false));
        let v = eval_with("t * 2", &["t"], &[ExprValue::Null]);
        assert_eq!(v, ExprValue::Null);
    }

    #[test]
    fn compile_errors_are_reported() {
        assert!(matches!(
            Program::compile("p +", |_| Some(0)),
            Err(ExprError::Syntax { .. })
        ));
        assert!(matches!(
            Program::compile("secret + 1", |_| None),
            Err(ExprError::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            Program::compile("system(p)", |_| Some(0)),
            Err(ExprError::Syntax { .. })
        ));
        assert!(Program::compile("p = 3", |_| Some(0)).is_err());
        assert!(Program::compile("pow(p)", |_| Some(0)).is_err());
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let deep = format!("{}p{}", "(".repeat(10_000), ")".repeat(10_000));
        match Program::compile(&deep, |_| Some(0)) {
            Err(ExprError::Syntax { message, .. }) => assert!(message.contains("nests deeper")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        let negations = format!("{}p", "-".repeat(10_000));
        assert!(matches!(
            Program::compile(&negations, |_| Some(0)),
            Err(ExprError::Syntax { .. })
        ));
        let powers = vec!["2"; 5_000].join("^");
        assert!(Program::compile(&powers, |_| None).is_err());

        let shallow = format!("{}p + 1{}", "(".repeat(60), ")".repeat(60));
        let v = eval_with(&shallow, &["p"], &[ExprValue::Num(2.0)]);
        assert_eq!(v, ExprValue::Num(3.0));
    }

    #[test]
    fn integral_results_become_json_integers() {
        assert_eq!(ExprValue::Num(4.0).to_json(), serde_json::json!(4));
        assert_eq!(ExprValue::Num(0.5).to_json(), serde_json::json!(0.5));
    }
}

//! Sandboxed evaluation of variable-free expressions.
//!
//! The evaluator understands numeric and quoted string literals, the four
//! arithmetic operators with the usual precedence, parentheses and calls to a
//! fixed allow-list of pure functions. Nothing else parses.

use std::iter::Peekable;
use std::str::Chars;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

use crate::detect::is_dynamic_call;
use crate::environment::Value;

/// Functions an expression may call.
pub const ALLOWED_FUNCTIONS: [&str; 4] = ["min", "round", "strtoupper", "strrev"];

static CALL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b(?:{})\([^()$]+\)", ALLOWED_FUNCTIONS.join("|"))).unwrap()
});

static ARITHMETIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([0-9+\-*/\s]{2,})\)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("function `{0}` is not allowed")]
    UnknownFunction(String),
    #[error("wrong number of arguments for `{0}`")]
    Arity(&'static str),
    #[error("operand is not numeric")]
    NotNumeric,
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Value),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Comma,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => tokens.push(Token::Number(lex_number(&mut chars)?)),
            '\'' | '"' => {
                chars.next();
                tokens.push(Token::Str(lex_string(&mut chars, c)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_alphanumeric() || c == '_') {
                        break;
                    }
                    ident.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    ',' => Token::Comma,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    other => return Err(EvalError::UnexpectedChar(other)),
                };
                chars.next();
                tokens.push(token);
            }
        }
    }
    Ok(tokens)
}

/// Integers that overflow `i64` become floats.
fn lex_number(chars: &mut Peekable<Chars<'_>>) -> Result<Value, EvalError> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !(c.is_ascii_digit() || c == '.') {
            break;
        }
        digits.push(c);
        chars.next();
    }

    if !digits.contains('.') {
        if let Ok(value) = digits.parse::<i64>() {
            return Ok(Value::Int(value));
        }
    }
    digits
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|_| EvalError::InvalidNumber(digits))
}

fn lex_string(chars: &mut Peekable<Chars<'_>>, delimiter: char) -> Result<String, EvalError> {
    let mut text = String::new();
    while let Some(c) = chars.next() {
        match c {
            c if c == delimiter => return Ok(text),
            '\\' => match (delimiter, chars.next()) {
                (_, None) => break,
                (_, Some('\\')) => text.push('\\'),
                (_, Some(c)) if c == delimiter => text.push(c),
                ('"', Some('n')) => text.push('\n'),
                ('"', Some('t')) => text.push('\t'),
                ('"', Some('r')) => text.push('\r'),
                (_, Some(c)) => {
                    text.push('\\');
                    text.push(c);
                }
            },
            c => text.push(c),
        }
    }
    Err(EvalError::UnterminatedString)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(EvalError::UnexpectedToken(format!("{token:?}"))),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn expression(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = match op {
                Token::Plus => add(lhs, rhs)?,
                _ => subtract(lhs, rhs)?,
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = match op {
                Token::Star => multiply(lhs, rhs)?,
                _ => divide(lhs, rhs)?,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Value, EvalError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                negate(self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                numeric(self.unary()?)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Value, EvalError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Str(text)) => Ok(Value::Str(text)),
            Some(Token::LParen) => {
                let value = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                self.expect(Token::LParen)?;
                let args = self.arguments()?;
                call(&name, args)
            }
            Some(token) => Err(EvalError::UnexpectedToken(format!("{token:?}"))),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Value>, EvalError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(token) => return Err(EvalError::UnexpectedToken(format!("{token:?}"))),
                None => return Err(EvalError::UnexpectedEnd),
            }
        }
    }
}

/// Evaluates one expression.
///
/// ```rust
/// use deobfuscator_rs::{Value, evaluate};
///
/// assert_eq!(evaluate("10 + 5 * 2"), Ok(Value::Int(20)));
/// assert_eq!(evaluate("strrev('cba')"), Ok(Value::from("abc")));
/// assert!(evaluate("system('id')").is_err());
/// ```
pub fn evaluate(input: &str) -> Result<Value, EvalError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let value = parser.expression()?;
    match parser.next() {
        None => Ok(value),
        Some(token) => Err(EvalError::UnexpectedToken(format!("{token:?}"))),
    }
}

fn numeric(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Str(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .map(Value::Int)
                .or_else(|_| text.parse::<f64>().map(Value::Float))
                .map_err(|_| EvalError::NotNumeric)
        }
        number => Ok(number),
    }
}

fn as_f64(value: &Value) -> f64 {
    value.as_f64().unwrap_or(0.0)
}

/// Applies an integer operation, falling back to floats on overflow or when
/// either side is a float.
fn arithmetic(
    lhs: Value,
    rhs: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let (lhs, rhs) = (numeric(lhs)?, numeric(rhs)?);
    if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
        if let Some(result) = int_op(*a, *b) {
            return Ok(Value::Int(result));
        }
    }
    Ok(Value::Float(float_op(as_f64(&lhs), as_f64(&rhs))))
}

fn add(lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    arithmetic(lhs, rhs, i64::checked_add, |a, b| a + b)
}

fn subtract(lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    arithmetic(lhs, rhs, i64::checked_sub, |a, b| a - b)
}

fn multiply(lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    arithmetic(lhs, rhs, i64::checked_mul, |a, b| a * b)
}

/// Exact integer quotients stay integers, everything else becomes a float.
fn divide(lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let (lhs, rhs) = (numeric(lhs)?, numeric(rhs)?);
    if as_f64(&rhs) == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    arithmetic(
        lhs,
        rhs,
        |a, b| match a.checked_rem(b) {
            Some(0) => a.checked_div(b),
            _ => None,
        },
        |a, b| a / b,
    )
}

fn negate(value: Value) -> Result<Value, EvalError> {
    Ok(match numeric(value)? {
        Value::Int(a) => a
            .checked_neg()
            .map(Value::Int)
            .unwrap_or(Value::Float(-(a as f64))),
        other => Value::Float(-as_f64(&other)),
    })
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "min" => {
            if args.len() < 2 {
                return Err(EvalError::Arity("min"));
            }
            let mut best: Option<Value> = None;
            for arg in args {
                let arg = numeric(arg)?;
                if best.as_ref().is_none_or(|b| as_f64(&arg) < as_f64(b)) {
                    best = Some(arg);
                }
            }
            best.ok_or(EvalError::Arity("min"))
        }
        "round" => {
            let (value, precision) = match args.as_slice() {
                [value] => (as_f64(&numeric(value.clone())?), 0),
                [value, precision] => {
                    let precision = match numeric(precision.clone())? {
                        Value::Int(p) => p.clamp(-308, 308) as i32,
                        other => as_f64(&other).clamp(-308.0, 308.0) as i32,
                    };
                    (as_f64(&numeric(value.clone())?), precision)
                }
                _ => return Err(EvalError::Arity("round")),
            };
            // Past the scale a double can hold, rounding is a no-op.
            let factor = 10f64.powi(precision);
            let scaled = value * factor;
            if !scaled.is_finite() || factor == 0.0 {
                return Ok(Value::Float(value));
            }
            Ok(Value::Float(scaled.round() / factor))
        }
        "strtoupper" => match args.as_slice() {
            [value] => Ok(Value::Str(value.to_string().to_ascii_uppercase())),
            _ => Err(EvalError::Arity("strtoupper")),
        },
        "strrev" => match args.as_slice() {
            [value] => Ok(Value::Str(value.to_string().chars().rev().collect())),
            _ => Err(EvalError::Arity("strrev")),
        },
        other => Err(EvalError::UnknownFunction(other.to_owned())),
    }
}

fn preceding_char(source: &str, start: usize) -> Option<char> {
    source[..start].chars().next_back()
}

/// Rewrites allow-listed calls whose arguments hold no nested calls and no
/// variables. Variable and method calls (`$f(..)`, `->f(..)`, `::f(..)`) are
/// left alone.
pub fn evaluate_calls(source: &str) -> (String, usize) {
    let mut evaluated = 0;
    let output = CALL_REGEX
        .replace_all(source, |caps: &Captures| {
            let start = caps.get(0).map_or(0, |m| m.start());
            if is_dynamic_call(&source[..start]) {
                return caps[0].to_owned();
            }
            match evaluate(&caps[0]) {
                Ok(Value::Float(value)) if !value.is_finite() => caps[0].to_owned(),
                Ok(value) => {
                    evaluated += 1;
                    value.to_literal()
                }
                Err(err) => {
                    log::trace!("Leaving {:?} unevaluated: {err}", &caps[0]);
                    caps[0].to_owned()
                }
            }
        })
        .into_owned();
    (output, evaluated)
}

/// Rewrites bare parenthesized arithmetic to its numeric result. A
/// parenthesis attached to an operand is a call or index and is skipped.
pub fn evaluate_arithmetic(source: &str) -> (String, usize) {
    let mut evaluated = 0;
    let output = ARITHMETIC_REGEX
        .replace_all(source, |caps: &Captures| {
            let start = caps.get(0).map_or(0, |m| m.start());
            let attached = preceding_char(source, start)
                .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | ')' | ']' | '}'));
            if attached {
                return caps[0].to_owned();
            }
            match evaluate(&caps[1]) {
                Ok(Value::Float(value)) if !value.is_finite() => caps[0].to_owned(),
                Ok(value @ (Value::Int(_) | Value::Float(_))) => {
                    evaluated += 1;
                    value.to_literal()
                }
                Ok(_) => caps[0].to_owned(),
                Err(err) => {
                    log::trace!("Leaving {:?} unevaluated: {err}", &caps[0]);
                    caps[0].to_owned()
                }
            }
        })
        .into_owned();
    (output, evaluated)
}

//! Calculator tool: evaluates arithmetic expressions.
//!
//! Supports `+ - * / %`, exponentiation with `^` or `**`, postfix factorial
//! `!`, parentheses, implicit multiplication before names and parentheses
//! (`2pi`, `3(4 + 1)`), the constants `pi`, `e` and `tau`, a degree suffix
//! (`sin(30 degrees)`, `45°`) and the usual math functions.

use std::f64::consts;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;
use voxturn_core::error::ToolError;
use voxturn_core::tools::ToolExecutor;
use voxturn_core::types::{ParamSpec, ParamType, ToolDescriptor};

pub const NAME: &str = "calculator";

/// Largest argument whose factorial is representable as `f64`.
const MAX_FACTORIAL: f64 = 170.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("missing closing parenthesis")]
    UnclosedParen,

    #[error("unknown function or constant '{0}'")]
    UnknownName(String),

    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}")]
    Domain(String),

    #[error("result is not a finite number")]
    NotFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,
    Degree,
    Comma,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Ident(name) => format!("name '{name}'"),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Percent => "'%'".into(),
            Token::Caret => "'^'".into(),
            Token::Bang => "'!'".into(),
            Token::Degree => "'°'".into(),
            Token::Comma => "','".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut num = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Scientific notation: 1e3, 2.5e-4
                if matches!(chars.peek(), Some('e' | 'E')) {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let sign = match lookahead.peek() {
                        Some(&s @ ('+' | '-')) => {
                            lookahead.next();
                            Some(s)
                        }
                        _ => None,
                    };
                    if lookahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                        num.push('e');
                        if let Some(s) = sign {
                            num.push(s);
                        }
                        chars = lookahead;
                        while let Some(&c) = chars.peek() {
                            if c.is_ascii_digit() {
                                num.push(c);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                    }
                }
                let value = num
                    .parse()
                    .map_err(|_| EvalError::InvalidNumber(num.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident.to_lowercase()));
            }
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::Caret);
                } else {
                    tokens.push(Token::Star);
                }
            }
            _ => {
                let token = match ch {
                    '+' => Token::Plus,
                    '-' | '−' => Token::Minus,
                    '×' => Token::Star,
                    '/' | '÷' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    '!' => Token::Bang,
                    '°' => Token::Degree,
                    ',' => Token::Comma,
                    '(' | '[' => Token::LParen,
                    ')' | ']' => Token::RParen,
                    other => return Err(EvalError::UnexpectedChar(other)),
                };
                tokens.push(token);
                chars.next();
            }
        }
    }

    Ok(tokens)
}

/// Evaluate an arithmetic expression.
pub fn evaluate(input: &str) -> Result<f64, EvalError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(EvalError::UnexpectedToken(token.describe()));
    }
    if !value.is_finite() {
        return Err(EvalError::NotFinite);
    }
    Ok(value)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr = term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut left = self.term()?;
        loop {
            if self.eat(&Token::Plus) {
                left += self.term()?;
            } else if self.eat(&Token::Minus) {
                left -= self.term()?;
            } else {
                return Ok(left);
            }
        }
    }

    // term = unary (('*' | '/' | '%' | <implicit>) unary)*
    fn term(&mut self) -> Result<f64, EvalError> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    left *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let right = self.unary()?;
                    if right == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    left /= right;
                }
                Some(Token::Percent) => {
                    self.pos += 1;
                    let right = self.unary()?;
                    if right == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    left %= right;
                }
                Some(Token::Ident(name)) if !is_degree_word(name) => {
                    left *= self.unary()?;
                }
                Some(Token::LParen) => {
                    left *= self.unary()?;
                }
                _ => return Ok(left),
            }
        }
    }

    // unary = ('-' | '+') unary | power
    fn unary(&mut self) -> Result<f64, EvalError> {
        if self.eat(&Token::Minus) {
            return Ok(-self.unary()?);
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    // power = postfix ('^' unary)?   (right associative)
    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.postfix()?;
        if self.eat(&Token::Caret) {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    // postfix = primary ('!' | '°' | 'degrees')*
    fn postfix(&mut self) -> Result<f64, EvalError> {
        let mut value = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Bang) => {
                    self.pos += 1;
                    value = factorial(value)?;
                }
                Some(Token::Degree) => {
                    self.pos += 1;
                    value = value.to_radians();
                }
                Some(Token::Ident(name)) if is_degree_word(name) => {
                    self.pos += 1;
                    value = value.to_radians();
                }
                _ => return Ok(value),
            }
        }
    }

    // primary = NUMBER | NAME | NAME '(' args ')' | '(' expr ')'
    fn primary(&mut self) -> Result<f64, EvalError> {
        match self.next().cloned() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(EvalError::UnclosedParen);
                }
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    call(&name, &args)
                } else {
                    constant(&name).ok_or(EvalError::UnknownName(name))
                }
            }
            Some(other) => Err(EvalError::UnexpectedToken(other.describe())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn arguments(&mut self) -> Result<Vec<f64>, EvalError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            return Err(EvalError::UnclosedParen);
        }
    }
}

fn is_degree_word(name: &str) -> bool {
    matches!(name, "degrees" | "degree" | "deg")
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" | "π" => Some(consts::PI),
        "e" => Some(consts::E),
        "tau" => Some(consts::TAU),
        _ => None,
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let arity = |expected: &'static str| EvalError::Arity {
        name: name.to_string(),
        expected,
        got: args.len(),
    };
    let one = || match args {
        [x] => Ok(*x),
        _ => Err(arity("1")),
    };

    match name {
        "sqrt" => {
            let x = one()?;
            if x < 0.0 {
                return Err(EvalError::Domain(
                    "cannot take the square root of a negative number".into(),
                ));
            }
            Ok(x.sqrt())
        }
        "cbrt" => Ok(one()?.cbrt()),
        "sin" => Ok(one()?.sin()),
        "cos" => Ok(one()?.cos()),
        "tan" => Ok(one()?.tan()),
        "asin" => Ok(one()?.asin()),
        "acos" => Ok(one()?.acos()),
        "atan" => Ok(one()?.atan()),
        "sinh" => Ok(one()?.sinh()),
        "cosh" => Ok(one()?.cosh()),
        "tanh" => Ok(one()?.tanh()),
        "exp" => Ok(one()?.exp()),
        "abs" => Ok(one()?.abs()),
        "floor" => Ok(one()?.floor()),
        "ceil" => Ok(one()?.ceil()),
        "round" => Ok(one()?.round()),
        "radians" => Ok(one()?.to_radians()),
        "degrees" => Ok(one()?.to_degrees()),
        "factorial" => factorial(one()?),
        "ln" => positive_log(one()?, f64::ln),
        "log10" => positive_log(one()?, f64::log10),
        "log2" => positive_log(one()?, f64::log2),
        // One argument: natural log. Two: log(x, base).
        "log" => match args {
            [x] => positive_log(*x, f64::ln),
            [x, base] => positive_log(*x, |v| v.log(*base)),
            _ => Err(arity("1 or 2")),
        },
        "pow" => match args {
            [base, exponent] => Ok(base.powf(*exponent)),
            _ => Err(arity("2")),
        },
        "min" | "max" if args.is_empty() => Err(arity("at least 1")),
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        _ => Err(EvalError::UnknownName(name.to_string())),
    }
}

fn positive_log(x: f64, log: impl Fn(f64) -> f64) -> Result<f64, EvalError> {
    if x <= 0.0 {
        return Err(EvalError::Domain(
            "logarithm requires a positive number".into(),
        ));
    }
    Ok(log(x))
}

fn factorial(x: f64) -> Result<f64, EvalError> {
    if x < 0.0 || x.fract() != 0.0 {
        return Err(EvalError::Domain(
            "factorial requires a non-negative integer".into(),
        ));
    }
    if x > MAX_FACTORIAL {
        return Err(EvalError::NotFinite);
    }
    Ok((2..=x as u64).fold(1.0, |acc, n| acc * n as f64))
}

/// Render a result for speech: integers without decimals, everything else
/// to at most six decimal places.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let fixed = format!("{value:.6}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// Evaluates the `expression` argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            NAME,
            "Evaluate a mathematical expression. Supports + - * / % ^, factorial (!), \
             parentheses, pi, e, degree units and functions such as sqrt, sin, cos, tan, \
             log, ln, log10, exp, abs, round and factorial.",
        )
        .with_param(ParamSpec::required(
            "expression",
            ParamType::String,
            "The expression to evaluate, e.g. 'sqrt(144) + 2^3' or 'sin(30 degrees)'",
        ))
    }
}

#[async_trait]
impl ToolExecutor for CalculatorTool {
    async fn execute(&self, name: &str, params: &Map<String, Value>) -> Result<Value, ToolError> {
        let expression = params
            .get("expression")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments {
                name: name.to_string(),
                reason: "missing required 'expression' parameter".to_string(),
            })?;

        let value = evaluate(expression).map_err(|e| ToolError::ExecutionFailed {
            name: name.to_string(),
            message: format!("invalid expression: {e}"),
        })?;
        let formatted = format_number(value);
        debug!(expression, result = %formatted, "Evaluated expression");

        Ok(json!({
            "expression": expression,
            "result": number_value(value),
            "formatted_result": formatted,
            "calculation": format!("{expression} = {formatted}"),
        }))
    }
}

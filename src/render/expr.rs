// report-assembly-service/src/render/expr.rs
//
// Evaluator for calculated variables. Deliberately small: numbers, quoted
// strings, references to other variable values, the four arithmetic operators
// plus `%`, parentheses and unary minus. `+` concatenates when either operand
// is a string. No function calls, no assignment, no dynamic execution.

use std::fmt;

use serde_json::Map;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    Unexpected(String),
    UnknownName(String),
    NotANumber(String),
    DivisionByZero,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Unexpected(t) => write!(f, "unexpected input near '{t}'"),
            ExprError::UnknownName(n) => write!(f, "unknown value '{n}'"),
            ExprError::NotANumber(s) => write!(f, "'{s}' is not numeric"),
            ExprError::DivisionByZero => f.write_str("division by zero"),
        }
    }
}

impl std::error::Error for ExprError {}

/// Evaluate `expression` against the report's value map and render the result
/// as a string.
pub fn evaluate(expression: &str, values: &Map<String, serde_json::Value>) -> Result<String, ExprError> {
    let tokens = lex(expression)?;
    let mut parser = Parser { tokens, pos: 0, values };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::Unexpected(parser.describe_current()));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut lit = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        lit.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = lit.parse().map_err(|_| ExprError::NotANumber(lit.clone()))?;
                tokens.push(Token::Num(n));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some(d) if d == quote => break,
                        Some('\\') => match chars.next() {
                            Some(e) => lit.push(e),
                            None => return Err(ExprError::Unexpected("\\".into())),
                        },
                        Some(d) => lit.push(d),
                        None => return Err(ExprError::Unexpected(quote.to_string())),
                    }
                }
                tokens.push(Token::Str(lit));
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            _ => return Err(ExprError::Unexpected(c.to_string())),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    values: &'a Map<String, serde_json::Value>,
}

impl Parser<'_> {
    fn describe_current(&self) -> String {
        match self.tokens.get(self.pos) {
            Some(Token::Num(n)) => n.to_string(),
            Some(Token::Str(s)) => s.clone(),
            Some(Token::Ident(s)) => s.clone(),
            Some(Token::Op(c)) => c.to_string(),
            Some(Token::LParen) => "(".into(),
            Some(Token::RParen) => ")".into(),
            None => "end of expression".into(),
        }
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        if let Some(Token::Op(c)) = self.tokens.get(self.pos) {
            if ops.contains(c) {
                let c = *c;
                self.pos += 1;
                return Some(c);
            }
        }
        None
    }

    fn expr(&mut self) -> Result<Value, ExprError> {
        let mut left = self.term()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let right = self.term()?;
            left = match op {
                '+' => add(left, right),
                _ => Value::Num(as_num(&left)? - as_num(&right)?),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Value, ExprError> {
        let mut left = self.factor()?;
        while let Some(op) = self.eat_op(&['*', '/', '%']) {
            let right = self.factor()?;
            let (l, r) = (as_num(&left)?, as_num(&right)?);
            left = match op {
                '*' => Value::Num(l * r),
                '/' if r == 0.0 => return Err(ExprError::DivisionByZero),
                '/' => Value::Num(l / r),
                '%' if r == 0.0 => return Err(ExprError::DivisionByZero),
                _ => Value::Num(l % r),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Value, ExprError> {
        if self.eat_op(&['-']).is_some() {
            let v = self.factor()?;
            return Ok(Value::Num(-as_num(&v)?));
        }
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(Value::Num(n))
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Value::Str(s))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                self.lookup(&name)
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(ExprError::Unexpected(self.describe_current())),
                }
            }
            _ => Err(ExprError::Unexpected(self.describe_current())),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ExprError> {
        let raw = self
            .values
            .get(name)
            .ok_or_else(|| ExprError::UnknownName(name.to_string()))?;
        Ok(match raw {
            serde_json::Value::Number(n) => {
                Value::Num(n.as_f64().ok_or_else(|| ExprError::NotANumber(n.to_string()))?)
            }
            serde_json::Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) => Value::Num(n),
                Err(_) => Value::Str(s.clone()),
            },
            serde_json::Value::Bool(b) => Value::Str(b.to_string()),
            serde_json::Value::Null => Value::Str(String::new()),
            other => Value::Str(other.to_string()),
        })
    }
}

fn add(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Num(l), Value::Num(r)) => Value::Num(l + r),
        _ => Value::Str(format!("{left}{right}")),
    }
}

fn as_num(v: &Value) -> Result<f64, ExprError> {
    match v {
        Value::Num(n) => Ok(*n),
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| ExprError::NotANumber(s.clone())),
    }
}

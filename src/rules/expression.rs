//! Boolean expression grammar for auto-quarantine rules.
//!
//! Rules are small predicates over the fields of an exception report:
//!
//! ```text
//! exceptionClass == "java.net.SocketTimeoutException" and queue contains "case"
//! ```
//!
//! Grammar (precedence low to high): `or`, `and`, `not` / parentheses /
//! comparison. Comparisons are `field == "lit"`, `field != "lit"` and
//! `field contains "lit"`. String literals take single or double quotes;
//! keywords are case-insensitive.
//!
//! Expressions are compiled once into a closed AST over a fixed field set.
//! Unknown fields, bad operators and trailing input are compile-time errors;
//! evaluation cannot fail.

use thiserror::Error;

use crate::models::ExceptionReport;

/// Compile failure, reported at rule-add time.
#[derive(Debug, Error)]
#[error("{message} (at offset {position})")]
pub struct ExpressionError {
    pub message: String,
    pub position: usize,
}

impl ExpressionError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// A report field addressable from a rule expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    MessageHash,
    Service,
    Queue,
    ExceptionClass,
    ExceptionMessage,
    ExceptionRootCause,
}

impl Field {
    fn resolve(name: &str) -> Option<Self> {
        match name {
            "messageHash" | "message_hash" => Some(Self::MessageHash),
            "service" => Some(Self::Service),
            "queue" => Some(Self::Queue),
            "exceptionClass" | "exception_class" => Some(Self::ExceptionClass),
            "exceptionMessage" | "exception_message" => Some(Self::ExceptionMessage),
            "exceptionRootCause" | "exception_root_cause" => Some(Self::ExceptionRootCause),
            _ => None,
        }
    }

    fn get<'a>(&self, report: &'a ExceptionReport) -> &'a str {
        match self {
            Self::MessageHash => &report.message_hash,
            Self::Service => &report.service,
            Self::Queue => &report.queue,
            Self::ExceptionClass => &report.exception_class,
            Self::ExceptionMessage => &report.exception_message,
            Self::ExceptionRootCause => &report.exception_root_cause,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Contains,
}

#[derive(Debug, Clone)]
enum Expr {
    Cmp {
        field: Field,
        op: CmpOp,
        value: String,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    fn eval(&self, report: &ExceptionReport) -> bool {
        match self {
            Expr::Cmp { field, op, value } => {
                let actual = field.get(report);
                match op {
                    CmpOp::Eq => actual == value,
                    CmpOp::Ne => actual != value,
                    CmpOp::Contains => actual.contains(value.as_str()),
                }
            }
            Expr::And(a, b) => a.eval(report) && b.eval(report),
            Expr::Or(a, b) => a.eval(report) || b.eval(report),
            Expr::Not(inner) => !inner.eval(report),
        }
    }
}

/// A rule expression compiled to a closed predicate over report fields.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    ast: Expr,
}

impl CompiledExpression {
    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a report. Never fails.
    pub fn matches(&self, report: &ExceptionReport) -> bool {
        self.ast.eval(report)
    }
}

/// Compile an expression, validating the full grammar and field set.
pub fn compile(source: &str) -> Result<CompiledExpression, ExpressionError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(ExpressionError::new(
            format!("unexpected trailing input '{}'", tok.text()),
            tok.position(),
        ));
    }
    Ok(CompiledExpression {
        source: source.to_string(),
        ast,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String, usize),
    Str(String, usize),
    EqEq(usize),
    NotEq(usize),
    LParen(usize),
    RParen(usize),
}

impl Token {
    fn position(&self) -> usize {
        match self {
            Token::Ident(_, p)
            | Token::Str(_, p)
            | Token::EqEq(p)
            | Token::NotEq(p)
            | Token::LParen(p)
            | Token::RParen(p) => *p,
        }
    }

    fn text(&self) -> String {
        match self {
            Token::Ident(s, _) => s.clone(),
            Token::Str(s, _) => format!("\"{s}\""),
            Token::EqEq(_) => "==".to_string(),
            Token::NotEq(_) => "!=".to_string(),
            Token::LParen(_) => "(".to_string(),
            Token::RParen(_) => ")".to_string(),
        }
    }
}

fn lex(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen(i));
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen(i));
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq(i));
                    i += 2;
                } else {
                    return Err(ExpressionError::new("expected '=='", i));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq(i));
                    i += 2;
                } else {
                    return Err(ExpressionError::new("expected '!='", i));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut literal = String::new();
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            literal.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(ExpressionError::new("unterminated string literal", start));
                        }
                    }
                }
                tokens.push(Token::Str(literal, start));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut ident = String::new();
                while let Some(&ch) = chars.get(i) {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident, start));
            }
            other => {
                return Err(ExpressionError::new(
                    format!("unexpected character '{other}'"),
                    i,
                ));
            }
        }
    }

    Ok(tokens)
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
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s, _)) if s.eq_ignore_ascii_case(keyword))
    }

    fn end_position(&self) -> usize {
        self.tokens.last().map(|t| t.position() + 1).unwrap_or(0)
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek_keyword("not") {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }

        if let Some(Token::LParen(_)) = self.peek() {
            self.next();
            let inner = self.parse_or()?;
            match self.next() {
                Some(Token::RParen(_)) => return Ok(inner),
                Some(tok) => {
                    return Err(ExpressionError::new(
                        format!("expected ')', found '{}'", tok.text()),
                        tok.position(),
                    ));
                }
                None => {
                    return Err(ExpressionError::new("expected ')'", self.end_position()));
                }
            }
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let (name, position) = match self.next() {
            Some(Token::Ident(name, position)) => (name, position),
            Some(tok) => {
                return Err(ExpressionError::new(
                    format!("expected a field name, found '{}'", tok.text()),
                    tok.position(),
                ));
            }
            None => {
                return Err(ExpressionError::new(
                    "expected a field name",
                    self.end_position(),
                ));
            }
        };

        let field = Field::resolve(&name)
            .ok_or_else(|| ExpressionError::new(format!("unknown field '{name}'"), position))?;

        let op = match self.next() {
            Some(Token::EqEq(_)) => CmpOp::Eq,
            Some(Token::NotEq(_)) => CmpOp::Ne,
            Some(Token::Ident(kw, _)) if kw.eq_ignore_ascii_case("contains") => CmpOp::Contains,
            Some(tok) => {
                return Err(ExpressionError::new(
                    format!("expected '==', '!=' or 'contains', found '{}'", tok.text()),
                    tok.position(),
                ));
            }
            None => {
                return Err(ExpressionError::new(
                    "expected '==', '!=' or 'contains'",
                    self.end_position(),
                ));
            }
        };

        let value = match self.next() {
            Some(Token::Str(value, _)) => value,
            Some(tok) => {
                return Err(ExpressionError::new(
                    format!("expected a quoted string, found '{}'", tok.text()),
                    tok.position(),
                ));
            }
            None => {
                return Err(ExpressionError::new(
                    "expected a quoted string",
                    self.end_position(),
                ));
            }
        };

        Ok(Expr::Cmp { field, op, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ExceptionReport {
        ExceptionReport {
            message_hash: "abc123".to_string(),
            service: "case-processor".to_string(),
            queue: "case.events".to_string(),
            exception_class: "java.net.SocketTimeoutException".to_string(),
            exception_message: "Read timed out".to_string(),
            exception_root_cause: "connection reset by peer".to_string(),
        }
    }

    #[test]
    fn equality_matches_exact_field_values() {
        let expr = compile("exceptionClass == \"java.net.SocketTimeoutException\"").unwrap();
        assert!(expr.matches(&report()));

        let expr = compile("exceptionClass == 'java.io.IOException'").unwrap();
        assert!(!expr.matches(&report()));
    }

    #[test]
    fn and_requires_both_sides() {
        let expr =
            compile("exceptionClass == 'java.net.SocketTimeoutException' and queue == 'case.events'")
                .unwrap();
        assert!(expr.matches(&report()));

        let expr =
            compile("exceptionClass == 'java.net.SocketTimeoutException' and queue == 'other'")
                .unwrap();
        assert!(!expr.matches(&report()));

        let expr = compile("exceptionClass == 'nope' and queue == 'case.events'").unwrap();
        assert!(!expr.matches(&report()));
    }

    #[test]
    fn or_requires_either_side() {
        let expr = compile("service == 'nope' or queue == 'case.events'").unwrap();
        assert!(expr.matches(&report()));

        let expr = compile("service == 'nope' or queue == 'nope'").unwrap();
        assert!(!expr.matches(&report()));
    }

    #[test]
    fn contains_is_substring_match() {
        let expr = compile("exceptionMessage contains 'timed out'").unwrap();
        assert!(expr.matches(&report()));

        let expr = compile("exceptionRootCause contains 'reset'").unwrap();
        assert!(expr.matches(&report()));

        let expr = compile("exceptionMessage contains 'OutOfMemory'").unwrap();
        assert!(!expr.matches(&report()));
    }

    #[test]
    fn not_and_parentheses() {
        let expr = compile("not (service == 'case-processor')").unwrap();
        assert!(!expr.matches(&report()));

        let expr = compile("not service == 'other-service'").unwrap();
        assert!(expr.matches(&report()));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        // service == 'nope' or (queue == 'case.events' and exceptionClass contains 'Timeout')
        let expr = compile(
            "service == 'nope' or queue == 'case.events' and exceptionClass contains 'Timeout'",
        )
        .unwrap();
        assert!(expr.matches(&report()));
    }

    #[test]
    fn snake_case_field_names_accepted() {
        let expr = compile("exception_class contains 'SocketTimeout'").unwrap();
        assert!(expr.matches(&report()));
    }

    #[test]
    fn unknown_field_is_a_compile_error() {
        let err = compile("bogusField == 'x'").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn syntax_errors_are_compile_errors() {
        assert!(compile("").is_err());
        assert!(compile("queue = 'x'").is_err());
        assert!(compile("queue == ").is_err());
        assert!(compile("queue == 'x' extra").is_err());
        assert!(compile("queue == 'unterminated").is_err());
        assert!(compile("(queue == 'x'").is_err());
        assert!(compile("queue == value").is_err());
    }
}

//! Restricted expression grammar for untrusted constraint strings.
//!
//! The upstream generator ships constraints and the final expression as plain
//! strings. They are parsed here against a fixed grammar — arithmetic,
//! one comparison per constraint, and a whitelisted function set — never
//! evaluated as code. Every identifier must resolve to a declared variable or
//! a whitelisted function.

use log::debug;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::One;
use thiserror::Error;

use crate::descriptor::{resolve_variables, ProblemDescriptor, Variable};
use crate::expr::{ComparisonOp, Constraint, Expr, Func};

/// Errors produced while validating and parsing a descriptor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' takes {expected} argument(s), got {got}")]
    WrongArity {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("character '{0}' is not allowed")]
    DisallowedCharacter(char),
    #[error("invalid numeric literal '{0}'")]
    InvalidNumber(String),
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("constraint must contain a comparison: '{0}'")]
    MissingComparison(String),
    #[error("chained comparisons are not supported: '{0}'")]
    ChainedComparison(String),
    #[error("comparison operator not allowed in the final expression")]
    ComparisonInExpression,
    #[error("variable '{name}' must declare finite bounds")]
    MissingBounds { name: String },
    #[error("variable '{name}' has invalid bounds")]
    InvalidBounds { name: String },
    #[error("duplicate variable '{0}'")]
    DuplicateVariable(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(BigRational),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
    Comma,
    Cmp(ComparisonOp),
}

fn token_text(token: &Token) -> String {
    match token {
        Token::Number(n) => n.to_string(),
        Token::Ident(s) => s.clone(),
        Token::Plus => "+".to_string(),
        Token::Minus => "-".to_string(),
        Token::Star => "*".to_string(),
        Token::Slash => "/".to_string(),
        Token::Pow => "**".to_string(),
        Token::LParen => "(".to_string(),
        Token::RParen => ")".to_string(),
        Token::Comma => ",".to_string(),
        Token::Cmp(op) => op.symbol().to_string(),
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::Pow);
                } else {
                    tokens.push(Token::Star);
                }
            }
            '^' => {
                chars.next();
                tokens.push(Token::Pow);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Cmp(ComparisonOp::Eq));
                } else {
                    return Err(ParseError::DisallowedCharacter('='));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Cmp(ComparisonOp::Ne));
                } else {
                    return Err(ParseError::DisallowedCharacter('!'));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Cmp(ComparisonOp::Le));
                } else {
                    tokens.push(Token::Cmp(ComparisonOp::Lt));
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Cmp(ComparisonOp::Ge));
                } else {
                    tokens.push(Token::Cmp(ComparisonOp::Gt));
                }
            }
            '0'..='9' => {
                tokens.push(lex_number(&mut chars)?);
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ParseError::DisallowedCharacter(other)),
        }
    }

    Ok(tokens)
}

/// Lex a decimal literal into an exact rational: "2.5" becomes 5/2 with no
/// float round-trip.
fn lex_number(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<Token, ParseError> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            chars.next();
        } else {
            break;
        }
    }

    let mut frac = String::new();
    if chars.peek() == Some(&'.') {
        chars.next();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                frac.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if frac.is_empty() {
            return Err(ParseError::InvalidNumber(format!("{digits}.")));
        }
    }

    let literal = if frac.is_empty() {
        digits.clone()
    } else {
        format!("{digits}.{frac}")
    };
    let numer: BigInt = format!("{digits}{frac}")
        .parse()
        .map_err(|_| ParseError::InvalidNumber(literal))?;
    let mut denom = BigInt::one();
    for _ in 0..frac.len() {
        denom *= 10;
    }
    Ok(Token::Number(BigRational::new(numer, denom)))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    variables: &'a [Variable],
}

impl<'a> Parser<'a> {
    fn new(text: &str, variables: &'a [Variable]) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
            variables,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// additive := multiplicative (('+' | '-') multiplicative)*
    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.next();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    /// multiplicative := unary (('*' | '/') unary)*
    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Slash) => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    /// unary := '-' unary | power
    /// Exponentiation binds tighter than unary minus, so -x**2 is -(x**2).
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_power()
    }

    /// power := atom ('**' unary)?   (right-associative; 2**-3 is valid)
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_atom()?;
        if self.peek() == Some(&Token::Pow) {
            self.next();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.parse_call(&name)
                } else {
                    self.variables
                        .iter()
                        .position(|v| v.name == name)
                        .map(Expr::Var)
                        .ok_or(ParseError::UnknownSymbol(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_additive()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ParseError::UnexpectedToken(token_text(&other))),
                    None => Err(ParseError::UnexpectedEnd),
                }
            }
            Some(other) => Err(ParseError::UnexpectedToken(token_text(&other))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, ParseError> {
        let func = Func::from_name(name)
            .ok_or_else(|| ParseError::UnknownFunction(name.to_string()))?;
        self.next(); // consume '('

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_additive()?);
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    Some(other) => return Err(ParseError::UnexpectedToken(token_text(&other))),
                    None => return Err(ParseError::UnexpectedEnd),
                }
            }
        } else {
            self.next(); // consume ')'
        }

        if args.len() != func.arity() {
            return Err(ParseError::WrongArity {
                name: func.name(),
                expected: func.arity(),
                got: args.len(),
            });
        }
        Ok(Expr::Call(func, args))
    }
}

/// Parse a pure expression (no comparison operator allowed).
pub fn parse_expression(text: &str, variables: &[Variable]) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(text, variables)?;
    let expr = parser.parse_additive()?;
    match parser.next() {
        None => Ok(expr),
        Some(Token::Cmp(_)) => Err(ParseError::ComparisonInExpression),
        Some(other) => Err(ParseError::UnexpectedToken(token_text(&other))),
    }
}

/// Parse a constraint: exactly one comparison between two expressions.
pub fn parse_constraint(text: &str, variables: &[Variable]) -> Result<Constraint, ParseError> {
    let mut parser = Parser::new(text, variables)?;
    let lhs = parser.parse_additive()?;
    let op = match parser.next() {
        Some(Token::Cmp(op)) => op,
        Some(other) => return Err(ParseError::UnexpectedToken(token_text(&other))),
        None => return Err(ParseError::MissingComparison(text.to_string())),
    };
    let rhs = parser.parse_additive()?;
    if !parser.at_end() {
        if matches!(parser.peek(), Some(Token::Cmp(_))) {
            return Err(ParseError::ChainedComparison(text.to_string()));
        }
        let token = parser.next().map(|t| token_text(&t)).unwrap_or_default();
        return Err(ParseError::UnexpectedToken(token));
    }
    Ok(Constraint {
        text: text.to_string(),
        lhs,
        op,
        rhs,
    })
}

/// A fully parsed and validated problem, ready for the solver.
#[derive(Debug, Clone)]
pub struct ParsedProblem {
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
    pub final_expression: Expr,
    pub claimed_answer: f64,
}

/// Validate and parse an untrusted descriptor into symbolic form.
pub fn parse_problem(descriptor: &ProblemDescriptor) -> Result<ParsedProblem, ParseError> {
    let variables = resolve_variables(&descriptor.variables)?;

    let mut constraints = Vec::with_capacity(descriptor.constraints_sympy.len());
    for text in &descriptor.constraints_sympy {
        constraints.push(parse_constraint(text, &variables)?);
    }
    let final_expression = parse_expression(&descriptor.final_expression_sympy, &variables)?;

    if !descriptor.answer.is_finite() {
        return Err(ParseError::InvalidNumber(descriptor.answer.to_string()));
    }

    debug!(
        "parsed descriptor: {} variable(s), {} constraint(s)",
        variables.len(),
        constraints.len()
    );

    Ok(ParsedProblem {
        variables,
        constraints,
        final_expression,
        claimed_answer: descriptor.answer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Domain;
    use crate::expr::Value;

    fn vars(names: &[&str]) -> Vec<Variable> {
        names
            .iter()
            .map(|n| Variable {
                name: n.to_string(),
                domain: Domain::Real,
                lo: None,
                hi: None,
            })
            .collect()
    }

    fn eval_const(text: &str) -> Value {
        parse_expression(text, &[]).unwrap().eval(&[]).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_const("2 + 3*4"), Value::from_int(14));
        assert_eq!(eval_const("2*3**2"), Value::from_int(18));
        assert_eq!(eval_const("(2 + 3)*4"), Value::from_int(20));
    }

    #[test]
    fn test_unary_minus_binds_looser_than_pow() {
        assert_eq!(eval_const("-2**2"), Value::from_int(-4));
        assert_eq!(eval_const("(-2)**2"), Value::from_int(4));
    }

    #[test]
    fn test_negative_exponent_parses() {
        let v = eval_const("2**-2");
        assert_eq!(v.to_f64(), 0.25);
    }

    #[test]
    fn test_caret_is_pow_alias() {
        assert_eq!(eval_const("2^3"), Value::from_int(8));
    }

    #[test]
    fn test_decimal_literal_is_exact() {
        match eval_const("0.5") {
            Value::Exact(r) => assert_eq!(r, BigRational::new(1.into(), 2.into())),
            Value::Approx(_) => panic!("decimal literals must parse exactly"),
        }
    }

    #[test]
    fn test_unknown_symbol_rejected() {
        let vs = vars(&["x"]);
        let err = parse_constraint("y > 0", &vs);
        assert_eq!(err, Err(ParseError::UnknownSymbol("y".to_string())));
    }

    #[test]
    fn test_unknown_function_rejected() {
        let vs = vars(&["x"]);
        let err = parse_expression("exp(x)", &vs);
        assert_eq!(err, Err(ParseError::UnknownFunction("exp".to_string())));
    }

    #[test]
    fn test_whitelisted_call_and_arity() {
        let vs = vars(&["x"]);
        assert!(parse_expression("Abs(x) + Mod(x, 3)", &vs).is_ok());

        let err = parse_expression("Mod(x)", &vs);
        assert!(matches!(err, Err(ParseError::WrongArity { .. })));
    }

    #[test]
    fn test_disallowed_characters_rejected() {
        let vs = vars(&["x"]);
        assert!(matches!(
            parse_constraint("x & 1 == 0", &vs),
            Err(ParseError::DisallowedCharacter('&'))
        ));
        assert!(matches!(
            parse_constraint("x = 3", &vs),
            Err(ParseError::DisallowedCharacter('='))
        ));
    }

    #[test]
    fn test_implicit_multiplication_rejected() {
        let vs = vars(&["x"]);
        assert!(matches!(
            parse_expression("2x", &vs),
            Err(ParseError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_constraint_requires_exactly_one_comparison() {
        let vs = vars(&["x"]);
        assert!(matches!(
            parse_constraint("x + 1", &vs),
            Err(ParseError::MissingComparison(_))
        ));
        assert!(matches!(
            parse_constraint("1 < x < 5", &vs),
            Err(ParseError::ChainedComparison(_))
        ));
    }

    #[test]
    fn test_comparison_rejected_in_final_expression() {
        let vs = vars(&["x"]);
        assert_eq!(
            parse_expression("x == 3", &vs),
            Err(ParseError::ComparisonInExpression)
        );
    }

    #[test]
    fn test_constraint_roundtrip() {
        let vs = vars(&["x"]);
        let c = parse_constraint("x*x == 9", &vs).unwrap();
        assert!(c.is_equality());
        assert!(c.holds(&[Value::from_int(3)]));
        assert!(c.holds(&[Value::from_int(-3)]));
        assert!(!c.holds(&[Value::from_int(2)]));
    }
}

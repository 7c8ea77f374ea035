//! Formula grammar: tokenizer, recursive-descent parser and AST evaluator.
//!
//! Supported syntax:
//! - numeric literals: `12`, `3.14`, `-0.5`
//! - references: `${monitor:id}`, `${webhook:id}`, `${funding:exchange-SYM}`,
//!   `${spot:exchange-SYM}`
//! - operators: `+ - * / %` and parentheses
//! - functions: `abs(x)`, `max(a, b, ...)`, `min(a, b, ...)`
//!
//! User formulas never reach a host-language eval: they are parsed into this
//! AST and evaluated by a plain match with an explicit variable map.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    /// A `${kind:id}` reference; the string is the full `kind:id` key.
    Var(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Max,
    Min,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("unexpected token at offset {0}")]
    UnexpectedToken(usize),
    #[error("malformed reference '{0}'")]
    BadReference(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{0} expects {1}")]
    WrongArity(&'static str, &'static str),
    #[error("invalid number at offset {0}")]
    BadNumber(usize),
    #[error("empty formula")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unbound variable '{0}'")]
    UnboundVariable(String),
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ref(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push((Token::Plus, i));
                i += 1;
            }
            '-' => {
                tokens.push((Token::Minus, i));
                i += 1;
            }
            '*' => {
                tokens.push((Token::Star, i));
                i += 1;
            }
            '/' => {
                tokens.push((Token::Slash, i));
                i += 1;
            }
            '%' => {
                tokens.push((Token::Percent, i));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, i));
                i += 1;
            }
            '$' => {
                // ${kind:id}
                if chars.get(i + 1) != Some(&'{') {
                    return Err(ParseError::UnexpectedChar('$', i));
                }
                let start = i + 2;
                let mut j = start;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ParseError::UnexpectedEnd);
                }
                let inner: String = chars[start..j].iter().collect();
                match inner.split_once(':') {
                    Some((kind, id)) if !kind.is_empty() && !id.is_empty() => {
                        tokens.push((Token::Ref(inner), i));
                    }
                    _ => return Err(ParseError::BadReference(inner)),
                }
                i = j + 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let raw: String = chars[start..j].iter().collect();
                let num = raw.parse::<f64>().map_err(|_| ParseError::BadNumber(start))?;
                tokens.push((Token::Num(num), start));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let ident: String = chars[start..j].iter().collect();
                tokens.push((Token::Ident(ident), start));
                i = j;
            }
            other => return Err(ParseError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(0)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), ParseError> {
        match self.advance() {
            Some(t) if t == want => Ok(()),
            Some(_) => Err(ParseError::UnexpectedToken(self.tokens[self.pos - 1].1)),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(Expr::Literal(n)),
            Some(Token::Ref(dep)) => Ok(Expr::Var(dep)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let func = match name.as_str() {
                    "abs" => Func::Abs,
                    "max" => Func::Max,
                    "min" => Func::Min,
                    _ => return Err(ParseError::UnknownFunction(name)),
                };
                self.expect(Token::LParen)?;
                let mut args = vec![self.expr()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    args.push(self.expr()?);
                }
                self.expect(Token::RParen)?;
                match func {
                    Func::Abs if args.len() != 1 => {
                        Err(ParseError::WrongArity("abs", "exactly one argument"))
                    }
                    Func::Max | Func::Min if args.len() < 2 => Err(ParseError::WrongArity(
                        if func == Func::Max { "max" } else { "min" },
                        "at least two arguments",
                    )),
                    _ => Ok(Expr::Call { func, args }),
                }
            }
            Some(_) => Err(ParseError::UnexpectedToken(self.tokens[self.pos - 1].1)),
            None => Err(ParseError::UnexpectedEnd),
        }
    }
}

/// Parse a formula into its AST.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError::UnexpectedToken(parser.offset()));
    }
    Ok(expr)
}

/// Collect every `${kind:id}` reference in the AST.
pub fn dependencies(expr: &Expr) -> BTreeSet<String> {
    let mut deps = BTreeSet::new();
    collect_deps(expr, &mut deps);
    deps
}

fn collect_deps(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Var(dep) => {
            out.insert(dep.clone());
        }
        Expr::Neg(inner) => collect_deps(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_deps(lhs, out);
            collect_deps(rhs, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_deps(arg, out);
            }
        }
    }
}

/// Evaluate the AST with every reference bound in `vars`.
pub fn eval(expr: &Expr, vars: &HashMap<String, f64>) -> Result<f64, EvalError> {
    match expr {
        Expr::Literal(n) => Ok(*n),
        Expr::Var(dep) => vars
            .get(dep)
            .copied()
            .ok_or_else(|| EvalError::UnboundVariable(dep.clone())),
        Expr::Neg(inner) => Ok(-eval(inner, vars)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, vars)?;
            let r = eval(rhs, vars)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div => {
                    if r == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(l / r)
                    }
                }
                BinOp::Rem => {
                    if r == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(l % r)
                    }
                }
            }
        }
        Expr::Call { func, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, vars)?);
            }
            Ok(match func {
                Func::Abs => values[0].abs(),
                Func::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                Func::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            })
        }
    }
}

/// Classify a formula for display: a bare literal is a constant, a lone
/// reference is a direct alias, anything else is computed.
pub fn classify(formula: &str) -> &'static str {
    match parse(formula) {
        Ok(Expr::Literal(_)) => "constant",
        Ok(Expr::Neg(inner)) if matches!(*inner, Expr::Literal(_)) => "constant",
        Ok(Expr::Var(_)) => "direct",
        Ok(_) => "computed",
        Err(_) => "invalid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(input: &str, vars: &[(&str, f64)]) -> Result<f64, EvalError> {
        let expr = parse(input).expect("parse");
        let map: HashMap<String, f64> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        eval(&expr, &map)
    }

    #[test]
    fn literals_and_arithmetic() {
        assert_eq!(eval_str("12", &[]), Ok(12.0));
        assert_eq!(eval_str("-0.5", &[]), Ok(-0.5));
        assert_eq!(eval_str("2 + 3 * 4", &[]), Ok(14.0));
        assert_eq!(eval_str("(2 + 3) * 4", &[]), Ok(20.0));
        assert_eq!(eval_str("10 % 3", &[]), Ok(1.0));
        assert_eq!(eval_str("1 - -1", &[]), Ok(2.0));
    }

    #[test]
    fn references_resolve_from_vars() {
        assert_eq!(
            eval_str(
                "${monitor:btc} - ${monitor:eth}",
                &[("monitor:btc", 50000.0), ("monitor:eth", 3000.0)]
            ),
            Ok(47000.0)
        );
        assert_eq!(
            eval_str("${funding:lighter-BTC} / 100", &[("funding:lighter-BTC", 10.0)]),
            Ok(0.1)
        );
    }

    #[test]
    fn functions() {
        assert_eq!(eval_str("abs(-3)", &[]), Ok(3.0));
        assert_eq!(eval_str("max(1, 2, 3)", &[]), Ok(3.0));
        assert_eq!(eval_str("min(1, -2)", &[]), Ok(-2.0));
        assert_eq!(
            eval_str(
                "abs(${monitor:a} - ${monitor:b}) / 100",
                &[("monitor:a", 5.0), ("monitor:b", 205.0)]
            ),
            Ok(2.0)
        );
    }

    #[test]
    fn dependency_extraction_round_trips() {
        let expr = parse("(${spot:binance-BTC} - ${spot:lighter-BTC}) / ${spot:binance-BTC} * 100")
            .unwrap();
        let deps = dependencies(&expr);
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec!["spot:binance-BTC".to_string(), "spot:lighter-BTC".to_string()]
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("${nope}").is_err());
        assert!(parse("${monitor:}").is_err());
        assert!(parse("sqrt(4)").is_err());
        assert!(parse("abs(1, 2)").is_err());
        assert!(parse("max(1)").is_err());
        assert!(parse("1; import os").is_err());
        assert!(parse("1 2").is_err());
    }

    #[test]
    fn division_by_zero_is_an_error_not_infinity() {
        assert_eq!(eval_str("1 / 0", &[]), Err(EvalError::DivisionByZero));
        assert_eq!(eval_str("1 % 0", &[]), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn unbound_variable_is_an_error() {
        assert_eq!(
            eval_str("${monitor:missing}", &[]),
            Err(EvalError::UnboundVariable("monitor:missing".to_string()))
        );
    }

    #[test]
    fn classification() {
        assert_eq!(classify("0"), "constant");
        assert_eq!(classify("-3.5"), "constant");
        assert_eq!(classify("${webhook:pricing}"), "direct");
        assert_eq!(classify("${webhook:pricing} * 2"), "computed");
        assert_eq!(classify("${"), "invalid");
    }
}

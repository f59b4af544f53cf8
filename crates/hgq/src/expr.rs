//! Sort-expression engine for `GROUP_SORT_EXPR`.
//!
//! Supports the rvalue subset the negotiator needs to order groups:
//! literals, attribute references, arithmetic, comparisons (including the
//! undefined-safe `=?=`), boolean connectives, `?:` and a small set of
//! builtin functions. Missing attributes evaluate to `Undefined`, which
//! propagates the way a negotiator expects.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, multispace0, one_of, satisfy};
use nom::combinator::{map_res, opt, recognize, value};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use thiserror::Error;

use crate::common::Map;

/// Attribute carrying the group name in each per-group ad.
pub const ATTR_ACCOUNTING_GROUP: &str = "AccountingGroup";
/// Attribute carrying the group's assigned quota.
pub const ATTR_GROUP_QUOTA: &str = "GroupQuota";
/// Attribute carrying the group's observed usage.
pub const ATTR_GROUP_RESOURCES_IN_USE: &str = "GroupResourcesInUse";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ExprParseError {
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    IsIdentical,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Undefined,
    Attr(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Undefined,
}

impl Value {
    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(x) => Some(*x),
            _ => None,
        }
    }

    /// Truth value for conditionals; numbers count as their non-zero test.
    fn as_condition(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(x) => Some(*x != 0.0),
            _ => None,
        }
    }
}

type ExprResult<'a, T> = IResult<&'a str, T>;

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> ExprResult<'a, O>
where
    F: FnMut(&'a str) -> ExprResult<'a, O>,
{
    preceded(multispace0, inner)
}

fn p_number(input: &str) -> ExprResult<Expr> {
    map_res(
        recognize(tuple((
            take_while1(|c: char| c.is_ascii_digit()),
            opt(pair(char('.'), take_while(|c: char| c.is_ascii_digit()))),
            opt(tuple((
                one_of("eE"),
                opt(one_of("+-")),
                take_while1(|c: char| c.is_ascii_digit()),
            ))),
        ))),
        |text: &str| text.parse::<f64>().map(Expr::Number),
    )(input)
}

fn p_string(input: &str) -> ExprResult<Expr> {
    let (rest, text) = delimited(char('"'), take_while(|c| c != '"'), char('"'))(input)?;
    Ok((rest, Expr::Str(text.to_string())))
}

fn p_ident(input: &str) -> ExprResult<&str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn p_call_args(input: &str) -> ExprResult<Vec<Expr>> {
    delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), p_expr),
        ws(char(')')),
    )(input)
}

fn p_ident_like(input: &str) -> ExprResult<Expr> {
    let (rest, name) = p_ident(input)?;
    if let Ok((rest, args)) = p_call_args(rest) {
        return Ok((rest, Expr::Call(name.to_string(), args)));
    }
    let expr = if name.eq_ignore_ascii_case("true") {
        Expr::Bool(true)
    } else if name.eq_ignore_ascii_case("false") {
        Expr::Bool(false)
    } else if name.eq_ignore_ascii_case("undefined") {
        Expr::Undefined
    } else {
        Expr::Attr(name.to_string())
    };
    Ok((rest, expr))
}

fn p_paren(input: &str) -> ExprResult<Expr> {
    delimited(char('('), p_expr, ws(char(')')))(input)
}

fn p_atom(input: &str) -> ExprResult<Expr> {
    ws(alt((p_paren, p_string, p_number, p_ident_like)))(input)
}

fn p_unary(input: &str) -> ExprResult<Expr> {
    let (rest, op) = opt(ws(alt((
        value(UnaryOp::Neg, char('-')),
        value(UnaryOp::Not, char('!')),
    ))))(input)?;
    match op {
        Some(op) => {
            let (rest, inner) = p_unary(rest)?;
            Ok((rest, Expr::Unary(op, Box::new(inner))))
        }
        None => p_atom(rest),
    }
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    })
}

fn p_mul(input: &str) -> ExprResult<Expr> {
    let (input, first) = p_unary(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
        ))),
        p_unary,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn p_add(input: &str) -> ExprResult<Expr> {
    let (input, first) = p_mul(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinaryOp::Add, char('+')),
            value(BinaryOp::Sub, char('-')),
        ))),
        p_mul,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn p_cmp(input: &str) -> ExprResult<Expr> {
    let (input, first) = p_add(input)?;
    let (input, rest) = opt(pair(
        ws(alt((
            value(BinaryOp::IsIdentical, tag("=?=")),
            value(BinaryOp::Eq, tag("==")),
            value(BinaryOp::Ne, tag("!=")),
            value(BinaryOp::Le, tag("<=")),
            value(BinaryOp::Ge, tag(">=")),
            value(BinaryOp::Lt, char('<')),
            value(BinaryOp::Gt, char('>')),
        ))),
        p_add,
    ))(input)?;
    Ok(match rest {
        Some((op, rhs)) => (input, Expr::Binary(op, Box::new(first), Box::new(rhs))),
        None => (input, first),
    })
}

fn p_and(input: &str) -> ExprResult<Expr> {
    let (input, first) = p_cmp(input)?;
    let (input, rest) = many0(pair(ws(value(BinaryOp::And, tag("&&"))), p_cmp))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn p_or(input: &str) -> ExprResult<Expr> {
    let (input, first) = p_and(input)?;
    let (input, rest) = many0(pair(ws(value(BinaryOp::Or, tag("||"))), p_and))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn p_ternary(input: &str) -> ExprResult<Expr> {
    let (input, cond) = p_or(input)?;
    let (input, rest) = opt(tuple((ws(char('?')), p_expr, ws(char(':')), p_ternary)))(input)?;
    Ok(match rest {
        Some((_, then, _, otherwise)) => (
            input,
            Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)),
        ),
        None => (input, cond),
    })
}

fn p_expr(input: &str) -> ExprResult<Expr> {
    p_ternary(input)
}

/// Parse a complete sort expression; trailing input is an error.
pub fn parse_sort_expr(input: &str) -> Result<Expr, ExprParseError> {
    match p_expr(input) {
        Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
        Ok((rest, _)) => Err(ExprParseError {
            message: format!("unexpected trailing input \"{}\"", rest.trim()),
        }),
        Err(e) => Err(ExprParseError {
            message: e.to_string(),
        }),
    }
}

fn eval_unary(op: UnaryOp, inner: Value) -> Value {
    match (op, inner) {
        (UnaryOp::Neg, Value::Number(x)) => Value::Number(-x),
        (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
        _ => Value::Undefined,
    }
}

fn eval_arith(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => match op {
            BinaryOp::Add => Value::Number(a + b),
            BinaryOp::Sub => Value::Number(a - b),
            BinaryOp::Mul => Value::Number(a * b),
            BinaryOp::Div => {
                if b == 0.0 {
                    Value::Undefined
                } else {
                    Value::Number(a / b)
                }
            }
            _ => unreachable!(),
        },
        _ => Value::Undefined,
    }
}

fn eval_ordering(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
        _ => None,
    };
    match ordering {
        Some(ord) => Value::Bool(match op {
            BinaryOp::Lt => ord.is_lt(),
            BinaryOp::Le => ord.is_le(),
            BinaryOp::Gt => ord.is_gt(),
            BinaryOp::Ge => ord.is_ge(),
            _ => unreachable!(),
        }),
        None => Value::Undefined,
    }
}

fn eval_equality(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    let equal = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a.eq_ignore_ascii_case(b),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => return Value::Undefined,
    };
    Value::Bool(if op == BinaryOp::Eq { equal } else { !equal })
}

/// `=?=` never yields `Undefined`: undefined operands compare as values,
/// and strings compare case-sensitively.
fn eval_is_identical(lhs: &Value, rhs: &Value) -> Value {
    let identical = match (lhs, rhs) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Undefined, _) | (_, Value::Undefined) => false,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => false,
    };
    Value::Bool(identical)
}

fn eval_logic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    let (a, b) = (lhs.as_condition(), rhs.as_condition());
    match op {
        BinaryOp::And => match (a, b) {
            (Some(false), _) | (_, Some(false)) => Value::Bool(false),
            (Some(true), Some(true)) => Value::Bool(true),
            _ => Value::Undefined,
        },
        BinaryOp::Or => match (a, b) {
            (Some(true), _) | (_, Some(true)) => Value::Bool(true),
            (Some(false), Some(false)) => Value::Bool(false),
            _ => Value::Undefined,
        },
        _ => unreachable!(),
    }
}

fn eval_call(name: &str, args: &[Expr], attrs: &Map<String, Value>) -> Value {
    if name.eq_ignore_ascii_case("ifThenElse") {
        if args.len() != 3 {
            return Value::Undefined;
        }
        return match eval(&args[0], attrs).as_condition() {
            Some(true) => eval(&args[1], attrs),
            Some(false) => eval(&args[2], attrs),
            None => Value::Undefined,
        };
    }
    if name.eq_ignore_ascii_case("divide") {
        if args.len() != 2 {
            return Value::Undefined;
        }
        return eval_arith(
            BinaryOp::Div,
            &eval(&args[0], attrs),
            &eval(&args[1], attrs),
        );
    }
    if name.eq_ignore_ascii_case("min") || name.eq_ignore_ascii_case("max") {
        if args.len() != 2 {
            return Value::Undefined;
        }
        let a = eval(&args[0], attrs).as_number();
        let b = eval(&args[1], attrs).as_number();
        return match (a, b) {
            (Some(a), Some(b)) => Value::Number(if name.eq_ignore_ascii_case("min") {
                a.min(b)
            } else {
                a.max(b)
            }),
            _ => Value::Undefined,
        };
    }
    Value::Undefined
}

/// Evaluate an expression against an attribute record. Attribute lookup is
/// case-insensitive; the record stores lower-cased keys.
pub fn eval(expr: &Expr, attrs: &Map<String, Value>) -> Value {
    match expr {
        Expr::Number(x) => Value::Number(*x),
        Expr::Str(s) => Value::Str(s.clone()),
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Undefined => Value::Undefined,
        Expr::Attr(name) => attrs
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or(Value::Undefined),
        Expr::Unary(op, inner) => eval_unary(*op, eval(inner, attrs)),
        Expr::Binary(op, lhs, rhs) => {
            let (lhs, rhs) = (eval(lhs, attrs), eval(rhs, attrs));
            match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                    eval_arith(*op, &lhs, &rhs)
                }
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    eval_ordering(*op, &lhs, &rhs)
                }
                BinaryOp::Eq | BinaryOp::Ne => eval_equality(*op, &lhs, &rhs),
                BinaryOp::IsIdentical => eval_is_identical(&lhs, &rhs),
                BinaryOp::And | BinaryOp::Or => eval_logic(*op, &lhs, &rhs),
            }
        }
        Expr::Cond(cond, then, otherwise) => match eval(cond, attrs).as_condition() {
            Some(true) => eval(then, attrs),
            Some(false) => eval(otherwise, attrs),
            None => Value::Undefined,
        },
        Expr::Call(name, args) => eval_call(name, args, attrs),
    }
}

/// Per-group evaluation record: the parsed sort expression together with
/// the attributes it is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct SortAd {
    attrs: Map<String, Value>,
    expr: Option<Expr>,
    expr_source: String,
}

impl SortAd {
    pub fn new(expr: Expr, expr_source: String) -> Self {
        SortAd {
            attrs: Map::new(),
            expr: Some(expr),
            expr_source,
        }
    }

    pub fn assign(&mut self, name: &str, value: Value) {
        self.attrs.insert(name.to_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(&name.to_lowercase())
    }

    pub fn expr_source(&self) -> &str {
        &self.expr_source
    }

    pub fn evaluate(&self) -> Value {
        match &self.expr {
            Some(expr) => eval(expr, &self.attrs),
            None => Value::Undefined,
        }
    }
}

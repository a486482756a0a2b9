//! Sandboxed numeric transforms.
//!
//! User expressions are compiled once into an AST of a small arithmetic
//! grammar and evaluated per observation. Nothing in the grammar can reach
//! the host: there are no assignments, loops or calls outside a fixed set
//! of math functions.

pub mod expr;

use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use expr::{Func, Node};

/// Inputs visible to an expression besides the value itself.
#[derive(Debug, Clone, Default)]
pub struct TransformContext<'a> {
    /// Timestamp of the observation in milliseconds.
    pub timestamp_ms: i64,
    /// Raw state string of the observation or entity.
    pub state: Option<&'a str>,
    pub attributes: Option<&'a Map<String, Value>>,
}

pub trait TransformEvaluator: Send + Sync {
    /// Apply the transform to `value`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transform` when evaluation fails or produces a
    /// non-finite number.
    fn evaluate(&self, value: f64, ctx: &TransformContext<'_>) -> AppResult<f64>;
}

/// A compiled transform expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Compile `source` into an evaluable expression.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transform` on syntax errors, unknown identifiers or
    /// wrong function arity.
    pub fn compile(source: &str) -> AppResult<Self> {
        Ok(Self {
            source: source.to_string(),
            root: expr::parse(source)?,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl TransformEvaluator for Expression {
    fn evaluate(&self, value: f64, ctx: &TransformContext<'_>) -> AppResult<f64> {
        let result = eval(&self.root, value, ctx)?;
        if result.is_finite() {
            Ok(result)
        } else {
            Err(AppError::Transform(format!(
                "'{}' returned a non-numeric value ({result})",
                self.source
            )))
        }
    }
}

fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval(node: &Node, x: f64, ctx: &TransformContext<'_>) -> AppResult<f64> {
    let v = match node {
        Node::Number(n) => *n,
        Node::Value => x,
        Node::Timestamp => ctx.timestamp_ms as f64,
        Node::State => ctx
            .state
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(f64::NAN),
        Node::Attribute(name) => ctx
            .attributes
            .and_then(|attrs| attrs.get(name))
            .and_then(numeric_value)
            .ok_or_else(|| AppError::Transform(format!("attribute '{name}' is not numeric")))?,
        Node::Neg(inner) => -eval(inner, x, ctx)?,
        Node::Not(inner) => flag(!truthy(eval(inner, x, ctx)?)),
        Node::Ternary(cond, then, otherwise) => {
            if truthy(eval(cond, x, ctx)?) {
                eval(then, x, ctx)?
            } else {
                eval(otherwise, x, ctx)?
            }
        }
        Node::Binary(op, lhs, rhs) => {
            let a = eval(lhs, x, ctx)?;
            // short-circuit before touching the right-hand side
            match *op {
                "&&" if !truthy(a) => return Ok(0.0),
                "||" if truthy(a) => return Ok(1.0),
                _ => {}
            }
            let b = eval(rhs, x, ctx)?;
            match *op {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                "/" => a / b,
                "%" => a % b,
                "^" => a.powf(b),
                "<" => flag(a < b),
                "<=" => flag(a <= b),
                ">" => flag(a > b),
                ">=" => flag(a >= b),
                "==" => flag(a == b),
                "!=" => flag(a != b),
                "&&" | "||" => flag(truthy(b)),
                other => {
                    return Err(AppError::Transform(format!("unsupported operator '{other}'")));
                }
            }
        }
        Node::Call(func, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, x, ctx))
                .collect::<AppResult<Vec<_>>>()?;
            match func {
                Func::Abs => values[0].abs(),
                Func::Min => values[0].min(values[1]),
                Func::Max => values[0].max(values[1]),
                Func::Round => values[0].round(),
                Func::Floor => values[0].floor(),
                Func::Ceil => values[0].ceil(),
                Func::Sqrt => values[0].sqrt(),
                Func::Ln => values[0].ln(),
                Func::Log10 => values[0].log10(),
                Func::Exp => values[0].exp(),
                Func::Pow => values[0].powf(values[1]),
                Func::Clamp => values[0].max(values[1]).min(values[2]),
            }
        }
    };
    Ok(v)
}

/// Interpret a raw JSON state or attribute as a number.
///
/// Numbers pass through, strings are parsed after trimming, everything else
/// (including `unavailable` and `unknown`) is not a number.
#[must_use]
pub fn numeric_value(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => match s.trim() {
            "" | "unavailable" | "unknown" => return None,
            other => other.parse::<f64>().ok()?,
        },
        _ => return None,
    };
    n.is_finite().then_some(n)
}

//! Condition Expression Dialect
//!
//! Boolean expressions over the pipeline state, used by expression
//! authorizers and error-handler conditions. The dialect supports field
//! access (`Subject.ID`), indexing (`Request.Headers["Accept"]`), string
//! predicates (`startsWith`, `endsWith`, `contains`, `matches`), `in`,
//! comparison and boolean composition. Expressions are compiled at load time
//! and evaluated against a JSON value tree per request.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use regex::Regex;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};

mod parser;

use parser::Expr;

/// A compiled condition expression
#[derive(Clone)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Expression {
    /// Compile an expression source
    pub fn new(source: &str) -> PipelineResult<Self> {
        let ast = parser::parse(source).map_err(|reason| {
            PipelineError::configuration(format!(
                "failed to compile expression {source:?}: {reason}"
            ))
        })?;

        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// Evaluate the expression to a boolean
    pub fn evaluate(&self, env: &Value) -> PipelineResult<bool> {
        match self.eval(&self.ast, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(self.error(format!(
                "expected a boolean result, got {other}"
            ))),
        }
    }

    /// The original expression source
    pub fn source(&self) -> &str {
        &self.source
    }

    fn error(&self, reason: impl fmt::Display) -> PipelineError {
        PipelineError::internal(format!(
            "failed to evaluate expression {:?}: {reason}",
            self.source
        ))
    }

    fn eval(&self, expr: &Expr, env: &Value) -> PipelineResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => Ok(env.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Member(target, name) => {
                let target = self.eval(target, env)?;
                Ok(target.get(name).cloned().unwrap_or(Value::Null))
            }
            Expr::Index(target, index) => {
                let target = self.eval(target, env)?;
                let index = self.eval(index, env)?;
                Ok(match (&target, &index) {
                    (Value::Object(map), Value::String(key)) => {
                        map.get(key).cloned().unwrap_or(Value::Null)
                    }
                    (Value::Array(items), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| items.get(i as usize))
                        .cloned()
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                })
            }
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Ok(Value::Array(values))
            }
            Expr::Not(inner) => match self.eval(inner, env)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(self.error(format!("'!' applied to non-boolean {other}"))),
            },
            Expr::And(lhs, rhs) => self.eval_logical(lhs, rhs, env, false),
            Expr::Or(lhs, rhs) => self.eval_logical(lhs, rhs, env, true),
            Expr::Compare(op, lhs, rhs) => {
                let lhs = self.eval(lhs, env)?;
                let rhs = self.eval(rhs, env)?;
                self.compare(*op, &lhs, &rhs)
            }
            Expr::Call {
                target,
                name,
                args,
            } => self.call(target.as_deref(), name, args, env),
        }
    }

    fn eval_logical(
        &self,
        lhs: &Expr,
        rhs: &Expr,
        env: &Value,
        short_circuit_on: bool,
    ) -> PipelineResult<Value> {
        match self.eval(lhs, env)? {
            Value::Bool(b) if b == short_circuit_on => Ok(Value::Bool(b)),
            Value::Bool(_) => match self.eval(rhs, env)? {
                Value::Bool(b) => Ok(Value::Bool(b)),
                other => Err(self.error(format!("logical operand is not a boolean: {other}"))),
            },
            other => Err(self.error(format!("logical operand is not a boolean: {other}"))),
        }
    }

    fn compare(&self, op: parser::CompareOp, lhs: &Value, rhs: &Value) -> PipelineResult<Value> {
        use parser::CompareOp;

        let result = match op {
            CompareOp::Eq => loose_eq(lhs, rhs),
            CompareOp::Ne => !loose_eq(lhs, rhs),
            CompareOp::In => match rhs {
                Value::Array(items) => items.iter().any(|item| loose_eq(lhs, item)),
                Value::Object(map) => lhs
                    .as_str()
                    .map(|key| map.contains_key(key))
                    .unwrap_or(false),
                Value::String(haystack) => lhs
                    .as_str()
                    .map(|needle| haystack.contains(needle))
                    .unwrap_or(false),
                other => {
                    return Err(self.error(format!("'in' applied to unsupported value {other}")))
                }
            },
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                let ordering = match (lhs, rhs) {
                    (Value::Number(a), Value::Number(b)) => a
                        .as_f64()
                        .zip(b.as_f64())
                        .and_then(|(a, b)| a.partial_cmp(&b)),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => None,
                };

                let Some(ordering) = ordering else {
                    return Err(self.error(format!("cannot order {lhs} and {rhs}")));
                };

                match op {
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Le => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::Ge => ordering.is_ge(),
                    _ => unreachable!("ordering operators only"),
                }
            }
        };

        Ok(Value::Bool(result))
    }

    fn call(
        &self,
        target: Option<&Expr>,
        name: &str,
        args: &[Expr],
        env: &Value,
    ) -> PipelineResult<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env)?);
        }

        match (target, name) {
            (None, "size") => {
                let [value] = values.as_slice() else {
                    return Err(self.error("size() takes exactly one argument"));
                };
                self.size(value)
            }
            (Some(target), "size") if values.is_empty() => {
                let value = self.eval(target, env)?;
                self.size(&value)
            }
            (Some(target), "contains" | "startsWith" | "endsWith" | "matches") => {
                let value = self.eval(target, env)?;
                let [arg] = values.as_slice() else {
                    return Err(self.error(format!("{name}() takes exactly one argument")));
                };

                if name == "contains" {
                    if let Value::Array(items) = &value {
                        return Ok(Value::Bool(items.iter().any(|item| loose_eq(item, arg))));
                    }
                }

                let (Some(subject), Some(arg)) = (value.as_str(), arg.as_str()) else {
                    return Err(self.error(format!("{name}() requires string operands")));
                };

                let result = match name {
                    "contains" => subject.contains(arg),
                    "startsWith" => subject.starts_with(arg),
                    "endsWith" => subject.ends_with(arg),
                    "matches" => Regex::new(arg)
                        .map_err(|e| self.error(format!("invalid pattern {arg:?}: {e}")))?
                        .is_match(subject),
                    _ => unreachable!("string predicates only"),
                };

                Ok(Value::Bool(result))
            }
            _ => Err(self.error(format!("unknown function {name:?}"))),
        }
    }

    fn size(&self, value: &Value) -> PipelineResult<Value> {
        let size = match value {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            other => return Err(self.error(format!("size() not defined for {other}"))),
        };
        Ok(Value::Number(serde_json::Number::from(size as u64)))
    }
}

/// Equality with numeric coercion, so that `1 == 1.0` holds
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => lhs == rhs,
    }
}

//! Predicate compiler and matcher for `select`/`update`
//!
//! The filter language is a JSON tree. Leaves compare one field against an
//! operand; internal nodes are `and`, `or`, `not`. Two layers of sugar are
//! desugared at compile time:
//!
//! - a bare object `{"a": {"$gt": 1}, "b": 2}` is an implicit `and` over all
//!   field/operator pairs;
//! - a bare scalar `{"b": 2}` is shorthand for `{"b": {"$eq": 2}}`.
//!
//! Operator keys are accepted with and without the `$` prefix. Compilation
//! resolves every operator once; matching is pure and allocation-free.
//!
//! Comparison semantics follow the value domains of [`crate::value::Value`]:
//! numbers compare numerically, strings lexicographically, and cross-domain
//! comparisons never match. `like` patterns are case-insensitive with `%`
//! matching any substring and `_` matching exactly one character.

use crate::error::{Error, Result};
use crate::record::Record;
use crate::value::Value;
use std::cmp::Ordering;

/// A filter compiled for repeated evaluation
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    /// Matches every record (the empty filter)
    True,
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Compare {
        field: String,
        op: CompareOp,
        operand: Value,
    },
    Membership {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    Like {
        field: String,
        /// Pattern case-folded once at compile time
        pattern: Vec<char>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompiledFilter {
    /// Compile a filter expression
    ///
    /// # Errors
    /// Fails with [`Error::InvalidFilter`] when the expression is not an
    /// object, an operator is unknown, or an `in`/`nin` operand is not a
    /// list.
    pub fn compile(filter: &serde_json::Value) -> Result<CompiledFilter> {
        Ok(CompiledFilter {
            root: compile_node(filter)?,
        })
    }

    /// Evaluate this filter against a record
    pub fn matches(&self, record: &Record) -> bool {
        eval(&self.root, record)
    }
}

fn compile_node(filter: &serde_json::Value) -> Result<Node> {
    let obj = filter
        .as_object()
        .ok_or_else(|| Error::InvalidFilter(format!("filter must be an object, got {filter}")))?;

    let mut clauses = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        match strip_prefix(key) {
            "and" => clauses.push(Node::And(compile_list(key, value)?)),
            "or" => clauses.push(Node::Or(compile_list(key, value)?)),
            "not" => clauses.push(Node::Not(Box::new(compile_node(value)?))),
            _ => clauses.push(compile_field(key, value)?),
        }
    }

    Ok(flatten_and(clauses))
}

/// Compile one field entry: `{field: scalar}` or `{field: {op: operand, ...}}`
fn compile_field(field: &str, value: &serde_json::Value) -> Result<Node> {
    let Some(ops) = value.as_object() else {
        // Bare scalar sugar: {field: v} ≡ {field: {eq: v}}
        return Ok(Node::Compare {
            field: field.to_string(),
            op: CompareOp::Eq,
            operand: Value::try_from(value)
                .map_err(|_| Error::InvalidFilter(format!("invalid operand for {field}: {value}")))?,
        });
    };

    let mut clauses = Vec::with_capacity(ops.len());
    for (op_key, operand) in ops {
        clauses.push(compile_operator(field, strip_prefix(op_key), operand)?);
    }
    Ok(flatten_and(clauses))
}

fn compile_operator(field: &str, op: &str, operand: &serde_json::Value) -> Result<Node> {
    let field = field.to_string();
    match op {
        "eq" | "ne" | "gt" | "gte" | "lt" | "lte" => {
            let op = match op {
                "eq" => CompareOp::Eq,
                "ne" => CompareOp::Ne,
                "gt" => CompareOp::Gt,
                "gte" => CompareOp::Gte,
                "lt" => CompareOp::Lt,
                _ => CompareOp::Lte,
            };
            Ok(Node::Compare {
                op,
                operand: scalar_operand(&field, operand)?,
                field,
            })
        }
        "in" | "nin" => {
            let list = operand.as_array().ok_or_else(|| {
                Error::InvalidFilter(format!("operand of {op} on {field} must be a list"))
            })?;
            let values = list
                .iter()
                .map(|v| scalar_operand(&field, v))
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::Membership {
                field,
                values,
                negated: op == "nin",
            })
        }
        "like" => {
            let pattern = operand.as_str().ok_or_else(|| {
                Error::InvalidFilter(format!("operand of like on {field} must be a string"))
            })?;
            Ok(Node::Like {
                field,
                pattern: pattern.to_lowercase().chars().collect(),
            })
        }
        unknown => Err(Error::InvalidFilter(format!(
            "unknown operator {unknown:?} on field {field}"
        ))),
    }
}

fn compile_list(key: &str, value: &serde_json::Value) -> Result<Vec<Node>> {
    let list = value
        .as_array()
        .ok_or_else(|| Error::InvalidFilter(format!("operand of {key} must be a list")))?;
    list.iter().map(compile_node).collect()
}

fn scalar_operand(field: &str, operand: &serde_json::Value) -> Result<Value> {
    Value::try_from(operand)
        .map_err(|_| Error::InvalidFilter(format!("invalid operand for {field}: {operand}")))
}

fn strip_prefix(key: &str) -> &str {
    key.strip_prefix('$').unwrap_or(key)
}

fn flatten_and(mut clauses: Vec<Node>) -> Node {
    match clauses.len() {
        0 => Node::True,
        1 => clauses.pop().expect("len checked"),
        _ => Node::And(clauses),
    }
}

fn eval(node: &Node, record: &Record) -> bool {
    match node {
        Node::True => true,
        Node::And(children) => children.iter().all(|c| eval(c, record)),
        Node::Or(children) => children.iter().any(|c| eval(c, record)),
        Node::Not(child) => !eval(child, record),
        Node::Compare { field, op, operand } => {
            let Some(value) = record.get(field) else {
                return false;
            };
            match op {
                CompareOp::Eq => value.loosely_eq(operand),
                // A type mismatch is "no match", not the negation of eq
                CompareOp::Ne => value.domain() == operand.domain() && !value.loosely_eq(operand),
                CompareOp::Gt => cmp_is(value, operand, &[Ordering::Greater]),
                CompareOp::Gte => cmp_is(value, operand, &[Ordering::Greater, Ordering::Equal]),
                CompareOp::Lt => cmp_is(value, operand, &[Ordering::Less]),
                CompareOp::Lte => cmp_is(value, operand, &[Ordering::Less, Ordering::Equal]),
            }
        }
        Node::Membership {
            field,
            values,
            negated,
        } => {
            let Some(value) = record.get(field) else {
                return false;
            };
            let member = values.iter().any(|v| value.loosely_eq(v));
            member != *negated
        }
        Node::Like { field, pattern } => {
            let Some(Value::String(text)) = record.get(field) else {
                return false;
            };
            let text: Vec<char> = text.to_lowercase().chars().collect();
            like_match(pattern, &text)
        }
    }
}

fn cmp_is(value: &Value, operand: &Value, accepted: &[Ordering]) -> bool {
    value
        .partial_cmp_domain(operand)
        .is_some_and(|ord| accepted.contains(&ord))
}

/// SQL-style LIKE over case-folded char slices
///
/// `%` matches any (possibly empty) substring, `_` exactly one character.
/// Iterative two-pointer scan with backtracking to the most recent `%`.
fn like_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            // Re-expand the last % by one character
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '%' {
        p += 1;
    }
    p == pattern.len()
}

//! Typed metric values and the inference rules that produce them.
//!
//! Status dumps carry no schema, so the type of every value is decided from
//! its text alone. The rules are applied in a fixed order:
//!
//! 1. a base-10 signed integer that fits in `i64` becomes [`Value::Int`];
//! 2. a decimal or exponential literal becomes [`Value::Float`];
//! 3. anything else is kept verbatim as [`Value::Str`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Variant tag of a [`Value`], used in type mismatch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Str,
}

impl Value {
    /// Returns the variant tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Int => "int64",
            ValueKind::Float => "float64",
            ValueKind::Str => "string",
        };
        f.write_str(name)
    }
}

/// Classifies a raw text value.
///
/// The result depends only on `raw`; the caller is expected to have removed
/// layout whitespace already.
pub fn infer(raw: &str) -> Value {
    if is_integer_literal(raw) {
        if let Ok(v) = raw.parse::<i64>() {
            return Value::Int(v);
        }
    }

    if is_float_literal(raw) {
        if let Ok(v) = raw.parse::<f64>() {
            return Value::Float(v);
        }
    }

    Value::Str(raw.to_string())
}

fn strip_sign(s: &str) -> &str {
    s.strip_prefix(['+', '-']).unwrap_or(s)
}

fn is_integer_literal(s: &str) -> bool {
    let digits = strip_sign(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts `[+-]digits[.digits][(e|E)[+-]digits]` with at least one mantissa
/// digit on either side of the point. Rejects `inf`, `nan` and friends that
/// `f64::from_str` would otherwise take.
fn is_float_literal(s: &str) -> bool {
    let body = strip_sign(s);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };

    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !all_digits(int_part) || !all_digits(frac_part) {
        return false;
    }

    match exponent {
        Some(exp) => is_integer_literal(exp),
        None => true,
    }
}

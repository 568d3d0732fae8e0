//! Typed point-in-time snapshots of server status.

mod value;

pub use value::{Value, ValueKind, infer};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::parser::RawGroup;

/// Name of the metric that orders and deduplicates snapshots.
pub const UPTIME: &str = "uptime";

/// Errors returned by the typed [`Snapshot`] accessors.
///
/// Both variants are recoverable: callers probe a metric with one getter
/// and fall back to another when the stored variant differs.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleError {
    /// The snapshot has no metric with this name.
    NotFound(String),
    /// The metric exists but holds a different variant.
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::NotFound(name) => write!(f, "metric '{}' not found", name),
            SampleError::TypeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "metric '{}' is {}, requested {}",
                name, found, expected
            ),
        }
    }
}

impl std::error::Error for SampleError {}

/// One instant of server state: metric name to typed value.
///
/// Snapshots are built once by [`Snapshot::from_raw`] and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    metrics: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Assembles a snapshot by inferring the type of every raw value.
    ///
    /// Never fails: a value that is not numeric is kept as a string.
    pub fn from_raw(group: RawGroup) -> Self {
        let metrics = group
            .fields
            .into_iter()
            .map(|(name, raw)| {
                let value = infer(&raw);
                (name, value)
            })
            .collect();
        Self { metrics }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.metrics.get(name)
    }

    /// Metric names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_int(&self, name: &str) -> Result<i64, SampleError> {
        let value = self.lookup(name)?;
        value
            .as_int()
            .ok_or_else(|| mismatch(name, ValueKind::Int, value))
    }

    pub fn get_float(&self, name: &str) -> Result<f64, SampleError> {
        let value = self.lookup(name)?;
        value
            .as_float()
            .ok_or_else(|| mismatch(name, ValueKind::Float, value))
    }

    pub fn get_string(&self, name: &str) -> Result<&str, SampleError> {
        let value = self.lookup(name)?;
        value
            .as_str()
            .ok_or_else(|| mismatch(name, ValueKind::Str, value))
    }

    /// Server uptime in seconds.
    pub fn uptime(&self) -> Result<i64, SampleError> {
        self.get_int(UPTIME)
    }

    /// Returns metrics present here but absent from `later`.
    pub fn missing_from<'a>(&'a self, later: &Snapshot) -> Vec<&'a str> {
        self.names().filter(|name| !later.contains(name)).collect()
    }

    fn lookup(&self, name: &str) -> Result<&Value, SampleError> {
        self.metrics
            .get(name)
            .ok_or_else(|| SampleError::NotFound(name.to_string()))
    }
}

fn mismatch(name: &str, expected: ValueKind, found: &Value) -> SampleError {
    SampleError::TypeMismatch {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}

//! Evidence types consumed by rule evaluation.
//!
//! Metrics arrive as untyped JSON written by the in-sandbox grader; this
//! module narrows them into a scalar sum type with typed accessors so rules
//! can distinguish "not present" from "present with the wrong type" instead
//! of silently defaulting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar metric value as emitted by the grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Str(value.to_string())
    }
}

/// Outcome of a typed metric lookup. Rules decide whether `Missing` means
/// unproved or carry-on-with-a-default; `WrongType` is always treated at
/// least as strictly as `Missing`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<T> {
    Missing,
    WrongType,
    Found(T),
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Keyed dictionary of grader metrics.
///
/// Backed by an ordered map so serialization and iteration are stable across
/// evaluations of the same bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, MetricValue>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a parsed JSON object into metrics, keeping only scalar
    /// values. Returns the keys that were skipped so the caller can log them.
    pub fn from_json_object(object: &serde_json::Map<String, Value>) -> (Self, Vec<String>) {
        let mut metrics = Metrics::new();
        let mut skipped = Vec::new();
        for (key, value) in object {
            match scalar_from_json(value) {
                Some(scalar) => {
                    metrics.0.insert(key.clone(), scalar);
                }
                None => skipped.push(key.clone()),
            }
        }
        (metrics, skipped)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetricValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Shallow-merges `other` on top of `self`; `other` wins on conflicts.
    pub fn merge_from(&mut self, other: Metrics) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricValue)> {
        self.0.iter()
    }

    pub fn flag(&self, key: &str) -> Lookup<bool> {
        match self.0.get(key) {
            None => Lookup::Missing,
            Some(MetricValue::Bool(value)) => Lookup::Found(*value),
            Some(_) => Lookup::WrongType,
        }
    }

    pub fn count(&self, key: &str) -> Lookup<i64> {
        match self.0.get(key) {
            None => Lookup::Missing,
            Some(MetricValue::Int(value)) => Lookup::Found(*value),
            Some(_) => Lookup::WrongType,
        }
    }

    /// Numeric accessor accepting either integer or float representations.
    pub fn number(&self, key: &str) -> Lookup<f64> {
        match self.0.get(key) {
            None => Lookup::Missing,
            Some(MetricValue::Int(value)) => Lookup::Found(*value as f64),
            Some(MetricValue::Float(value)) => Lookup::Found(*value),
            Some(_) => Lookup::WrongType,
        }
    }
}

fn scalar_from_json(value: &Value) -> Option<MetricValue> {
    match value {
        Value::Bool(flag) => Some(MetricValue::Bool(*flag)),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Some(MetricValue::Int(int))
            } else {
                number.as_f64().map(MetricValue::Float)
            }
        }
        Value::String(text) => Some(MetricValue::Str(text.clone())),
        _ => None,
    }
}

/// Work pace the role context demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    High,
    #[default]
    Medium,
    Low,
    /// Unrecognized vocabulary; threshold tables fall back to the medium row.
    #[serde(other)]
    Unknown,
}

/// Quality bar the role context demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBar {
    High,
    #[default]
    Medium,
    Low,
    #[serde(other)]
    Unknown,
}

/// Role-context manifest (COM) supplied per proof evaluation.
///
/// Rules read `pace` and `quality_bar` through the fixed threshold tables in
/// [`crate::rules`] and must not invent new fields; extensions are carried
/// opaquely for forward compatibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextManifest {
    #[serde(default)]
    pub pace: Pace,
    #[serde(default)]
    pub quality_bar: QualityBar,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

/// A tag the upstream LLM tagger attached to the candidate writeup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmTag {
    pub tag: String,
    #[serde(default)]
    pub evidence_quote: String,
}

/// Metadata about an uploaded artifact. The engine never sees the bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Everything a single evaluation may consult.
#[derive(Debug, Clone, Default)]
pub struct EvidenceBag {
    pub metrics: Metrics,
    pub artifacts: BTreeMap<String, ArtifactMeta>,
    pub llm_tags: Vec<LlmTag>,
    pub com: ContextManifest,
}

impl EvidenceBag {
    /// Returns the first tag record with the given name, if any.
    pub fn llm_tag(&self, tag: &str) -> Option<&LlmTag> {
        self.llm_tags.iter().find(|entry| entry.tag == tag)
    }
}

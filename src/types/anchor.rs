//! Anchors: points on a graph's shared timeline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use super::is_transient_key;
use crate::error::GraphError;
use crate::tracking::{RecordKind, TrackedRecord, Tracking};

const TRACKED_KEYS: &[&str] = &["offset"];

/// A point in time, shared by the annotations that start or end there.
///
/// The offset may be unknown; bounds can then be inferred from the
/// surrounding annotations once the anchor belongs to a graph.
/// Equality and hashing use only the id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<i32>,
    #[serde(flatten)]
    attributes: BTreeMap<String, Value>,
    #[serde(skip)]
    tracking: Tracking,
}

impl Anchor {
    /// Create an anchor with an id.
    pub fn new(id: impl Into<String>, offset: Option<f64>) -> Self {
        Self {
            id: Some(id.into()),
            offset,
            ..Self::default()
        }
    }

    /// Create an anchor at an offset; the graph assigns the id on add.
    pub fn at(offset: f64) -> Self {
        Self {
            offset: Some(offset),
            ..Self::default()
        }
    }

    /// Set the confidence rating.
    pub fn with_confidence(mut self, confidence: i32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Set an extension attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// The anchor id, once assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Copy without the id, so a graph assigns a fresh one on add.
    pub(crate) fn without_id(mut self) -> Self {
        self.id = None;
        self
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        if self.id.is_none() {
            self.id = Some(id);
        }
    }

    /// Time offset, if known.
    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    /// Change the offset.
    pub fn set_offset(&mut self, offset: Option<f64>) {
        let old = json!(self.offset);
        self.note_change("offset", &old, &json!(offset));
        self.offset = offset;
    }

    /// Offset as of the last commit.
    pub fn original_offset(&self) -> Option<f64> {
        self.original("offset").as_f64()
    }

    /// Confidence rating of the offset.
    pub fn confidence(&self) -> Option<i32> {
        self.confidence
    }

    /// Set the confidence rating.
    pub fn set_confidence(&mut self, confidence: Option<i32>) {
        self.confidence = confidence;
    }

    /// An extension attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set an extension attribute. Keys starting with a non-alphanumeric
    /// character are transient and never copied or exported.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Remove an extension attribute.
    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// All extension attributes.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Copy of id, offset, confidence and non-transient attributes, with
    /// fresh change tracking.
    pub fn copy_tracked(&self) -> Self {
        Self {
            id: self.id.clone(),
            offset: self.offset,
            confidence: self.confidence,
            attributes: self
                .attributes
                .iter()
                .filter(|(key, _)| !is_transient_key(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            tracking: Tracking::default(),
        }
    }

    /// Build an anchor from an interchange document.
    pub fn from_json(document: &Value) -> Result<Self, GraphError> {
        if !document.is_object() {
            return Err(GraphError::Malformed("anchor document is not an object".to_string()));
        }
        let mut anchor: Anchor = serde_json::from_value(document.clone())
            .map_err(|e| GraphError::Malformed(e.to_string()))?;
        anchor.attributes.retain(|key, _| !is_transient_key(key));
        Ok(anchor)
    }

    /// Interchange document for this anchor, without transient attributes.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.copy_tracked()).unwrap_or(Value::Null)
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Anchor {}

impl Hash for Anchor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl TrackedRecord for Anchor {
    fn kind(&self) -> RecordKind {
        RecordKind::Anchor
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn tracked_keys(&self) -> &'static [&'static str] {
        TRACKED_KEYS
    }

    fn tracked_value(&self, key: &str) -> Value {
        match key {
            "offset" => json!(self.offset),
            _ => Value::Null,
        }
    }

    fn restore_tracked(&mut self, key: &str, value: Value) {
        if key == "offset" {
            self.offset = value.as_f64();
        }
    }

    fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    fn tracking_mut(&mut self) -> &mut Tracking {
        &mut self.tracking
    }
}

//! Annotations: labelled intervals between two anchors.
//!
//! Linkage fields (`startId`, `endId`, `parentId`, `ordinal`) can only be
//! changed through the owning [`Graph`](crate::Graph), which keeps its link
//! indexes and sibling ordinals consistent. Labels and the other descriptive
//! fields are set directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::is_transient_key;
use super::schema::ROOT_LAYER_ID;
use crate::error::GraphError;
use crate::tracking::{RecordKind, TrackedRecord, Tracking};

const TRACKED_KEYS: &[&str] = &["label", "startId", "endId", "parentId", "ordinal"];

/// A labelled interval (or instant) on a layer.
///
/// Equality and hashing use only the id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    label: String,
    #[serde(default)]
    layer_id: String,
    #[serde(default)]
    start_id: Option<String>,
    #[serde(default)]
    end_id: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    ordinal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    when: Option<DateTime<Utc>>,
    #[serde(flatten)]
    attributes: BTreeMap<String, Value>,
    #[serde(skip)]
    pub(crate) pending_children: Vec<Annotation>,
    #[serde(skip)]
    tracking: Tracking,
}

impl Annotation {
    /// Create an annotation on a layer; the graph assigns the id on add.
    pub fn new(layer_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            layer_id: layer_id.into(),
            ..Self::default()
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the start and end anchor ids.
    pub fn with_anchors(mut self, start_id: impl Into<String>, end_id: impl Into<String>) -> Self {
        self.start_id = Some(start_id.into());
        self.end_id = Some(end_id.into());
        self
    }

    /// Set the parent annotation id.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Request a position among siblings (1-based).
    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Set the confidence rating.
    pub fn with_confidence(mut self, confidence: i32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Set the annotator.
    pub fn with_annotator(mut self, annotator: impl Into<String>) -> Self {
        self.annotator = Some(annotator.into());
        self
    }

    /// Set an extension attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attach a child to be added to the graph together with this annotation.
    ///
    /// The child's parent id is stamped when this annotation is added.
    pub fn with_child(mut self, child: Annotation) -> Self {
        self.pending_children.push(child);
        self
    }

    /// The annotation id, once assigned.
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

    /// Label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Change the label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.note_change("label", &json!(self.label), &json!(label));
        self.label = label;
    }

    /// Layer id.
    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    /// Start anchor id.
    pub fn start_id(&self) -> Option<&str> {
        self.start_id.as_deref()
    }

    /// End anchor id.
    pub fn end_id(&self) -> Option<&str> {
        self.end_id.as_deref()
    }

    /// Parent annotation id.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Position among same-parent same-layer siblings, from 1; 0 if not yet
    /// placed.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub(crate) fn set_start_id(&mut self, start_id: Option<String>) {
        self.note_change("startId", &json!(self.start_id), &json!(start_id));
        self.start_id = start_id;
    }

    pub(crate) fn set_end_id(&mut self, end_id: Option<String>) {
        self.note_change("endId", &json!(self.end_id), &json!(end_id));
        self.end_id = end_id;
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<String>) {
        self.note_change("parentId", &json!(self.parent_id), &json!(parent_id));
        self.parent_id = parent_id;
    }

    /// Stamp a parent id without recording a change.
    pub(crate) fn stamp_parent_id(&mut self, parent_id: String) {
        self.parent_id = Some(parent_id);
    }

    /// Unplaced annotations take their first ordinal silently.
    pub(crate) fn set_ordinal(&mut self, ordinal: u32) {
        if self.ordinal == ordinal {
            return;
        }
        if self.ordinal != 0 {
            self.note_change("ordinal", &json!(self.ordinal), &json!(ordinal));
        }
        self.ordinal = ordinal;
    }

    /// Confidence rating.
    pub fn confidence(&self) -> Option<i32> {
        self.confidence
    }

    /// Set the confidence rating.
    pub fn set_confidence(&mut self, confidence: Option<i32>) {
        self.confidence = confidence;
    }

    /// Who or what produced the label.
    pub fn annotator(&self) -> Option<&str> {
        self.annotator.as_deref()
    }

    /// Set the annotator.
    pub fn set_annotator(&mut self, annotator: Option<String>) {
        self.annotator = annotator;
    }

    /// When the annotation was last changed.
    pub fn when(&self) -> Option<DateTime<Utc>> {
        self.when
    }

    /// Set the change timestamp.
    pub fn set_when(&mut self, when: Option<DateTime<Utc>>) {
        self.when = when;
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

    /// Children waiting to be added with this annotation.
    pub fn pending_children(&self) -> &[Annotation] {
        &self.pending_children
    }

    /// Whether start and end are the same anchor.
    pub fn is_instantaneous(&self) -> bool {
        self.start_id.is_some() && self.start_id == self.end_id
    }

    /// Whether this is the root annotation of a graph.
    pub fn is_graph(&self) -> bool {
        self.layer_id == ROOT_LAYER_ID
    }

    /// Label as of the last commit.
    pub fn original_label(&self) -> String {
        self.original("label").as_str().unwrap_or_default().to_string()
    }

    /// Start anchor id as of the last commit.
    pub fn original_start_id(&self) -> Option<String> {
        self.original("startId").as_str().map(str::to_string)
    }

    /// End anchor id as of the last commit.
    pub fn original_end_id(&self) -> Option<String> {
        self.original("endId").as_str().map(str::to_string)
    }

    /// Parent id as of the last commit.
    pub fn original_parent_id(&self) -> Option<String> {
        self.original("parentId").as_str().map(str::to_string)
    }

    /// Ordinal as of the last commit.
    pub fn original_ordinal(&self) -> u32 {
        self.original("ordinal")
            .as_u64()
            .and_then(|o| u32::try_from(o).ok())
            .unwrap_or_default()
    }

    /// Copy of id, tracked and descriptive state plus non-transient
    /// attributes, with fresh change tracking and no pending children.
    pub fn copy_tracked(&self) -> Self {
        Self {
            id: self.id.clone(),
            label: self.label.clone(),
            layer_id: self.layer_id.clone(),
            start_id: self.start_id.clone(),
            end_id: self.end_id.clone(),
            parent_id: self.parent_id.clone(),
            ordinal: self.ordinal,
            confidence: self.confidence,
            annotator: self.annotator.clone(),
            when: self.when,
            attributes: self
                .attributes
                .iter()
                .filter(|(key, _)| !is_transient_key(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            pending_children: Vec::new(),
            tracking: Tracking::default(),
        }
    }

    /// Build an annotation from an interchange document.
    ///
    /// Nested children may be supplied as `{"annotations": {layerId: [..]}}`.
    pub fn from_json(document: &Value) -> Result<Self, GraphError> {
        let Some(object) = document.as_object() else {
            return Err(GraphError::Malformed("annotation document is not an object".to_string()));
        };
        let mut fields = object.clone();
        let nested = fields.remove("annotations");
        let mut annotation: Annotation = serde_json::from_value(Value::Object(fields))
            .map_err(|e| GraphError::Malformed(e.to_string()))?;
        annotation.attributes.retain(|key, _| !is_transient_key(key));

        if let Some(Value::Object(layers)) = nested {
            for (layer_id, children) in layers {
                let Value::Array(children) = children else {
                    continue;
                };
                for child in &children {
                    let mut child = Annotation::from_json(child)?;
                    if child.layer_id.is_empty() {
                        child.layer_id = layer_id.clone();
                    }
                    annotation.pending_children.push(child);
                }
            }
        }
        Ok(annotation)
    }

    /// Interchange document for this annotation, without transient attributes.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.copy_tracked()).unwrap_or(Value::Null)
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Annotation {}

impl Hash for Annotation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "[{}]", self.id.as_deref().unwrap_or_default())
        } else {
            write!(f, "{}", self.label)
        }
    }
}

impl TrackedRecord for Annotation {
    fn kind(&self) -> RecordKind {
        if self.is_graph() {
            RecordKind::Graph
        } else {
            RecordKind::Annotation
        }
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn tracked_keys(&self) -> &'static [&'static str] {
        if self.is_graph() {
            &[]
        } else {
            TRACKED_KEYS
        }
    }

    fn tracked_value(&self, key: &str) -> Value {
        match key {
            "label" => json!(self.label),
            "startId" => json!(self.start_id),
            "endId" => json!(self.end_id),
            "parentId" => json!(self.parent_id),
            "ordinal" => json!(self.ordinal),
            _ => Value::Null,
        }
    }

    fn restore_tracked(&mut self, key: &str, value: Value) {
        match key {
            "label" => self.label = value.as_str().unwrap_or_default().to_string(),
            "startId" => self.start_id = value.as_str().map(str::to_string),
            "endId" => self.end_id = value.as_str().map(str::to_string),
            "parentId" => self.parent_id = value.as_str().map(str::to_string),
            "ordinal" => {
                self.ordinal = value
                    .as_u64()
                    .and_then(|o| u32::try_from(o).ok())
                    .unwrap_or_default()
            }
            _ => {}
        }
    }

    fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    fn tracking_mut(&mut self) -> &mut Tracking {
        &mut self.tracking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::Operation;

    fn make_word() -> Annotation {
        Annotation::new("word", "hello")
            .with_id("w1")
            .with_anchors("a1", "a2")
            .with_parent("t1")
            .with_ordinal(1)
    }

    #[test]
    fn test_instantaneous() {
        let mut word = make_word();
        assert!(!word.is_instantaneous());
        word.set_end_id(Some("a1".to_string()));
        assert!(word.is_instantaneous());
    }

    #[test]
    fn test_label_tracking() {
        let mut word = make_word();
        word.attach_tracker();
        word.set_label("goodbye");
        assert_eq!(word.change(), Operation::Update);
        assert_eq!(word.original_label(), "hello");

        let changes = word.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to_string(), "Update w1: label = \"goodbye\" (was \"hello\")");

        word.set_label("hello");
        assert_eq!(word.change(), Operation::NoChange);
    }

    #[test]
    fn test_first_ordinal_is_silent() {
        let mut word = Annotation::new("word", "x").with_id("w2");
        word.attach_tracker();
        word.set_ordinal(3);
        assert_eq!(word.change(), Operation::NoChange);
        word.set_ordinal(4);
        assert_eq!(word.change(), Operation::Update);
        assert_eq!(word.original_ordinal(), 3);
    }

    #[test]
    fn test_create_changes_list_tracked_values_in_order() {
        let mut word = make_word();
        word.create();
        let keys: Vec<_> = word.changes().iter().map(|c| c.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                None,
                Some("label".to_string()),
                Some("startId".to_string()),
                Some("endId".to_string()),
                Some("parentId".to_string()),
                Some("ordinal".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_json() {
        let doc = json!({
            "id": "123",
            "label": "LABEL",
            "layerId": "word",
            "startId": "start",
            "endId": "end",
            "parentId": "parent",
            "ordinal": 99,
            "foo": "foo",
            "@bar": "bar",
            "annotations": {
                "phone": [{"label": "p1", "startId": "start", "endId": "mid"}]
            }
        });
        let annotation = Annotation::from_json(&doc).unwrap();
        assert_eq!(annotation.id(), Some("123"));
        assert_eq!(annotation.label(), "LABEL");
        assert_eq!(annotation.layer_id(), "word");
        assert_eq!(annotation.start_id(), Some("start"));
        assert_eq!(annotation.end_id(), Some("end"));
        assert_eq!(annotation.parent_id(), Some("parent"));
        assert_eq!(annotation.ordinal(), 99);
        assert_eq!(annotation.attribute("foo"), Some(&json!("foo")));
        assert!(annotation.attribute("@bar").is_none());
        assert_eq!(annotation.pending_children().len(), 1);
        assert_eq!(annotation.pending_children()[0].layer_id(), "phone");
    }

    #[test]
    fn test_copy_tracked_drops_transient_state() {
        let mut word = make_word().with_attribute("@scratch", json!(true)).with_attribute("note", json!(1));
        word.attach_tracker();
        word.set_label("changed");
        let copy = word.copy_tracked();
        assert_eq!(copy.label(), "changed");
        assert_eq!(copy.change(), Operation::NoChange);
        assert!(copy.attribute("@scratch").is_none());
        assert_eq!(copy.attribute("note"), Some(&json!(1)));
    }

    #[test]
    fn test_identity() {
        let a = make_word();
        let mut b = make_word();
        b.set_label("other");
        b.set_confidence(Some(10));
        assert_eq!(a, b);
        assert_ne!(a, Annotation::new("word", "hello").with_id("w9"));
    }
}

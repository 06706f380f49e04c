//! Change tracking shared by every record in an annotation graph.
//!
//! A tracked record declares a fixed set of tracked keys. Once a tracker is
//! attached, the first write to a tracked key stores the value it replaced as
//! the key's *original*; writing the original back clears the marker again.
//!
//! ## Operation precedence
//!
//! | Marks present              | `change()`  |
//! |----------------------------|-------------|
//! | destroyed                  | `Destroy`   |
//! | created                    | `Create`    |
//! | at least one original      | `Update`    |
//! | none                       | `NoChange`  |
//!
//! Create and destroy marks are recorded whether or not a tracker is attached.
//! Property updates are recorded only while one is.

pub mod tracker;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::GraphError;

pub use tracker::ChangeTracker;

/// The kind of pending change on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    /// Nothing changed since the baseline.
    NoChange,
    /// The record is new and not yet committed.
    Create,
    /// At least one tracked key differs from its original value.
    Update,
    /// The record is marked for deletion.
    Destroy,
}

impl Operation {
    /// Display name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoChange => "NoChange",
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Destroy => "Destroy",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = GraphError;

    /// Parse an operation from its display name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NoChange" => Ok(Self::NoChange),
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Destroy" => Ok(Self::Destroy),
            other => Err(GraphError::Malformed(format!("unknown operation {:?}", other))),
        }
    }
}

/// The type of record a change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    /// The graph itself.
    Graph,
    /// An anchor.
    Anchor,
    /// An annotation.
    Annotation,
    /// A layer definition.
    Layer,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph => write!(f, "graph"),
            Self::Anchor => write!(f, "anchor"),
            Self::Annotation => write!(f, "annotation"),
            Self::Layer => write!(f, "layer"),
        }
    }
}

/// A single entry of a changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// What happened.
    pub operation: Operation,
    /// The kind of record that changed.
    pub kind: RecordKind,
    /// Id of the changed record.
    pub id: String,
    /// Changed key, for updates.
    pub key: Option<String>,
    /// New value, for updates.
    pub value: Value,
    /// Value before the change, for updates.
    pub old_value: Value,
}

impl Change {
    /// A creation entry.
    pub fn create(kind: RecordKind, id: impl Into<String>) -> Self {
        Self {
            operation: Operation::Create,
            kind,
            id: id.into(),
            key: None,
            value: Value::Null,
            old_value: Value::Null,
        }
    }

    /// A deletion entry.
    pub fn destroy(kind: RecordKind, id: impl Into<String>) -> Self {
        Self {
            operation: Operation::Destroy,
            kind,
            id: id.into(),
            key: None,
            value: Value::Null,
            old_value: Value::Null,
        }
    }

    /// A property update entry.
    pub fn update(
        kind: RecordKind,
        id: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        old_value: Value,
    ) -> Self {
        Self {
            operation: Operation::Update,
            kind,
            id: id.into(),
            key: Some(key.into()),
            value,
            old_value,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.operation, &self.key) {
            (Operation::Update, Some(key)) => write!(
                f,
                "Update {}: {} = {} (was {})",
                self.id, key, self.value, self.old_value
            ),
            (operation, _) => write!(f, "{} {}", operation, self.id),
        }
    }
}

/// Per-record change bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tracking {
    attached: bool,
    originals: BTreeMap<&'static str, Value>,
    created: bool,
    destroyed: bool,
}

impl Tracking {
    /// Whether a tracker is attached.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Whether the record is marked created.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Whether the record is marked destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Keys with a pending update, in key order.
    pub fn changed_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.originals.keys().copied()
    }
}

/// A record with a declared set of tracked keys.
///
/// Implementors supply key access; the lifecycle (create, destroy, commit,
/// rollback) and change reporting are provided.
pub trait TrackedRecord {
    /// Kind reported in changes.
    fn kind(&self) -> RecordKind;

    /// The record's id, once assigned.
    fn id(&self) -> Option<&str>;

    /// Tracked keys, in the order their updates are reported.
    fn tracked_keys(&self) -> &'static [&'static str];

    /// Current value of a tracked key; `Null` for unknown keys.
    fn tracked_value(&self, key: &str) -> Value;

    /// Write a baseline value back without recording a change.
    fn restore_tracked(&mut self, key: &str, value: Value);

    /// Bookkeeping state.
    fn tracking(&self) -> &Tracking;

    /// Mutable bookkeeping state.
    fn tracking_mut(&mut self) -> &mut Tracking;

    /// Pending operation, by precedence Destroy > Create > Update > NoChange.
    fn change(&self) -> Operation {
        let tracking = self.tracking();
        if tracking.destroyed {
            Operation::Destroy
        } else if tracking.created {
            Operation::Create
        } else if !tracking.originals.is_empty() {
            Operation::Update
        } else {
            Operation::NoChange
        }
    }

    /// Baseline value of a tracked key (the current value if unchanged).
    fn original(&self, key: &str) -> Value {
        self.tracking()
            .originals
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.tracked_value(key))
    }

    /// The record's pending changes.
    fn changes(&self) -> Vec<Change> {
        let id = self.id().unwrap_or_default().to_string();
        match self.change() {
            Operation::Destroy if self.tracking().created => Vec::new(),
            Operation::Destroy => vec![Change::destroy(self.kind(), id)],
            Operation::Create => self.creation_changes(),
            Operation::Update => self
                .tracked_keys()
                .iter()
                .filter_map(|key| {
                    self.tracking().originals.get(key).map(|old| {
                        Change::update(self.kind(), id.clone(), *key, self.tracked_value(key), old.clone())
                    })
                })
                .collect(),
            Operation::NoChange => Vec::new(),
        }
    }

    /// Changes that would create this record from scratch.
    fn creation_changes(&self) -> Vec<Change> {
        let id = self.id().unwrap_or_default().to_string();
        let mut changes = vec![Change::create(self.kind(), id.clone())];
        for key in self.tracked_keys() {
            let value = self.tracked_value(key);
            if !value.is_null() {
                changes.push(Change::update(self.kind(), id.clone(), *key, value, Value::Null));
            }
        }
        changes
    }

    /// Record a write of `new` over `old` for a tracked key.
    ///
    /// Called by setters before the field is overwritten.
    fn note_change(&mut self, key: &'static str, old: &Value, new: &Value) {
        let tracking = self.tracking_mut();
        if !tracking.attached || tracking.created {
            return;
        }
        match tracking.originals.get(key) {
            Some(original) if original == new => {
                tracking.originals.remove(key);
            }
            Some(_) => {}
            None if old != new => {
                tracking.originals.insert(key, old.clone());
            }
            None => {}
        }
    }

    /// Mark the record as newly created.
    fn create(&mut self) {
        self.tracking_mut().created = true;
    }

    /// Mark the record for deletion.
    fn destroy(&mut self) {
        self.tracking_mut().destroyed = true;
    }

    /// Accept current values as the baseline and clear all marks.
    fn commit(&mut self) {
        let tracking = self.tracking_mut();
        tracking.originals.clear();
        tracking.created = false;
        tracking.destroyed = false;
    }

    /// Restore baseline values and clear the destroy mark.
    ///
    /// Created records keep their create mark and values.
    fn rollback(&mut self) {
        let originals = std::mem::take(&mut self.tracking_mut().originals);
        self.tracking_mut().destroyed = false;
        if self.tracking().created {
            return;
        }
        for (key, value) in originals {
            self.restore_tracked(key, value);
        }
    }

    /// Restore a single key's baseline value.
    fn rollback_key(&mut self, key: &str) {
        if let Some(value) = self.tracking_mut().originals.remove(key) {
            self.restore_tracked(key, value);
        }
    }

    /// Start recording property updates.
    fn attach_tracker(&mut self) {
        self.tracking_mut().attached = true;
    }

    /// Stop recording property updates.
    fn detach_tracker(&mut self) {
        self.tracking_mut().attached = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Note {
        id: Option<String>,
        text: Option<String>,
        score: Option<i64>,
        tracking: Tracking,
    }

    impl Note {
        fn set_text(&mut self, text: &str) {
            let old = json!(self.text);
            self.note_change("text", &old, &json!(text));
            self.text = Some(text.to_string());
        }

        fn set_score(&mut self, score: i64) {
            let old = json!(self.score);
            self.note_change("score", &old, &json!(score));
            self.score = Some(score);
        }
    }

    impl TrackedRecord for Note {
        fn kind(&self) -> RecordKind {
            RecordKind::Annotation
        }
        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }
        fn tracked_keys(&self) -> &'static [&'static str] {
            &["text", "score"]
        }
        fn tracked_value(&self, key: &str) -> Value {
            match key {
                "text" => json!(self.text),
                "score" => json!(self.score),
                _ => Value::Null,
            }
        }
        fn restore_tracked(&mut self, key: &str, value: Value) {
            match key {
                "text" => self.text = value.as_str().map(str::to_string),
                "score" => self.score = value.as_i64(),
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

    fn tracked_note() -> Note {
        let mut note = Note {
            id: Some("n1".to_string()),
            text: Some("hello".to_string()),
            score: Some(1),
            tracking: Tracking::default(),
        };
        note.attach_tracker();
        note
    }

    #[test]
    fn test_untracked_updates_are_ignored() {
        let mut note = tracked_note();
        note.detach_tracker();
        note.set_text("changed");
        assert_eq!(note.change(), Operation::NoChange);
        assert!(note.changes().is_empty());
    }

    #[test]
    fn test_update_and_revert_to_original() {
        let mut note = tracked_note();
        note.set_text("changed");
        assert_eq!(note.change(), Operation::Update);
        assert_eq!(note.original("text"), json!("hello"));

        note.set_text("changed again");
        assert_eq!(note.original("text"), json!("hello"));

        note.set_text("hello");
        assert_eq!(note.change(), Operation::NoChange);
    }

    #[test]
    fn test_update_changes_list_one_per_key() {
        let mut note = tracked_note();
        note.set_score(5);
        note.set_text("bye");
        let changes = note.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key.as_deref(), Some("text"));
        assert_eq!(changes[1].key.as_deref(), Some("score"));
        assert_eq!(changes[1].to_string(), "Update n1: score = 5 (was 1)");
    }

    #[test]
    fn test_precedence() {
        let mut note = tracked_note();
        note.set_text("x");
        note.create();
        assert_eq!(note.change(), Operation::Create);
        note.destroy();
        assert_eq!(note.change(), Operation::Destroy);
    }

    #[test]
    fn test_create_then_destroy_has_no_changes() {
        let mut note = tracked_note();
        note.create();
        note.destroy();
        assert!(note.changes().is_empty());
    }

    #[test]
    fn test_create_lists_non_null_tracked_values() {
        let mut note = tracked_note();
        note.score = None;
        note.create();
        let changes = note.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].to_string(), "Create n1");
        assert_eq!(changes[1].key.as_deref(), Some("text"));
    }

    #[test]
    fn test_rollback_restores_baseline() {
        let mut note = tracked_note();
        note.set_text("x");
        note.set_score(9);
        note.destroy();
        note.rollback();
        assert_eq!(note.text.as_deref(), Some("hello"));
        assert_eq!(note.score, Some(1));
        assert_eq!(note.change(), Operation::NoChange);
    }

    #[test]
    fn test_rollback_single_key() {
        let mut note = tracked_note();
        note.set_text("x");
        note.set_score(9);
        note.rollback_key("score");
        assert_eq!(note.score, Some(1));
        assert_eq!(note.text.as_deref(), Some("x"));
        assert_eq!(note.change(), Operation::Update);
    }

    #[test]
    fn test_rollback_of_create_is_noop() {
        let mut note = tracked_note();
        note.create();
        note.set_text("x");
        note.rollback();
        assert_eq!(note.change(), Operation::Create);
        assert_eq!(note.text.as_deref(), Some("x"));
    }

    #[test]
    fn test_commit_is_idempotent() {
        let mut note = tracked_note();
        note.set_text("x");
        note.commit();
        note.commit();
        assert_eq!(note.change(), Operation::NoChange);
        note.rollback();
        assert_eq!(note.text.as_deref(), Some("x"));
    }

    #[test]
    fn test_operation_parses_display_name() {
        assert_eq!("Destroy".parse::<Operation>(), Ok(Operation::Destroy));
        assert_eq!(Operation::Update.to_string().parse::<Operation>(), Ok(Operation::Update));
        assert!(matches!(
            "destroy".parse::<Operation>(),
            Err(GraphError::Malformed(_))
        ));
    }
}

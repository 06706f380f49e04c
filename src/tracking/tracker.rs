//! Graph-level change tracking.
//!
//! Record-level bookkeeping lives on each record; the tracker only knows how
//! to walk a graph and order the pending changes so they can be replayed
//! against a store without violating references: parents are created before
//! children and destroyed after them, anchors exist before the annotations
//! that use them.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::trace;

use super::{Change, Operation, RecordKind, TrackedRecord};
use crate::graph::{AnchorRef, AnnotationRef, Graph};

/// Tracks changes to a graph since a baseline.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    started_at: DateTime<Utc>,
    commits: u64,
    rollbacks: u64,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    /// Create a tracker starting now.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            commits: 0,
            rollbacks: 0,
        }
    }

    /// When tracking started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of commits since tracking started.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Number of rollbacks since tracking started.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks
    }

    pub(crate) fn record_commit(&mut self) {
        self.commits += 1;
    }

    pub(crate) fn record_rollback(&mut self) {
        self.rollbacks += 1;
    }

    /// Pending changes of `graph` in replay order:
    ///
    /// 1. the graph's own creation
    /// 2. anchor creations and updates
    /// 3. annotation creations, parent layers first
    /// 4. annotation updates, parent layers first
    /// 5. annotation deletions, child layers first
    /// 6. anchor deletions
    /// 7. the graph's own deletion
    ///
    /// A graph marked created lists every record as created; a graph marked
    /// destroyed lists every record as destroyed.
    pub fn changeset(&self, graph: &Graph) -> Vec<Change> {
        let root = graph.root();
        let ranks: HashMap<&str, usize> = graph
            .schema()
            .layers_top_down()
            .into_iter()
            .enumerate()
            .map(|(rank, layer)| (layer.id(), rank))
            .collect();
        let mut annotations: Vec<AnnotationRef<'_>> = graph.annotations().collect();
        annotations.sort_by_key(|annotation| {
            (
                ranks.get(annotation.layer_id()).copied().unwrap_or(usize::MAX),
                annotation.id(),
            )
        });
        let anchors: Vec<AnchorRef<'_>> = graph.anchors().collect();

        let mut changes = Vec::new();
        match root.change() {
            Operation::Create => {
                changes.push(Change::create(RecordKind::Graph, graph.id()));
                for anchor in anchors.iter().filter(|a| a.change() != Operation::Destroy) {
                    changes.extend(anchor.creation_changes());
                }
                for annotation in annotations.iter().filter(|a| a.change() != Operation::Destroy) {
                    changes.extend(annotation.creation_changes());
                }
            }
            Operation::Destroy => {
                for annotation in annotations.iter().rev() {
                    if !annotation.tracking().is_created() {
                        changes.push(Change::destroy(RecordKind::Annotation, annotation.id()));
                    }
                }
                for anchor in &anchors {
                    if !anchor.tracking().is_created() {
                        changes.push(Change::destroy(RecordKind::Anchor, anchor.id()));
                    }
                }
                changes.push(Change::destroy(RecordKind::Graph, graph.id()));
            }
            _ => {
                for anchor in &anchors {
                    if matches!(anchor.change(), Operation::Create | Operation::Update) {
                        changes.extend(anchor.changes());
                    }
                }
                for op in [Operation::Create, Operation::Update] {
                    for annotation in annotations.iter().filter(|a| a.change() == op) {
                        changes.extend(annotation.changes());
                    }
                }
                for annotation in annotations.iter().rev() {
                    if annotation.change() == Operation::Destroy {
                        changes.extend(annotation.changes());
                    }
                }
                for anchor in &anchors {
                    if anchor.change() == Operation::Destroy {
                        changes.extend(anchor.changes());
                    }
                }
            }
        }
        trace!(graph_id = %graph.id(), count = changes.len(), "changeset");
        changes
    }
}

//! The annotation graph: an arena of anchors and annotations.
//!
//! Records are owned by the graph and refer to each other by id. Back links
//! (which annotations start or end at an anchor, which children a parent has
//! on a layer) live in graph-level indexes, in the manner of an in-memory
//! store keeping parent/child maps next to its records.
//!
//! ## Linkage rules
//!
//! - Ids are assigned on add when missing; such records are marked created.
//! - Top-level annotations are parented by the graph itself.
//! - Unaligned (tag) annotations without anchors borrow their parent's.
//! - Children are placed among same-parent same-layer siblings by start
//!   offset (or by a requested ordinal) and siblings are renumbered so
//!   ordinals stay contiguous from the parent's minimum (usually 1).
//! - Links to anchors or parents that are not present yet resolve once
//!   they are added.
//!
//! Borrowed views ([`AnnotationRef`], [`AnchorRef`]) provide navigation and
//! interval algebra; all mutation goes through `&mut Graph`.

mod edit;
mod fragment;
mod interval;
mod navigation;
mod validate;

pub use fragment::{fragment_id, parse_fragment_id};
pub use interval::AnchorRef;
pub use navigation::AnnotationRef;

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

use crate::error::GraphError;
use crate::settings::GraphSettings;
use crate::tracking::{Change, ChangeTracker, Operation, TrackedRecord};
use crate::types::{Alignment, Anchor, Annotation, Layer, Schema};

/// An annotation graph for one transcript.
///
/// The graph is itself an annotation on the root `"graph"` layer whose id is
/// the graph id; `graph.annotation(graph.id())` returns it.
#[derive(Debug, Clone)]
pub struct Graph {
    root: Annotation,
    schema: Schema,
    settings: GraphSettings,
    anchors: BTreeMap<String, Anchor>,
    annotations: BTreeMap<String, Annotation>,
    /// Anchor id -> annotations starting there.
    starts: BTreeMap<String, BTreeSet<String>>,
    /// Anchor id -> annotations ending there.
    ends: BTreeMap<String, BTreeSet<String>>,
    /// Layer id -> annotations on that layer.
    by_layer: BTreeMap<String, BTreeSet<String>>,
    /// Parent id -> layer id -> live children in ordinal order.
    children: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Parent id -> layer id -> first ordinal.
    ordinal_minima: BTreeMap<String, BTreeMap<String, u32>>,
    last_id: u64,
    last_added_anchor_id: Option<String>,
    tracker: Option<ChangeTracker>,
    source_graph_id: Option<String>,
    corpus: Option<String>,
}

impl Graph {
    /// Create an empty graph with only the root layer.
    pub fn new(id: impl Into<String>) -> Self {
        let schema = Schema::new();
        let root = Annotation::new(schema.root().id(), "").with_id(id);
        Self {
            root,
            schema,
            settings: GraphSettings::default(),
            anchors: BTreeMap::new(),
            annotations: BTreeMap::new(),
            starts: BTreeMap::new(),
            ends: BTreeMap::new(),
            by_layer: BTreeMap::new(),
            children: BTreeMap::new(),
            ordinal_minima: BTreeMap::new(),
            last_id: 0,
            last_added_anchor_id: None,
            tracker: None,
            source_graph_id: None,
            corpus: None,
        }
    }

    /// Use the given schema.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Use the given settings.
    pub fn with_settings(mut self, settings: GraphSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Graph id.
    pub fn id(&self) -> &str {
        self.root.id().unwrap_or_default()
    }

    /// Layer hierarchy.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Mutable layer hierarchy.
    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    /// Offset settings.
    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Mutable offset settings.
    pub fn settings_mut(&mut self) -> &mut GraphSettings {
        &mut self.settings
    }

    /// Add a layer to the schema; returns false if the id already exists.
    pub fn add_layer(&mut self, layer: Layer) -> bool {
        self.schema.add_layer(layer)
    }

    /// Look up a layer.
    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.schema.layer(id)
    }

    /// Corpus the graph belongs to.
    pub fn corpus(&self) -> Option<&str> {
        self.corpus.as_deref()
    }

    /// Set the corpus.
    pub fn set_corpus(&mut self, corpus: Option<String>) {
        self.corpus = corpus;
    }

    /// Id of the graph this fragment was extracted from.
    pub fn source_graph_id(&self) -> Option<&str> {
        self.source_graph_id.as_deref()
    }

    /// Whether this graph is a fragment of another.
    pub fn is_fragment(&self) -> bool {
        self.source_graph_id.is_some()
    }

    /// The graph's own annotation.
    pub fn root(&self) -> AnnotationRef<'_> {
        AnnotationRef::new(self, &self.root)
    }

    // ─── Anchors ────────────────────────────────────────────────────────────

    /// Add an anchor, assigning an id if it has none.
    pub fn add_anchor(&mut self, mut anchor: Anchor) -> Result<String, GraphError> {
        let id = match anchor.id().map(str::to_string) {
            Some(id) if self.anchors.contains_key(&id) => {
                return Err(GraphError::DuplicateId(id));
            }
            Some(id) => id,
            None => {
                let id = self.new_id();
                anchor.assign_id(id.clone());
                anchor.create();
                id
            }
        };
        if self.tracker.is_some() {
            anchor.attach_tracker();
        }
        trace!(anchor_id = %id, offset = ?anchor.offset(), "added anchor");
        self.anchors.insert(id.clone(), anchor);
        self.last_added_anchor_id = Some(id.clone());
        Ok(id)
    }

    /// Look up an anchor.
    pub fn anchor(&self, id: &str) -> Option<AnchorRef<'_>> {
        self.anchors.get(id).map(|anchor| AnchorRef::new(self, anchor))
    }

    /// Look up an anchor for editing.
    pub fn anchor_mut(&mut self, id: &str) -> Option<&mut Anchor> {
        self.anchors.get_mut(id)
    }

    /// All anchors in id order, including ones marked destroyed.
    pub fn anchors(&self) -> impl Iterator<Item = AnchorRef<'_>> + '_ {
        self.anchors.values().map(move |anchor| AnchorRef::new(self, anchor))
    }

    /// Number of anchors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Mark an anchor destroyed. Fails while any live annotation uses it.
    pub fn destroy_anchor(&mut self, id: &str) -> Result<(), GraphError> {
        self.ensure_anchor_unused(id)?;
        if let Some(anchor) = self.anchors.get_mut(id) {
            anchor.destroy();
        }
        debug!(anchor_id = %id, "destroyed anchor");
        Ok(())
    }

    /// Remove an anchor immediately, without change tracking.
    pub fn remove_anchor(&mut self, id: &str) -> Result<Anchor, GraphError> {
        self.ensure_anchor_unused(id)?;
        self.anchors
            .remove(id)
            .ok_or_else(|| GraphError::UnknownAnchor(id.to_string()))
    }

    fn ensure_anchor_unused(&self, id: &str) -> Result<(), GraphError> {
        let anchor = self
            .anchor(id)
            .ok_or_else(|| GraphError::UnknownAnchor(id.to_string()))?;
        let user = anchor
            .starting_annotations()
            .into_iter()
            .chain(anchor.ending_annotations())
            .next();
        match user {
            Some(annotation) => Err(GraphError::AnchorInUse {
                anchor_id: id.to_string(),
                annotation_id: annotation.id().to_string(),
            }),
            None => Ok(()),
        }
    }

    // ─── Annotations ────────────────────────────────────────────────────────

    /// Add an annotation (and any pending children), assigning ids where
    /// missing. Returns the annotation's id.
    pub fn add_annotation(&mut self, mut annotation: Annotation) -> Result<String, GraphError> {
        let id = match annotation.id().map(str::to_string) {
            Some(id) if self.annotations.contains_key(&id) || id == self.id() => {
                return Err(GraphError::DuplicateId(id));
            }
            Some(id) => id,
            None => {
                let id = self.new_id();
                annotation.assign_id(id.clone());
                annotation.create();
                id
            }
        };
        if self.tracker.is_some() {
            annotation.attach_tracker();
        }
        let pending_children = std::mem::take(&mut annotation.pending_children);

        if self.schema.is_top_level(annotation.layer_id()) {
            annotation.stamp_parent_id(self.id().to_string());
        }
        self.fill_missing_anchors(&mut annotation)?;

        let requested = annotation.ordinal() > 0;
        self.index_links(&id, &annotation);
        debug!(
            annotation_id = %id,
            layer_id = %annotation.layer_id(),
            parent_id = ?annotation.parent_id(),
            "added annotation"
        );
        self.annotations.insert(id.clone(), annotation);
        self.place(&id, requested);

        for mut child in pending_children {
            child.stamp_parent_id(id.clone());
            self.add_annotation(child)?;
        }
        Ok(id)
    }

    fn fill_missing_anchors(&mut self, annotation: &mut Annotation) -> Result<(), GraphError> {
        let alignment = self
            .schema
            .layer(annotation.layer_id())
            .map(Layer::alignment);
        match alignment {
            Some(Alignment::None) => {
                if annotation.start_id().is_some() && annotation.end_id().is_some() {
                    return Ok(());
                }
                let span = match annotation.parent_id() {
                    Some(parent) if parent == self.id() => {
                        let sorted = self.sorted_anchors();
                        sorted
                            .first()
                            .zip(sorted.last())
                            .map(|(first, last)| (first.id().to_string(), last.id().to_string()))
                    }
                    Some(parent) => self.annotations.get(parent).and_then(|parent| {
                        parent
                            .start_id()
                            .zip(parent.end_id())
                            .map(|(s, e)| (s.to_string(), e.to_string()))
                    }),
                    None => None,
                };
                if let Some((start, end)) = span {
                    if annotation.start_id().is_none() {
                        annotation.set_start_id(Some(start));
                    }
                    if annotation.end_id().is_none() {
                        annotation.set_end_id(Some(end));
                    }
                }
            }
            _ => {
                if annotation.start_id().is_none() {
                    let start = match &self.last_added_anchor_id {
                        Some(last) if self.anchors.contains_key(last) => last.clone(),
                        _ => self.add_anchor(Anchor::default())?,
                    };
                    annotation.set_start_id(Some(start));
                }
                if annotation.end_id().is_none() {
                    let end = if alignment == Some(Alignment::Instant) {
                        annotation.start_id().unwrap_or_default().to_string()
                    } else {
                        self.add_anchor(Anchor::default())?
                    };
                    annotation.set_end_id(Some(end));
                }
                self.last_added_anchor_id = annotation.end_id().map(str::to_string);
            }
        }
        Ok(())
    }

    /// Look up an annotation; the graph id resolves to the graph's own
    /// annotation.
    pub fn annotation(&self, id: &str) -> Option<AnnotationRef<'_>> {
        if id == self.id() {
            return Some(self.root());
        }
        self.annotations
            .get(id)
            .map(|annotation| AnnotationRef::new(self, annotation))
    }

    /// Look up an annotation for editing its label or descriptive fields.
    pub fn annotation_mut(&mut self, id: &str) -> Option<&mut Annotation> {
        self.annotations.get_mut(id)
    }

    /// All annotations in id order, including ones marked destroyed.
    pub fn annotations(&self) -> impl Iterator<Item = AnnotationRef<'_>> + '_ {
        self.annotations
            .values()
            .map(move |annotation| AnnotationRef::new(self, annotation))
    }

    /// Number of annotations, not counting the graph itself.
    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    /// Live annotations on a layer, in hierarchy and ordinal order.
    ///
    /// For the root layer this is the graph itself.
    pub fn annotations_on(&self, layer_id: &str) -> Vec<AnnotationRef<'_>> {
        self.root().all(layer_id)
    }

    /// Ids of the live children of `parent_id` on `layer_id`, in ordinal order.
    pub fn child_ids(&self, parent_id: &str, layer_id: &str) -> &[String] {
        self.children
            .get(parent_id)
            .and_then(|layers| layers.get(layer_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn ids_starting_at(&self, anchor_id: &str) -> impl Iterator<Item = &str> + '_ {
        self.starts
            .get(anchor_id)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    pub(crate) fn ids_ending_at(&self, anchor_id: &str) -> impl Iterator<Item = &str> + '_ {
        self.ends
            .get(anchor_id)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    pub(crate) fn ids_on_layer(&self, layer_id: &str) -> impl Iterator<Item = &str> + '_ {
        self.by_layer
            .get(layer_id)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    /// First ordinal of `parent_id`'s children on `layer_id` (default 1).
    pub fn ordinal_minimum(&self, parent_id: &str, layer_id: &str) -> u32 {
        self.ordinal_minima
            .get(parent_id)
            .and_then(|layers| layers.get(layer_id))
            .copied()
            .unwrap_or(1)
    }

    /// Set the first ordinal of `parent_id`'s children on `layer_id`.
    pub fn set_ordinal_minimum(&mut self, parent_id: &str, layer_id: &str, minimum: u32) {
        self.ordinal_minima
            .entry(parent_id.to_string())
            .or_default()
            .insert(layer_id.to_string(), minimum.max(1));
        self.renumber(parent_id, layer_id);
    }

    /// Point an annotation at a different start anchor.
    pub fn set_start_id(&mut self, id: &str, anchor_id: &str) -> Result<(), GraphError> {
        let annotation = self
            .annotations
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownAnnotation(id.to_string()))?;
        let old = annotation.start_id().map(str::to_string);
        if old.as_deref() == Some(anchor_id) {
            return Ok(());
        }
        annotation.set_start_id(Some(anchor_id.to_string()));
        if let Some(old) = old {
            unlink(&mut self.starts, &old, id);
        }
        self.starts
            .entry(anchor_id.to_string())
            .or_default()
            .insert(id.to_string());
        debug!(annotation_id = %id, anchor_id = %anchor_id, "relinked start");
        Ok(())
    }

    /// Point an annotation at a different end anchor.
    pub fn set_end_id(&mut self, id: &str, anchor_id: &str) -> Result<(), GraphError> {
        let annotation = self
            .annotations
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownAnnotation(id.to_string()))?;
        let old = annotation.end_id().map(str::to_string);
        if old.as_deref() == Some(anchor_id) {
            return Ok(());
        }
        annotation.set_end_id(Some(anchor_id.to_string()));
        if let Some(old) = old {
            unlink(&mut self.ends, &old, id);
        }
        self.ends
            .entry(anchor_id.to_string())
            .or_default()
            .insert(id.to_string());
        debug!(annotation_id = %id, anchor_id = %anchor_id, "relinked end");
        Ok(())
    }

    /// Move an annotation under a different parent, placing it among the new
    /// siblings by start offset.
    pub fn set_parent(&mut self, id: &str, parent_id: &str) -> Result<(), GraphError> {
        let current = self
            .annotations
            .get(id)
            .ok_or_else(|| GraphError::UnknownAnnotation(id.to_string()))?;
        if current.parent_id() == Some(parent_id) {
            return Ok(());
        }
        self.unplace(id);
        if let Some(annotation) = self.annotations.get_mut(id) {
            annotation.set_parent_id(Some(parent_id.to_string()));
        }
        self.place(id, false);
        debug!(annotation_id = %id, parent_id = %parent_id, "reparented annotation");
        Ok(())
    }

    /// Mark an annotation and all its descendants destroyed; remaining
    /// siblings are renumbered immediately. Records stay in the graph until
    /// [`commit`](Self::commit).
    pub fn destroy(&mut self, id: &str) -> Result<(), GraphError> {
        if id == self.id() {
            self.root.destroy();
            return Ok(());
        }
        if !self.annotations.contains_key(id) {
            return Err(GraphError::UnknownAnnotation(id.to_string()));
        }
        let doomed = self.subtree(id);
        self.unplace(id);
        for doomed_id in &doomed {
            if let Some(annotation) = self.annotations.get_mut(doomed_id) {
                annotation.destroy();
            }
        }
        debug!(annotation_id = %id, count = doomed.len(), "destroyed annotation");
        Ok(())
    }

    /// Remove an annotation immediately, without change tracking. Its
    /// children become orphans.
    pub fn remove_annotation(&mut self, id: &str) -> Result<Annotation, GraphError> {
        if !self.annotations.contains_key(id) {
            return Err(GraphError::UnknownAnnotation(id.to_string()));
        }
        self.unplace(id);
        self.unindex(id);
        self.annotations
            .remove(id)
            .ok_or_else(|| GraphError::UnknownAnnotation(id.to_string()))
    }

    /// The annotation and all its descendants, parents first.
    fn subtree(&self, id: &str) -> Vec<String> {
        let mut result = vec![id.to_string()];
        let mut i = 0;
        while i < result.len() {
            if let Some(layers) = self.children.get(&result[i]) {
                let children: Vec<String> = layers.values().flatten().cloned().collect();
                result.extend(children);
            }
            i += 1;
        }
        result
    }

    // ─── Ordinals ───────────────────────────────────────────────────────────

    /// Insert a live annotation into its parent's sibling list and renumber.
    fn place(&mut self, id: &str, requested: bool) {
        let Some(annotation) = self.annotations.get(id) else {
            return;
        };
        if annotation.change() == Operation::Destroy {
            return;
        }
        let Some(parent_id) = annotation.parent_id().map(str::to_string) else {
            return;
        };
        let layer_id = annotation.layer_id().to_string();
        let siblings = self.child_ids(&parent_id, &layer_id);
        if siblings.iter().any(|sibling| sibling == id) {
            return;
        }
        let found = if requested {
            let ordinal = annotation.ordinal();
            siblings.iter().position(|sibling| {
                self.annotations
                    .get(sibling)
                    .map(|s| s.ordinal() >= ordinal)
                    .unwrap_or(false)
            })
        } else {
            self.temporal_key(annotation).and_then(|key| {
                siblings.iter().position(|sibling| {
                    self.annotations
                        .get(sibling)
                        .and_then(|s| self.temporal_key(s))
                        .map(|sibling_key| sibling_key > key)
                        .unwrap_or(false)
                })
            })
        };
        let position = found.unwrap_or(siblings.len());

        self.children
            .entry(parent_id.clone())
            .or_default()
            .entry(layer_id.clone())
            .or_default()
            .insert(position, id.to_string());
        self.renumber(&parent_id, &layer_id);
    }

    /// Remove an annotation from its parent's sibling list and renumber.
    fn unplace(&mut self, id: &str) {
        let Some(annotation) = self.annotations.get(id) else {
            return;
        };
        let Some(parent_id) = annotation.parent_id().map(str::to_string) else {
            return;
        };
        let layer_id = annotation.layer_id().to_string();
        let removed = match self
            .children
            .get_mut(&parent_id)
            .and_then(|layers| layers.get_mut(&layer_id))
        {
            Some(siblings) => {
                let before = siblings.len();
                siblings.retain(|sibling| sibling != id);
                siblings.len() != before
            }
            None => false,
        };
        if removed {
            self.renumber(&parent_id, &layer_id);
        }
    }

    /// Start offset bound, then end bound, for temporal placement.
    fn temporal_key(&self, annotation: &Annotation) -> Option<(f64, f64)> {
        let start = self.anchor(annotation.start_id()?)?.offset_min()?;
        let end = annotation
            .end_id()
            .and_then(|end| self.anchor(end))
            .and_then(|end| end.offset_max())
            .unwrap_or(start);
        Some((start, end))
    }

    fn renumber(&mut self, parent_id: &str, layer_id: &str) {
        let minimum = self.ordinal_minimum(parent_id, layer_id);
        let Some(siblings) = self
            .children
            .get(parent_id)
            .and_then(|layers| layers.get(layer_id))
        else {
            return;
        };
        for (i, sibling) in siblings.iter().enumerate() {
            if let Some(annotation) = self.annotations.get_mut(sibling) {
                annotation.set_ordinal(minimum + i as u32);
            }
        }
        trace!(parent_id = %parent_id, layer_id = %layer_id, count = siblings.len(), "renumbered");
    }

    // ─── Indexes ────────────────────────────────────────────────────────────

    fn index_links(&mut self, id: &str, annotation: &Annotation) {
        if let Some(start) = annotation.start_id() {
            self.starts
                .entry(start.to_string())
                .or_default()
                .insert(id.to_string());
        }
        if let Some(end) = annotation.end_id() {
            self.ends
                .entry(end.to_string())
                .or_default()
                .insert(id.to_string());
        }
        self.by_layer
            .entry(annotation.layer_id().to_string())
            .or_default()
            .insert(id.to_string());
    }

    fn unindex(&mut self, id: &str) {
        let Some(annotation) = self.annotations.get(id) else {
            return;
        };
        if let Some(start) = annotation.start_id() {
            unlink(&mut self.starts, start, id);
        }
        if let Some(end) = annotation.end_id() {
            unlink(&mut self.ends, end, id);
        }
        unlink(&mut self.by_layer, annotation.layer_id(), id);
    }

    /// Rebuild every link index from the records.
    fn reindex(&mut self) {
        self.starts.clear();
        self.ends.clear();
        self.by_layer.clear();
        self.children.clear();
        let records: Vec<(String, Annotation)> = self
            .annotations
            .iter()
            .map(|(id, annotation)| (id.clone(), annotation.clone()))
            .collect();
        for (id, annotation) in &records {
            self.index_links(id, annotation);
            if annotation.change() == Operation::Destroy {
                continue;
            }
            if let Some(parent_id) = annotation.parent_id() {
                self.children
                    .entry(parent_id.to_string())
                    .or_default()
                    .entry(annotation.layer_id().to_string())
                    .or_default()
                    .push(id.clone());
            }
        }
        let annotations = &self.annotations;
        for siblings in self.children.values_mut().flat_map(|layers| layers.values_mut()) {
            siblings.sort_by_key(|sibling| {
                (
                    annotations.get(sibling).map(Annotation::ordinal).unwrap_or_default(),
                    sibling.clone(),
                )
            });
        }
        trace!(annotations = self.annotations.len(), "reindexed");
    }

    fn new_id(&mut self) -> String {
        loop {
            self.last_id += 1;
            let id = to_base36(self.last_id);
            if !self.annotations.contains_key(&id) && !self.anchors.contains_key(&id) && id != self.id() {
                return id;
            }
        }
    }

    // ─── Change tracking ────────────────────────────────────────────────────

    /// Start tracking changes, taking the current state as the baseline.
    pub fn track_changes(&mut self) {
        if self.tracker.is_some() {
            return;
        }
        self.commit();
        self.root.attach_tracker();
        for anchor in self.anchors.values_mut() {
            anchor.attach_tracker();
        }
        for annotation in self.annotations.values_mut() {
            annotation.attach_tracker();
        }
        self.tracker = Some(ChangeTracker::new());
        debug!(graph_id = %self.id(), "tracking changes");
    }

    /// Whether changes are being tracked.
    pub fn is_tracking(&self) -> bool {
        self.tracker.is_some()
    }

    /// The change tracker, if tracking.
    pub fn tracker(&self) -> Option<&ChangeTracker> {
        self.tracker.as_ref()
    }

    /// Mark the graph itself as new, so its changeset creates every record.
    pub fn mark_graph_created(&mut self) {
        self.root.create();
    }

    /// Mark the graph itself for deletion, so its changeset destroys every
    /// record.
    pub fn mark_graph_destroyed(&mut self) {
        self.root.destroy();
    }

    /// Pending operation on the graph as a whole. `Update` if any record
    /// changed; always `NoChange` when not tracking.
    pub fn change(&self) -> Operation {
        if self.tracker.is_none() {
            return Operation::NoChange;
        }
        match self.root.change() {
            Operation::NoChange => {
                let changed = self
                    .anchors
                    .values()
                    .map(TrackedRecord::change)
                    .chain(self.annotations.values().map(TrackedRecord::change))
                    .any(|op| op != Operation::NoChange);
                if changed {
                    Operation::Update
                } else {
                    Operation::NoChange
                }
            }
            op => op,
        }
    }

    /// All pending changes, ordered for replay against a store. Empty when
    /// not tracking.
    pub fn changes(&self) -> Vec<Change> {
        self.tracker
            .as_ref()
            .map(|tracker| tracker.changeset(self))
            .unwrap_or_default()
    }

    /// Accept the current state as the baseline: destroyed records are
    /// purged and all marks cleared.
    pub fn commit(&mut self) {
        let destroyed: Vec<String> = self
            .annotations
            .iter()
            .filter(|(_, annotation)| annotation.change() == Operation::Destroy)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &destroyed {
            self.unplace(id);
            self.unindex(id);
            self.children.remove(id);
            self.ordinal_minima.remove(id);
            self.annotations.remove(id);
        }
        self.anchors
            .retain(|_, anchor| anchor.change() != Operation::Destroy);
        for anchor in self.anchors.values_mut() {
            anchor.commit();
        }
        for annotation in self.annotations.values_mut() {
            annotation.commit();
        }
        self.root.commit();
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.record_commit();
        }
        debug!(graph_id = %self.id(), purged = destroyed.len(), "committed");
    }

    /// Discard all changes since the baseline: created records are removed,
    /// the rest restored. No-op when not tracking.
    pub fn rollback(&mut self) {
        if self.tracker.is_none() {
            return;
        }
        self.annotations
            .retain(|_, annotation| !annotation.tracking().is_created());
        self.anchors.retain(|_, anchor| !anchor.tracking().is_created());
        for anchor in self.anchors.values_mut() {
            anchor.rollback();
        }
        for annotation in self.annotations.values_mut() {
            annotation.rollback();
        }
        self.root.rollback();
        self.reindex();
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.record_rollback();
        }
        debug!(graph_id = %self.id(), "rolled back");
    }

    pub(crate) fn set_source_graph_id(&mut self, id: Option<String>) {
        self.source_graph_id = id;
    }
}

fn unlink(index: &mut BTreeMap<String, BTreeSet<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut digits = Vec::new();
    loop {
        digits.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Alignment;

    fn make_schema() -> Schema {
        Schema::new()
            .with_participant_layer("who")
            .with_turn_layer("turn")
            .with_word_layer("word")
            .with_layer(Layer::new("who", None).with_peers(true))
            .with_layer(
                Layer::new("turn", Some("who"))
                    .with_alignment(Alignment::Interval)
                    .with_peers(true),
            )
            .with_layer(
                Layer::new("word", Some("turn"))
                    .with_alignment(Alignment::Interval)
                    .with_peers(true),
            )
            .with_layer(Layer::new("pos", Some("word")))
    }

    /// Anchors a0..a5 at 0..5, one speaker, one turn 0-5 and words between
    /// consecutive anchors from 1 to 5.
    fn make_graph() -> Graph {
        let mut graph = Graph::new("g.trs").with_schema(make_schema());
        for i in 0..=5 {
            graph.add_anchor(Anchor::new(format!("a{}", i), Some(i as f64))).unwrap();
        }
        graph
            .add_annotation(Annotation::new("who", "Ann").with_id("p1").with_anchors("a0", "a5"))
            .unwrap();
        graph
            .add_annotation(
                Annotation::new("turn", "Ann")
                    .with_id("t1")
                    .with_anchors("a0", "a5")
                    .with_parent("p1"),
            )
            .unwrap();
        for i in 1..5 {
            graph
                .add_annotation(
                    Annotation::new("word", format!("w{}", i))
                        .with_id(format!("w{}", i))
                        .with_anchors(format!("a{}", i), format!("a{}", i + 1))
                        .with_parent("t1"),
                )
                .unwrap();
        }
        graph
    }

    fn ordinals(graph: &Graph, parent: &str, layer: &str) -> Vec<(String, u32)> {
        graph
            .child_ids(parent, layer)
            .iter()
            .map(|id| (id.clone(), graph.annotation(id).unwrap().ordinal()))
            .collect()
    }

    #[test]
    fn test_graph_is_its_own_annotation() {
        let graph = make_graph();
        let root = graph.annotation("g.trs").unwrap();
        assert_eq!(root.layer_id(), "graph");
        let on_root: Vec<_> = graph.annotations_on("graph").iter().map(|a| a.id()).collect();
        assert_eq!(on_root, vec!["g.trs"]);
    }

    #[test]
    fn test_top_level_annotations_are_parented_by_graph() {
        let graph = make_graph();
        assert_eq!(graph.annotation("p1").unwrap().parent_id(), Some("g.trs"));
        assert_eq!(graph.child_ids("g.trs", "who"), &["p1".to_string()]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut graph = make_graph();
        let result = graph.add_annotation(Annotation::new("word", "x").with_id("w1"));
        assert_eq!(result, Err(GraphError::DuplicateId("w1".to_string())));
        let result = graph.add_anchor(Anchor::new("a1", None));
        assert_eq!(result, Err(GraphError::DuplicateId("a1".to_string())));
    }

    #[test]
    fn test_assigned_ids_skip_used_ones() {
        let mut graph = Graph::new("g");
        graph.add_anchor(Anchor::new("1", Some(0.0))).unwrap();
        let id = graph.add_anchor(Anchor::at(1.0)).unwrap();
        assert_eq!(id, "2");
        assert_eq!(graph.anchor(&id).unwrap().change(), Operation::Create);
        assert_eq!(to_base36(36 * 36 + 35), "10z");
    }

    #[test]
    fn test_ordinals_follow_time_not_insertion() {
        let mut graph = Graph::new("g").with_schema(make_schema());
        for i in 0..4 {
            graph.add_anchor(Anchor::new(format!("a{}", i), Some(i as f64))).unwrap();
        }
        graph.add_annotation(Annotation::new("turn", "t").with_id("t1").with_anchors("a0", "a3")).unwrap();
        graph
            .add_annotation(Annotation::new("word", "c").with_id("c").with_anchors("a2", "a3").with_parent("t1"))
            .unwrap();
        graph
            .add_annotation(Annotation::new("word", "a").with_id("a").with_anchors("a0", "a1").with_parent("t1"))
            .unwrap();
        graph
            .add_annotation(Annotation::new("word", "b").with_id("b").with_anchors("a1", "a2").with_parent("t1"))
            .unwrap();
        assert_eq!(
            ordinals(&graph, "t1", "word"),
            vec![("a".to_string(), 1), ("b".to_string(), 2), ("c".to_string(), 3)]
        );
    }

    #[test]
    fn test_destroy_renumbers_siblings() {
        let mut graph = make_graph();
        graph.destroy("w2").unwrap();
        assert_eq!(
            ordinals(&graph, "t1", "word"),
            vec![("w1".to_string(), 1), ("w3".to_string(), 2), ("w4".to_string(), 3)]
        );
        assert_eq!(graph.annotation("w2").unwrap().change(), Operation::Destroy);
    }

    #[test]
    fn test_destroy_cascades_to_descendants() {
        let mut graph = make_graph();
        graph.add_annotation(Annotation::new("pos", "N").with_id("pos1").with_parent("w1")).unwrap();
        graph.destroy("t1").unwrap();
        for id in ["t1", "w1", "w4", "pos1"] {
            assert_eq!(graph.annotation(id).unwrap().change(), Operation::Destroy, "{}", id);
        }
        assert!(graph.annotations_on("word").is_empty());
    }

    #[test]
    fn test_tag_takes_parent_anchors() {
        let mut graph = make_graph();
        let id = graph.add_annotation(Annotation::new("pos", "N").with_parent("w2")).unwrap();
        let tag = graph.annotation(&id).unwrap();
        assert_eq!(tag.start_id(), Some("a2"));
        assert_eq!(tag.end_id(), Some("a3"));
        assert_eq!(tag.ordinal(), 1);
    }

    #[test]
    fn test_late_parent_adopts_children() {
        let mut graph = Graph::new("g").with_schema(make_schema());
        graph.add_anchor(Anchor::new("a0", Some(0.0))).unwrap();
        graph.add_anchor(Anchor::new("a1", Some(1.0))).unwrap();
        graph
            .add_annotation(Annotation::new("word", "w").with_id("w1").with_anchors("a0", "a1").with_parent("t1"))
            .unwrap();
        assert!(graph.annotation("w1").unwrap().parent().is_none());

        graph.add_annotation(Annotation::new("turn", "t").with_id("t1").with_anchors("a0", "a1")).unwrap();
        let turn = graph.annotation("t1").unwrap();
        let words: Vec<_> = turn.children("word").iter().map(|w| w.id()).collect();
        assert_eq!(words, vec!["w1"]);
    }

    #[test]
    fn test_pending_anchor_resolves_on_add() {
        let mut graph = make_graph();
        graph
            .add_annotation(Annotation::new("word", "late").with_id("w9").with_anchors("a5", "a9").with_parent("t1"))
            .unwrap();
        assert!(graph.annotation("w9").unwrap().end().is_none());
        graph.add_anchor(Anchor::new("a9", Some(9.0))).unwrap();
        let end = graph.annotation("w9").unwrap().end().unwrap();
        assert_eq!(end.offset(), Some(9.0));
        assert_eq!(end.ending_annotations().len(), 1);
    }

    #[test]
    fn test_nested_children_are_added_with_parent() {
        let mut graph = make_graph();
        let word = Annotation::new("word", "new")
            .with_anchors("a4", "a5")
            .with_parent("t1")
            .with_child(Annotation::new("pos", "V"));
        let id = graph.add_annotation(word).unwrap();
        let tags = graph.annotation(&id).unwrap().children("pos");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].parent_id(), Some(id.as_str()));
    }

    #[test]
    fn test_relinking_updates_back_links() {
        let mut graph = make_graph();
        graph.set_end_id("w1", "a3").unwrap();
        assert!(graph.anchor("a2").unwrap().ending_annotations().is_empty());
        let ending: Vec<_> = graph
            .anchor("a3")
            .unwrap()
            .ending_annotations()
            .iter()
            .map(|a| a.id())
            .collect();
        assert_eq!(ending, vec!["w1", "w2"]);
    }

    #[test]
    fn test_destroy_anchor_in_use_fails() {
        let mut graph = make_graph();
        let result = graph.destroy_anchor("a1");
        assert!(matches!(result, Err(GraphError::AnchorInUse { .. })));
        graph.add_anchor(Anchor::new("spare", None)).unwrap();
        assert!(graph.destroy_anchor("spare").is_ok());
    }

    #[test]
    fn test_rollback_restores_structure() {
        let mut graph = make_graph();
        graph.track_changes();
        graph.destroy("w2").unwrap();
        graph.add_annotation(Annotation::new("word", "extra").with_anchors("a0", "a1").with_parent("t1")).unwrap();
        graph.annotation_mut("w3").unwrap().set_label("changed");
        assert_eq!(graph.change(), Operation::Update);

        graph.rollback();
        assert_eq!(graph.change(), Operation::NoChange);
        assert_eq!(graph.annotation_count(), 6);
        assert_eq!(graph.annotation("w3").unwrap().label(), "w3");
        assert_eq!(
            ordinals(&graph, "t1", "word"),
            vec![
                ("w1".to_string(), 1),
                ("w2".to_string(), 2),
                ("w3".to_string(), 3),
                ("w4".to_string(), 4)
            ]
        );
    }

    #[test]
    fn test_commit_purges_destroyed() {
        let mut graph = make_graph();
        graph.track_changes();
        graph.destroy("w4").unwrap();
        graph.commit();
        assert!(graph.annotation("w4").is_none());
        assert_eq!(graph.anchor("a5").unwrap().ending_annotations().len(), 2);
        assert_eq!(graph.change(), Operation::NoChange);
    }
}

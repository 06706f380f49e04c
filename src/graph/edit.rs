//! Anchor lookup by offset and higher-level editing helpers.

use std::cmp::Ordering;
use tracing::{debug, warn};

use super::{AnchorRef, AnnotationRef, Graph};
use crate::error::GraphError;
use crate::tracking::{Operation, TrackedRecord};
use crate::types::schema::ROOT_LAYER_ID;
use crate::types::{Alignment, Anchor, Annotation, Layer};

impl Graph {
    /// Live anchors with known offsets, by offset then id.
    pub fn sorted_anchors(&self) -> Vec<AnchorRef<'_>> {
        let mut anchors: Vec<(f64, AnchorRef<'_>)> = self
            .anchors()
            .filter(|anchor| anchor.change() != Operation::Destroy)
            .filter_map(|anchor| anchor.offset().map(|offset| (offset, anchor)))
            .collect();
        anchors.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id().cmp(b.1.id())));
        anchors.into_iter().map(|(_, anchor)| anchor).collect()
    }

    /// Earliest anchor: the lowest offset, or the lowest id if no anchor has
    /// an offset.
    pub fn start_anchor(&self) -> Option<AnchorRef<'_>> {
        self.sorted_anchors()
            .into_iter()
            .next()
            .or_else(|| self.anchors().find(|a| a.change() != Operation::Destroy))
    }

    /// Latest anchor: the highest offset, or the highest id if no anchor has
    /// an offset.
    pub fn end_anchor(&self) -> Option<AnchorRef<'_>> {
        self.sorted_anchors()
            .pop()
            .or_else(|| self.anchors().filter(|a| a.change() != Operation::Destroy).last())
    }

    /// Round an offset to the configured granularity.
    pub fn quantum_offset(&self, offset: f64) -> f64 {
        self.settings().quantum_offset(offset)
    }

    /// Compare offsets, equal when within the configured granularity.
    pub fn compare_offsets(&self, a: f64, b: f64) -> Ordering {
        self.settings().compare_offsets(a, b)
    }

    /// A live anchor at the given offset (after rounding to the granularity).
    pub fn anchor_at(&self, offset: f64) -> Option<AnchorRef<'_>> {
        let wanted = self.quantum_offset(offset);
        self.sorted_anchors().into_iter().find(|anchor| {
            anchor
                .offset()
                .map(|o| self.quantum_offset(o) == wanted)
                .unwrap_or(false)
        })
    }

    /// Id of the anchor at `offset`, adding one if there is none.
    pub fn get_or_create_anchor_at(&mut self, offset: f64) -> Result<String, GraphError> {
        match self.anchor_at(offset) {
            Some(anchor) => Ok(anchor.id().to_string()),
            None => self.create_anchor_at(offset),
        }
    }

    /// Add a new anchor at `offset` and return its id.
    pub fn create_anchor_at(&mut self, offset: f64) -> Result<String, GraphError> {
        self.add_anchor(Anchor::at(offset))
    }

    /// Move every anchor with a known offset by `delta`.
    pub fn shift_anchors(&mut self, delta: f64) {
        if delta == 0.0 {
            return;
        }
        let ids: Vec<String> = self.anchors().map(|a| a.id().to_string()).collect();
        for id in ids {
            if let Some(anchor) = self.anchor_mut(&id) {
                if let Some(offset) = anchor.offset() {
                    anchor.set_offset(Some(offset + delta));
                }
            }
        }
        debug!(delta, "shifted anchors");
    }

    fn require_layer(&self, layer_id: &str) -> Result<&Layer, GraphError> {
        self.layer(layer_id)
            .ok_or_else(|| GraphError::UnknownLayer(layer_id.to_string()))
    }

    fn require_annotation(&self, id: &str) -> Result<AnnotationRef<'_>, GraphError> {
        self.annotation(id)
            .ok_or_else(|| GraphError::UnknownAnnotation(id.to_string()))
    }

    /// Add an annotation between two anchors under `parent_id`.
    pub fn create_annotation(
        &mut self,
        start_id: &str,
        end_id: &str,
        layer_id: &str,
        label: &str,
        parent_id: &str,
    ) -> Result<String, GraphError> {
        self.require_layer(layer_id)?;
        self.require_annotation(parent_id)?;
        self.add_annotation(
            Annotation::new(layer_id, label)
                .with_anchors(start_id, end_id)
                .with_parent(parent_id),
        )
    }

    /// Tag an annotation with a new annotation on `layer_id`.
    ///
    /// The tag spans the tagged annotation. Its parent is the tagged
    /// annotation when the tag layer is a child of its layer, the tagged
    /// annotation's parent when the layers are siblings (an unaligned tag
    /// then spans that parent), or the graph for top-level tag layers.
    pub fn create_tag(&mut self, to_tag: &str, layer_id: &str, label: &str) -> Result<String, GraphError> {
        let tag_layer = self.require_layer(layer_id)?;
        let tagged = self.require_annotation(to_tag)?;
        let tag_parent_layer = tag_layer.parent_id().unwrap_or(ROOT_LAYER_ID);
        let unaligned = tag_layer.alignment() == Alignment::None;
        let tagged_parent_layer = tagged
            .layer()
            .and_then(Layer::parent_id)
            .unwrap_or(ROOT_LAYER_ID);

        let (parent, anchors) = if tag_parent_layer == tagged.layer_id() {
            (tagged, tagged)
        } else if tag_parent_layer == tagged_parent_layer {
            let parent = tagged.parent().ok_or_else(|| GraphError::NoParent {
                layer_id: layer_id.to_string(),
                parent_layer_id: tag_parent_layer.to_string(),
            })?;
            (parent, if unaligned { parent } else { tagged })
        } else if tag_parent_layer == ROOT_LAYER_ID {
            (self.root(), tagged)
        } else {
            return Err(GraphError::NoParent {
                layer_id: layer_id.to_string(),
                parent_layer_id: tag_parent_layer.to_string(),
            });
        };

        let mut tag = Annotation::new(layer_id, label).with_parent(parent.id());
        if let (Some(start), Some(end)) = (anchors.start_id(), anchors.end_id()) {
            tag = tag.with_anchors(start, end);
        }
        self.add_annotation(tag)
    }

    /// Add an annotation from the start of `from` to the end of `to`.
    ///
    /// The parent is the nearest common ancestor of `from` and `to` (or an
    /// ancestor of it) on the span layer's parent layer.
    pub fn create_span(&mut self, from: &str, to: &str, layer_id: &str, label: &str) -> Result<String, GraphError> {
        let span_layer = self.require_layer(layer_id)?;
        let parent_layer = span_layer.parent_id().unwrap_or(ROOT_LAYER_ID).to_string();
        let from_ref = self.require_annotation(from)?;
        let to_ref = self.require_annotation(to)?;

        let on_parent_layer = |candidate: &AnnotationRef<'_>| candidate.layer_id() == parent_layer;
        let parent = from_ref
            .first_common_ancestor(&to_ref)
            .and_then(|common| {
                std::iter::once(common)
                    .chain(common.ancestors())
                    .find(on_parent_layer)
            })
            .or_else(|| {
                std::iter::once(from_ref)
                    .chain(from_ref.ancestors())
                    .find(on_parent_layer)
            })
            .or_else(|| (parent_layer == ROOT_LAYER_ID).then(|| self.root()))
            .ok_or_else(|| GraphError::NoParent {
                layer_id: layer_id.to_string(),
                parent_layer_id: parent_layer.clone(),
            })?;

        let span = Annotation::new(layer_id, label).with_parent(parent.id());
        let span = match (from_ref.start_id(), to_ref.end_id()) {
            (Some(start), Some(end)) => span.with_anchors(start, end),
            _ => span,
        };
        let id = self.add_annotation(span)?;
        debug!(annotation_id = %id, from = %from, to = %to, "created span");
        Ok(id)
    }

    /// Split the anchor chain after `before`, adding a new annotation that
    /// ends where `before` used to end. `before` now ends at a new anchor
    /// with no offset.
    pub fn insert_after(&mut self, before: &str, layer_id: &str, label: &str) -> Result<String, GraphError> {
        let before_ref = self.require_annotation(before)?;
        let old_end = before_ref
            .end_id()
            .ok_or_else(|| GraphError::Unanchored(before.to_string()))?
            .to_string();
        let same_layer = before_ref.layer_id() == layer_id;
        let parent_id = before_ref.parent_id().map(str::to_string);
        let ordinal = before_ref.ordinal() + 1;

        let middle = self.add_anchor(Anchor::default())?;
        self.set_end_id(before, &middle)?;
        let mut after = Annotation::new(layer_id, label).with_anchors(middle, old_end);
        if same_layer {
            if let Some(parent_id) = parent_id {
                after = after.with_parent(parent_id).with_ordinal(ordinal);
            }
        }
        self.add_annotation(after)
    }

    /// Split the anchor chain before `after`, adding a new annotation that
    /// starts where `after` used to start. `after` now starts at a new
    /// anchor with no offset.
    pub fn insert_before(&mut self, after: &str, layer_id: &str, label: &str) -> Result<String, GraphError> {
        let after_ref = self.require_annotation(after)?;
        let old_start = after_ref
            .start_id()
            .ok_or_else(|| GraphError::Unanchored(after.to_string()))?
            .to_string();
        let same_layer = after_ref.layer_id() == layer_id;
        let parent_id = after_ref.parent_id().map(str::to_string);
        let ordinal = after_ref.ordinal().max(1);

        let middle = self.add_anchor(Anchor::default())?;
        self.set_start_id(after, &middle)?;
        let mut before = Annotation::new(layer_id, label).with_anchors(old_start, middle);
        if same_layer {
            if let Some(parent_id) = parent_id {
                before = before.with_parent(parent_id).with_ordinal(ordinal);
            }
        }
        self.add_annotation(before)
    }

    /// Mark every live annotation on a layer destroyed. Returns whether there
    /// were any.
    pub fn destroy_all(&mut self, layer_id: &str) -> bool {
        let ids: Vec<String> = self
            .ids_on_layer(layer_id)
            .filter(|id| {
                self.annotation(id)
                    .map(|a| !a.is_destroyed())
                    .unwrap_or(false)
            })
            .map(str::to_string)
            .collect();
        for id in &ids {
            if let Err(error) = self.destroy(id) {
                warn!(annotation_id = %id, %error, "could not destroy");
            }
        }
        debug!(layer_id = %layer_id, count = ids.len(), "destroyed layer");
        !ids.is_empty()
    }

    /// Anchored annotations on a layer that overlap `[start, end)`.
    pub fn overlapping_annotations(&self, start: f64, end: f64, layer_id: &str) -> Vec<AnnotationRef<'_>> {
        self.annotations_on(layer_id)
            .into_iter()
            .filter(|annotation| match (annotation.start_offset(), annotation.end_offset()) {
                (Some(s), Some(e)) => e > start && s < end,
                _ => false,
            })
            .collect()
    }

    /// Labels of the live annotations on a layer, in order.
    pub fn labels(&self, layer_id: &str) -> Vec<String> {
        self.annotations_on(layer_id)
            .iter()
            .map(|annotation| annotation.label().to_string())
            .collect()
    }

    /// Words of each turn, partitioned among the turn's utterances by
    /// utterance start offset. Returns `(utterance, words)` pairs in turn and
    /// utterance order; empty if the schema lacks a turn, utterance or word
    /// layer.
    pub fn words_by_utterance(&self) -> Vec<(AnnotationRef<'_>, Vec<AnnotationRef<'_>>)> {
        let schema = self.schema();
        let (Some(turn_layer), Some(utterance_layer), Some(word_layer)) = (
            schema.turn_layer_id.as_deref(),
            schema.utterance_layer_id.as_deref(),
            schema.word_layer_id.as_deref(),
        ) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        for turn in self.annotations_on(turn_layer) {
            let mut utterances: Vec<AnnotationRef<'_>> = turn
                .children(utterance_layer)
                .into_iter()
                .filter(|u| u.start_offset().is_some())
                .collect();
            utterances.sort_by(|a, b| a.cmp_by_anchors(b));
            if utterances.is_empty() {
                continue;
            }
            let starts: Vec<f64> = utterances
                .iter()
                .map(|u| u.start_offset().unwrap_or_default())
                .collect();
            let mut groups: Vec<Vec<AnnotationRef<'_>>> = vec![Vec::new(); utterances.len()];
            let mut current = 0;
            for word in turn.children(word_layer) {
                let Some(start) = word.start() else {
                    continue;
                };
                let start_min = start.offset_min();
                let end_max = word.end().and_then(|end| end.offset_max());
                let belongs_later = |next: f64| match (start.offset(), start_min, end_max) {
                    (Some(_), Some(min), _) => min >= next,
                    (None, Some(min), _) if min >= next => true,
                    (None, _, Some(max)) => max > next,
                    _ => false,
                };
                while current + 1 < starts.len() && belongs_later(starts[current + 1]) {
                    current += 1;
                }
                groups[current].push(word);
            }
            result.extend(utterances.into_iter().zip(groups));
        }
        result
    }
}

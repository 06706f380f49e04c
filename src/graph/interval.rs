//! Anchor views, offset bounds and the temporal relation algebra.
//!
//! Offsets are inferred when missing: an anchor without an offset takes its
//! bounds from the nearest anchors with known offsets, walking along
//! non-instantaneous annotations. Relations between annotations use the
//! anchors' own offsets; an annotation with an unknown start or end offset
//! neither includes nor overlaps anything.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::Deref;

use super::{AnnotationRef, Graph};
use crate::tracking::{Operation, TrackedRecord};
use crate::types::Anchor;

/// An anchor together with the graph it belongs to.
///
/// Dereferences to the underlying [`Anchor`].
#[derive(Clone, Copy)]
pub struct AnchorRef<'g> {
    graph: &'g Graph,
    anchor: &'g Anchor,
}

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Backward,
    Forward,
}

impl<'g> AnchorRef<'g> {
    pub(crate) fn new(graph: &'g Graph, anchor: &'g Anchor) -> Self {
        Self { graph, anchor }
    }

    /// Anchor id.
    pub fn id(&self) -> &'g str {
        self.anchor.id().unwrap_or_default()
    }

    /// The underlying record.
    pub fn record(&self) -> &'g Anchor {
        self.anchor
    }

    /// Live annotations starting here, in id order.
    pub fn starting_annotations(&self) -> Vec<AnnotationRef<'g>> {
        let graph = self.graph;
        graph
            .ids_starting_at(self.id())
            .filter_map(|id| graph.annotation(id))
            .filter(|annotation| !annotation.is_destroyed())
            .collect()
    }

    /// Live annotations ending here, in id order.
    pub fn ending_annotations(&self) -> Vec<AnnotationRef<'g>> {
        let graph = self.graph;
        graph
            .ids_ending_at(self.id())
            .filter_map(|id| graph.annotation(id))
            .filter(|annotation| !annotation.is_destroyed())
            .collect()
    }

    /// Live annotations on `layer_id` starting here.
    pub fn starting_on(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        self.starting_annotations()
            .into_iter()
            .filter(|annotation| annotation.layer_id() == layer_id)
            .collect()
    }

    /// Live annotations on `layer_id` ending here.
    pub fn ending_on(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        self.ending_annotations()
            .into_iter()
            .filter(|annotation| annotation.layer_id() == layer_id)
            .collect()
    }

    /// Whether a live annotation on `layer_id` starts here.
    pub fn is_start_on(&self, layer_id: &str) -> bool {
        !self.starting_on(layer_id).is_empty()
    }

    /// Whether a live annotation on `layer_id` ends here.
    pub fn is_end_on(&self, layer_id: &str) -> bool {
        !self.ending_on(layer_id).is_empty()
    }

    /// Whether any live annotation starts or ends here.
    pub fn is_linked(&self) -> bool {
        !self.starting_annotations().is_empty() || !self.ending_annotations().is_empty()
    }

    /// Lower bound of the offset: the offset if known, otherwise the
    /// greatest known offset among the nearest preceding anchors.
    pub fn offset_min(&self) -> Option<f64> {
        self.anchor
            .offset()
            .or_else(|| self.nearest_bound(Direction::Backward))
    }

    /// Upper bound of the offset: the offset if known, otherwise the least
    /// known offset among the nearest following anchors.
    pub fn offset_max(&self) -> Option<f64> {
        self.anchor
            .offset()
            .or_else(|| self.nearest_bound(Direction::Forward))
    }

    /// Breadth-first search, one hop level at a time; the first level with
    /// any known offset decides.
    fn nearest_bound(&self, direction: Direction) -> Option<f64> {
        let mut visited = HashSet::from([self.id()]);
        let mut frontier = vec![*self];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            let mut bound: Option<f64> = None;
            for anchor in &frontier {
                let links = match direction {
                    Direction::Backward => anchor.ending_annotations(),
                    Direction::Forward => anchor.starting_annotations(),
                };
                for annotation in links {
                    if annotation.is_instantaneous() {
                        continue;
                    }
                    let neighbour = match direction {
                        Direction::Backward => annotation.start(),
                        Direction::Forward => annotation.end(),
                    };
                    let Some(neighbour) = neighbour else {
                        continue;
                    };
                    if !visited.insert(neighbour.id()) {
                        continue;
                    }
                    match neighbour.offset() {
                        Some(offset) => {
                            bound = Some(match (bound, direction) {
                                (None, _) => offset,
                                (Some(b), Direction::Backward) => b.max(offset),
                                (Some(b), Direction::Forward) => b.min(offset),
                            });
                        }
                        None => next.push(neighbour),
                    }
                }
            }
            if bound.is_some() {
                return bound;
            }
            frontier = next;
        }
        None
    }

    /// Anchors reachable by following annotations backwards, nearest first.
    pub fn preceding(&self) -> Vec<AnchorRef<'g>> {
        self.reachable(Direction::Backward)
    }

    /// Anchors reachable by following annotations forwards, nearest first.
    pub fn following(&self) -> Vec<AnchorRef<'g>> {
        self.reachable(Direction::Forward)
    }

    fn reachable(&self, direction: Direction) -> Vec<AnchorRef<'g>> {
        let mut visited = HashSet::from([self.id()]);
        let mut queue = VecDeque::from([*self]);
        let mut result = Vec::new();
        while let Some(anchor) = queue.pop_front() {
            let links = match direction {
                Direction::Backward => anchor.ending_annotations(),
                Direction::Forward => anchor.starting_annotations(),
            };
            for annotation in links {
                let neighbour = match direction {
                    Direction::Backward => annotation.start(),
                    Direction::Forward => annotation.end(),
                };
                if let Some(neighbour) = neighbour {
                    if visited.insert(neighbour.id()) {
                        result.push(neighbour);
                        queue.push_back(neighbour);
                    }
                }
            }
        }
        result
    }

    /// Whether this anchor comes before `other`, either structurally (a
    /// chain of annotations leads from here to there) or by offset bounds.
    pub fn precedes(&self, other: &AnchorRef<'_>) -> bool {
        if self.id() == other.id() {
            return false;
        }
        if self.following().iter().any(|anchor| anchor.id() == other.id()) {
            return true;
        }
        match (self.offset_max(), other.offset_min()) {
            (Some(mine), Some(theirs)) => mine < theirs,
            _ => false,
        }
    }

    /// Whether this anchor comes after `other`.
    pub fn follows(&self, other: &AnchorRef<'_>) -> bool {
        if self.id() == other.id() {
            return false;
        }
        if self.preceding().iter().any(|anchor| anchor.id() == other.id()) {
            return true;
        }
        match (self.offset_min(), other.offset_max()) {
            (Some(mine), Some(theirs)) => mine > theirs,
            _ => false,
        }
    }

    /// A live annotation from this anchor to `other`, if any.
    pub fn annotation_to(&self, other: &AnchorRef<'_>) -> Option<AnnotationRef<'g>> {
        self.starting_annotations()
            .into_iter()
            .find(|annotation| annotation.end_id() == Some(other.id()))
    }
}

impl<'g> Deref for AnchorRef<'g> {
    type Target = Anchor;

    fn deref(&self) -> &Anchor {
        self.anchor
    }
}

impl PartialEq for AnchorRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for AnchorRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.anchor, f)
    }
}

impl<'g> AnnotationRef<'g> {
    /// Offset of the start anchor, if known.
    pub fn start_offset(&self) -> Option<f64> {
        self.start()?.offset()
    }

    /// Offset of the end anchor, if known.
    pub fn end_offset(&self) -> Option<f64> {
        self.end()?.offset()
    }

    /// Whether both anchors exist and have offsets.
    pub fn is_anchored(&self) -> bool {
        self.start_offset().is_some() && self.end_offset().is_some()
    }

    /// `end - start`, if both offsets are known.
    pub fn duration(&self) -> Option<f64> {
        Some(self.end_offset()? - self.start_offset()?)
    }

    /// Half-way between start and end, if both offsets are known.
    pub fn midpoint(&self) -> Option<f64> {
        let start = self.start_offset()?;
        let end = self.end_offset()?;
        Some(start + (end - start) / 2.0)
    }

    /// Whether `start <= offset < end`. False if either offset is unknown.
    pub fn includes_offset(&self, offset: f64) -> bool {
        match (self.start_offset(), self.end_offset()) {
            (Some(start), Some(end)) => start <= offset && offset < end,
            _ => false,
        }
    }

    /// Whether this annotation's interval contains `other`'s.
    ///
    /// Every annotation includes itself, and a tag includes the annotation
    /// it shares both anchors with. Otherwise `other`'s start bound must
    /// fall inside this interval and its end bound must fall inside it too
    /// or coincide with this end.
    pub fn includes(&self, other: &AnnotationRef<'_>) -> bool {
        if self.id() == other.id() || self.tags(other) {
            return true;
        }
        let (Some(other_start), Some(other_end)) = (other.start(), other.end()) else {
            return false;
        };
        let (Some(other_min), Some(other_max)) = (other_start.offset_min(), other_end.offset_max())
        else {
            return false;
        };
        self.includes_offset(other_min)
            && (self.includes_offset(other_max) || self.end_offset() == Some(other_max))
    }

    /// Whether this annotation shares both anchors with `other`. An
    /// annotation does not tag itself.
    pub fn tags(&self, other: &AnnotationRef<'_>) -> bool {
        self.id() != other.id()
            && self.start_id().is_some()
            && self.start_id() == other.start_id()
            && self.end_id() == other.end_id()
    }

    /// Whether this annotation includes `other`'s midpoint. Always true for
    /// itself and for annotations sharing both its anchors.
    pub fn includes_midpoint_of(&self, other: &AnnotationRef<'_>) -> bool {
        if self.id() == other.id() || self.tags(other) {
            return true;
        }
        other
            .midpoint()
            .map(|midpoint| self.includes_offset(midpoint))
            .unwrap_or(false)
    }

    /// Whether the two intervals strictly overlap.
    pub fn overlaps(&self, other: &AnnotationRef<'_>) -> bool {
        match (
            self.start_offset(),
            self.end_offset(),
            other.start_offset(),
            other.end_offset(),
        ) {
            (Some(start), Some(end), Some(other_start), Some(other_end)) => {
                start < other_end && end > other_start
            }
            _ => false,
        }
    }

    /// Gap between the two intervals: positive when apart, zero when they
    /// touch, negative by the overlap when they overlap. If either includes
    /// the other, minus the included one's duration.
    pub fn distance(&self, other: &AnnotationRef<'_>) -> Option<f64> {
        let start = self.start_offset()?;
        let end = self.end_offset()?;
        let other_start = other.start_offset()?;
        let other_end = other.end_offset()?;
        if self.includes(other) {
            return Some(-(other_end - other_start));
        }
        if other.includes(self) {
            return Some(-(end - start));
        }
        let gap = (start - other_end).abs().min((end - other_start).abs());
        if start < other_end && end > other_start {
            Some(-gap)
        } else {
            Some(gap)
        }
    }

    /// The larger of the start-to-start and end-to-end distances, negative
    /// when the intervals overlap.
    pub fn max_paired_distance(&self, other: &AnnotationRef<'_>) -> Option<f64> {
        let start = self.start_offset()?;
        let end = self.end_offset()?;
        let other_start = other.start_offset()?;
        let other_end = other.end_offset()?;
        let distance = (start - other_start).abs().max((end - other_end).abs());
        if start < other_end && end > other_start {
            Some(-distance)
        } else {
            Some(distance)
        }
    }

    fn related_on(
        &self,
        layer_id: &str,
        related: impl Fn(&AnnotationRef<'g>) -> bool,
    ) -> Vec<AnnotationRef<'g>> {
        self.graph()
            .annotations_on(layer_id)
            .into_iter()
            .filter(|other| other.id() != self.id())
            .filter(|other| other.change() != Operation::Destroy)
            .filter(|other| related(other))
            .collect()
    }

    /// Annotations on `layer_id` that include this one.
    pub fn including_annotations_on(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        if !self.is_anchored() && !self.record().is_graph() {
            return Vec::new();
        }
        self.related_on(layer_id, |other| other.includes(self))
    }

    /// Annotations on `layer_id` that this one includes.
    pub fn included_annotations_on(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        self.related_on(layer_id, |other| self.includes(other))
    }

    /// Annotations on `layer_id` that include this one's midpoint.
    pub fn midpoint_including_annotations_on(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        self.related_on(layer_id, |other| other.includes_midpoint_of(self))
    }

    /// Annotations on `layer_id` sharing both anchors with this one.
    pub fn tags_on(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        self.related_on(layer_id, |other| other.tags(self))
    }
}

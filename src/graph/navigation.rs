//! Hierarchy navigation over a borrowed graph.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;

use super::{AnchorRef, Graph};
use crate::tracking::{Operation, TrackedRecord};
use crate::types::schema::ROOT_LAYER_ID;
use crate::types::{Annotation, Layer};

/// An annotation together with the graph it belongs to.
///
/// Dereferences to the underlying [`Annotation`].
#[derive(Clone, Copy)]
pub struct AnnotationRef<'g> {
    graph: &'g Graph,
    annotation: &'g Annotation,
}

impl<'g> AnnotationRef<'g> {
    pub(crate) fn new(graph: &'g Graph, annotation: &'g Annotation) -> Self {
        Self { graph, annotation }
    }

    /// Annotation id.
    pub fn id(&self) -> &'g str {
        self.annotation.id().unwrap_or_default()
    }

    /// The underlying record.
    pub fn record(&self) -> &'g Annotation {
        self.annotation
    }

    /// The graph this annotation belongs to.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Layer definition.
    pub fn layer(&self) -> Option<&'g Layer> {
        self.graph.schema().layer(self.annotation.layer_id())
    }

    /// Whether the annotation is marked destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.annotation.change() == Operation::Destroy
    }

    /// Start anchor. For the graph itself, the earliest anchor.
    pub fn start(&self) -> Option<AnchorRef<'g>> {
        if self.annotation.is_graph() {
            return self.graph.start_anchor();
        }
        self.graph.anchor(self.annotation.start_id()?)
    }

    /// End anchor. For the graph itself, the latest anchor.
    pub fn end(&self) -> Option<AnchorRef<'g>> {
        if self.annotation.is_graph() {
            return self.graph.end_anchor();
        }
        self.graph.anchor(self.annotation.end_id()?)
    }

    /// Parent annotation, if present in the graph.
    pub fn parent(&self) -> Option<AnnotationRef<'g>> {
        self.graph.annotation(self.annotation.parent_id()?)
    }

    /// Ancestors, nearest first.
    pub fn ancestors(&self) -> Vec<AnnotationRef<'g>> {
        let mut result = Vec::new();
        let mut seen = HashSet::from([self.id()]);
        let mut current = self.parent();
        while let Some(ancestor) = current {
            if !seen.insert(ancestor.id()) {
                break;
            }
            result.push(ancestor);
            current = ancestor.parent();
        }
        result
    }

    /// Ancestor on the given layer.
    pub fn ancestor(&self, layer_id: &str) -> Option<AnnotationRef<'g>> {
        self.ancestors()
            .into_iter()
            .find(|ancestor| ancestor.layer_id() == layer_id)
    }

    /// Nearest annotation that is this one or one of its ancestors, and also
    /// `other` or one of its ancestors.
    pub fn first_common_ancestor(&self, other: &AnnotationRef<'_>) -> Option<AnnotationRef<'g>> {
        let other_line: HashSet<&str> = std::iter::once(other.id())
            .chain(other.ancestors().into_iter().map(|a| a.id()))
            .collect();
        std::iter::once(*self)
            .chain(self.ancestors())
            .find(|candidate| other_line.contains(candidate.id()))
    }

    /// Live children on a layer, in ordinal order.
    pub fn children(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        let graph = self.graph;
        graph
            .child_ids(self.id(), layer_id)
            .iter()
            .filter_map(|id| graph.annotation(id))
            .filter(|child| !child.is_destroyed())
            .collect()
    }

    /// Previous sibling (same parent, same layer).
    pub fn previous(&self) -> Option<AnnotationRef<'g>> {
        let siblings = self.siblings();
        let index = siblings.iter().position(|s| s.id() == self.id())?;
        index.checked_sub(1).map(|i| siblings[i])
    }

    /// Next sibling (same parent, same layer).
    pub fn next(&self) -> Option<AnnotationRef<'g>> {
        let siblings = self.siblings();
        let index = siblings.iter().position(|s| s.id() == self.id())?;
        siblings.get(index + 1).copied()
    }

    fn siblings(&self) -> Vec<AnnotationRef<'g>> {
        match self.parent() {
            Some(parent) => parent.children(self.layer_id()),
            None => Vec::new(),
        }
    }

    /// First related annotation on a layer.
    ///
    /// | Target layer                | Result                                   |
    /// |-----------------------------|------------------------------------------|
    /// | own layer                   | this annotation                          |
    /// | ancestor layer              | the ancestor on that layer               |
    /// | child or descendant layer   | the first descendant on that layer       |
    /// | any other layer             | the first overlapping annotation, found  |
    /// |                             | under the common ancestor                |
    pub fn first(&self, layer_id: &str) -> Option<AnnotationRef<'g>> {
        let schema = self.graph.schema();
        let own = self.annotation.layer_id();
        if layer_id == own {
            return Some(*self);
        }
        if !schema.contains(layer_id) {
            return None;
        }
        if schema.is_ancestor(layer_id, own) {
            return self.ancestor(layer_id);
        }
        if schema.is_descendant(layer_id, own) {
            let first = self.descendants_on(layer_id).into_iter().next();
            if first.is_some() || !self.annotation.is_graph() {
                return first;
            }
            return self.graph.orphans_on(layer_id).into_iter().next();
        }
        let common = schema.first_common_ancestor(own, layer_id)?;
        if common.id() == ROOT_LAYER_ID {
            self.including_annotations_on(layer_id)
                .into_iter()
                .next()
                .or_else(|| self.included_annotations_on(layer_id).into_iter().next())
        } else {
            let candidates = self.ancestor(common.id())?.all(layer_id);
            candidates
                .iter()
                .find(|candidate| candidate.includes(self))
                .or_else(|| candidates.iter().find(|candidate| self.includes(candidate)))
                .copied()
        }
    }

    /// Last related annotation on a layer, by the same rules as [`all`](Self::all).
    pub fn last(&self, layer_id: &str) -> Option<AnnotationRef<'g>> {
        self.all(layer_id).pop()
    }

    /// All related annotations on a layer.
    ///
    /// Descendants come in hierarchy order; overlapping annotations on
    /// unrelated layers are those found under the common ancestor that
    /// include this one or are included by it. For the graph itself, orphans
    /// on the layer are appended.
    pub fn all(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        let schema = self.graph.schema();
        let own = self.annotation.layer_id();
        if layer_id == own {
            return vec![*self];
        }
        if !schema.contains(layer_id) {
            return Vec::new();
        }
        if schema.is_ancestor(layer_id, own) {
            return self.ancestor(layer_id).into_iter().collect();
        }
        if schema.is_descendant(layer_id, own) {
            let mut result = self.descendants_on(layer_id);
            if self.annotation.is_graph() {
                result.extend(self.graph.orphans_on(layer_id));
            }
            return result;
        }
        let Some(common) = schema.first_common_ancestor(own, layer_id) else {
            return Vec::new();
        };
        let candidates = if common.id() == ROOT_LAYER_ID {
            self.graph.annotations_on(layer_id)
        } else {
            match self.ancestor(common.id()) {
                Some(ancestor) => ancestor.all(layer_id),
                None => Vec::new(),
            }
        };
        candidates
            .into_iter()
            .filter(|candidate| candidate.id() != self.id())
            .filter(|candidate| candidate.includes(self) || self.includes(candidate))
            .collect()
    }

    /// Live descendants on a strictly lower layer, in hierarchy order.
    ///
    /// The walk goes through the highest aligned layer between this one and
    /// the target; annotations on it are visited in time order so that
    /// descendants from different branches (e.g. turns of several speakers)
    /// interleave correctly.
    fn descendants_on(&self, layer_id: &str) -> Vec<AnnotationRef<'g>> {
        let schema = self.graph.schema();
        let own = self.annotation.layer_id();
        let mut highest = layer_id;
        for ancestor in schema.ancestors(layer_id) {
            if ancestor.id() == own {
                break;
            }
            if ancestor.alignment().is_aligned() {
                highest = ancestor.id();
            }
        }

        let mut pivots = Vec::new();
        self.collect_descendants(highest, &mut pivots);
        let mut keyed: Vec<(usize, (f64, f64), AnnotationRef<'g>)> = pivots
            .into_iter()
            .enumerate()
            .map(|(i, pivot)| (i, pivot.sort_key(), pivot))
            .collect();
        keyed.sort_by(|a, b| {
            a.1 .0
                .total_cmp(&b.1 .0)
                .then(a.1 .1.total_cmp(&b.1 .1))
                .then(a.0.cmp(&b.0))
        });
        let pivots = keyed.into_iter().map(|(_, _, pivot)| pivot);

        if highest == layer_id {
            return pivots.collect();
        }
        let mut result = Vec::new();
        for pivot in pivots {
            pivot.collect_descendants(layer_id, &mut result);
        }
        result
    }

    /// Depth-first collection of live descendants on `layer_id`, visiting only
    /// layers on the path to it.
    fn collect_descendants(&self, layer_id: &str, out: &mut Vec<AnnotationRef<'g>>) {
        let schema = self.graph.schema();
        for child_layer in schema.children(self.annotation.layer_id()) {
            let child_layer_id = child_layer.id();
            if child_layer_id == layer_id {
                out.extend(self.children(layer_id));
            } else if schema.is_ancestor(child_layer_id, layer_id) {
                for child in self.children(child_layer_id) {
                    child.collect_descendants(layer_id, out);
                }
            }
        }
    }

    /// Start and end bounds for ordering; unknown bounds sort last.
    fn sort_key(&self) -> (f64, f64) {
        let start = self
            .start()
            .and_then(|anchor| anchor.offset_min())
            .unwrap_or(f64::INFINITY);
        let end = self
            .end()
            .and_then(|anchor| anchor.offset_max())
            .unwrap_or(f64::INFINITY);
        (start, end)
    }

    /// Compare by start then end offset bounds.
    pub fn cmp_by_anchors(&self, other: &AnnotationRef<'_>) -> Ordering {
        let (a_start, a_end) = self.sort_key();
        let (b_start, b_end) = other.sort_key();
        a_start
            .total_cmp(&b_start)
            .then(a_end.total_cmp(&b_end))
            .then_with(|| self.id().cmp(other.id()))
    }
}

impl<'g> Deref for AnnotationRef<'g> {
    type Target = Annotation;

    fn deref(&self) -> &Annotation {
        self.annotation
    }
}

impl PartialEq for AnnotationRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for AnnotationRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.annotation, f)
    }
}

impl fmt::Display for AnnotationRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.annotation, f)
    }
}

impl Graph {
    /// Live annotations on a layer whose parent is missing from the graph.
    pub fn orphans_on(&self, layer_id: &str) -> Vec<AnnotationRef<'_>> {
        self.ids_on_layer(layer_id)
            .filter_map(|id| self.annotation(id))
            .filter(|annotation| !annotation.is_destroyed())
            .filter(|annotation| match annotation.parent() {
                Some(parent) => parent.is_destroyed(),
                None => true,
            })
            .collect()
    }
}

//! Fragment extraction and merging fragment edits back.
//!
//! A fragment is a standalone graph holding copies of the records that fall
//! within some bounds. It keeps the source's ids, settings and layer
//! definitions, remembers the source graph id, and shares no state with the
//! source afterwards.

use regex_lite::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use super::{AnnotationRef, Graph};
use crate::error::GraphError;
use crate::tracking::{Operation, TrackedRecord};
use crate::types::schema::ROOT_LAYER_ID;

/// Id of the fragment of `graph_id` between `start` and `end`:
/// `name__start-end` with the graph id's extension dropped and offsets to
/// three decimals.
pub fn fragment_id(graph_id: &str, start: f64, end: f64) -> String {
    format!("{}__{:.3}-{:.3}", without_extension(graph_id), start, end)
}

/// Split a fragment id into source graph name, start and end offsets.
///
/// A trailing extension after the end offset is ignored.
pub fn parse_fragment_id(id: &str) -> Option<(String, f64, f64)> {
    let pattern = Regex::new(r"^(.*)__([0-9.]+)-([0-9.]+)(\.[a-zA-Z]*)?$").ok()?;
    let captures = pattern.captures(id)?;
    let name = captures.get(1)?.as_str().to_string();
    let start = captures.get(2)?.as_str().parse().ok()?;
    let end = captures.get(3)?.as_str().parse().ok()?;
    Some((name, start, end))
}

fn without_extension(id: &str) -> &str {
    match id.rfind('.') {
        Some(dot) if dot > 0 => &id[..dot],
        _ => id,
    }
}

/// Whether the annotation's bounds lie within `[start, end)`: it must start
/// before `end` but may finish exactly at it. Annotations with unknown bounds
/// are never in range.
fn in_range(annotation: &AnnotationRef<'_>, start: f64, end: f64) -> bool {
    let min = annotation.start().and_then(|anchor| anchor.offset_min());
    let max = annotation.end().and_then(|anchor| anchor.offset_max());
    match (min, max) {
        (Some(min), Some(max)) => min >= start && min < end && max <= end,
        _ => false,
    }
}

/// Selects source records, then copies them into a new graph.
///
/// Nothing is added to the fragment until every record is selected, so
/// sibling numbering can start from the lowest selected source ordinal
/// whatever order the records were found in.
struct FragmentBuilder<'g> {
    source: &'g Graph,
    fragment: Graph,
    selected: Vec<AnnotationRef<'g>>,
    selected_ids: HashSet<String>,
}

impl<'g> FragmentBuilder<'g> {
    fn new(source: &'g Graph, id: String) -> Self {
        let mut fragment = Graph::new(id).with_settings(source.settings().clone());
        fragment.schema_mut().copy_layer_ids_from(source.schema());
        fragment.set_source_graph_id(Some(source.id().to_string()));
        fragment.set_corpus(source.corpus().map(str::to_string));
        Self {
            source,
            fragment,
            selected: Vec::new(),
            selected_ids: HashSet::new(),
        }
    }

    /// Requested layers plus their ancestors, parents first. Unknown layer
    /// ids are ignored.
    fn wanted_layers(&self, layer_ids: &[&str]) -> Vec<&'g str> {
        let schema = self.source.schema();
        let mut wanted = BTreeSet::new();
        for &layer_id in layer_ids {
            if !schema.contains(layer_id) || layer_id == ROOT_LAYER_ID {
                continue;
            }
            wanted.insert(layer_id);
            for ancestor in schema.ancestors(layer_id) {
                if ancestor.id() != ROOT_LAYER_ID {
                    wanted.insert(ancestor.id());
                }
            }
        }
        schema
            .layers_top_down()
            .into_iter()
            .map(|layer| layer.id())
            .filter(|id| wanted.contains(id))
            .collect()
    }

    /// Add the layer's definition, and its ancestors', to the fragment schema.
    fn ensure_layer(&mut self, layer_id: &str) {
        let schema = self.source.schema();
        let Some(layer) = schema.layer(layer_id) else {
            return;
        };
        let mut line = schema.ancestors(layer_id);
        line.reverse();
        line.push(layer);
        for layer in line {
            if layer.id() != ROOT_LAYER_ID && !self.fragment.schema().contains(layer.id()) {
                self.fragment.add_layer(layer.definition());
            }
        }
    }

    /// Select the annotation and its ancestors.
    fn select(&mut self, annotation: AnnotationRef<'g>) {
        self.select_ancestors(&annotation);
        self.select_one(annotation);
    }

    fn select_ancestors(&mut self, annotation: &AnnotationRef<'g>) {
        for ancestor in annotation.ancestors().into_iter().rev() {
            self.select_one(ancestor);
        }
    }

    fn select_one(&mut self, annotation: AnnotationRef<'g>) {
        if annotation.is_graph() || !self.selected_ids.insert(annotation.id().to_string()) {
            return;
        }
        self.ensure_layer(annotation.layer_id());
        self.selected.push(annotation);
    }

    /// The fragment's id for a source parent id.
    fn fragment_parent_id(&self, parent_id: &str) -> String {
        if parent_id == self.source.id() {
            self.fragment.id().to_string()
        } else {
            parent_id.to_string()
        }
    }

    fn copy_anchors(&mut self, annotation: &AnnotationRef<'g>) -> Result<(), GraphError> {
        for anchor in [annotation.start(), annotation.end()].into_iter().flatten() {
            if self.fragment.anchor(anchor.id()).is_none() {
                self.fragment.add_anchor(anchor.copy_tracked())?;
            }
        }
        Ok(())
    }

    /// Copy the selection, parents before children and siblings in source
    /// order, with each sibling list numbered from its lowest source ordinal.
    fn finish(mut self, kind: &str) -> Result<Graph, GraphError> {
        let depth: HashMap<&str, usize> = self
            .source
            .schema()
            .layers_top_down()
            .into_iter()
            .enumerate()
            .map(|(i, layer)| (layer.id(), i))
            .collect();
        let mut selected = std::mem::take(&mut self.selected);
        selected.sort_by_key(|annotation| {
            (
                depth.get(annotation.layer_id()).copied().unwrap_or(usize::MAX),
                annotation.ordinal(),
            )
        });

        let mut minima: BTreeMap<(String, String), u32> = BTreeMap::new();
        for annotation in &selected {
            let Some(parent_id) = annotation.parent_id() else {
                continue;
            };
            if annotation.ordinal() == 0 {
                continue;
            }
            let key = (
                self.fragment_parent_id(parent_id),
                annotation.layer_id().to_string(),
            );
            minima
                .entry(key)
                .and_modify(|minimum| *minimum = (*minimum).min(annotation.ordinal()))
                .or_insert(annotation.ordinal());
        }
        for ((parent_id, layer_id), minimum) in &minima {
            self.fragment.set_ordinal_minimum(parent_id, layer_id, *minimum);
        }

        for annotation in selected {
            self.copy_anchors(&annotation)?;
            self.fragment.add_annotation(annotation.copy_tracked())?;
        }

        debug!(
            graph_id = %self.source.id(),
            fragment_id = %self.fragment.id(),
            kind,
            anchors = self.fragment.anchor_count(),
            annotations = self.fragment.annotation_count(),
            "extracted fragment"
        );
        Ok(self.fragment)
    }
}

impl Graph {
    /// Fragment of the annotations on `layer_ids` (and their ancestor
    /// layers) lying within `[start, end)`.
    ///
    /// The end bound is half-open: an annotation starting at `end` is left
    /// out, one finishing at `end` is kept.
    ///
    /// Ancestors of included annotations are always copied. Graph attribute
    /// layers among the wanted layers are copied whole. The fragment always
    /// has an anchor at `end`.
    pub fn fragment(&self, start: f64, end: f64, layer_ids: &[&str]) -> Result<Graph, GraphError> {
        let mut builder = FragmentBuilder::new(self, fragment_id(self.id(), start, end));
        for layer_id in builder.wanted_layers(layer_ids) {
            builder.ensure_layer(layer_id);
            let attribute_layer = self.schema().is_graph_attribute_layer(layer_id);
            for annotation in self.annotations_on(layer_id) {
                if attribute_layer || in_range(&annotation, start, end) {
                    builder.select(annotation);
                }
            }
        }
        let mut fragment = builder.finish("offsets")?;
        fragment.get_or_create_anchor_at(end)?;
        Ok(fragment)
    }

    /// Fragment bounded by one annotation's span.
    ///
    /// The bounding annotation's ancestors are always copied. On layers
    /// below the bounding annotation's layer only its own descendants are
    /// taken, along with all their anchors.
    pub fn fragment_of(&self, annotation_id: &str, layer_ids: &[&str]) -> Result<Graph, GraphError> {
        let bounding = self
            .annotation(annotation_id)
            .ok_or_else(|| GraphError::UnknownAnnotation(annotation_id.to_string()))?;
        let (start, end) = self.bounds_of(&[bounding])?;

        let mut builder = FragmentBuilder::new(self, fragment_id(self.id(), start, end));
        builder.select_ancestors(&bounding);
        let own_layer = bounding.layer_id();
        for layer_id in builder.wanted_layers(layer_ids) {
            builder.ensure_layer(layer_id);
            if self.schema().is_graph_attribute_layer(layer_id) {
                for annotation in self.annotations_on(layer_id) {
                    builder.select(annotation);
                }
            } else if self.schema().is_descendant(layer_id, own_layer) {
                for annotation in bounding.all(layer_id) {
                    builder.select(annotation);
                }
            } else {
                for annotation in self.annotations_on(layer_id) {
                    if in_range(&annotation, start, end) {
                        builder.select(annotation);
                    }
                }
            }
        }
        builder.finish("annotation")
    }

    /// Fragment bounded by the union of two annotations' spans.
    ///
    /// Both bounds' ancestors are always copied. When the bounds share an
    /// ancestor other than the graph, annotations on layers below it must
    /// also descend from it.
    pub fn fragment_between(
        &self,
        start_id: &str,
        end_id: &str,
        layer_ids: &[&str],
    ) -> Result<Graph, GraphError> {
        let from = self
            .annotation(start_id)
            .ok_or_else(|| GraphError::UnknownAnnotation(start_id.to_string()))?;
        let to = self
            .annotation(end_id)
            .ok_or_else(|| GraphError::UnknownAnnotation(end_id.to_string()))?;
        let (start, end) = self.bounds_of(&[from, to])?;
        let common = from
            .first_common_ancestor(&to)
            .filter(|common| !common.is_graph());

        let mut builder = FragmentBuilder::new(self, fragment_id(self.id(), start, end));
        builder.select_ancestors(&from);
        builder.select_ancestors(&to);
        for layer_id in builder.wanted_layers(layer_ids) {
            builder.ensure_layer(layer_id);
            let attribute_layer = self.schema().is_graph_attribute_layer(layer_id);
            let restrict = common.filter(|common| self.schema().is_descendant(layer_id, common.layer_id()));
            for annotation in self.annotations_on(layer_id) {
                if attribute_layer {
                    builder.select(annotation);
                    continue;
                }
                if !in_range(&annotation, start, end) {
                    continue;
                }
                if let Some(common) = restrict {
                    if !annotation.ancestors().contains(&common) {
                        continue;
                    }
                }
                builder.select(annotation);
            }
        }
        builder.finish("annotations")
    }

    /// Lowest start bound and highest end bound of the given annotations.
    fn bounds_of(&self, annotations: &[AnnotationRef<'_>]) -> Result<(f64, f64), GraphError> {
        let mut bounds: Option<(f64, f64)> = None;
        for annotation in annotations {
            let start = annotation.start().and_then(|anchor| anchor.offset_min());
            let end = annotation.end().and_then(|anchor| anchor.offset_max());
            let (Some(start), Some(end)) = (start, end) else {
                warn!(annotation_id = %annotation.id(), "fragment bound has no resolvable offsets");
                return Err(GraphError::Unanchored(annotation.id().to_string()));
            };
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(start), hi.max(end)),
                None => (start, end),
            });
        }
        bounds.ok_or_else(|| GraphError::Unanchored(self.id().to_string()))
    }

    /// Replay a fragment's tracked changes onto this graph.
    ///
    /// Created anchors and annotations get fresh ids here and references to
    /// them are remapped. Updates copy offsets, labels, anchors and parents.
    /// Destroyed annotations are destroyed here; anchors never are. With
    /// `layer_ids`, only annotations on those layers are considered.
    pub fn apply_changes_from_fragment(
        &mut self,
        fragment: &Graph,
        layer_ids: Option<&[&str]>,
    ) -> Result<(), GraphError> {
        let wanted = |layer_id: &str| layer_ids.map_or(true, |ids| ids.contains(&layer_id));
        let mut anchor_ids: HashMap<String, String> = HashMap::new();
        let mut annotation_ids: HashMap<String, String> = HashMap::from([(
            fragment.id().to_string(),
            self.id().to_string(),
        )]);

        for anchor in fragment.anchors() {
            match anchor.change() {
                Operation::Create => {
                    let id = self.add_anchor(anchor.copy_tracked().without_id())?;
                    anchor_ids.insert(anchor.id().to_string(), id);
                }
                Operation::Update => {
                    if let Some(target) = self.anchor_mut(anchor.id()) {
                        if target.offset() != anchor.offset() {
                            target.set_offset(anchor.offset());
                        }
                        if target.confidence() != anchor.confidence() {
                            target.set_confidence(anchor.confidence());
                        }
                    }
                }
                _ => {}
            }
        }
        let anchor_id = |id: &str| anchor_ids.get(id).cloned().unwrap_or_else(|| id.to_string());

        let layers = fragment.schema().layers_top_down();
        let mut created = 0;
        for layer in &layers {
            if !wanted(layer.id()) {
                continue;
            }
            for annotation in fragment.annotations() {
                if annotation.layer_id() != layer.id() || annotation.change() != Operation::Create {
                    continue;
                }
                let mut copy = annotation.copy_tracked().without_id();
                if let (Some(start), Some(end)) = (annotation.start_id(), annotation.end_id()) {
                    copy = copy.with_anchors(anchor_id(start), anchor_id(end));
                }
                if let Some(parent) = annotation.parent_id() {
                    let parent = annotation_ids
                        .get(parent)
                        .cloned()
                        .unwrap_or_else(|| parent.to_string());
                    copy = copy.with_parent(parent);
                }
                let id = self.add_annotation(copy)?;
                annotation_ids.insert(annotation.id().to_string(), id);
                created += 1;
            }
        }

        let mut updated = 0;
        for annotation in fragment.annotations() {
            if annotation.change() != Operation::Update || !wanted(annotation.layer_id()) {
                continue;
            }
            let id = annotation.id();
            let Some(target) = self.annotation_mut(id) else {
                continue;
            };
            if target.label() != annotation.label() {
                target.set_label(annotation.label());
            }
            if target.confidence() != annotation.confidence() {
                target.set_confidence(annotation.confidence());
            }
            if target.annotator() != annotation.annotator() {
                target.set_annotator(annotation.annotator().map(str::to_string));
            }
            if let Some(start) = annotation.start_id() {
                self.set_start_id(id, &anchor_id(start))?;
            }
            if let Some(end) = annotation.end_id() {
                self.set_end_id(id, &anchor_id(end))?;
            }
            if let Some(parent) = annotation.parent_id() {
                let parent = annotation_ids
                    .get(parent)
                    .cloned()
                    .unwrap_or_else(|| parent.to_string());
                self.set_parent(id, &parent)?;
            }
            updated += 1;
        }

        let mut destroyed = 0;
        for layer in layers.iter().rev() {
            if !wanted(layer.id()) {
                continue;
            }
            for annotation in fragment.annotations() {
                if annotation.layer_id() != layer.id()
                    || annotation.change() != Operation::Destroy
                    || annotation.tracking().is_created()
                {
                    continue;
                }
                let live = self
                    .annotation(annotation.id())
                    .map(|target| !target.is_destroyed())
                    .unwrap_or(false);
                if live {
                    self.destroy(annotation.id())?;
                    destroyed += 1;
                }
            }
        }

        debug!(
            graph_id = %self.id(),
            fragment_id = %fragment.id(),
            created,
            updated,
            destroyed,
            "applied fragment changes"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alignment, Anchor, Annotation, Layer, Schema};

    /// One speaker and turn over 0-5, words between consecutive anchors from
    /// 1 to 5, part-of-speech tags on the first two words and a language
    /// attribute for the whole transcript.
    fn make_graph() -> Graph {
        let schema = Schema::new()
            .with_participant_layer("who")
            .with_turn_layer("turn")
            .with_word_layer("word")
            .with_layer(Layer::new("lang", None))
            .with_layer(Layer::new("who", None).with_peers(true))
            .with_layer(Layer::new("turn", Some("who")).with_alignment(Alignment::Interval))
            .with_layer(Layer::new("word", Some("turn")).with_alignment(Alignment::Interval))
            .with_layer(Layer::new("pos", Some("word")));
        let mut graph = Graph::new("g.trs").with_schema(schema);
        for i in 0..=5 {
            graph.add_anchor(Anchor::new(format!("a{}", i), Some(i as f64))).unwrap();
        }
        graph.add_annotation(Annotation::new("lang", "en").with_id("l1")).unwrap();
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
        graph.add_annotation(Annotation::new("pos", "N").with_id("n1").with_parent("w1")).unwrap();
        graph.add_annotation(Annotation::new("pos", "V").with_id("n2").with_parent("w2")).unwrap();
        graph
    }

    /// Speaker p1 over 0-4 with turns on a layer whose peers may overlap,
    /// and words on consecutive anchors.
    fn make_turn_graph() -> Graph {
        let schema = Schema::new()
            .with_layer(Layer::new("who", None).with_peers(true))
            .with_layer(
                Layer::new("turn", Some("who"))
                    .with_alignment(Alignment::Interval)
                    .with_peers(true)
                    .with_peers_overlap(true),
            )
            .with_layer(
                Layer::new("word", Some("turn"))
                    .with_alignment(Alignment::Interval)
                    .with_peers(true),
            );
        let mut graph = Graph::new("g").with_schema(schema);
        for i in 0..=4 {
            graph.add_anchor(Anchor::new(format!("a{}", i), Some(i as f64))).unwrap();
        }
        graph
            .add_annotation(Annotation::new("who", "Ann").with_id("p1").with_anchors("a0", "a4"))
            .unwrap();
        graph
    }

    fn ordinals_on(graph: &Graph, layer_id: &str) -> Vec<(String, u32)> {
        let mut ordinals: Vec<(String, u32)> = graph
            .annotations_on(layer_id)
            .iter()
            .map(|a| (a.id().to_string(), a.ordinal()))
            .collect();
        ordinals.sort();
        ordinals
    }

    fn ids_on(graph: &Graph, layer_id: &str) -> Vec<String> {
        graph
            .annotations_on(layer_id)
            .iter()
            .map(|a| a.id().to_string())
            .collect()
    }

    #[test]
    fn test_fragment_id_round_trip() {
        let id = fragment_id("g.trs", 1.0, 2.5);
        assert_eq!(id, "g__1.000-2.500");
        assert_eq!(parse_fragment_id(&id), Some(("g".to_string(), 1.0, 2.5)));
        assert_eq!(
            parse_fragment_id("g__1.000-2.500.trs"),
            Some(("g".to_string(), 1.0, 2.5))
        );
        assert_eq!(parse_fragment_id("g.trs"), None);
    }

    #[test]
    fn test_fragment_by_offsets() {
        let graph = make_graph();
        let fragment = graph.fragment(0.0, 3.0, &["word"]).unwrap();
        assert_eq!(fragment.id(), "g__0.000-3.000");
        assert_eq!(fragment.source_graph_id(), Some("g.trs"));
        assert!(fragment.is_fragment());
        assert_eq!(ids_on(&fragment, "word"), vec!["w1", "w2"]);
        assert_eq!(ids_on(&fragment, "turn"), vec!["t1"]);
        assert_eq!(ids_on(&fragment, "who"), vec!["p1"]);
        assert!(fragment.schema().contains("turn"));
        assert!(!fragment.schema().contains("pos"));
        assert!(!fragment.schema().contains("lang"));
        assert_eq!(fragment.schema().word_layer_id.as_deref(), Some("word"));
        // a0 and a5 come with the turn and speaker
        assert_eq!(fragment.anchor_count(), 5);
    }

    #[test]
    fn test_fragment_adds_end_anchor() {
        let graph = make_graph();
        let fragment = graph.fragment(0.0, 3.5, &["word"]).unwrap();
        assert!(fragment.anchor_at(3.5).is_some());
    }

    #[test]
    fn test_fragment_keeps_source_ordinals() {
        let graph = make_graph();
        let fragment = graph.fragment(2.0, 5.0, &["word"]).unwrap();
        let ordinals: Vec<(String, u32)> = fragment
            .annotations_on("word")
            .iter()
            .map(|w| (w.id().to_string(), w.ordinal()))
            .collect();
        assert_eq!(
            ordinals,
            vec![("w2".to_string(), 2), ("w3".to_string(), 3), ("w4".to_string(), 4)]
        );
    }

    #[test]
    fn test_fragment_end_bound_is_half_open() {
        let mut graph = make_graph();
        graph.add_layer(
            Layer::new("event", Some("turn"))
                .with_alignment(Alignment::Instant)
                .with_peers(true),
        );
        for i in [2, 3] {
            graph
                .add_annotation(
                    Annotation::new("event", "click")
                        .with_id(format!("e{}", i))
                        .with_anchors(format!("a{}", i), format!("a{}", i))
                        .with_parent("t1"),
                )
                .unwrap();
        }
        let fragment = graph.fragment(0.0, 3.0, &["event", "word"]).unwrap();
        assert_eq!(ids_on(&fragment, "event"), vec!["e2"]);
        // w2 ends exactly at the bound and is kept
        assert_eq!(ids_on(&fragment, "word"), vec!["w1", "w2"]);
    }

    #[test]
    fn test_fragment_between_reversed_bounds_keeps_ordinals() {
        let mut graph = make_turn_graph();
        for (turn, start, end) in [("t1", "a0", "a2"), ("t2", "a2", "a4")] {
            graph
                .add_annotation(Annotation::new("turn", "Ann").with_id(turn).with_anchors(start, end).with_parent("p1"))
                .unwrap();
        }
        graph
            .add_annotation(Annotation::new("word", "w1").with_id("w1").with_anchors("a1", "a2").with_parent("t1"))
            .unwrap();
        graph
            .add_annotation(Annotation::new("word", "w2").with_id("w2").with_anchors("a2", "a3").with_parent("t2"))
            .unwrap();

        let fragment = graph.fragment_between("w2", "w1", &["word"]).unwrap();
        assert_eq!(fragment.id(), "g__1.000-3.000");
        assert_eq!(ordinals_on(&fragment, "turn"), ordinals_on(&graph, "turn"));
        assert_eq!(
            ordinals_on(&fragment, "turn"),
            vec![("t1".to_string(), 1), ("t2".to_string(), 2)]
        );
        assert_eq!(
            ordinals_on(&fragment, "word"),
            vec![("w1".to_string(), 1), ("w2".to_string(), 1)]
        );
    }

    #[test]
    fn test_fragment_with_overlapping_turns_keeps_ordinals() {
        let mut graph = make_turn_graph();
        graph
            .add_annotation(Annotation::new("turn", "long").with_id("ta").with_anchors("a0", "a4").with_parent("p1"))
            .unwrap();
        graph
            .add_annotation(
                Annotation::new("turn", "short")
                    .with_id("tb")
                    .with_anchors("a1", "a3")
                    .with_parent("p1")
                    .with_ordinal(1),
            )
            .unwrap();
        graph
            .add_annotation(Annotation::new("word", "x").with_id("wa").with_anchors("a0", "a1").with_parent("ta"))
            .unwrap();
        graph
            .add_annotation(Annotation::new("word", "y").with_id("wb").with_anchors("a1", "a2").with_parent("tb"))
            .unwrap();
        assert_eq!(
            ordinals_on(&graph, "turn"),
            vec![("ta".to_string(), 2), ("tb".to_string(), 1)]
        );

        let fragment = graph.fragment(0.0, 2.0, &["word"]).unwrap();
        assert_eq!(ordinals_on(&fragment, "word").len(), 2);
        assert_eq!(ordinals_on(&fragment, "turn"), ordinals_on(&graph, "turn"));
    }

    #[test]
    fn test_fragment_copies_attribute_layers_whole() {
        let graph = make_graph();
        let fragment = graph.fragment(1.0, 2.0, &["word", "lang"]).unwrap();
        assert_eq!(ids_on(&fragment, "lang"), vec!["l1"]);
        assert_eq!(ids_on(&fragment, "word"), vec!["w1"]);
    }

    #[test]
    fn test_fragment_of_annotation() {
        let graph = make_graph();
        let fragment = graph.fragment_of("w2", &["word", "pos"]).unwrap();
        assert_eq!(fragment.id(), "g__2.000-3.000");
        assert_eq!(ids_on(&fragment, "word"), vec!["w2"]);
        assert_eq!(ids_on(&fragment, "pos"), vec!["n2"]);
        assert_eq!(ids_on(&fragment, "turn"), vec!["t1"]);

        let fragment = graph.fragment_of("t1", &["pos"]).unwrap();
        assert_eq!(ids_on(&fragment, "pos"), vec!["n1", "n2"]);
    }

    #[test]
    fn test_fragment_of_requires_known_anchored_bound() {
        let mut graph = make_graph();
        assert_eq!(
            graph.fragment_of("nope", &["word"]).unwrap_err(),
            GraphError::UnknownAnnotation("nope".to_string())
        );
        graph.add_anchor(Anchor::new("x0", None)).unwrap();
        graph.add_anchor(Anchor::new("x1", None)).unwrap();
        graph
            .add_annotation(Annotation::new("turn", "?").with_id("t9").with_anchors("x0", "x1").with_parent("p1"))
            .unwrap();
        assert_eq!(
            graph.fragment_of("t9", &["word"]).unwrap_err(),
            GraphError::Unanchored("t9".to_string())
        );
    }

    #[test]
    fn test_fragment_between_annotations() {
        let graph = make_graph();
        let fragment = graph.fragment_between("w1", "w3", &["word"]).unwrap();
        assert_eq!(fragment.id(), "g__1.000-4.000");
        assert_eq!(ids_on(&fragment, "word"), vec!["w1", "w2", "w3"]);
    }

    #[test]
    fn test_apply_changes_from_fragment() {
        let mut graph = make_graph();
        let mut fragment = graph.fragment(0.0, 3.0, &["word"]).unwrap();
        fragment.track_changes();
        fragment.annotation_mut("w1").unwrap().set_label("hello");
        fragment.destroy("w2").unwrap();
        let middle = fragment.add_anchor(Anchor::at(2.5)).unwrap();
        fragment
            .add_annotation(Annotation::new("word", "new").with_anchors("a2", &middle).with_parent("t1"))
            .unwrap();

        graph.apply_changes_from_fragment(&fragment, None).unwrap();
        let labels: Vec<String> = graph
            .annotation("t1")
            .unwrap()
            .children("word")
            .iter()
            .map(|w| w.label().to_string())
            .collect();
        assert_eq!(labels, vec!["hello", "new", "w3", "w4"]);
        let new_word = graph.annotation("t1").unwrap().children("word")[1];
        assert_eq!(new_word.end_offset(), Some(2.5));
        assert!(graph.annotation("w2").unwrap().is_destroyed());
    }

    #[test]
    fn test_apply_changes_respects_layer_filter() {
        let mut graph = make_graph();
        let mut fragment = graph.fragment(0.0, 3.0, &["word"]).unwrap();
        fragment.track_changes();
        fragment.annotation_mut("w1").unwrap().set_label("hello");
        fragment.annotation_mut("t1").unwrap().set_label("Bob");

        graph.apply_changes_from_fragment(&fragment, Some(&["turn"][..])).unwrap();
        assert_eq!(graph.annotation("w1").unwrap().label(), "w1");
        assert_eq!(graph.annotation("t1").unwrap().label(), "Bob");
    }
}

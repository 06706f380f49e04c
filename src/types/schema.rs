//! Schema: the layer hierarchy of a graph.
//!
//! Layers form a tree rooted at the implicit `"graph"` layer. A layer may be
//! added before its declared parent; it is linked as soon as the parent
//! arrives. Child layers keep insertion order.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use super::layer::{Alignment, Layer};

/// Id of the implicit root layer.
pub const ROOT_LAYER_ID: &str = "graph";

/// The set of layers of a graph plus the ids of distinguished layers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    layers: BTreeMap<String, Layer>,
    order: Vec<String>,
    /// Layer of speaker annotations.
    pub participant_layer_id: Option<String>,
    /// Layer of speaker turns.
    pub turn_layer_id: Option<String>,
    /// Layer of utterance (line) annotations.
    pub utterance_layer_id: Option<String>,
    /// Layer of word tokens.
    pub word_layer_id: Option<String>,
    /// Layer of episode attributes.
    pub episode_layer_id: Option<String>,
    /// Layer of corpus attributes.
    pub corpus_layer_id: Option<String>,
    #[serde(skip)]
    pending: BTreeMap<String, Vec<String>>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Create a schema containing only the root layer.
    pub fn new() -> Self {
        let root = Layer::new(ROOT_LAYER_ID, None)
            .with_description("The graph itself")
            .with_alignment(Alignment::Interval)
            .with_peers(false)
            .with_peers_overlap(false)
            .with_saturated(true);
        let mut layers = BTreeMap::new();
        layers.insert(ROOT_LAYER_ID.to_string(), root);
        Self {
            layers,
            order: vec![ROOT_LAYER_ID.to_string()],
            participant_layer_id: None,
            turn_layer_id: None,
            utterance_layer_id: None,
            word_layer_id: None,
            episode_layer_id: None,
            corpus_layer_id: None,
            pending: BTreeMap::new(),
        }
    }

    /// Set the participant layer id.
    pub fn with_participant_layer(mut self, id: impl Into<String>) -> Self {
        self.participant_layer_id = Some(id.into());
        self
    }

    /// Set the turn layer id.
    pub fn with_turn_layer(mut self, id: impl Into<String>) -> Self {
        self.turn_layer_id = Some(id.into());
        self
    }

    /// Set the utterance layer id.
    pub fn with_utterance_layer(mut self, id: impl Into<String>) -> Self {
        self.utterance_layer_id = Some(id.into());
        self
    }

    /// Set the word layer id.
    pub fn with_word_layer(mut self, id: impl Into<String>) -> Self {
        self.word_layer_id = Some(id.into());
        self
    }

    /// Add a layer, builder style.
    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.add_layer(layer);
        self
    }

    /// The root layer.
    pub fn root(&self) -> &Layer {
        // The root is inserted by the constructor and never removed.
        &self.layers[ROOT_LAYER_ID]
    }

    /// Add a layer. Returns false, leaving the existing layer in place, if
    /// the id is already present.
    ///
    /// A layer without a parent id becomes a child of the root.
    pub fn add_layer(&mut self, mut layer: Layer) -> bool {
        if self.layers.contains_key(layer.id()) {
            return false;
        }
        let id = layer.id().to_string();
        if layer.parent_id().is_none() {
            layer.set_parent_id(Some(ROOT_LAYER_ID.to_string()));
        }
        layer.children.clear();
        if let Some(waiting) = self.pending.remove(&id) {
            layer.children.extend(waiting);
        }
        if let Some(parent_id) = layer.parent_id().map(str::to_string) {
            match self.layers.get_mut(&parent_id) {
                Some(parent) => parent.children.push(id.clone()),
                None => self.pending.entry(parent_id).or_default().push(id.clone()),
            }
        }
        self.layers.insert(id.clone(), layer);
        self.order.push(id);
        true
    }

    /// Look up a layer.
    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.get(id)
    }

    /// Edit a layer's constraints and descriptive fields in place.
    ///
    /// The layer keeps its id, parent and child links whatever the edit
    /// does; the hierarchy only changes by adding layers. Returns `None` if
    /// the layer is unknown.
    pub fn edit_layer<R>(&mut self, id: &str, edit: impl FnOnce(&mut Layer) -> R) -> Option<R> {
        let layer = self.layers.get_mut(id)?;
        let parent_id = layer.parent_id().map(str::to_string);
        let children = std::mem::take(&mut layer.children);
        let result = edit(layer);
        layer.restore_links(id, parent_id, children);
        Some(result)
    }

    /// Whether the layer exists.
    pub fn contains(&self, id: &str) -> bool {
        self.layers.contains_key(id)
    }

    /// All layers, in the order they were added (root first).
    pub fn layers(&self) -> impl Iterator<Item = &Layer> + '_ {
        self.order.iter().filter_map(move |id| self.layers.get(id))
    }

    /// Number of layers, including the root.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether only the root layer exists.
    pub fn is_empty(&self) -> bool {
        self.layers.len() <= 1
    }

    /// Linked parent layer.
    pub fn parent(&self, id: &str) -> Option<&Layer> {
        let parent_id = self.layers.get(id)?.parent_id()?;
        self.layers.get(parent_id)
    }

    /// Linked child layers, in insertion order.
    pub fn children(&self, id: &str) -> Vec<&Layer> {
        self.layers
            .get(id)
            .map(|layer| {
                layer
                    .child_ids()
                    .iter()
                    .filter_map(|child| self.layers.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ancestor layers, nearest first, ending with the root if linked.
    pub fn ancestors(&self, id: &str) -> Vec<&Layer> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.parent(id);
        while let Some(layer) = current {
            if !seen.insert(layer.id()) {
                break;
            }
            ancestors.push(layer);
            current = self.parent(layer.id());
        }
        ancestors
    }

    /// Whether `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        self.ancestors(id).iter().any(|layer| layer.id() == ancestor)
    }

    /// Whether `descendant` is a strict descendant of `id`.
    pub fn is_descendant(&self, descendant: &str, id: &str) -> bool {
        self.is_ancestor(id, descendant)
    }

    /// Nearest layer that is `a` or an ancestor of `a`, and also `b` or an
    /// ancestor of `b`.
    pub fn first_common_ancestor(&self, a: &str, b: &str) -> Option<&Layer> {
        let b_line: HashSet<&str> = std::iter::once(b)
            .chain(self.ancestors(b).into_iter().map(Layer::id))
            .collect();
        let a_layer = self.layers.get(a)?;
        self.layers.get(b)?;
        std::iter::once(a_layer)
            .chain(self.ancestors(a))
            .find(|layer| b_line.contains(layer.id()))
    }

    /// Whether a layer sits directly under the root.
    pub fn is_top_level(&self, id: &str) -> bool {
        self.layers
            .get(id)
            .and_then(Layer::parent_id)
            .map(|parent| parent == ROOT_LAYER_ID)
            .unwrap_or(false)
    }

    /// Whether a layer holds graph-level attributes: top-level, unaligned,
    /// and not the participant layer.
    pub fn is_graph_attribute_layer(&self, id: &str) -> bool {
        self.is_top_level(id)
            && self
                .layers
                .get(id)
                .map(|layer| !layer.alignment().is_aligned())
                .unwrap_or(false)
            && self.participant_layer_id.as_deref() != Some(id)
    }

    /// Linked layers in pre-order (parents before children).
    pub fn layers_top_down(&self) -> Vec<&Layer> {
        let mut result = Vec::new();
        self.walk(ROOT_LAYER_ID, &mut |layer| result.push(layer), &mut |_| {});
        result
    }

    /// Linked layers in post-order (children before parents).
    pub fn layers_bottom_up(&self) -> Vec<&Layer> {
        let mut result = Vec::new();
        self.walk(ROOT_LAYER_ID, &mut |_| {}, &mut |layer| result.push(layer));
        result
    }

    fn walk<'s>(
        &'s self,
        id: &str,
        pre: &mut dyn FnMut(&'s Layer),
        post: &mut dyn FnMut(&'s Layer),
    ) {
        let Some(layer) = self.layers.get(id) else {
            return;
        };
        pre(layer);
        for child in layer.child_ids() {
            self.walk(child, pre, post);
        }
        post(layer);
    }

    /// Copy the distinguished layer ids from another schema.
    pub fn copy_layer_ids_from(&mut self, other: &Schema) {
        self.participant_layer_id = other.participant_layer_id.clone();
        self.turn_layer_id = other.turn_layer_id.clone();
        self.utterance_layer_id = other.utterance_layer_id.clone();
        self.word_layer_id = other.word_layer_id.clone();
        self.episode_layer_id = other.episode_layer_id.clone();
        self.corpus_layer_id = other.corpus_layer_id.clone();
    }

    /// Ids of layers still waiting for their parent.
    pub fn unlinked_layer_ids(&self) -> Vec<&str> {
        self.pending
            .values()
            .flat_map(|ids| ids.iter().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(layers: Vec<&Layer>) -> Vec<&str> {
        layers.into_iter().map(Layer::id).collect()
    }

    fn make_schema() -> Schema {
        Schema::new()
            .with_layer(Layer::new("who", None).with_peers(true))
            .with_layer(Layer::new("turn", Some("who")).with_alignment(Alignment::Interval))
            .with_layer(Layer::new("utterance", Some("turn")).with_alignment(Alignment::Interval))
            .with_layer(Layer::new("word", Some("turn")).with_alignment(Alignment::Interval))
            .with_layer(Layer::new("phone", Some("word")).with_alignment(Alignment::Interval))
            .with_layer(Layer::new("pos", Some("word")))
            .with_layer(Layer::new("topic", None).with_alignment(Alignment::Interval))
    }

    #[test]
    fn test_top_down_and_bottom_up() {
        let schema = make_schema();
        assert_eq!(
            ids(schema.layers_top_down()),
            vec!["graph", "who", "turn", "utterance", "word", "phone", "pos", "topic"]
        );
        assert_eq!(
            ids(schema.layers_bottom_up()),
            vec!["utterance", "phone", "pos", "word", "turn", "who", "topic", "graph"]
        );
    }

    #[test]
    fn test_late_parent_binding() {
        let mut schema = Schema::new();
        assert!(schema.add_layer(Layer::new("phone", Some("word"))));
        assert!(schema.parent("phone").is_none());
        assert_eq!(schema.unlinked_layer_ids(), vec!["phone"]);

        schema.add_layer(Layer::new("word", None));
        assert_eq!(schema.parent("phone").map(Layer::id), Some("word"));
        assert_eq!(ids(schema.children("word")), vec!["phone"]);
        assert!(schema.unlinked_layer_ids().is_empty());
        assert_eq!(ids(schema.ancestors("phone")), vec!["word", "graph"]);
    }

    #[test]
    fn test_readding_layer_is_noop() {
        let mut schema = make_schema();
        let added = schema.add_layer(Layer::new("word", Some("who")).with_description("other"));
        assert!(!added);
        assert_eq!(schema.layer("word").and_then(Layer::parent_id), Some("turn"));
        assert_eq!(schema.layer("word").and_then(Layer::description), None);
    }

    #[test]
    fn test_edit_layer_keeps_hierarchy() {
        let mut schema = make_schema();
        let edited = schema.edit_layer("word", |layer| {
            layer.set_description(Some("Orthographic words".to_string()));
            *layer = Layer::new("token", Some("who")).with_peers(true);
        });
        assert_eq!(edited, Some(()));

        let word = schema.layer("word").unwrap();
        assert_eq!(word.id(), "word");
        assert!(word.peers());
        assert_eq!(word.parent_id(), Some("turn"));
        assert_eq!(ids(schema.children("word")), vec!["phone", "pos"]);
        assert_eq!(ids(schema.children("who")), vec!["turn"]);
        assert!(schema.layer("token").is_none());
        assert!(schema.edit_layer("missing", |layer| layer.set_peers(true)).is_none());
    }

    #[test]
    fn test_common_ancestors() {
        let schema = make_schema();
        assert_eq!(schema.first_common_ancestor("phone", "utterance").map(Layer::id), Some("turn"));
        assert_eq!(schema.first_common_ancestor("word", "phone").map(Layer::id), Some("word"));
        assert_eq!(schema.first_common_ancestor("phone", "topic").map(Layer::id), Some("graph"));
        assert!(schema.first_common_ancestor("phone", "missing").is_none());
        assert!(schema.is_ancestor("who", "phone"));
        assert!(schema.is_descendant("pos", "turn"));
        assert!(!schema.is_ancestor("phone", "phone"));
    }

    #[test]
    fn test_graph_attribute_layers() {
        let schema = make_schema()
            .with_participant_layer("who")
            .with_layer(Layer::new("transcript_language", None));
        assert!(schema.is_graph_attribute_layer("transcript_language"));
        assert!(!schema.is_graph_attribute_layer("who"));
        assert!(!schema.is_graph_attribute_layer("topic"));
        assert!(!schema.is_graph_attribute_layer("pos"));
    }
}

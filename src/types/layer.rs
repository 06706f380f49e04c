//! Layer definitions: one tier of the annotation hierarchy.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::tracking::{RecordKind, TrackedRecord, Tracking};

const TRACKED_KEYS: &[&str] = &[
    "description",
    "alignment",
    "peers",
    "peersOverlap",
    "parentIncludes",
    "saturated",
];

/// How annotations on a layer relate to the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Alignment {
    /// Tags that share their parent's anchors.
    #[default]
    None,
    /// Instants: start and end are the same anchor.
    Instant,
    /// Intervals with their own start and end anchors.
    Interval,
}

impl Alignment {
    /// Numeric code used in interchange documents.
    pub fn code(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Instant => 1,
            Self::Interval => 2,
        }
    }

    /// Parse a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Instant),
            2 => Some(Self::Interval),
            _ => None,
        }
    }

    /// Whether annotations have their own anchors.
    pub fn is_aligned(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Instant => write!(f, "instant"),
            Self::Interval => write!(f, "interval"),
        }
    }
}

impl Serialize for Alignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Alignment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid alignment {}", code)))
    }
}

/// A tier definition: structural constraints plus its place in the hierarchy.
///
/// Layers are schema nodes, not graph data. Equality uses only the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    alignment: Alignment,
    #[serde(default)]
    peers: bool,
    #[serde(default)]
    peers_overlap: bool,
    #[serde(default)]
    parent_includes: bool,
    #[serde(default)]
    saturated: bool,
    #[serde(default)]
    parent_id: Option<String>,
    /// Data type of labels, e.g. `"string"` or `"number"`.
    #[serde(default, rename = "type")]
    pub layer_type: Option<String>,
    /// Grouping category for display.
    #[serde(default)]
    pub category: Option<String>,
    /// Permitted labels with their descriptions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub valid_labels: BTreeMap<String, String>,
    #[serde(skip)]
    pub(crate) children: Vec<String>,
    #[serde(skip)]
    tracking: Tracking,
}

impl Layer {
    /// Create an unaligned layer with the given id and parent.
    ///
    /// Defaults: no peers, peers don't overlap, parent includes, not saturated.
    pub fn new(id: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            description: None,
            alignment: Alignment::None,
            peers: false,
            peers_overlap: false,
            parent_includes: true,
            saturated: false,
            parent_id: parent_id.map(str::to_string),
            layer_type: None,
            category: None,
            valid_labels: BTreeMap::new(),
            children: Vec::new(),
            tracking: Tracking::default(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the alignment.
    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set whether peers are allowed.
    pub fn with_peers(mut self, peers: bool) -> Self {
        self.peers = peers;
        self
    }

    /// Set whether peers may overlap.
    pub fn with_peers_overlap(mut self, peers_overlap: bool) -> Self {
        self.peers_overlap = peers_overlap;
        self
    }

    /// Set whether children must fall within their parent.
    pub fn with_parent_includes(mut self, parent_includes: bool) -> Self {
        self.parent_includes = parent_includes;
        self
    }

    /// Set whether children must cover their parent without gaps.
    pub fn with_saturated(mut self, saturated: bool) -> Self {
        self.saturated = saturated;
        self
    }

    /// Set the label data type.
    pub fn with_type(mut self, layer_type: impl Into<String>) -> Self {
        self.layer_type = Some(layer_type.into());
        self
    }

    /// Layer id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared parent layer id.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<String>) {
        self.parent_id = parent_id;
    }

    /// Put back the id and hierarchy links a schema holds the layer under.
    pub(crate) fn restore_links(&mut self, id: &str, parent_id: Option<String>, children: Vec<String>) {
        self.id = id.to_string();
        self.parent_id = parent_id;
        self.children = children;
    }

    /// Ids of linked child layers, in insertion order.
    pub fn child_ids(&self) -> &[String] {
        &self.children
    }

    /// Description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Alignment.
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Whether several annotations may share a parent.
    pub fn peers(&self) -> bool {
        self.peers
    }

    /// Whether peers may overlap in time.
    pub fn peers_overlap(&self) -> bool {
        self.peers_overlap
    }

    /// Whether children fall within their parent's interval.
    pub fn parent_includes(&self) -> bool {
        self.parent_includes
    }

    /// Whether children jointly cover the parent with no gaps.
    pub fn saturated(&self) -> bool {
        self.saturated
    }

    /// Change the description.
    pub fn set_description(&mut self, description: Option<String>) {
        self.note_change("description", &json!(self.description), &json!(description));
        self.description = description;
    }

    /// Change the alignment.
    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.note_change("alignment", &json!(self.alignment), &json!(alignment));
        self.alignment = alignment;
    }

    /// Change whether peers are allowed.
    pub fn set_peers(&mut self, peers: bool) {
        self.note_change("peers", &json!(self.peers), &json!(peers));
        self.peers = peers;
    }

    /// Change whether peers may overlap.
    pub fn set_peers_overlap(&mut self, peers_overlap: bool) {
        self.note_change("peersOverlap", &json!(self.peers_overlap), &json!(peers_overlap));
        self.peers_overlap = peers_overlap;
    }

    /// Change whether children fall within their parent.
    pub fn set_parent_includes(&mut self, parent_includes: bool) {
        self.note_change("parentIncludes", &json!(self.parent_includes), &json!(parent_includes));
        self.parent_includes = parent_includes;
    }

    /// Change saturation.
    pub fn set_saturated(&mut self, saturated: bool) {
        self.note_change("saturated", &json!(self.saturated), &json!(saturated));
        self.saturated = saturated;
    }

    /// Copy of the definition without hierarchy links or tracking state.
    pub fn definition(&self) -> Self {
        let mut copy = self.clone();
        copy.children.clear();
        copy.tracking = Tracking::default();
        copy
    }
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Layer {}

impl Hash for Layer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl TrackedRecord for Layer {
    fn kind(&self) -> RecordKind {
        RecordKind::Layer
    }

    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn tracked_keys(&self) -> &'static [&'static str] {
        TRACKED_KEYS
    }

    fn tracked_value(&self, key: &str) -> Value {
        match key {
            "description" => json!(self.description),
            "alignment" => json!(self.alignment),
            "peers" => json!(self.peers),
            "peersOverlap" => json!(self.peers_overlap),
            "parentIncludes" => json!(self.parent_includes),
            "saturated" => json!(self.saturated),
            _ => Value::Null,
        }
    }

    fn restore_tracked(&mut self, key: &str, value: Value) {
        match key {
            "description" => self.description = value.as_str().map(str::to_string),
            "alignment" => {
                self.alignment = value
                    .as_u64()
                    .and_then(|code| u8::try_from(code).ok())
                    .and_then(Alignment::from_code)
                    .unwrap_or_default()
            }
            "peers" => self.peers = value.as_bool().unwrap_or_default(),
            "peersOverlap" => self.peers_overlap = value.as_bool().unwrap_or_default(),
            "parentIncludes" => self.parent_includes = value.as_bool().unwrap_or_default(),
            "saturated" => self.saturated = value.as_bool().unwrap_or_default(),
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

    #[test]
    fn test_alignment_serializes_as_code() {
        assert_eq!(serde_json::to_value(Alignment::Interval).unwrap(), json!(2));
        let parsed: Alignment = serde_json::from_value(json!(1)).unwrap();
        assert_eq!(parsed, Alignment::Instant);
        assert!(serde_json::from_value::<Alignment>(json!(7)).is_err());
    }

    #[test]
    fn test_layer_json_shape() {
        let layer = Layer::new("word", Some("turn"))
            .with_alignment(Alignment::Interval)
            .with_peers(true)
            .with_type("string");
        let doc = serde_json::to_value(&layer).unwrap();
        assert_eq!(doc["parentId"], json!("turn"));
        assert_eq!(doc["alignment"], json!(2));
        assert_eq!(doc["type"], json!("string"));
        assert!(doc.get("children").is_none());
    }

    #[test]
    fn test_layer_change_tracking() {
        let mut layer = Layer::new("pos", Some("word"));
        layer.attach_tracker();
        layer.set_alignment(Alignment::Interval);
        layer.set_peers(true);
        assert_eq!(layer.change(), Operation::Update);
        assert_eq!(layer.changes().len(), 2);

        layer.rollback();
        assert_eq!(layer.alignment(), Alignment::None);
        assert!(!layer.peers());
    }
}

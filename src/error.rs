//! Error types.
//!
//! Lookups never error: a missing anchor, annotation or layer comes back as
//! `None` or an empty list. [`GraphError`] is reserved for operations whose
//! contract requires valid input. [`ValidationError`] reports a structural
//! problem found by [`Graph::validate`](crate::Graph::validate); its
//! [`repair`](ValidationError::repair) is only ever a suggestion.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors from graph operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// A record with this id is already in the graph.
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// The annotation is not in the graph.
    #[error("Annotation not found: {0}")]
    UnknownAnnotation(String),

    /// The anchor is not in the graph.
    #[error("Anchor not found: {0}")]
    UnknownAnchor(String),

    /// The layer is not in the schema.
    #[error("Layer not found: {0}")]
    UnknownLayer(String),

    /// The anchor is still the start or end of a live annotation.
    #[error("Anchor {anchor_id} is still linked to annotation {annotation_id}")]
    AnchorInUse {
        /// The anchor that was to be destroyed.
        anchor_id: String,
        /// An annotation still using it.
        annotation_id: String,
    },

    /// No annotation on the required parent layer could be found.
    #[error("No parent on layer {parent_layer_id} for a new annotation on {layer_id}")]
    NoParent {
        /// Layer of the annotation being created.
        layer_id: String,
        /// Layer the parent should be on.
        parent_layer_id: String,
    },

    /// The annotation's offsets cannot be resolved.
    #[error("Annotation {0} has no resolvable offsets")]
    Unanchored(String),

    /// An interchange document could not be read.
    #[error("Malformed document: {0}")]
    Malformed(String),

    /// A structural invariant is violated.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A structural invariant violation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// An interval's end anchor is earlier than its start anchor.
    #[error("Annotation {annotation_id} ends ({end}) before it starts ({start})")]
    ReversedAnchors {
        /// The offending annotation.
        annotation_id: String,
        /// Start offset.
        start: f64,
        /// End offset.
        end: f64,
    },

    /// An annotation links to an anchor that is not in the graph.
    #[error("Annotation {annotation_id} links to missing anchor {anchor_id}")]
    MissingAnchor {
        /// The offending annotation.
        annotation_id: String,
        /// The unresolved anchor id.
        anchor_id: String,
    },

    /// An annotation is on a layer that is not in the schema.
    #[error("Annotation {annotation_id} is on unknown layer {layer_id}")]
    UnknownLayer {
        /// The offending annotation.
        annotation_id: String,
        /// The unknown layer id.
        layer_id: String,
    },

    /// An annotation's parent is not in the graph.
    #[error("Annotation {annotation_id} has no parent in the graph (parent id {parent_id:?})")]
    Orphan {
        /// The offending annotation.
        annotation_id: String,
        /// Its declared parent id.
        parent_id: Option<String>,
    },

    /// An annotation on an instant layer has different start and end anchors.
    #[error("Annotation {annotation_id} on instant layer {layer_id} is not instantaneous")]
    NotInstantaneous {
        /// The offending annotation.
        annotation_id: String,
        /// Its layer.
        layer_id: String,
    },

    /// A parent has more than one child on a layer that does not allow peers.
    #[error("Annotation {annotation_id} is an extra child of {parent_id} on layer {layer_id}, which has no peers")]
    TooManyPeers {
        /// A child after the first.
        annotation_id: String,
        /// The shared parent.
        parent_id: String,
        /// The layer without peers.
        layer_id: String,
    },

    /// An annotation starts before its previous peer ends on a layer whose
    /// peers must not overlap.
    #[error("Annotation {annotation_id} overlaps its previous peer {previous_id}")]
    OverlappingPeers {
        /// The later of the two peers.
        annotation_id: String,
        /// The peer it overlaps.
        previous_id: String,
        /// The previous peer's end anchor, when starting there keeps the
        /// annotation forward.
        join_at: Option<String>,
    },

    /// An annotation extends beyond its parent on a layer whose parent
    /// includes its children.
    #[error("Annotation {annotation_id} extends beyond its parent {parent_id}")]
    OutsideParent {
        /// The offending annotation.
        annotation_id: String,
        /// Its parent.
        parent_id: String,
    },

    /// On a saturated layer, an annotation does not start where its previous
    /// peer ends or, for the first child, where its parent starts.
    #[error("Annotation {annotation_id} leaves a gap or overhang at its start")]
    UncoveredStart {
        /// The offending annotation.
        annotation_id: String,
        /// Anchor the annotation should start at, when starting there keeps
        /// it forward.
        join_at: Option<String>,
    },

    /// On a saturated layer, the last child does not end where its parent
    /// ends.
    #[error("Annotation {annotation_id} leaves a gap or overhang at the end of its parent")]
    UncoveredEnd {
        /// The last child.
        annotation_id: String,
        /// Anchor the annotation should end at, when ending there keeps it
        /// forward.
        join_at: Option<String>,
    },
}

impl ValidationError {
    /// Id of the annotation the problem was found on.
    pub fn annotation_id(&self) -> &str {
        match self {
            Self::ReversedAnchors { annotation_id, .. }
            | Self::MissingAnchor { annotation_id, .. }
            | Self::UnknownLayer { annotation_id, .. }
            | Self::Orphan { annotation_id, .. }
            | Self::NotInstantaneous { annotation_id, .. }
            | Self::TooManyPeers { annotation_id, .. }
            | Self::OverlappingPeers { annotation_id, .. }
            | Self::OutsideParent { annotation_id, .. }
            | Self::UncoveredStart { annotation_id, .. }
            | Self::UncoveredEnd { annotation_id, .. } => annotation_id,
        }
    }

    /// A suggested fix, if one exists. Never applied automatically; pass it
    /// to [`Graph::apply_repair`](crate::Graph::apply_repair) to accept it.
    pub fn repair(&self) -> Option<Repair> {
        match self {
            Self::ReversedAnchors { annotation_id, .. } => Some(Repair::SwapAnchors {
                annotation_id: annotation_id.clone(),
            }),
            Self::NotInstantaneous { annotation_id, .. } => Some(Repair::CollapseToStart {
                annotation_id: annotation_id.clone(),
            }),
            Self::Orphan { annotation_id, .. } => Some(Repair::Destroy {
                annotation_id: annotation_id.clone(),
            }),
            Self::OverlappingPeers { annotation_id, join_at, .. }
            | Self::UncoveredStart { annotation_id, join_at } => {
                join_at.as_ref().map(|anchor_id| Repair::SetStart {
                    annotation_id: annotation_id.clone(),
                    anchor_id: anchor_id.clone(),
                })
            }
            Self::UncoveredEnd { annotation_id, join_at } => {
                join_at.as_ref().map(|anchor_id| Repair::SetEnd {
                    annotation_id: annotation_id.clone(),
                    anchor_id: anchor_id.clone(),
                })
            }
            Self::MissingAnchor { .. }
            | Self::UnknownLayer { .. }
            | Self::TooManyPeers { .. }
            | Self::OutsideParent { .. } => None,
        }
    }
}

/// A suggested structural fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repair {
    /// Exchange the start and end anchors.
    SwapAnchors {
        /// Annotation to fix.
        annotation_id: String,
    },
    /// Make the end anchor the same as the start anchor.
    CollapseToStart {
        /// Annotation to fix.
        annotation_id: String,
    },
    /// Mark the annotation destroyed.
    Destroy {
        /// Annotation to fix.
        annotation_id: String,
    },
    /// Move the start to another anchor.
    SetStart {
        /// Annotation to fix.
        annotation_id: String,
        /// New start anchor.
        anchor_id: String,
    },
    /// Move the end to another anchor.
    SetEnd {
        /// Annotation to fix.
        annotation_id: String,
        /// New end anchor.
        anchor_id: String,
    },
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SwapAnchors { annotation_id } => write!(f, "swap anchors of {}", annotation_id),
            Self::CollapseToStart { annotation_id } => {
                write!(f, "collapse {} to its start anchor", annotation_id)
            }
            Self::Destroy { annotation_id } => write!(f, "destroy {}", annotation_id),
            Self::SetStart { annotation_id, anchor_id } => {
                write!(f, "start {} at {}", annotation_id, anchor_id)
            }
            Self::SetEnd { annotation_id, anchor_id } => {
                write!(f, "end {} at {}", annotation_id, anchor_id)
            }
        }
    }
}

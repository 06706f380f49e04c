//! # annotation-graph
//!
//! In-memory, change-tracked annotation graphs for time-aligned linguistic
//! transcripts.
//!
//! A graph holds **anchors** (points in time, possibly with unknown offsets)
//! and **annotations** (labelled spans between two anchors) arranged in a
//! **schema** of layers: participants contain turns, turns contain words,
//! words carry tags, and so on.
//!
//! ## Architecture
//!
//! ```text
//! Schema (layers) ──┐
//!                   ▼
//! Anchors ◄── Annotations ──► parent/children by layer
//!                   │
//!                   ▼
//!       ChangeTracker → ordered changeset
//! ```
//!
//! ## Guarantees
//!
//! - Siblings on a layer are numbered 1..N (or from a declared minimum) in
//!   time order, and renumbered on every add, move or destroy
//! - Back links never go stale: relinking an anchor or parent updates the
//!   indexes immediately
//! - A changeset creates parents before children and anchors before the
//!   annotations using them, and destroys children before parents
//! - Rollback restores a state with the same [`graph_fingerprint`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod error;
pub mod graph;
pub mod settings;
pub mod tracking;
pub mod types;

// Re-exports
pub use canonical::{graph_fingerprint, graph_fingerprint_hex};
pub use error::{GraphError, Repair, ValidationError};
pub use graph::{fragment_id, parse_fragment_id, AnchorRef, AnnotationRef, Graph};
pub use settings::GraphSettings;
pub use tracking::{Change, ChangeTracker, Operation, RecordKind, TrackedRecord, Tracking};
pub use types::schema::ROOT_LAYER_ID;
pub use types::{Alignment, Anchor, Annotation, Layer, Schema};

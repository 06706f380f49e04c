//! Canonical serialization and fingerprints of graph state.
//!
//! A fingerprint covers what a reader of the graph can observe: anchor ids
//! and offsets, annotation ids, labels, layers, links and ordinals. Records
//! marked destroyed and change-tracking bookkeeping are left out, so a graph
//! that is rolled back fingerprints the same as before the edits.
//!
//! ## Determinism Guarantees
//!
//! - Records are visited in id order
//! - Struct fields serialize in declaration order
//! - No HashMap in hashed data

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::graph::Graph;
use crate::tracking::{Operation, TrackedRecord};

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Compute the canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    Ok(xxh64(&to_canonical_bytes(value)?, 0))
}

#[derive(Serialize)]
struct AnchorState<'a> {
    id: &'a str,
    offset: Option<f64>,
    confidence: Option<i32>,
}

#[derive(Serialize)]
struct AnnotationState<'a> {
    id: &'a str,
    layer_id: &'a str,
    label: &'a str,
    start_id: Option<&'a str>,
    end_id: Option<&'a str>,
    parent_id: Option<&'a str>,
    ordinal: u32,
}

#[derive(Serialize)]
struct GraphState<'a> {
    id: &'a str,
    anchors: Vec<AnchorState<'a>>,
    annotations: Vec<AnnotationState<'a>>,
}

fn graph_state(graph: &Graph) -> GraphState<'_> {
    let anchors = graph
        .anchors()
        .filter(|anchor| anchor.change() != Operation::Destroy)
        .map(|anchor| AnchorState {
            id: anchor.id(),
            offset: anchor.record().offset(),
            confidence: anchor.record().confidence(),
        })
        .collect();
    let annotations = graph
        .annotations()
        .filter(|annotation| !annotation.is_destroyed())
        .map(|annotation| {
            let record = annotation.record();
            AnnotationState {
                id: annotation.id(),
                layer_id: record.layer_id(),
                label: record.label(),
                start_id: record.start_id(),
                end_id: record.end_id(),
                parent_id: record.parent_id(),
                ordinal: record.ordinal(),
            }
        })
        .collect();
    GraphState {
        id: graph.id(),
        anchors,
        annotations,
    }
}

/// Fingerprint of the graph's live records.
pub fn graph_fingerprint(graph: &Graph) -> u64 {
    // Strings, numbers and options only: serialization cannot fail.
    canonical_hash(&graph_state(graph)).unwrap_or_default()
}

/// Fingerprint as a 16-digit hex string.
pub fn graph_fingerprint_hex(graph: &Graph) -> String {
    format!("{:016x}", graph_fingerprint(graph))
}

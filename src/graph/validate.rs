//! Structural validation.
//!
//! Problems are reported, never fixed behind the caller's back. Each
//! [`ValidationError`] may suggest a [`Repair`] which the caller can apply
//! with [`Graph::apply_repair`].

use tracing::debug;

use super::{AnchorRef, AnnotationRef, Graph};
use crate::error::{GraphError, Repair, ValidationError};
use crate::types::{Alignment, Layer};

/// Whether two anchors are known to sit at different offsets.
fn apart(a: &AnchorRef<'_>, b: &AnchorRef<'_>) -> bool {
    a.id() != b.id() && matches!((a.offset(), b.offset()), (Some(x), Some(y)) if x != y)
}

/// The anchor's id, if it is not after `limit`.
fn join_at(anchor: &AnchorRef<'_>, limit: Option<f64>) -> Option<String> {
    match (anchor.offset(), limit) {
        (Some(offset), Some(limit)) if offset <= limit => Some(anchor.id().to_string()),
        _ => None,
    }
}

impl Graph {
    /// Structural problems of live annotations, in annotation id order.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for annotation in self.annotations().filter(|a| !a.is_destroyed()) {
            let id = annotation.id().to_string();
            let layer = annotation.layer();
            if layer.is_none() {
                errors.push(ValidationError::UnknownLayer {
                    annotation_id: id.clone(),
                    layer_id: annotation.layer_id().to_string(),
                });
            }

            for anchor_id in [annotation.start_id(), annotation.end_id()].into_iter().flatten() {
                if self.anchor(anchor_id).is_none() {
                    errors.push(ValidationError::MissingAnchor {
                        annotation_id: id.clone(),
                        anchor_id: anchor_id.to_string(),
                    });
                }
            }

            if annotation.parent().is_none() {
                errors.push(ValidationError::Orphan {
                    annotation_id: id.clone(),
                    parent_id: annotation.parent_id().map(str::to_string),
                });
            }

            if let (Some(start), Some(end)) = (annotation.start_offset(), annotation.end_offset()) {
                if end < start {
                    errors.push(ValidationError::ReversedAnchors {
                        annotation_id: id.clone(),
                        start,
                        end,
                    });
                }
            }

            if let Some(layer) = layer {
                if layer.alignment() == Alignment::Instant && annotation.start_id() != annotation.end_id() {
                    errors.push(ValidationError::NotInstantaneous {
                        annotation_id: id.clone(),
                        layer_id: layer.id().to_string(),
                    });
                }
                self.check_layer_constraints(&annotation, layer, &mut errors);
            }
        }
        debug!(graph_id = %self.id(), problems = errors.len(), "validated");
        errors
    }

    /// Check the annotation against its layer's peer, inclusion and
    /// saturation constraints. Offsets are compared only where known.
    fn check_layer_constraints(
        &self,
        annotation: &AnnotationRef<'_>,
        layer: &Layer,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(parent) = annotation.parent() else {
            return;
        };
        let id = annotation.id();
        let siblings = self.child_ids(parent.id(), layer.id());
        let Some(position) = siblings.iter().position(|sibling| sibling == id) else {
            return;
        };
        let previous = position
            .checked_sub(1)
            .and_then(|i| siblings.get(i))
            .and_then(|sibling| self.annotation(sibling));

        if !layer.peers() && position > 0 {
            errors.push(ValidationError::TooManyPeers {
                annotation_id: id.to_string(),
                parent_id: parent.id().to_string(),
                layer_id: layer.id().to_string(),
            });
        }
        if !layer.alignment().is_aligned() {
            return;
        }

        if !layer.peers_overlap() {
            if let (Some(previous), Some(start)) = (previous, annotation.start_offset()) {
                if previous.end_offset().map_or(false, |previous_end| previous_end > start) {
                    errors.push(ValidationError::OverlappingPeers {
                        annotation_id: id.to_string(),
                        previous_id: previous.id().to_string(),
                        join_at: previous
                            .end()
                            .and_then(|end| join_at(&end, annotation.end_offset())),
                    });
                }
            }
        }

        if layer.parent_includes() {
            if let (Some(parent_start), Some(parent_end)) = (parent.start_offset(), parent.end_offset()) {
                let starts_early = annotation.start_offset().map_or(false, |start| start < parent_start);
                let ends_late = annotation.end_offset().map_or(false, |end| end > parent_end);
                if starts_early || ends_late {
                    errors.push(ValidationError::OutsideParent {
                        annotation_id: id.to_string(),
                        parent_id: parent.id().to_string(),
                    });
                }
            }
        }

        if layer.saturated() {
            let expected_start = match previous {
                Some(previous) => previous.end(),
                None => parent.start(),
            };
            if let (Some(expected), Some(start)) = (expected_start, annotation.start()) {
                if apart(&expected, &start) {
                    errors.push(ValidationError::UncoveredStart {
                        annotation_id: id.to_string(),
                        join_at: join_at(&expected, annotation.end_offset()),
                    });
                }
            }
            if position + 1 == siblings.len() {
                if let (Some(expected), Some(end)) = (parent.end(), annotation.end()) {
                    if apart(&expected, &end) {
                        let forward = annotation
                            .start_offset()
                            .zip(expected.offset())
                            .map_or(false, |(start, offset)| start <= offset);
                        errors.push(ValidationError::UncoveredEnd {
                            annotation_id: id.to_string(),
                            join_at: forward.then(|| expected.id().to_string()),
                        });
                    }
                }
            }
        }
    }

    /// Apply a suggested repair.
    pub fn apply_repair(&mut self, repair: &Repair) -> Result<(), GraphError> {
        match repair {
            Repair::SwapAnchors { annotation_id } => {
                let annotation = self
                    .annotation(annotation_id)
                    .ok_or_else(|| GraphError::UnknownAnnotation(annotation_id.clone()))?;
                let (Some(start), Some(end)) = (
                    annotation.start_id().map(str::to_string),
                    annotation.end_id().map(str::to_string),
                ) else {
                    return Err(GraphError::Unanchored(annotation_id.clone()));
                };
                self.set_start_id(annotation_id, &end)?;
                self.set_end_id(annotation_id, &start)?;
            }
            Repair::CollapseToStart { annotation_id } => {
                let start = self
                    .annotation(annotation_id)
                    .ok_or_else(|| GraphError::UnknownAnnotation(annotation_id.clone()))?
                    .start_id()
                    .map(str::to_string)
                    .ok_or_else(|| GraphError::Unanchored(annotation_id.clone()))?;
                self.set_end_id(annotation_id, &start)?;
            }
            Repair::Destroy { annotation_id } => self.destroy(annotation_id)?,
            Repair::SetStart { annotation_id, anchor_id } => self.set_start_id(annotation_id, anchor_id)?,
            Repair::SetEnd { annotation_id, anchor_id } => self.set_end_id(annotation_id, anchor_id)?,
        }
        debug!(graph_id = %self.id(), repair = %repair, "applied repair");
        Ok(())
    }
}

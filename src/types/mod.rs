//! Record types of an annotation graph.

pub mod anchor;
pub mod annotation;
pub mod layer;
pub mod schema;

pub use anchor::Anchor;
pub use annotation::Annotation;
pub use layer::{Alignment, Layer};
pub use schema::Schema;

/// Attribute keys starting with a non-alphanumeric character are transient:
/// they are never copied between records or exported.
pub(crate) fn is_transient_key(key: &str) -> bool {
    key.chars()
        .next()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(false)
}

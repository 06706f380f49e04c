//! Per-graph settings.

use serde::{Deserialize, Serialize};

/// Default unit of anchor offsets.
pub const DEFAULT_OFFSET_UNITS: &str = "s";

/// Settings that affect how a graph treats offsets.
///
/// Serializable so an embedding application can keep them with its own
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Offsets closer than this are considered equal; `None` compares exactly.
    pub offset_granularity: Option<f64>,
    /// Unit of offsets, e.g. `"s"` for seconds or `"c"` for characters.
    pub offset_units: String,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            offset_granularity: None,
            offset_units: DEFAULT_OFFSET_UNITS.to_string(),
        }
    }
}

impl GraphSettings {
    /// Set the offset granularity.
    pub fn with_offset_granularity(mut self, granularity: f64) -> Self {
        self.offset_granularity = Some(granularity);
        self
    }

    /// Set the offset units.
    pub fn with_offset_units(mut self, units: impl Into<String>) -> Self {
        self.offset_units = units.into();
        self
    }

    /// Round an offset to the nearest multiple of the granularity.
    pub fn quantum_offset(&self, offset: f64) -> f64 {
        match self.offset_granularity {
            Some(g) if g > 0.0 => (offset / g).round() * g,
            _ => offset,
        }
    }

    /// Compare two offsets, treating offsets closer than the granularity as
    /// equal.
    pub fn compare_offsets(&self, a: f64, b: f64) -> std::cmp::Ordering {
        if let Some(g) = self.offset_granularity {
            if (a - b).abs() < g {
                return std::cmp::Ordering::Equal;
            }
        }
        a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
    }
}

use serde::{Deserialize, Serialize};

use super::diff::DiffResult;

/// Whether a diff is worth archiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Significant,
    Insignificant,
}

impl Decision {
    pub fn is_significant(self) -> bool {
        self == Decision::Significant
    }
}

/// Fractions at or below these values are treated as no change.
/// The defaults (0.0) flag any counted pixel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    #[serde(rename = "added_threshold")]
    pub added: f64,
    #[serde(rename = "removed_threshold")]
    pub removed: f64,
}

pub fn decide(result: &DiffResult, thresholds: &Thresholds) -> Decision {
    if result.added_fraction > thresholds.added || result.removed_fraction > thresholds.removed {
        Decision::Significant
    } else {
        Decision::Insignificant
    }
}

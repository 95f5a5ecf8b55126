//! Zone ordering: which zone is edited first.
//!
//! Zones run in ascending order of estimated complexity, so the simple,
//! precise edits land before large ones reshape the image around them.
//! The [`ComplexityEstimator`] trait and [`ZoneOrdering`] enum make the
//! estimate selectable from configuration. Ties keep palette order.

use serde::{Deserialize, Serialize};

use crate::types::Zone;

/// Selects how zone complexity is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneOrdering {
    /// Character count of the trimmed instruction.
    #[default]
    InstructionLength,
    /// Pixel area of the mask's bounding box.
    MaskArea,
}

/// Trait for zone complexity estimates. Lower runs first.
pub trait ComplexityEstimator {
    /// Estimate the complexity of `zone`. `threshold` is the mask
    /// inclusion threshold.
    fn estimate(&self, zone: &Zone, threshold: u8) -> u64;
}

impl ComplexityEstimator for ZoneOrdering {
    fn estimate(&self, zone: &Zone, threshold: u8) -> u64 {
        match *self {
            Self::InstructionLength => zone.instruction.trim().chars().count() as u64,
            Self::MaskArea => zone
                .mask
                .bounding_box(threshold)
                .map_or(0, |bbox| bbox.area()),
        }
    }
}

/// Sort zones into processing order.
#[must_use]
pub fn order_zones(mut zones: Vec<Zone>, ordering: ZoneOrdering, threshold: u8) -> Vec<Zone> {
    zones.sort_by_key(|z| z.color);
    zones.sort_by_cached_key(|z| ordering.estimate(z, threshold));
    zones
}

//! Final alignment cleanup.
//!
//! Drops poorly supported spots and collapses spots closer than the
//! resolvable distance. The merge loop runs to a fixed point, so applying
//! the refiner to its own output changes nothing.

use crate::errors::Result;
use crate::joiner::AlignmentSpot;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefineConfig {
    /// Minimum number of files with an originally detected peak.
    pub min_support: usize,
    /// Spots closer than this in both dimensions are duplicates.
    pub min_mass_distance: f64,
    pub min_axis_distance: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            min_support: 1,
            min_mass_distance: 0.005,
            min_axis_distance: 0.02,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<()> {
        msfeat::errors::check_positive(self.min_mass_distance, "refine min_mass_distance")?;
        msfeat::errors::check_positive(self.min_axis_distance, "refine min_axis_distance")?;
        Ok(())
    }
}

/// Refines the spot table: support filter, duplicate merge, final
/// renumbering. Idempotent.
pub fn refine(mut spots: Vec<AlignmentSpot>, config: &RefineConfig) -> Vec<AlignmentSpot> {
    let initial = spots.len();
    spots.retain(|s| s.support() >= config.min_support);

    // Merge until no pair is closer than the resolvable distance.
    loop {
        spots.sort_by(|a, b| a.mz.total_cmp(&b.mz).then(a.axis.total_cmp(&b.axis)));
        let Some((a, b)) = find_mergeable(&spots, config) else {
            break;
        };
        let loser = spots.swap_remove(b);
        // swap_remove moved the old last element into b's place.
        let a = if a == spots.len() { b } else { a };
        merge_into(&mut spots[a], loser);
    }

    spots.sort_by(|a, b| a.mz.total_cmp(&b.mz).then(a.axis.total_cmp(&b.axis)));
    for (id, spot) in spots.iter_mut().enumerate() {
        spot.id = id;
    }
    info!("refine: {} spots in, {} out", initial, spots.len());
    spots
}

/// First (winner, loser) pair of duplicate spots, winner having the higher
/// aggregate intensity. `None` when the table is clean.
fn find_mergeable(spots: &[AlignmentSpot], config: &RefineConfig) -> Option<(usize, usize)> {
    for i in 0..spots.len() {
        for j in i + 1..spots.len() {
            if spots[j].mz - spots[i].mz >= config.min_mass_distance {
                break;
            }
            if (spots[j].axis - spots[i].axis).abs() >= config.min_axis_distance {
                continue;
            }
            return if spots[i].aggregate_height() >= spots[j].aggregate_height() {
                Some((i, j))
            } else {
                Some((j, i))
            };
        }
    }
    None
}

/// Folds the loser's slots into the winner's missing ones; where both
/// files have a peak the winner keeps its own.
fn merge_into(winner: &mut AlignmentSpot, loser: AlignmentSpot) {
    for (slot, other) in winner.slots.iter_mut().zip(loser.slots) {
        if slot.is_none() {
            *slot = other;
        }
    }
    winner.recompute_center();
}

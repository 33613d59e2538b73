//! Cross-file peak joining.
//!
//! Builds the alignment spot table: one row per distinct analyte, one slot
//! per file. The first file seeds the master axis; every later file is
//! matched against the current spot set greedily in ascending combined
//! distance, so a closer match always wins a contested feature.

use crate::errors::Result;
use msfeat::models::{
    AxisTolerance,
    MzTolerance,
    PeakFeature,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::info;

/// The per-file entry of an alignment spot.
///
/// `feature_id` points back into the owning file's feature list; it is
/// `None` for peaks recovered by gap filling, which exist only in the spot
/// table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotPeak {
    pub feature_id: Option<usize>,
    pub mz: f64,
    pub axis: f64,
    pub axis_width: f64,
    pub height: f32,
    pub area: f32,
    pub gap_filled: bool,
}

impl SlotPeak {
    pub fn from_feature(feature: &PeakFeature) -> Self {
        Self {
            feature_id: Some(feature.id),
            mz: feature.mz,
            axis: feature.axis_top,
            axis_width: feature.axis_width(),
            height: feature.height,
            area: feature.area_above_baseline,
            gap_filled: false,
        }
    }
}

/// A cross-file feature: representative mass and axis center, plus exactly
/// one slot per participating file (slot order follows file order).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignmentSpot {
    pub id: usize,
    pub mz: f64,
    pub axis: f64,
    pub slots: Vec<Option<SlotPeak>>,
}

impl AlignmentSpot {
    /// Number of files with an originally detected peak here. Gap-filled
    /// slots do not count toward support.
    pub fn support(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.as_ref().map_or(false, |p| p.feature_id.is_some()))
            .count()
    }

    pub fn aggregate_height(&self) -> f32 {
        self.slots
            .iter()
            .flatten()
            .map(|p| p.height)
            .sum()
    }

    /// Recomputes the representative center as the mean over matched
    /// (non-gap-filled) slots.
    pub fn recompute_center(&mut self) {
        let matched: Vec<&SlotPeak> = self
            .slots
            .iter()
            .flatten()
            .filter(|p| p.feature_id.is_some())
            .collect();
        if matched.is_empty() {
            return;
        }
        let n = matched.len() as f64;
        self.mz = matched.iter().map(|p| p.mz).sum::<f64>() / n;
        self.axis = matched.iter().map(|p| p.axis).sum::<f64>() / n;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinConfig {
    pub mass_tolerance: MzTolerance,
    pub axis_tolerance: AxisTolerance,
    /// Blends mass and axis distance into one tie-breaking metric. Both
    /// components are normalized by their tolerance first, so 0.5 weighs
    /// them equally.
    pub mass_weight: f64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            mass_tolerance: MzTolerance::Da(0.01),
            axis_tolerance: AxisTolerance(0.1),
            mass_weight: 0.5,
        }
    }
}

impl JoinConfig {
    pub fn validate(&self) -> Result<()> {
        self.mass_tolerance.validate("join mass_tolerance")?;
        self.axis_tolerance.validate("join axis_tolerance")?;
        Ok(())
    }

    /// A feature may join a spot only if it is within tolerance of the
    /// spot center and of every peak already matched there, so the final
    /// mean center stays within tolerance of each matched slot.
    fn accepts(&self, spot: &AlignmentSpot, feature: &PeakFeature) -> bool {
        if !self.mass_tolerance.contains(spot.mz, feature.mz)
            || !self.axis_tolerance.contains(spot.axis, feature.axis_top)
        {
            return false;
        }
        spot.slots.iter().flatten().all(|p| {
            self.mass_tolerance.contains(p.mz, feature.mz)
                && self.axis_tolerance.contains(p.axis, feature.axis_top)
        })
    }

    /// Tolerance-normalized combined distance, in [0, 1] for candidates
    /// inside both tolerances.
    fn distance(&self, spot: &AlignmentSpot, feature: &PeakFeature) -> f64 {
        let d_mass = (feature.mz - spot.mz).abs() / self.mass_tolerance.width_at(spot.mz);
        let d_axis = (feature.axis_top - spot.axis).abs() / self.axis_tolerance.0;
        self.mass_weight * d_mass + (1.0 - self.mass_weight) * d_axis
    }
}

/// Joins per-file feature lists into alignment spots.
///
/// Every input feature lands in exactly one slot; features with no
/// acceptable spot seed a new one. Deterministic for a fixed input and
/// file order: all candidate ordering uses total comparisons with index
/// tie-breaks.
pub fn join_files(files: &[Vec<PeakFeature>], config: &JoinConfig) -> Result<Vec<AlignmentSpot>> {
    config.validate()?;
    let n = files.len();
    let mut spots: Vec<AlignmentSpot> = Vec::new();

    for (file_index, features) in files.iter().enumerate() {
        // (distance, feature position, spot position), ascending.
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for (fi, feature) in features.iter().enumerate() {
            for (si, spot) in spots.iter().enumerate() {
                if !config.accepts(spot, feature) {
                    continue;
                }
                candidates.push((config.distance(spot, feature), fi, si));
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut feature_taken = vec![false; features.len()];
        let mut spot_taken = vec![false; spots.len()];
        for (_, fi, si) in candidates {
            if feature_taken[fi] || spot_taken[si] {
                continue;
            }
            feature_taken[fi] = true;
            spot_taken[si] = true;
            spots[si].slots[file_index] = Some(SlotPeak::from_feature(&features[fi]));
            spots[si].recompute_center();
        }
        for (fi, feature) in features.iter().enumerate() {
            if feature_taken[fi] {
                continue;
            }
            let mut slots = vec![None; n];
            slots[file_index] = Some(SlotPeak::from_feature(feature));
            spots.push(AlignmentSpot {
                id: 0,
                mz: feature.mz,
                axis: feature.axis_top,
                slots,
            });
        }
    }

    for spot in spots.iter_mut() {
        spot.recompute_center();
    }
    spots.sort_by(|a, b| a.mz.total_cmp(&b.mz).then(a.axis.total_cmp(&b.axis)));
    for (id, spot) in spots.iter_mut().enumerate() {
        spot.id = id;
    }
    info!("join_files: {} spots from {} files", spots.len(), n);
    Ok(spots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use msfeat::models::PeakShape;

    fn feature(id: usize, mz: f64, axis: f64, height: f32) -> PeakFeature {
        PeakFeature {
            id,
            scan_left: 0,
            scan_top: 10,
            scan_right: 20,
            axis_left: axis - 0.05,
            axis_top: axis,
            axis_right: axis + 0.05,
            mz,
            height,
            area_above_zero: height,
            area_above_baseline: height * 0.9,
            amplitude_score: 1.0,
            shape: PeakShape::default(),
            isotope: None,
            charge: None,
            pseudo_spectrum: None,
            gap_filled: false,
        }
    }

    fn config() -> JoinConfig {
        JoinConfig {
            mass_tolerance: MzTolerance::Da(0.01),
            axis_tolerance: AxisTolerance(0.05),
            mass_weight: 0.5,
        }
    }

    #[test]
    fn test_three_files_one_spot() {
        let files = vec![
            vec![feature(0, 200.0008, 5.01, 1000.0)],
            vec![feature(0, 199.9995, 4.99, 1200.0)],
            vec![feature(0, 200.0012, 5.00, 900.0)],
        ];
        let spots = join_files(&files, &config()).unwrap();
        assert_eq!(spots.len(), 1);
        let spot = &spots[0];
        assert_eq!(spot.slots.len(), 3);
        assert!(spot.slots.iter().all(|s| s.is_some()));
        assert!((spot.mz - 200.0005).abs() < 1e-4, "mz {}", spot.mz);
        assert!((spot.axis - 5.0).abs() < 1e-6, "axis {}", spot.axis);
        assert_eq!(spot.support(), 3);
    }

    #[test]
    fn test_every_feature_lands_in_exactly_one_slot() {
        let files = vec![
            vec![
                feature(0, 200.0, 5.0, 1000.0),
                feature(1, 300.0, 6.0, 500.0),
            ],
            vec![
                feature(0, 200.002, 5.01, 800.0),
                feature(1, 400.0, 2.0, 300.0),
            ],
            vec![feature(0, 300.001, 6.02, 450.0)],
        ];
        let spots = join_files(&files, &config()).unwrap();
        for spot in &spots {
            assert_eq!(spot.slots.len(), 3);
        }
        let mut seen = std::collections::HashSet::new();
        let mut referenced = 0;
        for spot in &spots {
            for (file, slot) in spot.slots.iter().enumerate() {
                if let Some(p) = slot {
                    assert!(seen.insert((file, p.feature_id)), "double assignment");
                    referenced += 1;
                }
            }
        }
        assert_eq!(referenced, 5);
        assert_eq!(spots.len(), 3);
    }

    #[test]
    fn test_closer_match_wins_contested_feature() {
        // File 0 seeds two nearby spots; file 1 has one feature between
        // them, closer to the second. The closer spot must win it.
        let files = vec![
            vec![
                feature(0, 200.000, 5.0, 1000.0),
                feature(1, 200.008, 5.0, 1000.0),
            ],
            vec![feature(0, 200.006, 5.0, 900.0)],
        ];
        let spots = join_files(&files, &config()).unwrap();
        assert_eq!(spots.len(), 2);
        let winner = spots
            .iter()
            .find(|s| s.slots[1].is_some())
            .expect("feature unassigned");
        assert_eq!(
            winner.slots[0].as_ref().map(|p| p.feature_id),
            Some(Some(1)),
            "wrong spot won: {:#?}",
            spots
        );
    }

    #[test]
    fn test_center_stays_within_tolerance_of_every_slot() {
        // Four files whose feature creeps upward by just under one
        // tolerance per file. Matching on the running mean alone would
        // chain them into one spot whose final center ends up more than
        // one tolerance from the first slot; member gating splits the
        // chain instead.
        let files = vec![
            vec![feature(0, 200.0000, 5.0, 1000.0)],
            vec![feature(0, 200.0100, 5.0, 1000.0)],
            vec![feature(0, 200.0150, 5.0, 1000.0)],
            vec![feature(0, 200.0183, 5.0, 1000.0)],
        ];
        let spots = join_files(&files, &config()).unwrap();
        assert_eq!(spots.len(), 2, "{:#?}", spots);
        for spot in &spots {
            for slot in spot.slots.iter().flatten() {
                assert!(
                    config().mass_tolerance.contains(spot.mz, slot.mz),
                    "slot {} outside tolerance of center {}",
                    slot.mz,
                    spot.mz
                );
                assert!(config().axis_tolerance.contains(spot.axis, slot.axis));
            }
        }
    }

    #[test]
    fn test_out_of_tolerance_seeds_new_spot() {
        let files = vec![
            vec![feature(0, 200.0, 5.0, 1000.0)],
            vec![feature(0, 200.0, 5.3, 800.0)],
        ];
        let spots = join_files(&files, &config()).unwrap();
        assert_eq!(spots.len(), 2, "axis gap exceeds tolerance");
    }

    #[test]
    fn test_deterministic_across_runs() {
        let files = vec![
            vec![
                feature(0, 200.000, 5.0, 1000.0),
                feature(1, 200.005, 5.01, 500.0),
            ],
            vec![
                feature(0, 200.002, 5.0, 700.0),
                feature(1, 200.007, 5.02, 600.0),
            ],
        ];
        let a = join_files(&files, &config()).unwrap();
        let b = join_files(&files, &config()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_tolerance_fails_fast() {
        let mut bad = config();
        bad.mass_tolerance = MzTolerance::Da(0.0);
        assert!(join_files(&[], &bad).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(join_files(&[], &config()).unwrap().is_empty());
        let spots = join_files(&[vec![], vec![]], &config()).unwrap();
        assert!(spots.is_empty());
    }
}

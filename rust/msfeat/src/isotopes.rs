//! Isotope envelope linking.
//!
//! Groups features of one file into isotopologue chains: for each
//! unassigned feature, look for coeluting partners spaced by 13C/charge
//! above it with a decreasing intensity envelope. The first charge state
//! that yields any link wins and later charges are not tried.

use crate::errors::{
    DataProcessingError,
    Result,
};
use crate::models::feature::{
    IsotopeLink,
    PeakFeature,
};
use crate::models::tolerance::{
    AxisTolerance,
    MzTolerance,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

pub const C13_C12_MASS_DIFFERENCE: f64 = 1.003_354_835;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsotopeLinkerConfig {
    pub mass_tolerance: MzTolerance,
    pub axis_tolerance: AxisTolerance,
    pub max_charge: u8,
    pub max_isotope_number: u8,
}

impl Default for IsotopeLinkerConfig {
    fn default() -> Self {
        Self {
            mass_tolerance: MzTolerance::default(),
            axis_tolerance: AxisTolerance::default(),
            max_charge: 2,
            max_isotope_number: 8,
        }
    }
}

impl IsotopeLinkerConfig {
    pub fn validate(&self) -> Result<()> {
        self.mass_tolerance.validate("isotope linker mass_tolerance")?;
        self.axis_tolerance.validate("isotope linker axis_tolerance")?;
        if self.max_charge == 0 {
            return Err(DataProcessingError::ExpectedPositiveValue {
                value: 0.0,
                context: "isotope linker max_charge".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Assigns isotope links in place.
///
/// Features are visited in ascending m/z so a monoisotopic peak always
/// claims its envelope before any of its members is considered as a
/// parent itself. Already-linked features are never reassigned.
pub fn link_isotopes(features: &mut [PeakFeature], config: &IsotopeLinkerConfig) {
    let mut order: Vec<usize> = (0..features.len()).collect();
    order.sort_by(|&a, &b| features[a].mz.total_cmp(&features[b].mz));

    let mut linked = 0usize;
    for &parent_idx in &order {
        if features[parent_idx].isotope.is_some() {
            continue;
        }
        for charge in 1..=config.max_charge {
            let chain = collect_chain(features, &order, parent_idx, charge, config);
            if chain.is_empty() {
                continue;
            }
            let parent_id = features[parent_idx].id;
            features[parent_idx].isotope = Some(IsotopeLink {
                parent_id,
                weight_number: 0,
            });
            features[parent_idx].charge = Some(charge);
            for (idx, weight_number) in chain {
                features[idx].isotope = Some(IsotopeLink {
                    parent_id,
                    weight_number,
                });
                features[idx].charge = Some(charge);
                linked += 1;
            }
            break;
        }
    }
    debug!("link_isotopes: {} features linked to envelopes", linked);
}

/// Members of the envelope rooted at `parent_idx` for one charge state,
/// as (feature index, isotope number) pairs. Empty when even M+1 has no
/// acceptable partner.
fn collect_chain(
    features: &[PeakFeature],
    order: &[usize],
    parent_idx: usize,
    charge: u8,
    config: &IsotopeLinkerConfig,
) -> Vec<(usize, u8)> {
    let spacing = C13_C12_MASS_DIFFERENCE / charge as f64;
    let parent = &features[parent_idx];
    let mut chain = Vec::new();
    let mut last_height = parent.height;

    for n in 1..=config.max_isotope_number {
        let expected_mz = parent.mz + spacing * n as f64;
        let (mz_lo, mz_hi) = config.mass_tolerance.range(expected_mz);
        let mut best: Option<(usize, f64)> = None;
        for &idx in order {
            let candidate = &features[idx];
            if candidate.mz < mz_lo {
                continue;
            }
            if candidate.mz > mz_hi {
                break;
            }
            if idx == parent_idx || candidate.isotope.is_some() {
                continue;
            }
            if !config.axis_tolerance.contains(parent.axis_top, candidate.axis_top) {
                continue;
            }
            // Envelope must decay, with slack for one noisy step.
            if candidate.height > last_height * 1.2 {
                continue;
            }
            let mass_error = (candidate.mz - expected_mz).abs();
            if best.map_or(true, |(_, err)| mass_error < err) {
                best = Some((idx, mass_error));
            }
        }
        match best {
            Some((idx, _)) => {
                last_height = features[idx].height;
                chain.push((idx, n));
            }
            // Chains do not skip isotope numbers.
            None => break,
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::feature::PeakShape;

    fn feature(id: usize, mz: f64, axis: f64, height: f32) -> PeakFeature {
        PeakFeature {
            id,
            scan_left: 0,
            scan_top: 5,
            scan_right: 10,
            axis_left: axis - 0.05,
            axis_top: axis,
            axis_right: axis + 0.05,
            mz,
            height,
            area_above_zero: height * 0.1,
            area_above_baseline: height * 0.09,
            amplitude_score: 1.0,
            shape: PeakShape::default(),
            isotope: None,
            charge: None,
            pseudo_spectrum: None,
            gap_filled: false,
        }
    }

    fn test_config() -> IsotopeLinkerConfig {
        IsotopeLinkerConfig {
            mass_tolerance: MzTolerance::Da(0.005),
            axis_tolerance: AxisTolerance(0.05),
            max_charge: 2,
            max_isotope_number: 5,
        }
    }

    #[test]
    fn test_singly_charged_chain() {
        let mut features = vec![
            feature(0, 200.0, 5.0, 10_000.0),
            feature(1, 200.0 + C13_C12_MASS_DIFFERENCE, 5.0, 2000.0),
            feature(2, 200.0 + 2.0 * C13_C12_MASS_DIFFERENCE, 5.0, 300.0),
            feature(3, 350.0, 5.0, 5000.0),
        ];
        link_isotopes(&mut features, &test_config());
        assert_eq!(features[0].isotope, Some(IsotopeLink { parent_id: 0, weight_number: 0 }));
        assert_eq!(features[1].isotope, Some(IsotopeLink { parent_id: 0, weight_number: 1 }));
        assert_eq!(features[2].isotope, Some(IsotopeLink { parent_id: 0, weight_number: 2 }));
        assert_eq!(features[0].charge, Some(1));
        assert_eq!(features[2].charge, Some(1));
        assert!(features[3].isotope.is_none());
    }

    #[test]
    fn test_doubly_charged_spacing() {
        // Only a half-spacing partner: charge 1 finds nothing, charge 2 does.
        let half = C13_C12_MASS_DIFFERENCE / 2.0;
        let mut features = vec![
            feature(0, 500.0, 3.0, 8000.0),
            feature(1, 500.0 + half, 3.0, 4000.0),
        ];
        link_isotopes(&mut features, &test_config());
        assert_eq!(features[0].charge, Some(2));
        assert_eq!(features[1].isotope, Some(IsotopeLink { parent_id: 0, weight_number: 1 }));
        assert_eq!(features[1].charge, Some(2));
    }

    #[test]
    fn test_charge_one_wins_when_both_fit() {
        // A +1 spacing partner exists; charge 1 is tried first and claims it.
        let mut features = vec![
            feature(0, 300.0, 2.0, 9000.0),
            feature(1, 300.0 + C13_C12_MASS_DIFFERENCE, 2.0, 3000.0),
        ];
        link_isotopes(&mut features, &test_config());
        assert_eq!(features[0].charge, Some(1));
    }

    #[test]
    fn test_rising_envelope_is_rejected() {
        let mut features = vec![
            feature(0, 200.0, 5.0, 1000.0),
            feature(1, 200.0 + C13_C12_MASS_DIFFERENCE, 5.0, 8000.0),
        ];
        link_isotopes(&mut features, &test_config());
        assert!(features[0].isotope.is_none());
        assert!(features[1].isotope.is_none());
    }

    #[test]
    fn test_coelution_required() {
        let mut features = vec![
            feature(0, 200.0, 5.0, 10_000.0),
            feature(1, 200.0 + C13_C12_MASS_DIFFERENCE, 7.5, 2000.0),
        ];
        link_isotopes(&mut features, &test_config());
        assert!(features[0].isotope.is_none(), "partner elutes elsewhere");
    }

    #[test]
    fn test_no_reparenting() {
        // Feature 1 belongs to 0's envelope; 1 must not also seed a chain
        // claiming feature 2 as its own M+1 with a different parent.
        let mut features = vec![
            feature(0, 200.0, 5.0, 10_000.0),
            feature(1, 200.0 + C13_C12_MASS_DIFFERENCE, 5.0, 4000.0),
            feature(2, 200.0 + 2.0 * C13_C12_MASS_DIFFERENCE, 5.0, 900.0),
        ];
        link_isotopes(&mut features, &test_config());
        for f in &features[1..] {
            assert_eq!(f.isotope.as_ref().map(|l| l.parent_id), Some(0));
        }
    }

    #[test]
    fn test_closest_mass_wins() {
        let exact = 200.0 + C13_C12_MASS_DIFFERENCE;
        let mut features = vec![
            feature(0, 200.0, 5.0, 10_000.0),
            feature(1, exact + 0.004, 5.0, 2000.0),
            feature(2, exact + 0.001, 5.0, 1800.0),
        ];
        link_isotopes(&mut features, &test_config());
        assert_eq!(
            features[2].isotope,
            Some(IsotopeLink { parent_id: 0, weight_number: 1 }),
            "closer candidate should be chosen"
        );
        assert!(features[1].isotope.is_none());
    }
}

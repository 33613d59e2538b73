use serde::{
    Deserialize,
    Serialize,
};

/// Shape metrics of a detected chromatographic peak, all in `[0, 1]`
/// except `signal_to_noise`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PeakShape {
    pub signal_to_noise: f32,
    /// min(left width, right width) / max(left width, right width).
    pub symmetry: f32,
    /// Correlation of the baseline-subtracted shape against a fitted
    /// Gaussian of equal height and width.
    pub gaussian_similarity: f32,
    /// Fraction of monotone intensity steps from the edges to the apex.
    pub ideal_slope: f32,
    /// Area above baseline over area above zero.
    pub purity: f32,
}

/// Link from an isotopologue feature to its monoisotopic parent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IsotopeLink {
    /// File-scoped id of the monoisotopic feature.
    pub parent_id: usize,
    /// Isotope weight number: 1 for M+1, 2 for M+2, ...
    pub weight_number: u8,
}

/// A detected chromatographic peak, owned by the file that produced it.
///
/// Invariants kept by construction: `scan_left <= scan_top <= scan_right`
/// and `axis_left <= axis_top <= axis_right`. Ids are unique within one
/// file and assigned by the spotter in top-scan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakFeature {
    pub id: usize,

    pub scan_left: usize,
    pub scan_top: usize,
    pub scan_right: usize,
    pub axis_left: f64,
    pub axis_top: f64,
    pub axis_right: f64,

    /// Representative m/z (intensity-weighted over the peak).
    pub mz: f64,
    /// Apex intensity above the interpolated baseline.
    pub height: f32,
    pub area_above_zero: f32,
    pub area_above_baseline: f32,
    /// Apex height relative to the tallest peak in the same chromatogram.
    pub amplitude_score: f32,
    pub shape: PeakShape,

    /// Set by the isotope linker on M+n features.
    pub isotope: Option<IsotopeLink>,
    /// Charge hypothesis recorded on linked isotope chains.
    pub charge: Option<u8>,
    /// Index into the file's pseudo-spectrum list, once deconvolved.
    pub pseudo_spectrum: Option<usize>,
    /// True for peaks recovered by gap filling rather than spotted.
    pub gap_filled: bool,
}

impl PeakFeature {
    pub fn axis_width(&self) -> f64 {
        self.axis_right - self.axis_left
    }

    pub fn scan_width(&self) -> usize {
        self.scan_right - self.scan_left + 1
    }
}

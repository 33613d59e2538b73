//! Spectral similarity scoring.
//!
//! Every operation here is pure: two spectra go in, a score comes out.
//! Spectra are slices of (mass, intensity) pairs sorted by mass; the
//! binning step merges both sides into tolerance-defined bins before any
//! vector arithmetic.

use crate::errors::{
    DataProcessingError,
    Result,
};
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum DotProductVariant {
    #[serde(rename = "simple")]
    Simple,
    #[serde(rename = "weighted")]
    Weighted { mass_power: f64, intensity_power: f64 },
    #[serde(rename = "reverse")]
    Reverse,
}

impl DotProductVariant {
    /// The standard weighting used for small-molecule spectra.
    pub fn standard_weighted() -> Self {
        DotProductVariant::Weighted {
            mass_power: 2.0,
            intensity_power: 0.5,
        }
    }
}

/// One tolerance bin with the summed intensity each side contributed.
struct Bin {
    mass: f64,
    query: f32,
    reference: f32,
}

fn check_inputs(query: &[(f64, f32)], reference: &[(f64, f32)], mass_tolerance: f64) -> Result<()> {
    if mass_tolerance <= 0.0 || !mass_tolerance.is_finite() {
        return Err(DataProcessingError::ExpectedPositiveValue {
            value: mass_tolerance,
            context: "spectral match mass_tolerance".to_string(),
        }
        .into());
    }
    if query.is_empty() || reference.is_empty() {
        return Err(DataProcessingError::ExpectedNonEmptyData {
            context: Some("spectral match requires non-empty spectra".to_string()),
        }
        .into());
    }
    Ok(())
}

/// Merges both spectra into bins: peaks within `mass_tolerance` of each
/// other, transitively, share a bin. Components at or below
/// `intensity_cutoff` are zeroed so noise never contributes.
fn bin_spectra(
    query: &[(f64, f32)],
    reference: &[(f64, f32)],
    mass_tolerance: f64,
    intensity_cutoff: f32,
) -> Vec<Bin> {
    #[derive(Clone, Copy)]
    enum Side {
        Query,
        Reference,
    }
    let mut merged: Vec<(f64, f32, Side)> = query
        .iter()
        .map(|&(m, x)| (m, x, Side::Query))
        .chain(reference.iter().map(|&(m, x)| (m, x, Side::Reference)))
        .collect();
    merged.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut bins: Vec<Bin> = Vec::new();
    let mut start = 0usize;
    for i in 1..=merged.len() {
        let split = i == merged.len() || merged[i].0 - merged[i - 1].0 > mass_tolerance;
        if !split {
            continue;
        }
        let group = &merged[start..i];
        start = i;
        let mut q = 0.0f32;
        let mut r = 0.0f32;
        let mut weighted_mass = 0.0f64;
        let mut total = 0.0f64;
        for &(m, x, side) in group {
            match side {
                Side::Query => q += x,
                Side::Reference => r += x,
            }
            weighted_mass += m * x as f64;
            total += x as f64;
        }
        let mass = if total > 0.0 {
            weighted_mass / total
        } else {
            group[0].0
        };
        if q <= intensity_cutoff {
            q = 0.0;
        }
        if r <= intensity_cutoff {
            r = 0.0;
        }
        bins.push(Bin {
            mass,
            query: q,
            reference: r,
        });
    }
    bins
}

fn component(mass: f64, intensity: f32, variant: DotProductVariant) -> f64 {
    match variant {
        DotProductVariant::Simple | DotProductVariant::Reverse => intensity as f64,
        DotProductVariant::Weighted {
            mass_power,
            intensity_power,
        } => mass.powf(mass_power) * (intensity as f64).powf(intensity_power),
    }
}

/// Cosine similarity of two tolerance-binned spectra, in [0, 1].
///
/// The `reverse` variant normalizes only over bins where the reference has
/// signal, so extra query peaks are not penalized. Spectra whose peaks all
/// fall below the cutoff legitimately score 0.0.
pub fn dot_product(
    query: &[(f64, f32)],
    reference: &[(f64, f32)],
    mass_tolerance: f64,
    intensity_cutoff: f32,
    variant: DotProductVariant,
) -> Result<f32> {
    check_inputs(query, reference, mass_tolerance)?;
    let bins = bin_spectra(query, reference, mass_tolerance, intensity_cutoff);

    let mut dot = 0.0f64;
    let mut norm_q = 0.0f64;
    let mut norm_r = 0.0f64;
    for bin in &bins {
        let q = component(bin.mass, bin.query, variant);
        let r = component(bin.mass, bin.reference, variant);
        let q = if bin.query > 0.0 { q } else { 0.0 };
        let r = if bin.reference > 0.0 { r } else { 0.0 };
        dot += q * r;
        norm_r += r * r;
        let counts_for_query = match variant {
            DotProductVariant::Reverse => bin.reference > 0.0,
            _ => true,
        };
        if counts_for_query {
            norm_q += q * q;
        }
    }
    let denom = norm_q.sqrt() * norm_r.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / denom).clamp(0.0, 1.0) as f32)
}

/// Number of bins where both spectra exceed the cutoff, and that count as
/// a fraction of the reference peak count.
pub fn matched_peaks(
    query: &[(f64, f32)],
    reference: &[(f64, f32)],
    mass_tolerance: f64,
    intensity_cutoff: f32,
) -> Result<(usize, f32)> {
    check_inputs(query, reference, mass_tolerance)?;
    let bins = bin_spectra(query, reference, mass_tolerance, intensity_cutoff);
    let count = bins
        .iter()
        .filter(|b| b.query > 0.0 && b.reference > 0.0)
        .count();
    Ok((count, count as f32 / reference.len() as f32))
}

/// Symmetric N x N score matrix over a spectrum set.
///
/// Each off-diagonal pair is computed once and mirrored; the diagonal is
/// 1.0 by definition. Results match the pairwise form exactly.
pub fn batch_dot_product(
    spectra: &[Vec<(f64, f32)>],
    mass_tolerance: f64,
    intensity_cutoff: f32,
    variant: DotProductVariant,
) -> Result<Vec<Vec<f32>>> {
    if mass_tolerance <= 0.0 || !mass_tolerance.is_finite() {
        return Err(DataProcessingError::ExpectedPositiveValue {
            value: mass_tolerance,
            context: "batch_dot_product mass_tolerance".to_string(),
        }
        .into());
    }
    for s in spectra {
        if s.is_empty() {
            return Err(DataProcessingError::ExpectedNonEmptyData {
                context: Some("batch_dot_product got an empty spectrum".to_string()),
            }
            .into());
        }
    }
    let n = spectra.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();
    let scores: Vec<((usize, usize), f32)> = pairs
        .into_par_iter()
        .map(|(i, j)| {
            dot_product(&spectra[i], &spectra[j], mass_tolerance, intensity_cutoff, variant)
                .map(|score| ((i, j), score))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut matrix = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
    }
    for ((i, j), score) in scores {
        matrix[i][j] = score;
        matrix[j][i] = score;
    }
    Ok(matrix)
}

/// Per-criterion outcome of scoring one query against one library entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub library_id: usize,
    pub simple_dot: f32,
    pub weighted_dot: f32,
    pub reverse_dot: f32,
    pub matched_count: usize,
    pub matched_percent: f32,
    pub axis_similarity: Option<f32>,
    pub ccs_similarity: Option<f32>,
    pub isotope_similarity: Option<f32>,
    pub is_spectrum_match: bool,
    pub is_axis_match: bool,
    pub is_ccs_match: bool,
    /// Mean of the similarity components that were available.
    pub total_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchConfig {
    /// Fragment binning tolerance in Da.
    pub mass_tolerance: f64,
    pub intensity_cutoff: f32,
    pub weighted: DotProductVariant,
    /// Sigma of the Gaussian used for axis similarity.
    pub axis_tolerance: f64,
    pub ccs_tolerance: f64,
    pub spectrum_match_threshold: f32,
    pub axis_match_threshold: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            mass_tolerance: 0.01,
            intensity_cutoff: 0.0,
            weighted: DotProductVariant::standard_weighted(),
            axis_tolerance: 0.5,
            ccs_tolerance: 5.0,
            spectrum_match_threshold: 0.7,
            axis_match_threshold: 0.5,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<()> {
        crate::errors::check_positive(self.mass_tolerance, "match mass_tolerance")?;
        crate::errors::check_positive(self.axis_tolerance, "match axis_tolerance")?;
        Ok(())
    }
}

/// A query spectrum with the optional side observations the library may
/// also carry.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumQuery<'a> {
    pub peaks: &'a [(f64, f32)],
    pub precursor_mz: f64,
    pub axis: Option<f64>,
    pub ccs: Option<f64>,
}

fn gaussian_similarity(observed: f64, expected: f64, sigma: f64) -> f32 {
    let x = (observed - expected) / sigma;
    (-0.5 * x * x).exp() as f32
}

/// Scores a query against one reference spectrum across every criterion
/// both sides can support.
pub fn score_match(
    query: &SpectrumQuery<'_>,
    reference_peaks: &[(f64, f32)],
    library_id: usize,
    reference_axis: Option<f64>,
    reference_ccs: Option<f64>,
    isotope_similarity: Option<f32>,
    config: &MatchConfig,
) -> Result<MatchResult> {
    let simple_dot = dot_product(
        query.peaks,
        reference_peaks,
        config.mass_tolerance,
        config.intensity_cutoff,
        DotProductVariant::Simple,
    )?;
    let weighted_dot = dot_product(
        query.peaks,
        reference_peaks,
        config.mass_tolerance,
        config.intensity_cutoff,
        config.weighted,
    )?;
    let reverse_dot = dot_product(
        query.peaks,
        reference_peaks,
        config.mass_tolerance,
        config.intensity_cutoff,
        DotProductVariant::Reverse,
    )?;
    let (matched_count, matched_percent) = matched_peaks(
        query.peaks,
        reference_peaks,
        config.mass_tolerance,
        config.intensity_cutoff,
    )?;

    let axis_similarity = match (query.axis, reference_axis) {
        (Some(q), Some(r)) => Some(gaussian_similarity(q, r, config.axis_tolerance)),
        _ => None,
    };
    let ccs_similarity = match (query.ccs, reference_ccs) {
        (Some(q), Some(r)) => Some(gaussian_similarity(q, r, config.ccs_tolerance)),
        _ => None,
    };

    let mut components = vec![simple_dot, weighted_dot, reverse_dot, matched_percent];
    components.extend(axis_similarity);
    components.extend(ccs_similarity);
    components.extend(isotope_similarity);
    let total_score = components.iter().sum::<f32>() / components.len() as f32;

    Ok(MatchResult {
        library_id,
        simple_dot,
        weighted_dot,
        reverse_dot,
        matched_count,
        matched_percent,
        axis_similarity,
        ccs_similarity,
        isotope_similarity,
        is_spectrum_match: weighted_dot >= config.spectrum_match_threshold,
        is_axis_match: axis_similarity.map_or(false, |s| s >= config.axis_match_threshold),
        is_ccs_match: ccs_similarity.map_or(false, |s| s >= config.axis_match_threshold),
        total_score,
    })
}

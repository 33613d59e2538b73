//! Spectral deconvolution.
//!
//! For each precursor feature, builds a purified pseudo-spectrum from the
//! fragment ions whose extracted chromatograms track the precursor's
//! elution profile. Correlation gating against the precursor shape is what
//! separates true fragments from co-eluting interference.

use crate::errors::Result;
use crate::models::chromatogram::extract_chromatogram;
use crate::models::feature::PeakFeature;
use crate::models::scan::Scan;
use crate::models::tolerance::MzTolerance;
use crate::smoothing::{
    smooth,
    SmoothMethod,
};
use crate::spectral_match::MatchResult;
use crate::utils::correlation::pearson_correlation;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudoSpectrum {
    pub feature_id: usize,
    pub precursor_mz: f64,
    pub axis_center: f64,
    /// Fragment (mass, intensity) pairs, ascending mass.
    pub peaks: Vec<(f64, f32)>,
    /// Mass of the model peak chosen to represent this spectrum's
    /// chromatographic identity.
    pub model_mz: f64,
    pub purity: f32,
    pub quality: f32,
    pub signal_to_noise: f32,
    /// Set when purity fell below the configured floor. The spectrum is
    /// kept either way.
    pub low_confidence: bool,
    pub match_result: Option<MatchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeconvolutionConfig {
    /// Minimum Pearson correlation between a fragment profile and the
    /// precursor profile.
    pub correlation_threshold: f32,
    /// Below this purity the pseudo-spectrum is flagged low-confidence.
    pub purity_floor: f32,
    /// Full width of the precursor isolation window, in Da.
    pub isolation_width: f64,
    pub fragment_mass_tolerance: MzTolerance,
    pub smoothing: SmoothMethod,
    /// Fragment traces whose apex never reaches this are not considered.
    pub min_fragment_intensity: f32,
}

impl Default for DeconvolutionConfig {
    fn default() -> Self {
        Self {
            correlation_threshold: 0.7,
            purity_floor: 0.3,
            isolation_width: 1.0,
            fragment_mass_tolerance: MzTolerance::Da(0.01),
            smoothing: SmoothMethod::default(),
            min_fragment_intensity: 50.0,
        }
    }
}

impl DeconvolutionConfig {
    pub fn validate(&self) -> Result<()> {
        self.fragment_mass_tolerance.validate("deconvolution fragment_mass_tolerance")?;
        crate::errors::check_positive(self.correlation_threshold as f64, "correlation_threshold")?;
        crate::errors::check_positive(self.isolation_width, "isolation_width")?;
        Ok(())
    }
}

/// Deconvolutes every feature of one file against its fragment scans.
///
/// Features gain a `pseudo_spectrum` back-reference (index into the
/// returned list). Fragment-free features still yield a spectrum with the
/// precursor as its own model peak and an empty fragment list.
pub fn deconvolute_features(
    features: &mut [PeakFeature],
    precursor_scans: &[&Scan],
    fragment_scans: &[&Scan],
    config: &DeconvolutionConfig,
) -> Vec<PseudoSpectrum> {
    let mut spectra = Vec::with_capacity(features.len());
    for feature in features.iter_mut() {
        let spectrum = deconvolute_one(feature, precursor_scans, fragment_scans, config);
        feature.pseudo_spectrum = Some(spectra.len());
        spectra.push(spectrum);
    }
    debug!(
        "deconvolution: {} spectra, {} low-confidence",
        spectra.len(),
        spectra.iter().filter(|s| s.low_confidence).count()
    );
    spectra
}

fn deconvolute_one(
    feature: &PeakFeature,
    precursor_scans: &[&Scan],
    fragment_scans: &[&Scan],
    config: &DeconvolutionConfig,
) -> PseudoSpectrum {
    let axis_range = (feature.axis_left, feature.axis_right);
    let (mz_lo, mz_hi) = config.fragment_mass_tolerance.range(feature.mz);
    let precursor_chrom = extract_chromatogram(
        precursor_scans.iter().copied(),
        (mz_lo, mz_hi),
        Some(axis_range),
    );
    let precursor_axis: Vec<f64> = precursor_chrom.points.iter().map(|p| p.axis).collect();
    let precursor_profile = smooth(&precursor_chrom.intensities(), config.smoothing);

    let mut peaks: Vec<(f64, f32)> = Vec::new();
    let mut model_mz = feature.mz;
    let mut best_weight = 0.0f32;
    let mut quality = 1.0f32;

    if precursor_profile.len() >= 3 {
        let candidates = candidate_masses(fragment_scans, axis_range, config);
        for mass in candidates {
            let (lo, hi) = config.fragment_mass_tolerance.range(mass);
            let chrom =
                extract_chromatogram(fragment_scans.iter().copied(), (lo, hi), Some(axis_range));
            if chrom.len() < 3 {
                continue;
            }
            let profile = smooth(&chrom.intensities(), config.smoothing);
            let apex_intensity = profile.iter().copied().fold(0.0f32, f32::max);
            if apex_intensity < config.min_fragment_intensity {
                continue;
            }
            let fragment_axis: Vec<f64> = chrom.points.iter().map(|p| p.axis).collect();
            let reference = resample_profile(&precursor_axis, &precursor_profile, &fragment_axis);
            let corr = match pearson_correlation(&profile, &reference) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if corr < config.correlation_threshold {
                continue;
            }
            let at_apex = intensity_at(&fragment_axis, &profile, feature.axis_top);
            peaks.push((mass, at_apex));
            let weight = corr * at_apex;
            if weight > best_weight {
                best_weight = weight;
                model_mz = mass;
                quality = profile_agreement(&profile, &reference);
            }
        }
        peaks.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    let purity = isolation_purity(feature, precursor_scans, &precursor_axis, &precursor_profile, config);

    PseudoSpectrum {
        feature_id: feature.id,
        precursor_mz: feature.mz,
        axis_center: feature.axis_top,
        peaks,
        model_mz,
        purity,
        quality,
        signal_to_noise: feature.shape.signal_to_noise,
        low_confidence: purity < config.purity_floor,
        match_result: None,
    }
}

/// Distinct fragment masses within the feature's elution window, found by
/// sorting every observed (mass, intensity) point and splitting wherever
/// the mass gap exceeds the tolerance width. One weighted-mean mass per
/// group.
fn candidate_masses(
    fragment_scans: &[&Scan],
    axis_range: (f64, f64),
    config: &DeconvolutionConfig,
) -> Vec<f64> {
    let mut points: Vec<(f64, f32)> = fragment_scans
        .iter()
        .filter(|s| s.axis >= axis_range.0 && s.axis <= axis_range.1)
        .flat_map(|s| s.peaks.iter().copied())
        .filter(|&(_, intensity)| intensity >= config.min_fragment_intensity)
        .collect();
    if points.is_empty() {
        return Vec::new();
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut masses = Vec::new();
    let mut group_start = 0usize;
    for i in 1..=points.len() {
        let split = i == points.len()
            || points[i].0 - points[i - 1].0 > config.fragment_mass_tolerance.width_at(points[i - 1].0);
        if split {
            let group = &points[group_start..i];
            let total: f64 = group.iter().map(|&(_, x)| x as f64).sum();
            if total > 0.0 {
                let mean = group.iter().map(|&(m, x)| m * x as f64).sum::<f64>() / total;
                masses.push(mean);
            }
            group_start = i;
        }
    }
    masses
}

/// Linear interpolation of `(src_axis, src)` onto `dst_axis`. Points
/// outside the source span read as zero. Precursor and fragment scan grids
/// rarely coincide, so correlation always runs on the fragment grid.
fn resample_profile(src_axis: &[f64], src: &[f32], dst_axis: &[f64]) -> Vec<f32> {
    dst_axis
        .iter()
        .map(|&x| {
            if src_axis.is_empty() || x < src_axis[0] || x > src_axis[src_axis.len() - 1] {
                return 0.0;
            }
            let hi = src_axis.partition_point(|&a| a < x);
            if hi == 0 {
                return src[0];
            }
            if hi >= src_axis.len() {
                return src[src.len() - 1];
            }
            let lo = hi - 1;
            let span = src_axis[hi] - src_axis[lo];
            if span <= 0.0 {
                return src[lo];
            }
            let t = (x - src_axis[lo]) / span;
            (src[lo] as f64 + (src[hi] as f64 - src[lo] as f64) * t) as f32
        })
        .collect()
}

fn intensity_at(axis: &[f64], profile: &[f32], target: f64) -> f32 {
    axis.iter()
        .enumerate()
        .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
        .map(|(i, _)| profile[i])
        .unwrap_or(0.0)
}

/// 1 minus the RMS difference of the two apex-normalized profiles.
fn profile_agreement(a: &[f32], b: &[f32]) -> f32 {
    let max_a = a.iter().copied().fold(0.0f32, f32::max);
    let max_b = b.iter().copied().fold(0.0f32, f32::max);
    if max_a <= 0.0 || max_b <= 0.0 || a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut acc = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let d = (x / max_a - y / max_b) as f64;
        acc += d * d;
    }
    (1.0 - (acc / a.len() as f64).sqrt()).clamp(0.0, 1.0) as f32
}

/// Fraction of the isolation-window signal at the apex that tracks the
/// precursor's elution shape.
fn isolation_purity(
    feature: &PeakFeature,
    precursor_scans: &[&Scan],
    precursor_axis: &[f64],
    precursor_profile: &[f32],
    config: &DeconvolutionConfig,
) -> f32 {
    let half = config.isolation_width / 2.0;
    let window = (feature.mz - half, feature.mz + half);
    let apex_scan = precursor_scans
        .iter()
        .filter(|s| s.axis >= feature.axis_left && s.axis <= feature.axis_right)
        .min_by(|a, b| {
            (a.axis - feature.axis_top)
                .abs()
                .total_cmp(&(b.axis - feature.axis_top).abs())
        });
    let total = match apex_scan {
        Some(scan) => scan.intensity_in(window.0, window.1),
        None => return 0.0,
    };
    if total <= 0.0 {
        return 0.0;
    }

    // Each co-isolated mass track either correlates with the target
    // profile or counts as interference.
    let axis_range = (feature.axis_left, feature.axis_right);
    let mut points: Vec<(f64, f32)> = precursor_scans
        .iter()
        .filter(|s| s.axis >= axis_range.0 && s.axis <= axis_range.1)
        .flat_map(|s| s.peaks.iter().copied())
        .filter(|&(mz, _)| mz >= window.0 && mz <= window.1)
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut correlated = 0.0f32;
    let mut group_start = 0usize;
    for i in 1..=points.len() {
        let split = i == points.len()
            || points[i].0 - points[i - 1].0
                > config.fragment_mass_tolerance.width_at(points[i - 1].0);
        if !split {
            continue;
        }
        let group = &points[group_start..i];
        group_start = i;
        let lo = group[0].0 - 1e-9;
        let hi = group[group.len() - 1].0 + 1e-9;
        let chrom = extract_chromatogram(precursor_scans.iter().copied(), (lo, hi), Some(axis_range));
        if chrom.len() < 3 {
            continue;
        }
        let profile = smooth(&chrom.intensities(), config.smoothing);
        let grid: Vec<f64> = chrom.points.iter().map(|p| p.axis).collect();
        let reference = resample_profile(precursor_axis, precursor_profile, &grid);
        let corr = pearson_correlation(&profile, &reference).unwrap_or(0.0);
        if corr >= config.correlation_threshold {
            correlated += intensity_at(&grid, &profile, feature.axis_top);
        }
    }
    (correlated / total).clamp(0.0, 1.0)
}

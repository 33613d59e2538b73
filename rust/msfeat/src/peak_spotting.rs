//! Chromatographic peak detection.
//!
//! Works on one extracted chromatogram at a time: smooth, estimate the
//! noise floor, pick local maxima, walk the edges out to the surrounding
//! valleys and score the resulting shapes. Detection runs on the smoothed
//! trace; heights and areas are quantified on the raw one.

use crate::errors::{
    DataProcessingError,
    Result,
};
use crate::models::chromatogram::Chromatogram;
use crate::models::feature::{
    PeakFeature,
    PeakShape,
};
use crate::smoothing::SmoothMethod;
use crate::utils::correlation::pearson_correlation;
use crate::utils::rolling::{
    low_intensity_median,
    rolling_median_into,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeakSpotterConfig {
    /// Minimum apex intensity (smoothed) for a candidate maximum.
    pub min_amplitude: f32,
    /// Minimum peak width in scans, edges inclusive.
    pub min_width_scans: usize,
    pub smoothing: SmoothMethod,
    /// Window of the rolling-median noise floor, in scans.
    pub noise_window: usize,
    /// A candidate must also exceed `noise_factor` times the local floor.
    pub noise_factor: f32,
    /// A valley bounds a peak once intensity has dropped below this
    /// fraction of the apex; shallower dips are absorbed.
    pub valley_fraction: f32,
    /// Candidates below this amplitude score (apex relative to the tallest
    /// peak of the chromatogram) are dropped. Zero keeps everything.
    pub min_amplitude_score: f32,
}

impl Default for PeakSpotterConfig {
    fn default() -> Self {
        Self {
            min_amplitude: 1000.0,
            min_width_scans: 5,
            smoothing: SmoothMethod::default(),
            noise_window: 25,
            noise_factor: 3.0,
            valley_fraction: 0.5,
            min_amplitude_score: 0.0,
        }
    }
}

impl PeakSpotterConfig {
    pub fn validate(&self) -> Result<()> {
        for (value, context) in [
            (self.min_amplitude as f64, "spotter min_amplitude"),
            (self.noise_factor as f64, "spotter noise_factor"),
            (self.valley_fraction as f64, "spotter valley_fraction"),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(DataProcessingError::ExpectedPositiveValue {
                    value,
                    context: context.to_string(),
                }
                .into());
            }
        }
        if self.min_width_scans < 3 {
            return Err(DataProcessingError::ExpectedPositiveValue {
                value: self.min_width_scans as f64,
                context: "spotter min_width_scans must be >= 3".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

struct Candidate {
    left: usize,
    top: usize,
    right: usize,
    height: f32,
}

/// Detects peak features in one chromatogram.
///
/// Empty or degenerate chromatograms yield an empty list, never an error.
/// Output is sorted by top scan index with fresh sequential ids.
pub fn spot_peaks(chrom: &Chromatogram, config: &PeakSpotterConfig) -> Vec<PeakFeature> {
    if chrom.len() < config.min_width_scans {
        return Vec::new();
    }
    let raw = chrom.intensities();
    let smoothed = chrom.smoothed_intensities(config.smoothing);
    if smoothed.iter().all(|&x| x <= 0.0) {
        return Vec::new();
    }

    let noise_global = low_intensity_median(&raw);
    let mut noise_local = Vec::new();
    rolling_median_into(&smoothed, config.noise_window, noise_global, &mut noise_local);

    let mut candidates = find_candidates(&smoothed, &noise_local, noise_global, config);
    candidates.retain(|c| c.right - c.left + 1 >= config.min_width_scans);
    resolve_overlaps(&mut candidates);
    debug!(
        "spot_peaks: {} candidates on {} scans (noise floor {:.1})",
        candidates.len(),
        chrom.len(),
        noise_global
    );

    let max_height = candidates
        .iter()
        .map(|c| c.height)
        .fold(0.0f32, f32::max);
    let mut features: Vec<PeakFeature> = candidates
        .iter()
        .filter_map(|c| score_candidate(c, chrom, &raw, &smoothed, noise_global, max_height))
        .filter(|f| f.amplitude_score >= config.min_amplitude_score)
        .collect();

    features.sort_by_key(|f| f.scan_top);
    for (id, f) in features.iter_mut().enumerate() {
        f.id = id;
    }
    features
}

fn find_candidates(
    smoothed: &[f32],
    noise_local: &[f32],
    noise_global: f32,
    config: &PeakSpotterConfig,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    let n = smoothed.len();
    for top in 1..n - 1 {
        let apex = smoothed[top];
        if smoothed[top - 1] > apex || smoothed[top + 1] >= apex {
            continue;
        }
        if apex < config.min_amplitude {
            continue;
        }
        let left = walk_edge(smoothed, top, -1, apex, noise_global, config.valley_fraction);
        let right = walk_edge(smoothed, top, 1, apex, noise_global, config.valley_fraction);
        // Noise is measured on the flanks; the window around the apex is
        // signal-dominated and useless as a floor.
        let flank_floor = noise_local[left].min(noise_local[right]);
        let floor = flank_floor.max(noise_global).max(1.0);
        if apex < config.noise_factor * floor {
            continue;
        }
        out.push(Candidate {
            left,
            top,
            right,
            height: apex,
        });
    }
    out
}

/// Walks from the apex toward `direction` until a bounding valley.
///
/// A dip only counts as a boundary once intensity has fallen below
/// `valley_fraction` of the apex (or under the noise floor); shallow dips
/// on a peak flank are walked through.
fn walk_edge(
    smoothed: &[f32],
    top: usize,
    direction: isize,
    apex: f32,
    noise_global: f32,
    valley_fraction: f32,
) -> usize {
    let n = smoothed.len() as isize;
    let valley_level = apex * valley_fraction;
    let mut j = top as isize;
    loop {
        let next = j + direction;
        if next < 0 || next >= n {
            break;
        }
        let here = smoothed[j as usize];
        let ahead = smoothed[next as usize];
        if here <= noise_global {
            break;
        }
        if ahead > here && here <= valley_level {
            // Deep enough valley and the trace turns back up.
            break;
        }
        if ahead > apex {
            // Climbing into a taller neighbor; stop at the shared valley.
            break;
        }
        j = next;
    }
    j as usize
}

/// Keeps the higher-amplitude peak wherever candidates overlap; the
/// smaller one is discarded entirely, never merged.
fn resolve_overlaps(candidates: &mut Vec<Candidate>) {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .height
            .total_cmp(&candidates[a].height)
            .then(candidates[a].top.cmp(&candidates[b].top))
    });
    let mut keep = vec![false; candidates.len()];
    let mut kept: Vec<(usize, usize)> = Vec::new();
    for idx in order {
        let c = &candidates[idx];
        // Sharing a single boundary scan (the valley between two resolved
        // peaks) is not an overlap.
        let clashes = kept
            .iter()
            .any(|&(l, r)| r.min(c.right) > l.max(c.left));
        if !clashes {
            keep[idx] = true;
            kept.push((c.left, c.right));
        }
    }
    let mut i = 0;
    candidates.retain(|_| {
        let k = keep[i];
        i += 1;
        k
    });
}

fn score_candidate(
    c: &Candidate,
    chrom: &Chromatogram,
    raw: &[f32],
    smoothed: &[f32],
    noise_global: f32,
    max_height: f32,
) -> Option<PeakFeature> {
    let points = &chrom.points;
    let (left, top, right) = (c.left, c.top, c.right);

    // Baseline interpolated linearly between the raw edge intensities.
    let base_l = raw[left] as f64;
    let base_r = raw[right] as f64;
    let ax_l = points[left].axis;
    let ax_t = points[top].axis;
    let ax_r = points[right].axis;
    let span = ax_r - ax_l;
    let base_t = if span <= 0.0 {
        base_l
    } else {
        base_l + (base_r - base_l) * (ax_t - ax_l) / span
    };
    let height = (raw[top] as f64 - base_t) as f32;
    if height <= 0.0 {
        return None;
    }

    let left_width = ax_t - ax_l;
    let right_width = ax_r - ax_t;
    let symmetry = if left_width <= 0.0 || right_width <= 0.0 {
        0.0
    } else {
        (left_width.min(right_width) / left_width.max(right_width)) as f32
    };

    let gaussian_similarity = gaussian_shape_similarity(points, raw, left, top, right, height);
    let ideal_slope = ideal_slope_score(smoothed, left, top, right);
    let area_above_zero = chrom.area_above_zero(left, right);
    let area_above_baseline = chrom.area_above_baseline(left, right);
    let purity = if area_above_zero > 0.0 {
        (area_above_baseline / area_above_zero).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let signal_to_noise = height / noise_global.max(1.0);
    let amplitude_score = if max_height > 0.0 {
        c.height / max_height
    } else {
        0.0
    };

    Some(PeakFeature {
        id: 0,
        scan_left: points[left].scan_index,
        scan_top: points[top].scan_index,
        scan_right: points[right].scan_index,
        axis_left: ax_l,
        axis_top: ax_t,
        axis_right: ax_r,
        mz: points[top].mz,
        height,
        area_above_zero,
        area_above_baseline,
        amplitude_score,
        shape: PeakShape {
            signal_to_noise,
            symmetry,
            gaussian_similarity,
            ideal_slope,
            purity,
        },
        isotope: None,
        charge: None,
        pseudo_spectrum: None,
        gap_filled: false,
    })
}

/// Correlation of the baseline-subtracted shape against a Gaussian of
/// equal height centered on the apex, sigma from the half-height width.
/// FWHM is robust to how far the edges reach into the tails; the edge
/// span is not.
fn gaussian_shape_similarity(
    points: &[crate::models::chromatogram::ChromatogramPoint],
    raw: &[f32],
    left: usize,
    top: usize,
    right: usize,
    height: f32,
) -> f32 {
    if right - left < 2 {
        return 0.0;
    }
    let ax_t = points[top].axis;
    let fallback = (points[right].axis - points[left].axis) / 4.0;
    let sigma = fwhm(points, raw, left, top, right)
        .map(|w| w / 2.3548)
        .unwrap_or(fallback)
        .max(1e-9);
    let observed: Vec<f32> = raw[left..=right].to_vec();
    let model: Vec<f32> = points[left..=right]
        .iter()
        .map(|p| {
            let x = (p.axis - ax_t) / sigma;
            height * (-0.5 * x * x).exp() as f32
        })
        .collect();
    pearson_correlation(&observed, &model)
        .map(|r| r.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

/// Full width at half the apex intensity, linearly interpolated on the
/// axis. `None` when the trace never drops below half height inside the
/// peak bounds.
fn fwhm(
    points: &[crate::models::chromatogram::ChromatogramPoint],
    raw: &[f32],
    left: usize,
    top: usize,
    right: usize,
) -> Option<f64> {
    let half = raw[top] / 2.0;
    let cross = |start: usize, stop: usize, step: isize| -> Option<f64> {
        let mut i = start;
        while i != stop {
            let next = (i as isize + step) as usize;
            if raw[next] < half {
                let span = points[next].axis - points[i].axis;
                let t = (raw[i] - half) as f64 / (raw[i] - raw[next]).max(f32::MIN_POSITIVE) as f64;
                return Some(points[i].axis + span * t);
            }
            i = next;
        }
        None
    };
    let lo = cross(top, left, -1)?;
    let hi = cross(top, right, 1)?;
    Some(hi - lo)
}

/// Fraction of edge-to-apex steps that move the right way: rising on the
/// left flank, falling on the right.
fn ideal_slope_score(smoothed: &[f32], left: usize, top: usize, right: usize) -> f32 {
    let mut good = 0usize;
    let mut total = 0usize;
    for i in left..top {
        total += 1;
        if smoothed[i + 1] >= smoothed[i] {
            good += 1;
        }
    }
    for i in top..right {
        total += 1;
        if smoothed[i + 1] <= smoothed[i] {
            good += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        good as f32 / total as f32
    }
}

//! End-to-end processing run.
//!
//! Per-file stages run on the rayon pool, one file per task, with no
//! shared mutable state between files. Alignment starts only after every
//! file has finished or failed. Cancellation is cooperative and polled
//! between mass tracks and between stages, never inside a numeric loop.

use crate::errors::{
    MsalignError,
    Result,
};
use crate::gap_filling::{
    fill_gaps,
    GapFillConfig,
};
use crate::joiner::{
    join_files,
    AlignmentSpot,
    JoinConfig,
};
use crate::refinement::{
    refine,
    RefineConfig,
};
use msfeat::deconvolution::{
    deconvolute_features,
    DeconvolutionConfig,
    PseudoSpectrum,
};
use msfeat::isotopes::{
    link_isotopes,
    IsotopeLinkerConfig,
};
use msfeat::models::{
    extract_chromatogram,
    MzTolerance,
    PeakFeature,
    ScanSource,
};
use msfeat::peak_spotting::{
    spot_peaks,
    PeakSpotterConfig,
};
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{
    info,
    warn,
};

/// Cooperative cancellation flag, cheap to clone across threads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    #[serde(rename = "per_file")]
    PerFile,
    #[serde(rename = "join")]
    Join,
    #[serde(rename = "gap_fill")]
    GapFill,
    #[serde(rename = "refine")]
    Refine,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    /// Set for per-file events, `None` for the alignment stages.
    pub file_index: Option<usize>,
    pub stage: PipelineStage,
    /// Monotonically increasing within one file or stage, 0 to 100.
    pub percent: f32,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Everything the per-file stages need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileProcessConfig {
    /// Binning tolerance when grouping observed masses into tracks for
    /// chromatogram extraction.
    pub track_tolerance: MzTolerance,
    /// Tracks observed in fewer points than this are not extracted.
    pub min_track_scans: usize,
    pub spotter: PeakSpotterConfig,
    pub isotopes: IsotopeLinkerConfig,
    pub deconvolution: DeconvolutionConfig,
}

impl Default for FileProcessConfig {
    fn default() -> Self {
        Self {
            track_tolerance: MzTolerance::default(),
            min_track_scans: 5,
            spotter: PeakSpotterConfig::default(),
            isotopes: IsotopeLinkerConfig::default(),
            deconvolution: DeconvolutionConfig::default(),
        }
    }
}

impl FileProcessConfig {
    pub fn validate(&self) -> Result<()> {
        self.track_tolerance.validate("track_tolerance")?;
        self.spotter.validate()?;
        self.isotopes.validate()?;
        self.deconvolution.validate()?;
        if self.min_track_scans == 0 {
            return Err(MsalignError::Config {
                msg: "min_track_scans must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// What to do with files whose per-file stage failed, before alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FailedFilePolicy {
    /// Leave failed files out of the spot table entirely.
    #[serde(rename = "exclude")]
    #[default]
    Exclude,
    /// Keep a slot column for failed files; all their slots stay missing
    /// and gap filling cannot recover them.
    #[serde(rename = "missing_slots")]
    MissingSlots,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PipelineConfig {
    pub file: FileProcessConfig,
    pub join: JoinConfig,
    pub gap_fill: GapFillConfig,
    /// Skipped entirely when `None`.
    pub refine: Option<RefineConfig>,
    pub failed_file_policy: FailedFilePolicy,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.file.validate()?;
        self.join.validate()?;
        self.gap_fill.validate()?;
        if let Some(refine) = &self.refine {
            refine.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileResult {
    pub file_index: usize,
    pub features: Vec<PeakFeature>,
    pub spectra: Vec<PseudoSpectrum>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub file_index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug)]
pub struct PipelineOutput {
    /// Fully processed files, ascending file index.
    pub files: Vec<FileResult>,
    pub failures: Vec<FileFailure>,
    pub spots: Vec<AlignmentSpot>,
    /// Original file index behind each spot slot column.
    pub aligned_file_indices: Vec<usize>,
    pub status: RunStatus,
}

enum FileOutcome {
    Done(Box<FileResult>),
    Failed(FileFailure),
    Skipped,
}

/// Runs the whole workflow over a set of scan sources.
///
/// Configuration is validated before any work starts. A cancelled run
/// returns the files that fully completed with `RunStatus::Cancelled` and
/// an empty spot table; completed per-file results are never rolled back.
pub fn run_pipeline<S: ScanSource>(
    sources: &[S],
    config: &PipelineConfig,
    progress: Option<ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<PipelineOutput> {
    config.validate()?;
    let start = Instant::now();

    let outcomes: Vec<FileOutcome> = sources
        .par_iter()
        .enumerate()
        .map(|(file_index, source)| {
            if cancel.is_cancelled() {
                return FileOutcome::Skipped;
            }
            let report = |percent: f32| {
                if let Some(cb) = &progress {
                    cb(ProgressEvent {
                        file_index: Some(file_index),
                        stage: PipelineStage::PerFile,
                        percent,
                    });
                }
            };
            match process_file(source, &config.file, cancel, &report) {
                Ok(Some((features, spectra))) => {
                    report(100.0);
                    FileOutcome::Done(Box::new(FileResult {
                        file_index,
                        features,
                        spectra,
                    }))
                }
                Ok(None) => FileOutcome::Skipped,
                Err(e) => {
                    warn!("file {} failed: {}", file_index, e);
                    FileOutcome::Failed(FileFailure {
                        file_index,
                        error: e.to_string(),
                    })
                }
            }
        })
        .collect();

    let mut files = Vec::new();
    let mut failures = Vec::new();
    let mut skipped = false;
    for outcome in outcomes {
        match outcome {
            FileOutcome::Done(result) => files.push(*result),
            FileOutcome::Failed(failure) => failures.push(failure),
            FileOutcome::Skipped => skipped = true,
        }
    }
    info!(
        "per-file stages done in {:?}: {} ok, {} failed",
        start.elapsed(),
        files.len(),
        failures.len()
    );

    if skipped || cancel.is_cancelled() {
        return Ok(PipelineOutput {
            files,
            failures,
            spots: Vec::new(),
            aligned_file_indices: Vec::new(),
            status: RunStatus::Cancelled,
        });
    }

    // Which slot columns the aligned table carries, per failure policy.
    let aligned_file_indices: Vec<usize> = match config.failed_file_policy {
        FailedFilePolicy::Exclude => files.iter().map(|f| f.file_index).collect(),
        FailedFilePolicy::MissingSlots => (0..sources.len()).collect(),
    };
    let feature_lists: Vec<Vec<PeakFeature>> = aligned_file_indices
        .iter()
        .map(|&idx| {
            files
                .iter()
                .find(|f| f.file_index == idx)
                .map(|f| f.features.clone())
                .unwrap_or_default()
        })
        .collect();

    let stage_event = |stage: PipelineStage| {
        if let Some(cb) = &progress {
            cb(ProgressEvent {
                file_index: None,
                stage,
                percent: 100.0,
            });
        }
    };

    let join_start = Instant::now();
    let spots = join_files(&feature_lists, &config.join)?;
    info!("joined {} spots in {:?}", spots.len(), join_start.elapsed());
    stage_event(PipelineStage::Join);

    let fill_start = Instant::now();
    let succeeded: std::collections::HashSet<usize> =
        files.iter().map(|f| f.file_index).collect();
    let scan_lists: Vec<Vec<&msfeat::models::Scan>> = aligned_file_indices
        .iter()
        .map(|&idx| {
            if succeeded.contains(&idx) {
                sources[idx].scans_at_level(1)
            } else {
                Vec::new()
            }
        })
        .collect();
    let spots = fill_gaps(spots, &scan_lists, &config.gap_fill);
    info!("gap filling done in {:?}", fill_start.elapsed());
    stage_event(PipelineStage::GapFill);

    let spots = match &config.refine {
        Some(refine_config) => {
            let refined = refine(spots, refine_config);
            stage_event(PipelineStage::Refine);
            refined
        }
        None => spots,
    };

    info!("pipeline finished in {:?}", start.elapsed());
    Ok(PipelineOutput {
        files,
        failures,
        spots,
        aligned_file_indices,
        status: RunStatus::Completed,
    })
}

/// One file from scans to deconvoluted spectra. `Ok(None)` means the run
/// was cancelled while this file was in flight.
fn process_file<S: ScanSource>(
    source: &S,
    config: &FileProcessConfig,
    cancel: &CancellationToken,
    report: &impl Fn(f32),
) -> Result<Option<(Vec<PeakFeature>, Vec<PseudoSpectrum>)>> {
    let ms1 = source.scans_at_level(1);
    if ms1.is_empty() {
        return Err(MsalignError::custom("no MS1 scans in file"));
    }
    let ms2 = source.scans_at_level(2);

    let tracks = mass_tracks(&ms1, config);
    let mut features: Vec<PeakFeature> = Vec::new();
    for (i, &track_mz) in tracks.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let range = config.track_tolerance.range(track_mz);
        let chrom = extract_chromatogram(ms1.iter().copied(), range, None);
        features.extend(spot_peaks(&chrom, &config.spotter));
        if i % 64 == 0 {
            report(80.0 * i as f32 / tracks.len() as f32);
        }
    }

    features.sort_by(|a, b| a.scan_top.cmp(&b.scan_top).then(a.mz.total_cmp(&b.mz)));
    for (id, feature) in features.iter_mut().enumerate() {
        feature.id = id;
    }
    link_isotopes(&mut features, &config.isotopes);
    report(90.0);

    if cancel.is_cancelled() {
        return Ok(None);
    }
    let spectra = deconvolute_features(&mut features, &ms1, &ms2, &config.deconvolution);
    Ok(Some((features, spectra)))
}

/// Representative masses of the ion tracks present in a scan set: all
/// observed peaks sorted by mass and split wherever the gap exceeds the
/// track tolerance, keeping tracks with enough points.
fn mass_tracks(scans: &[&msfeat::models::Scan], config: &FileProcessConfig) -> Vec<f64> {
    let mut points: Vec<(f64, f32)> = scans
        .iter()
        .flat_map(|s| s.peaks.iter().copied())
        .filter(|&(_, intensity)| intensity > 0.0)
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut tracks = Vec::new();
    let mut start = 0usize;
    for i in 1..=points.len() {
        let split = i == points.len()
            || points[i].0 - points[i - 1].0 > config.track_tolerance.width_at(points[i - 1].0);
        if !split {
            continue;
        }
        let group = &points[start..i];
        start = i;
        if group.len() < config.min_track_scans {
            continue;
        }
        let total: f64 = group.iter().map(|&(_, x)| x as f64).sum();
        if total > 0.0 {
            tracks.push(group.iter().map(|&(m, x)| m * x as f64).sum::<f64>() / total);
        }
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_config_validation_fails_fast() {
        let mut config = PipelineConfig::default();
        config.file.min_track_scans = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.join.mass_tolerance = MzTolerance::Ppm(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_failed_file_policy_serde_tags() {
        assert_eq!(
            serde_json::to_string(&FailedFilePolicy::Exclude).unwrap(),
            "\"exclude\""
        );
        assert_eq!(
            serde_json::from_str::<FailedFilePolicy>("\"missing_slots\"").unwrap(),
            FailedFilePolicy::MissingSlots
        );
    }
}

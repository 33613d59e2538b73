use crate::errors::{
    DataProcessingError,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Acquisition polarity of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    #[serde(rename = "positive")]
    Positive,
    #[serde(rename = "negative")]
    Negative,
}

/// One instrument acquisition.
///
/// Scans are immutable once produced by a [`ScanSource`]: every downstream
/// stage reads them through shared references. `peaks` is sorted by m/z,
/// which the extraction code relies on for binary search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    /// Position of the scan within its stream (0-based, axis-ordered).
    pub index: usize,
    pub ms_level: u8,
    pub polarity: Polarity,
    /// Collision energy in eV, when the instrument reported one.
    pub collision_energy: Option<f32>,
    /// Chromatographic-axis value (retention time in seconds, retention
    /// index, or drift time depending on the instrument configuration).
    pub axis: f64,
    /// Centroided (m/z, intensity) pairs sorted by m/z.
    pub peaks: Vec<(f64, f32)>,
}

impl Scan {
    /// Summed intensity of all peaks inside `[mz_lo, mz_hi]`.
    pub fn intensity_in(&self, mz_lo: f64, mz_hi: f64) -> f32 {
        let start = self.peaks.partition_point(|&(mz, _)| mz < mz_lo);
        self.peaks[start..]
            .iter()
            .take_while(|&&(mz, _)| mz <= mz_hi)
            .map(|&(_, intensity)| intensity)
            .sum()
    }

    /// Intensity-weighted mean m/z and summed intensity inside the window.
    ///
    /// `None` when no peak falls inside the window.
    pub fn weighted_mz_in(&self, mz_lo: f64, mz_hi: f64) -> Option<(f64, f32)> {
        let start = self.peaks.partition_point(|&(mz, _)| mz < mz_lo);
        let mut sum_intensity = 0.0f64;
        let mut sum_weighted = 0.0f64;
        for &(mz, intensity) in self.peaks[start..].iter() {
            if mz > mz_hi {
                break;
            }
            sum_intensity += intensity as f64;
            sum_weighted += mz * intensity as f64;
        }
        if sum_intensity <= 0.0 {
            return None;
        }
        Some((sum_weighted / sum_intensity, sum_intensity as f32))
    }
}

/// The single inbound interface of the core: something that can hand out
/// scan arrays for one analysis file.
///
/// Vendor raw-file readers live behind this trait and are otherwise
/// invisible to the pipeline. The default methods cover the level- and
/// range-restricted loads in terms of `scans()`; implementors with an
/// index can override them.
pub trait ScanSource: Send + Sync {
    /// All scans of the file, ordered by chromatographic axis.
    fn scans(&self) -> &[Scan];

    /// Scans at one MS level, axis order preserved.
    fn scans_at_level(&self, ms_level: u8) -> Vec<&Scan> {
        self.scans()
            .iter()
            .filter(|s| s.ms_level == ms_level)
            .collect()
    }

    /// Scans whose axis value falls inside `[axis_lo, axis_hi]`.
    fn scans_in_axis_range(&self, axis_lo: f64, axis_hi: f64) -> Vec<&Scan> {
        self.scans()
            .iter()
            .filter(|s| s.axis >= axis_lo && s.axis <= axis_hi)
            .collect()
    }

    /// Distinct collision-energy values observed in the file, sorted.
    fn collision_energies(&self) -> Vec<f32> {
        let mut out: Vec<f32> = self
            .scans()
            .iter()
            .filter_map(|s| s.collision_energy)
            .collect();
        out.sort_by(f32::total_cmp);
        out.dedup();
        out
    }
}

/// In-memory [`ScanSource`], used by tests and the gap filler.
#[derive(Debug, Clone)]
pub struct InMemoryScans {
    scans: Vec<Scan>,
}

impl InMemoryScans {
    /// Wraps a scan array, sorting by axis and re-assigning scan indices.
    ///
    /// An empty stream is a usage error and fails fast. A stream with
    /// empty peak lists is fine, those scans simply contribute zero
    /// intensity everywhere.
    pub fn new(mut scans: Vec<Scan>) -> Result<Self> {
        if scans.is_empty() {
            return Err(DataProcessingError::ExpectedNonEmptyData {
                context: Some("InMemoryScans::new".to_string()),
            }
            .into());
        }
        scans.sort_by(|a, b| a.axis.total_cmp(&b.axis));
        for (i, scan) in scans.iter_mut().enumerate() {
            scan.index = i;
        }
        Ok(Self { scans })
    }
}

impl ScanSource for InMemoryScans {
    fn scans(&self) -> &[Scan] {
        &self.scans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(index: usize, axis: f64, peaks: Vec<(f64, f32)>) -> Scan {
        Scan {
            index,
            ms_level: 1,
            polarity: Polarity::Positive,
            collision_energy: None,
            axis,
            peaks,
        }
    }

    #[test]
    fn test_intensity_in_window() {
        let s = scan(0, 1.0, vec![(100.0, 10.0), (150.0, 20.0), (200.0, 30.0)]);
        assert_eq!(s.intensity_in(140.0, 160.0), 20.0);
        assert_eq!(s.intensity_in(90.0, 210.0), 60.0);
        assert_eq!(s.intensity_in(300.0, 400.0), 0.0);
    }

    #[test]
    fn test_weighted_mz() {
        let s = scan(0, 1.0, vec![(100.0, 10.0), (100.2, 30.0)]);
        let (mz, intensity) = s.weighted_mz_in(99.0, 101.0).unwrap();
        assert!((mz - 100.15).abs() < 1e-9, "got {}", mz);
        assert_eq!(intensity, 40.0);
        assert!(s.weighted_mz_in(200.0, 201.0).is_none());
    }

    #[test]
    fn test_source_sorts_and_reindexes() {
        let src = InMemoryScans::new(vec![
            scan(7, 2.0, vec![]),
            scan(3, 1.0, vec![]),
        ])
        .unwrap();
        assert_eq!(src.scans()[0].axis, 1.0);
        assert_eq!(src.scans()[0].index, 0);
        assert_eq!(src.scans()[1].index, 1);
    }

    #[test]
    fn test_empty_stream_is_an_error() {
        assert!(InMemoryScans::new(vec![]).is_err());
    }

    #[test]
    fn test_collision_energies_deduped() {
        let mut a = scan(0, 1.0, vec![]);
        a.collision_energy = Some(20.0);
        let mut b = scan(1, 2.0, vec![]);
        b.collision_energy = Some(40.0);
        let mut c = scan(2, 3.0, vec![]);
        c.collision_energy = Some(20.0);
        let src = InMemoryScans::new(vec![a, b, c]).unwrap();
        assert_eq!(src.collision_energies(), vec![20.0, 40.0]);
    }
}

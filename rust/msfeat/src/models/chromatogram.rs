use super::scan::Scan;
use crate::smoothing::{
    self,
    SmoothMethod,
};

/// One point of an extracted ion chromatogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChromatogramPoint {
    pub scan_index: usize,
    pub axis: f64,
    /// Intensity-weighted m/z of the peaks that contributed, or the window
    /// center when the scan had nothing in the window.
    pub mz: f64,
    pub intensity: f32,
}

/// An ordered-by-axis, finite sequence of chromatogram points.
#[derive(Debug, Clone, Default)]
pub struct Chromatogram {
    pub points: Vec<ChromatogramPoint>,
}

impl Chromatogram {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn intensities(&self) -> Vec<f32> {
        self.points.iter().map(|p| p.intensity).collect()
    }

    pub fn smoothed_intensities(&self, method: SmoothMethod) -> Vec<f32> {
        let raw = self.intensities();
        smoothing::smooth(&raw, method)
    }

    /// Trapezoidal area of the raw intensity over `[left, right]`
    /// (inclusive indices, axis units).
    pub fn area_above_zero(&self, left: usize, right: usize) -> f32 {
        integrate_trapezoid(&self.points, left, right, |p| p.intensity as f64) as f32
    }

    /// Trapezoidal area above a straight baseline drawn between the raw
    /// intensities at `left` and `right`; negative excursions clip to zero.
    pub fn area_above_baseline(&self, left: usize, right: usize) -> f32 {
        if left >= right || right >= self.points.len() {
            return 0.0;
        }
        let base_l = self.points[left].intensity as f64;
        let base_r = self.points[right].intensity as f64;
        let ax_l = self.points[left].axis;
        let ax_r = self.points[right].axis;
        let span = ax_r - ax_l;
        let baseline = |axis: f64| {
            if span <= 0.0 {
                base_l
            } else {
                base_l + (base_r - base_l) * (axis - ax_l) / span
            }
        };
        integrate_trapezoid(&self.points, left, right, |p| {
            (p.intensity as f64 - baseline(p.axis)).max(0.0)
        }) as f32
    }
}

fn integrate_trapezoid<F: Fn(&ChromatogramPoint) -> f64>(
    points: &[ChromatogramPoint],
    left: usize,
    right: usize,
    value: F,
) -> f64 {
    if left >= right || right >= points.len() {
        return 0.0;
    }
    let mut area = 0.0;
    for i in left..right {
        let dt = points[i + 1].axis - points[i].axis;
        area += 0.5 * (value(&points[i]) + value(&points[i + 1])) * dt;
    }
    area
}

/// Extracts the ion chromatogram for an m/z window.
///
/// Every scan in axis range contributes exactly one point, zero-intensity
/// ones included, so profiles extracted from the same scan set share a grid.
/// An empty window yields an empty chromatogram, never an error.
pub fn extract_chromatogram<'a, I>(
    scans: I,
    mz_range: (f64, f64),
    axis_range: Option<(f64, f64)>,
) -> Chromatogram
where
    I: IntoIterator<Item = &'a Scan>,
{
    let (mz_lo, mz_hi) = mz_range;
    let center = 0.5 * (mz_lo + mz_hi);
    let mut points = Vec::new();
    for scan in scans {
        if let Some((lo, hi)) = axis_range {
            if scan.axis < lo || scan.axis > hi {
                continue;
            }
        }
        let (mz, intensity) = scan
            .weighted_mz_in(mz_lo, mz_hi)
            .unwrap_or((center, 0.0));
        points.push(ChromatogramPoint {
            scan_index: scan.index,
            axis: scan.axis,
            mz,
            intensity,
        });
    }
    points.sort_by(|a, b| a.axis.total_cmp(&b.axis));
    Chromatogram { points }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scan::Polarity;

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
    fn test_extract_keeps_full_grid() {
        let scans = vec![
            scan(0, 1.0, vec![(200.0, 10.0)]),
            scan(1, 2.0, vec![]),
            scan(2, 3.0, vec![(200.0, 30.0)]),
        ];
        let chrom = extract_chromatogram(scans.iter(), (199.99, 200.01), None);
        assert_eq!(chrom.len(), 3);
        assert_eq!(chrom.points[1].intensity, 0.0);
        assert_eq!(chrom.points[1].mz, 200.0);
        assert_eq!(chrom.points[2].intensity, 30.0);
    }

    #[test]
    fn test_extract_axis_restriction() {
        let scans = vec![
            scan(0, 1.0, vec![(200.0, 10.0)]),
            scan(1, 2.0, vec![(200.0, 20.0)]),
            scan(2, 3.0, vec![(200.0, 30.0)]),
        ];
        let chrom = extract_chromatogram(scans.iter(), (199.9, 200.1), Some((1.5, 2.5)));
        assert_eq!(chrom.len(), 1);
        assert_eq!(chrom.points[0].scan_index, 1);
    }

    #[test]
    fn test_empty_window_is_empty_not_error() {
        let scans: Vec<Scan> = vec![];
        let chrom = extract_chromatogram(scans.iter(), (100.0, 100.1), None);
        assert!(chrom.is_empty());
        assert_eq!(chrom.area_above_zero(0, 10), 0.0);
    }

    #[test]
    fn test_trapezoid_area() {
        let scans: Vec<Scan> = (0..4)
            .map(|i| {
                let intensity = [0.0f32, 10.0, 10.0, 0.0][i];
                scan(i, i as f64, vec![(100.0, intensity)])
            })
            .collect();
        let chrom = extract_chromatogram(scans.iter(), (99.9, 100.1), None);
        let area = chrom.area_above_zero(0, 3);
        // (0+10)/2 + (10+10)/2 + (10+0)/2 = 20
        assert!((area - 20.0).abs() < 1e-6, "got {}", area);
    }

    #[test]
    fn test_area_above_baseline_flat_signal_is_zero() {
        let scans: Vec<Scan> = (0..5)
            .map(|i| scan(i, i as f64, vec![(100.0, 50.0)]))
            .collect();
        let chrom = extract_chromatogram(scans.iter(), (99.9, 100.1), None);
        assert!(chrom.area_above_baseline(0, 4).abs() < 1e-6);
        assert!(chrom.area_above_zero(0, 4) > 0.0);
    }
}

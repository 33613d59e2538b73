use arrayvec::ArrayVec;
use tracing::warn;

const MAX_WINDOW_SIZE: usize = 128;

/// Rolling median over a fixed window, kept sorted by insertion.
///
/// Window sizes above [`MAX_WINDOW_SIZE`] are clamped; a noise window that
/// wide adds nothing to the floor estimate anyway.
pub struct RollingMedian {
    window_size: usize,
    data: ArrayVec<(f32, usize), MAX_WINDOW_SIZE>,
    index: usize,
}

impl RollingMedian {
    pub fn new(window_size: usize) -> Self {
        let window_size = if window_size > MAX_WINDOW_SIZE {
            warn!(
                "Rolling median window {} clamped to {}",
                window_size, MAX_WINDOW_SIZE
            );
            MAX_WINDOW_SIZE
        } else {
            window_size.max(1)
        };
        Self {
            window_size,
            data: ArrayVec::new(),
            index: 0,
        }
    }

    pub fn add(&mut self, value: f32) {
        if self.data.len() >= self.window_size {
            let min_index_keep = (self.index + 1) - self.window_size;
            self.data.retain(|x| x.1 >= min_index_keep);
        }
        let entry = (value, self.index);
        let pos = self
            .data
            .iter()
            .position(|x| entry.0 < x.0)
            .unwrap_or(self.data.len());
        self.data.insert(pos, entry);
        self.index += 1;
    }

    /// `None` until a full window has been seen.
    pub fn median(&self) -> Option<f32> {
        if self.data.len() < self.window_size {
            None
        } else {
            Some(self.data[self.data.len() / 2].0)
        }
    }
}

/// Centered rolling median, padded with `pad_value` at both ends.
pub fn rolling_median_into(values: &[f32], window_size: usize, pad_value: f32, out: &mut Vec<f32>) {
    out.clear();
    out.resize(values.len(), pad_value);
    if values.len() < window_size {
        return;
    }
    let mut rolling = RollingMedian::new(window_size);
    let offset = window_size / 2;
    for (i, value) in values.iter().enumerate() {
        rolling.add(*value);
        if i >= window_size - 1 {
            out[i - offset] = rolling.median().unwrap_or(pad_value);
        }
    }
}

/// Noise floor of a chromatogram: the median of the lower half of its
/// intensities, zeros included. Sparse traces report a floor near zero,
/// which is correct for centroided data where most scans are empty.
pub fn low_intensity_median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let lower = &sorted[..(sorted.len() / 2).max(1)];
    lower[lower.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_median_basic() {
        let mut calc = RollingMedian::new(3);
        calc.add(10.0);
        assert_eq!(calc.median(), None);
        calc.add(20.0);
        calc.add(30.0);
        assert_eq!(calc.median(), Some(20.0));
        calc.add(1.0);
        calc.add(1.0);
        calc.add(1.0);
        assert_eq!(calc.median(), Some(1.0));
    }

    #[test]
    fn test_rolling_median_into_suppresses_spikes() {
        let input = vec![1.0, 2.0, 30.0, 4.0, 5.0, 60.0, 7.0, 8.0, 9.0];
        let mut out = Vec::new();
        rolling_median_into(&input, 3, f32::NAN, &mut out);
        assert!(out[0].is_nan());
        assert!(out[8].is_nan());
        assert_eq!(out[1], 2.0);
        assert_eq!(out[2], 4.0);
        assert_eq!(out[5], 7.0);
    }

    #[test]
    fn test_rolling_median_into_short_input() {
        let input = vec![1.0, 2.0];
        let mut out = Vec::new();
        rolling_median_into(&input, 5, 0.0, &mut out);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_low_intensity_median() {
        let values = vec![0.0, 10.0, 12.0, 11.0, 1000.0, 2000.0, 9.0, 0.0];
        let noise = low_intensity_median(&values);
        assert!(noise <= 12.0, "noise floor polluted by signal: {}", noise);
        assert!(noise >= 9.0);
    }

    #[test]
    fn test_low_intensity_median_all_zero() {
        assert_eq!(low_intensity_median(&[0.0, 0.0]), 0.0);
        assert_eq!(low_intensity_median(&[]), 0.0);
    }
}

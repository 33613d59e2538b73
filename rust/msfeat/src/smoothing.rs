//! Chromatogram smoothing strategies.
//!
//! A closed enum dispatched by value: the spotter, the deconvolver and the
//! gap filler all take a [`SmoothMethod`] so one configuration drives every
//! smoothing pass of a run.

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum SmoothMethod {
    #[serde(rename = "moving_average")]
    MovingAverage { window: usize },
    #[serde(rename = "savitzky_golay")]
    SavitzkyGolay { window: usize },
    #[serde(rename = "loess")]
    Loess { window: usize },
}

impl Default for SmoothMethod {
    fn default() -> Self {
        SmoothMethod::MovingAverage { window: 3 }
    }
}

/// Smooths `values` into `out`, reusing the output buffer.
///
/// Inputs shorter than the window copy through unchanged. Output length
/// always equals input length.
pub fn smooth_into(values: &[f32], method: SmoothMethod, out: &mut Vec<f32>) {
    out.clear();
    out.extend_from_slice(values);
    if values.is_empty() {
        return;
    }
    match method {
        SmoothMethod::MovingAverage { window } => moving_average(values, window, out),
        SmoothMethod::SavitzkyGolay { window } => savitzky_golay(values, window, out),
        SmoothMethod::Loess { window } => loess(values, window, out),
    }
}

pub fn smooth(values: &[f32], method: SmoothMethod) -> Vec<f32> {
    let mut out = Vec::new();
    smooth_into(values, method, &mut out);
    out
}

fn moving_average(values: &[f32], window: usize, out: &mut [f32]) {
    let half = (window.max(1)) / 2;
    if half == 0 {
        return;
    }
    for i in 0..values.len() {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(values.len());
        let sum: f64 = values[lo..hi].iter().map(|&x| x as f64).sum();
        out[i] = (sum / (hi - lo) as f64) as f32;
    }
}

// Standard quadratic/cubic Savitzky-Golay convolution weights.
const SG_5: [f64; 5] = [-3.0, 12.0, 17.0, 12.0, -3.0];
const SG_7: [f64; 7] = [-2.0, 3.0, 6.0, 7.0, 6.0, 3.0, -2.0];
const SG_9: [f64; 9] = [-21.0, 14.0, 39.0, 54.0, 59.0, 54.0, 39.0, 14.0, -21.0];

fn savitzky_golay(values: &[f32], window: usize, out: &mut [f32]) {
    let (coeffs, norm): (&[f64], f64) = if window <= 5 {
        (&SG_5, 35.0)
    } else if window <= 7 {
        (&SG_7, 21.0)
    } else {
        (&SG_9, 231.0)
    };
    let half = coeffs.len() / 2;
    if values.len() < coeffs.len() {
        return;
    }
    for i in half..values.len() - half {
        let mut acc = 0.0f64;
        for (k, &c) in coeffs.iter().enumerate() {
            acc += c * values[i + k - half] as f64;
        }
        out[i] = (acc / norm) as f32;
    }
}

fn loess(values: &[f32], window: usize, out: &mut [f32]) {
    let window = window.max(3);
    if values.len() < window {
        return;
    }
    let half = window / 2;
    for i in 0..values.len() {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(values.len());
        let max_dist = (i - lo).max(hi - 1 - i).max(1) as f64;

        // Tricube-weighted local linear regression on the scan index.
        let mut sw = 0.0f64;
        let mut swx = 0.0f64;
        let mut swy = 0.0f64;
        let mut swxx = 0.0f64;
        let mut swxy = 0.0f64;
        for j in lo..hi {
            let d = (j as f64 - i as f64).abs() / max_dist;
            let w = (1.0 - d * d * d).powi(3).max(0.0);
            let x = j as f64;
            let y = values[j] as f64;
            sw += w;
            swx += w * x;
            swy += w * y;
            swxx += w * x * x;
            swxy += w * x * y;
        }
        let denom = sw * swxx - swx * swx;
        let fitted = if denom.abs() < 1e-12 {
            swy / sw.max(1e-12)
        } else {
            let slope = (sw * swxy - swx * swy) / denom;
            let intercept = (swy - slope * swx) / sw;
            intercept + slope * i as f64
        };
        out[i] = fitted as f32;
    }
}

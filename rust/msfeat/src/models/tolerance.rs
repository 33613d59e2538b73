use crate::errors::DataProcessingError;
use serde::{
    Deserialize,
    Serialize,
};

/// Mass tolerance, absolute or relative.
///
/// Convention: the payload is the half-width of the window, always positive.
/// A tolerance of `Da(0.01)` on a value of 200.0 means the range
/// `(199.99, 200.01)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MzTolerance {
    #[serde(rename = "da")]
    Da(f64),
    #[serde(rename = "ppm")]
    Ppm(f64),
}

impl Default for MzTolerance {
    fn default() -> Self {
        MzTolerance::Ppm(20.0)
    }
}

impl MzTolerance {
    /// Window half-width in daltons at the given m/z.
    pub fn width_at(&self, mz: f64) -> f64 {
        match self {
            MzTolerance::Da(x) => *x,
            MzTolerance::Ppm(x) => mz * x / 1e6,
        }
    }

    /// `(lo, hi)` window around the given m/z.
    pub fn range(&self, mz: f64) -> (f64, f64) {
        let w = self.width_at(mz);
        (mz - w, mz + w)
    }

    pub fn contains(&self, center: f64, other: f64) -> bool {
        (other - center).abs() <= self.width_at(center)
    }

    /// Fail-fast check for non-positive tolerances (usage error).
    pub fn validate(&self, context: &str) -> Result<(), DataProcessingError> {
        let value = match self {
            MzTolerance::Da(x) => *x,
            MzTolerance::Ppm(x) => *x,
        };
        if value <= 0.0 || !value.is_finite() {
            return Err(DataProcessingError::ExpectedPositiveValue {
                value,
                context: context.to_string(),
            });
        }
        Ok(())
    }
}

/// Tolerance on the chromatographic axis (same unit as [`super::Scan::axis`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AxisTolerance(pub f64);

impl Default for AxisTolerance {
    fn default() -> Self {
        AxisTolerance(0.1)
    }
}

impl AxisTolerance {
    pub fn range(&self, axis: f64) -> (f64, f64) {
        (axis - self.0, axis + self.0)
    }

    pub fn contains(&self, center: f64, other: f64) -> bool {
        (other - center).abs() <= self.0
    }

    pub fn validate(&self, context: &str) -> Result<(), DataProcessingError> {
        if self.0 <= 0.0 || !self.0.is_finite() {
            return Err(DataProcessingError::ExpectedPositiveValue {
                value: self.0,
                context: context.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppm_range() {
        let tol = MzTolerance::Ppm(20.0);
        let (lo, hi) = tol.range(500.0);
        assert!((lo - 499.99).abs() < 1e-6);
        assert!((hi - 500.01).abs() < 1e-6);
    }

    #[test]
    fn test_da_contains() {
        let tol = MzTolerance::Da(0.01);
        assert!(tol.contains(200.0, 200.0099));
        assert!(!tol.contains(200.0, 200.02));
    }

    #[test]
    fn test_validate_rejects_nonpositive() {
        assert!(MzTolerance::Da(0.0).validate("t").is_err());
        assert!(MzTolerance::Ppm(-5.0).validate("t").is_err());
        assert!(MzTolerance::Da(0.01).validate("t").is_ok());
        assert!(AxisTolerance(0.0).validate("t").is_err());
        assert!(AxisTolerance(0.5).validate("t").is_ok());
    }

    #[test]
    fn test_serde_roundtrip() {
        let tol = MzTolerance::Ppm(10.0);
        let txt = serde_json::to_string(&tol).unwrap();
        assert_eq!(txt, "{\"ppm\":10.0}");
        let back: MzTolerance = serde_json::from_str(&txt).unwrap();
        assert_eq!(back, tol);
    }
}

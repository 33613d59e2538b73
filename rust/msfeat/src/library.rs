//! Reference spectral libraries.
//!
//! A library is a JSON array of reference spectra. Loading validates every
//! entry once so search never has to handle malformed references.

use crate::errors::{
    MsfeatError,
    Result,
};
use crate::models::tolerance::MzTolerance;
use crate::spectral_match::{
    score_match,
    MatchConfig,
    MatchResult,
    SpectrumQuery,
};
use crate::utils::correlation::cosine_similarity;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSpectrum {
    pub name: String,
    pub precursor_mz: f64,
    /// (mass, intensity) pairs, ascending mass.
    pub peaks: Vec<(f64, f32)>,
    #[serde(default)]
    pub axis: Option<f64>,
    #[serde(default)]
    pub ccs: Option<f64>,
    /// Relative abundances of M, M+1, M+2, ...
    #[serde(default)]
    pub isotope_pattern: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct SpectralLibrary {
    entries: Vec<ReferenceSpectrum>,
}

impl SpectralLibrary {
    pub fn new(entries: Vec<ReferenceSpectrum>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.peaks.is_empty() {
                return Err(MsfeatError::LibraryParsing {
                    msg: format!("reference {} ({}) has no peaks", i, entry.name),
                });
            }
            if !entry.peaks.windows(2).all(|w| w[0].0 <= w[1].0) {
                return Err(MsfeatError::LibraryParsing {
                    msg: format!("reference {} ({}) peaks not sorted by mass", i, entry.name),
                });
            }
        }
        info!("Loaded spectral library with {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let entries: Vec<ReferenceSpectrum> = serde_json::from_str(text)?;
        Self::new(entries)
    }

    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        let entries: Vec<ReferenceSpectrum> = serde_json::from_reader(reader)
            .map_err(MsfeatError::from)?;
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ReferenceSpectrum] {
        &self.entries
    }

    /// Scores the query against every reference whose precursor mass fits
    /// `precursor_tolerance`, best total score first. `library_id` in each
    /// result is the entry's index in this library.
    pub fn search(
        &self,
        query: &SpectrumQuery<'_>,
        query_isotope_pattern: Option<&[f32]>,
        precursor_tolerance: MzTolerance,
        config: &MatchConfig,
    ) -> Result<Vec<MatchResult>> {
        precursor_tolerance.validate("library precursor_tolerance")?;
        config.validate()?;
        let mut results = Vec::new();
        for (library_id, entry) in self.entries.iter().enumerate() {
            if !precursor_tolerance.contains(query.precursor_mz, entry.precursor_mz) {
                continue;
            }
            let isotope_similarity = match (query_isotope_pattern, entry.isotope_pattern.as_deref())
            {
                (Some(q), Some(r)) => isotope_pattern_similarity(q, r),
                _ => None,
            };
            let result = score_match(
                query,
                &entry.peaks,
                library_id,
                entry.axis,
                entry.ccs,
                isotope_similarity,
                config,
            )?;
            results.push(result);
        }
        results.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        Ok(results)
    }
}

/// Cosine similarity of two abundance envelopes, shorter one zero-padded.
fn isotope_pattern_similarity(query: &[f32], reference: &[f32]) -> Option<f32> {
    if query.is_empty() || reference.is_empty() {
        return None;
    }
    let len = query.len().max(reference.len());
    let mut q = query.to_vec();
    let mut r = reference.to_vec();
    q.resize(len, 0.0);
    r.resize(len, 0.0);
    cosine_similarity(&q, &r).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY_JSON: &str = r#"[
        {
            "name": "caffeine",
            "precursor_mz": 195.0877,
            "peaks": [[110.0713, 35.0], [138.0662, 100.0], [195.0877, 20.0]],
            "axis": 4.2,
            "isotope_pattern": [100.0, 9.2, 0.8]
        },
        {
            "name": "theobromine",
            "precursor_mz": 181.0720,
            "peaks": [[108.0556, 40.0], [163.0614, 100.0]]
        }
    ]"#;

    #[test]
    fn test_load_and_search() {
        let library = SpectralLibrary::from_json_str(LIBRARY_JSON).unwrap();
        assert_eq!(library.len(), 2);

        let peaks = vec![(110.0713, 30.0), (138.0662, 100.0), (195.0877, 25.0)];
        let query = SpectrumQuery {
            peaks: &peaks,
            precursor_mz: 195.088,
            axis: Some(4.25),
            ccs: None,
        };
        let results = library
            .search(&query, None, MzTolerance::Da(0.01), &MatchConfig::default())
            .unwrap();
        // Only caffeine passes the precursor filter.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].library_id, 0);
        assert!(results[0].is_spectrum_match);
        assert!(results[0].matched_percent > 0.99);
    }

    #[test]
    fn test_results_sorted_by_total_score() {
        let library = SpectralLibrary::from_json_str(LIBRARY_JSON).unwrap();
        let peaks = vec![(110.0713, 35.0), (138.0662, 100.0)];
        let query = SpectrumQuery {
            peaks: &peaks,
            precursor_mz: 190.0,
            axis: None,
            ccs: None,
        };
        // Wide tolerance so both entries are scored.
        let results = library
            .search(&query, None, MzTolerance::Da(10.0), &MatchConfig::default())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].total_score >= results[1].total_score);
        assert_eq!(results[0].library_id, 0);
    }

    #[test]
    fn test_isotope_pattern_feeds_total_score() {
        let library = SpectralLibrary::from_json_str(LIBRARY_JSON).unwrap();
        let peaks = vec![(110.0713, 35.0), (138.0662, 100.0), (195.0877, 20.0)];
        let query = SpectrumQuery {
            peaks: &peaks,
            precursor_mz: 195.0877,
            axis: None,
            ccs: None,
        };
        let pattern = [100.0f32, 9.0, 0.9];
        let results = library
            .search(&query, Some(&pattern), MzTolerance::Da(0.01), &MatchConfig::default())
            .unwrap();
        let sim = results[0].isotope_similarity.unwrap();
        assert!(sim > 0.99, "isotope similarity {}", sim);
    }

    #[test]
    fn test_invalid_library_rejected() {
        let missing_peaks = r#"[{"name": "x", "precursor_mz": 100.0, "peaks": []}]"#;
        assert!(SpectralLibrary::from_json_str(missing_peaks).is_err());
        let unsorted =
            r#"[{"name": "x", "precursor_mz": 100.0, "peaks": [[200.0, 1.0], [100.0, 1.0]]}]"#;
        assert!(SpectralLibrary::from_json_str(unsorted).is_err());
        assert!(SpectralLibrary::from_json_str("not json").is_err());
    }
}

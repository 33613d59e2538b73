//! Per-file feature extraction for untargeted metabolomics.
//!
//! Takes one file's scan stream from chromatogram extraction through peak
//! spotting, isotope linking, spectral deconvolution and library matching.
//! Cross-file alignment lives in the companion `msalign` crate.

pub mod deconvolution;
pub mod errors;
pub mod isotopes;
pub mod library;
pub mod models;
pub mod peak_spotting;
pub mod smoothing;
pub mod spectral_match;
pub mod utils;

pub use deconvolution::{
    deconvolute_features,
    DeconvolutionConfig,
    PseudoSpectrum,
};
pub use errors::{
    DataProcessingError,
    MsfeatError,
    Result,
};
pub use isotopes::{
    link_isotopes,
    IsotopeLinkerConfig,
    C13_C12_MASS_DIFFERENCE,
};
pub use library::{
    ReferenceSpectrum,
    SpectralLibrary,
};
pub use models::{
    extract_chromatogram,
    AxisTolerance,
    Chromatogram,
    ChromatogramPoint,
    InMemoryScans,
    IsotopeLink,
    MzTolerance,
    PeakFeature,
    PeakShape,
    Polarity,
    Scan,
    ScanSource,
};
pub use peak_spotting::{
    spot_peaks,
    PeakSpotterConfig,
};
pub use smoothing::{
    smooth,
    smooth_into,
    SmoothMethod,
};
pub use spectral_match::{
    batch_dot_product,
    dot_product,
    matched_peaks,
    score_match,
    DotProductVariant,
    MatchConfig,
    MatchResult,
    SpectrumQuery,
};

pub mod chromatogram;
pub mod feature;
pub mod scan;
pub mod tolerance;

pub use chromatogram::{
    Chromatogram,
    ChromatogramPoint,
    extract_chromatogram,
};
pub use feature::{
    IsotopeLink,
    PeakFeature,
    PeakShape,
};
pub use scan::{
    InMemoryScans,
    Polarity,
    Scan,
    ScanSource,
};
pub use tolerance::{
    AxisTolerance,
    MzTolerance,
};

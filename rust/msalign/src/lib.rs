//! Cross-file alignment and run orchestration.
//!
//! Consumes per-file feature lists from `msfeat` and produces the aligned
//! spot table: joining, gap filling, refinement, plus the parallel
//! pipeline driving the per-file stages with progress and cancellation.

pub mod errors;
pub mod gap_filling;
pub mod joiner;
pub mod pipeline;
pub mod refinement;

pub use errors::{
    MsalignError,
    Result,
};
pub use gap_filling::{
    fill_gaps,
    GapFillConfig,
};
pub use joiner::{
    join_files,
    AlignmentSpot,
    JoinConfig,
    SlotPeak,
};
pub use pipeline::{
    run_pipeline,
    CancellationToken,
    FailedFilePolicy,
    FileFailure,
    FileProcessConfig,
    FileResult,
    PipelineConfig,
    PipelineOutput,
    PipelineStage,
    ProgressCallback,
    ProgressEvent,
    RunStatus,
};
pub use refinement::{
    refine,
    RefineConfig,
};

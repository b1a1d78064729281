mod asar;
mod error;
mod fs_ops;
mod guard;
mod layout;
mod patcher;
mod pipeline;
mod probe;
mod retry;
mod stage;
mod substitution;

pub use asar::{AsarArchive, AsarEntry, AsarEntryKind};
pub use error::{PatchError, PipelineError, ProbeError, RetryError, StageError};
pub use fs_ops::{remove_file_if_exists, FsOps, StdFs};
pub use guard::{GuardOutcome, ProcessControl, ProcessGuard, SystemProcessControl};
pub use layout::{default_tool_prefix, BundlePaths, ToolLayout};
pub use patcher::{
    PatchOptions, PatchOutcome, PatchReport, ResourcePatcher, StepRecord, StepStatus,
};
pub use pipeline::{
    Decisions, PatchPipeline, PayloadSource, PipelineConfig, PipelineReport, PipelineRequest,
    PlannedRun,
};
pub use probe::probe;
pub use retry::{is_lock_error, with_retry, RetryPolicy};
pub use stage::{run_command, stage, Extractor, StagedPayload, StagingArea};
pub use substitution::{AssetSelector, Substitution, SubstitutionResult};

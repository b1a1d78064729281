mod archive;
mod plan;
mod profile;
mod state;
mod version;

pub use archive::ArchiveType;
pub use plan::{reconcile, Plan, PlanStep, ReconcileError};
pub use profile::{
    BundleLayout, ExtractorKind, PatchProfile, PatchSettings, PayloadSettings, ProcessSettings,
    RetrySettings, ToolchainSettings,
};
pub use state::{InstallationState, ProbeReport, RequestedAction};
pub use version::{compare_versions, VersionComparison, VersionInfo, VersionSource};

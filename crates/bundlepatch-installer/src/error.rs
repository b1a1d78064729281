use std::io;
use std::path::PathBuf;

use bundlepatch_core::{PlanStep, ReconcileError};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to inspect {}: {source}", .path.display())]
pub struct ProbeError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("payload archive {} could not be read: {reason}", .path.display())]
    CorruptArchive { path: PathBuf, reason: String },
    #[error("payload has no '{entry}' root (expected at {})", .path.display())]
    MissingExpectedEntry { entry: String, path: PathBuf },
    #[error("failed to write staged payload at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("still locked after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Failed(io::Error),
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("staged payload {} is missing or empty; refusing to move it", .path.display())]
    EmptyStage { path: PathBuf },
    #[error("step {} failed on {}: {source}", .step.as_str(), .path.display())]
    Step {
        step: PlanStep,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "step {} gave up on locked {} after {attempts} attempts: {source}",
        .step.as_str(),
        .path.display()
    )]
    Locked {
        step: PlanStep,
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("no asset matching '{pattern}' under {}", .dir.display())]
    TargetNotFound { dir: PathBuf, pattern: String },
    #[error("none of the matched assets contain the substitution target: {}", .files.join(", "))]
    NeedleNotFound { files: Vec<String> },
    #[error("asset {} could not be read: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("asset {} could not be rewritten: {reason}", .path.display())]
    Unwritable { path: PathBuf, reason: String },
}

impl PatchError {
    pub(crate) fn from_retry(step: PlanStep, path: PathBuf, err: RetryError) -> Self {
        match err {
            RetryError::Exhausted { attempts, source } => Self::Locked {
                step,
                path,
                attempts,
                source,
            },
            RetryError::Failed(source) => Self::Step { step, path, source },
        }
    }

    pub fn step(&self) -> PlanStep {
        match self {
            Self::EmptyStage { .. } => PlanStep::MoveStaged,
            Self::Step { step, .. } | Self::Locked { step, .. } => *step,
            Self::TargetNotFound { .. }
            | Self::NeedleNotFound { .. }
            | Self::Unreadable { .. }
            | Self::Unwritable { .. } => PlanStep::PatchAssets,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("overwriting the existing patched app was not confirmed; nothing was changed")]
    ConfirmationDeclined,
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("failed to prepare staging area {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Workspace { .. } => 1,
            Self::Probe(_) => 2,
            Self::Reconcile(ReconcileError::Ambiguous) => 3,
            Self::Reconcile(ReconcileError::NotInstalled) => 4,
            Self::ConfirmationDeclined => 5,
            Self::Stage(_) => 6,
            Self::Patch(PatchError::Locked { .. }) => 7,
            Self::Patch(_) => 8,
        }
    }

    /// Manual follow-up the user can take, when one exists.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Probe(_) => Some("check that the install root is readable by this user".into()),
            Self::Reconcile(ReconcileError::Ambiguous) => Some(
                "delete either the unpacked app folder or the legacy unpacked folder, then rerun"
                    .into(),
            ),
            Self::Reconcile(ReconcileError::NotInstalled) => {
                Some("use `install` for a fresh install".into())
            }
            Self::ConfirmationDeclined => {
                Some("rerun with --yes or use `update` to replace the patched app".into())
            }
            Self::Stage(StageError::CorruptArchive { .. }) => Some(
                "re-download the payload with --force-redownload, or reinstall the application if its own bundle is damaged"
                    .into(),
            ),
            Self::Stage(StageError::MissingExpectedEntry { entry, .. }) => Some(format!(
                "'{entry}' was not found; pass --payload, set payload.url, or reinstall the application"
            )),
            Self::Stage(StageError::Io { .. }) => None,
            Self::Patch(PatchError::Locked { path, .. }) => Some(format!(
                "close every program holding {} and rerun",
                path.display()
            )),
            Self::Patch(err) if err.step() == PlanStep::PatchAssets => Some(
                "the application version may not match this profile; the unpacked app is in place but unpatched"
                    .into(),
            ),
            Self::Patch(PatchError::Step { step, .. }) if *step == PlanStep::MoveStaged => Some(
                "the app folder may be partially written; rerun `update` to replace it".into(),
            ),
            Self::Patch(_) | Self::Workspace { .. } => None,
        }
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use bundlepatch_core::{
    compare_versions, reconcile, ArchiveType, ExtractorKind, InstallationState, PatchProfile, Plan,
    ProbeReport, RequestedAction, VersionComparison, VersionInfo,
};
use tracing::{info, warn};

use crate::error::{PipelineError, StageError};
use crate::fs_ops::{FsOps, StdFs};
use crate::guard::{GuardOutcome, ProcessControl, ProcessGuard, SystemProcessControl};
use crate::layout::{BundlePaths, ToolLayout};
use crate::patcher::{PatchOptions, PatchReport, ResourcePatcher};
use crate::probe::probe;
use crate::retry::RetryPolicy;
use crate::stage::{stage, Extractor, StagedPayload, StagingArea};
use crate::substitution::{AssetSelector, Substitution};

/// Where the fresh `app/` tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    /// A complete, closed archive already on local storage.
    Archive {
        path: PathBuf,
        archive_type: ArchiveType,
    },
    /// The packed bundle sitting in the install root.
    InstalledBundle,
}

/// User choices, resolved before the pipeline starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decisions {
    pub overwrite_consent: bool,
    pub remove_update_manifest: bool,
    pub remove_leftover_manifest: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub action: RequestedAction,
    pub decisions: Decisions,
    pub payload: PayloadSource,
    pub release_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub paths: BundlePaths,
    pub tool: ToolLayout,
    pub process_name: String,
    pub max_wait: Duration,
    pub retry: RetryPolicy,
    pub selector: AssetSelector,
    pub substitution: Substitution,
    pub payload_root: String,
    pub extractor: Extractor,
}

impl PipelineConfig {
    /// `extract_command` is only consulted for the external extractor.
    pub fn from_profile(
        profile: &PatchProfile,
        install_root: PathBuf,
        tool: ToolLayout,
        substitution: Substitution,
        extract_command: Option<PathBuf>,
    ) -> Self {
        let extractor = match (profile.toolchain.extractor, extract_command) {
            (ExtractorKind::External, Some(command)) => Extractor::External { command },
            (ExtractorKind::External, None) => Extractor::External {
                command: PathBuf::from(&profile.toolchain.tool_command),
            },
            (ExtractorKind::InProcess, _) => Extractor::InProcess,
        };

        Self {
            paths: BundlePaths::new(install_root, &profile.bundle),
            tool,
            process_name: profile.process.name.clone(),
            max_wait: Duration::from_secs(profile.process.max_wait_secs),
            retry: RetryPolicy::new(
                profile.retry.max_attempts,
                Duration::from_secs(profile.retry.backoff_secs),
            ),
            selector: AssetSelector::from_settings(&profile.patch),
            substitution,
            payload_root: profile.payload.root().to_string(),
            extractor,
        }
    }
}

/// Probe and plan for one run, before anything is staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRun {
    pub probe: ProbeReport,
    pub plan: Plan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub probe: ProbeReport,
    pub plan: Plan,
    pub version: Option<VersionComparison>,
    pub guard: GuardOutcome,
    pub patch: PatchReport,
}

pub struct PatchPipeline<'a> {
    config: &'a PipelineConfig,
    fs: &'a dyn FsOps,
    process: &'a dyn ProcessControl,
    poll_interval: Option<Duration>,
}

impl<'a> PatchPipeline<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            fs: &StdFs,
            process: &SystemProcessControl,
            poll_interval: None,
        }
    }

    pub fn with_fs(mut self, fs: &'a dyn FsOps) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_process_control(mut self, process: &'a dyn ProcessControl) -> Self {
        self.process = process;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    /// Read-only: probes and reconciles without touching anything.
    pub fn plan(&self, action: RequestedAction) -> Result<PlannedRun, PipelineError> {
        let probe = probe(&self.config.paths)?;
        let plan = reconcile(action, &probe)?;
        info!(
            action = action.as_str(),
            state = plan.state().as_str(),
            steps = plan.steps().len(),
            "reconciled install root"
        );
        Ok(PlannedRun { probe, plan })
    }

    pub fn run(&self, request: &PipelineRequest) -> Result<PipelineReport, PipelineError> {
        let PlannedRun { probe, plan } = self.plan(request.action)?;
        let version = self.compare_release(&probe, request.release_version.as_deref());

        if plan.requires_confirmation() && !request.decisions.overwrite_consent {
            return Err(PipelineError::ConfirmationDeclined);
        }

        // With no download and no archive left, the patched app folder is the
        // only copy of the bundle, so it is patched where it stands.
        let in_place = request.payload == PayloadSource::InstalledBundle
            && plan.state() == InstallationState::PatchedOnly
            && !self.config.paths.archive_path().is_file();
        let staging;
        let staged = if in_place {
            None
        } else {
            staging = StagingArea::create(&self.config.tool, "stage").map_err(|source| {
                PipelineError::Workspace {
                    path: self.config.tool.tmp_state_dir(),
                    source,
                }
            })?;
            Some(self.stage_payload(&request.payload, staging.path())?)
        };

        let mut guard = ProcessGuard::new(self.process);
        if let Some(interval) = self.poll_interval {
            guard = guard.with_poll_interval(interval);
        }
        let guard_outcome = guard.ensure_stopped(&self.config.process_name, self.config.max_wait);
        if guard_outcome == GuardOutcome::StillRunning {
            warn!(
                process = %self.config.process_name,
                "process still running after wait; file operations may hit locks"
            );
        }

        let patcher = ResourcePatcher::new(
            self.fs,
            self.config.retry,
            &self.config.paths,
            &self.config.selector,
            &self.config.substitution,
        );
        let options = PatchOptions {
            remove_update_manifest: request.decisions.remove_update_manifest,
            remove_leftover_manifest: request.decisions.remove_leftover_manifest,
        };
        let patch = match &staged {
            Some(staged) => patcher.apply(&plan, staged, &options)?,
            None => patcher.apply_in_place(&plan, &options)?,
        };
        info!(
            rewritten = patch.rewritten.len(),
            warnings = patch.warnings.len(),
            "pipeline finished"
        );

        Ok(PipelineReport {
            probe,
            plan,
            version,
            guard: guard_outcome,
            patch,
        })
    }

    fn stage_payload(
        &self,
        payload: &PayloadSource,
        work_dir: &Path,
    ) -> Result<StagedPayload, PipelineError> {
        let (archive_path, archive_type) = match payload {
            PayloadSource::Archive { path, archive_type } => (path.clone(), *archive_type),
            PayloadSource::InstalledBundle => {
                (self.config.paths.archive_path(), ArchiveType::Asar)
            }
        };
        if !archive_path.is_file() {
            return Err(StageError::MissingExpectedEntry {
                entry: archive_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: archive_path,
            }
            .into());
        }
        Ok(stage(
            &archive_path,
            archive_type,
            work_dir,
            &self.config.payload_root,
            &self.config.extractor,
        )?)
    }

    fn compare_release(
        &self,
        probe: &ProbeReport,
        release: Option<&str>,
    ) -> Option<VersionComparison> {
        let installed = VersionInfo::local(probe.manifest_version.as_deref()?);
        let release = VersionInfo::remote(release?);
        let comparison = compare_versions(&installed, &release);
        if comparison != VersionComparison::Same {
            warn!(
                installed = %installed.value,
                release = %release.value,
                "installed version differs from payload release; continuing"
            );
        }
        Some(comparison)
    }
}

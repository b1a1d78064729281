use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bundlepatch_core::{InstallationState, Plan, PlanStep};
use bundlepatch_security::sha256_hex;
use tracing::{debug, info, warn};

use crate::error::{PatchError, RetryError};
use crate::fs_ops::{collect_relative_files, copy_dir_recursive, dir_has_entries, FsOps};
use crate::layout::BundlePaths;
use crate::retry::{with_retry, RetryPolicy};
use crate::stage::StagedPayload;
use crate::substitution::{AssetSelector, Substitution, SubstitutionResult};

/// Caller-resolved choices for the best-effort pruning step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOptions {
    pub remove_update_manifest: bool,
    pub remove_leftover_manifest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    AlreadyPatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Skipped(String),
    Warned(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: PlanStep,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub outcome: PatchOutcome,
    pub steps: Vec<StepRecord>,
    pub rewritten: Vec<PathBuf>,
    pub already_patched: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl PatchReport {
    fn new() -> Self {
        Self {
            outcome: PatchOutcome::Applied,
            steps: Vec::new(),
            rewritten: Vec::new(),
            already_patched: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn record(&mut self, step: PlanStep, status: StepStatus) {
        if let StepStatus::Warned(message) = &status {
            self.warnings.push(message.clone());
        }
        self.steps.push(StepRecord { step, status });
    }
}

/// Where the new `app/` tree comes from for one run.
#[derive(Debug, Clone, Copy)]
enum TreeSource<'p> {
    Staged { app: &'p Path, in_sync: bool },
    Installed,
}

pub struct ResourcePatcher<'a> {
    fs: &'a dyn FsOps,
    retry: RetryPolicy,
    paths: &'a BundlePaths,
    selector: &'a AssetSelector,
    substitution: &'a Substitution,
}

impl<'a> ResourcePatcher<'a> {
    pub fn new(
        fs: &'a dyn FsOps,
        retry: RetryPolicy,
        paths: &'a BundlePaths,
        selector: &'a AssetSelector,
        substitution: &'a Substitution,
    ) -> Self {
        Self {
            fs,
            retry,
            paths,
            selector,
            substitution,
        }
    }

    pub fn apply(
        &self,
        plan: &Plan,
        staged: &StagedPayload,
        options: &PatchOptions,
    ) -> Result<PatchReport, PatchError> {
        let staged_app = staged.app_dir();
        if !staged_app.is_dir() || !dir_has_entries(staged_app) {
            return Err(PatchError::EmptyStage {
                path: staged_app.to_path_buf(),
            });
        }

        let report = PatchReport::new();
        let app_dir = self.paths.app_dir();
        let in_sync = plan.state() == InstallationState::PatchedOnly
            && self.installed_tree_in_sync(staged_app, &app_dir);
        if in_sync {
            info!(app = %app_dir.display(), "installed app already matches patched payload");
        }

        self.run_steps(
            plan,
            options,
            TreeSource::Staged {
                app: staged_app,
                in_sync,
            },
            report,
        )
    }

    /// Patches the installed `app/` where it stands. Used when the app folder
    /// is the only copy of the bundle left, so there is nothing to stage.
    pub fn apply_in_place(
        &self,
        plan: &Plan,
        options: &PatchOptions,
    ) -> Result<PatchReport, PatchError> {
        info!(app = %self.paths.app_dir().display(), "patching installed app in place");
        self.run_steps(plan, options, TreeSource::Installed, PatchReport::new())
    }

    fn run_steps(
        &self,
        plan: &Plan,
        options: &PatchOptions,
        source: TreeSource<'_>,
        mut report: PatchReport,
    ) -> Result<PatchReport, PatchError> {
        for step in plan.steps() {
            match (*step, source) {
                (PlanStep::StageBundle | PlanStep::StopProcess, _) => {}
                (PlanStep::ClearDestination | PlanStep::MoveStaged, TreeSource::Installed) => {
                    report.record(*step, StepStatus::Skipped("patched in place".into()))
                }
                (
                    PlanStep::ClearDestination | PlanStep::MoveStaged,
                    TreeSource::Staged { in_sync: true, .. },
                ) => report.record(*step, StepStatus::Skipped("already in sync".into())),
                (PlanStep::ClearDestination, _) => self.clear_destination(plan, &mut report)?,
                (PlanStep::MoveStaged, TreeSource::Staged { app, .. }) => {
                    self.move_staged(plan, app, &mut report)?
                }
                (PlanStep::RemoveLegacyUnpacked, _) => self.remove_legacy_unpacked(&mut report)?,
                (PlanStep::RemoveArchive, _) => self.remove_archive(&mut report),
                (PlanStep::PruneManifests, _) => self.prune_manifests(options, &mut report),
                (PlanStep::PatchAssets, _) => self.patch_assets(&mut report)?,
            }
        }

        report.outcome = if report.rewritten.is_empty() {
            PatchOutcome::AlreadyPatched
        } else {
            PatchOutcome::Applied
        };
        Ok(report)
    }

    fn clear_destination(&self, plan: &Plan, report: &mut PatchReport) -> Result<(), PatchError> {
        let app_dir = self.paths.app_dir();
        if !plan.allow_overwrite() || !app_dir.exists() {
            report.record(
                PlanStep::ClearDestination,
                StepStatus::Skipped("no destination to clear".into()),
            );
            return Ok(());
        }

        with_retry(&self.retry, "clear destination", || {
            self.fs.remove_dir_all(&app_dir)
        })
        .map_err(|err| PatchError::from_retry(PlanStep::ClearDestination, app_dir.clone(), err))?;
        debug!(path = %app_dir.display(), "cleared destination");
        report.record(PlanStep::ClearDestination, StepStatus::Done);
        Ok(())
    }

    fn remove_legacy_unpacked(&self, report: &mut PatchReport) -> Result<(), PatchError> {
        let legacy = self.paths.legacy_unpacked_dir();
        if !legacy.exists() {
            report.record(
                PlanStep::RemoveLegacyUnpacked,
                StepStatus::Skipped("not present".into()),
            );
            return Ok(());
        }

        with_retry(&self.retry, "remove legacy unpacked", || {
            self.fs.remove_dir_all(&legacy)
        })
        .map_err(|err| PatchError::from_retry(PlanStep::RemoveLegacyUnpacked, legacy.clone(), err))?;
        report.record(PlanStep::RemoveLegacyUnpacked, StepStatus::Done);
        Ok(())
    }

    fn move_staged(
        &self,
        plan: &Plan,
        staged_app: &Path,
        report: &mut PatchReport,
    ) -> Result<(), PatchError> {
        let app_dir = self.paths.app_dir();
        if app_dir.exists() {
            // Merging a fresh tree into a stale one is never allowed.
            return Err(PatchError::Step {
                step: PlanStep::MoveStaged,
                path: app_dir,
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    if plan.allow_overwrite() {
                        "destination still exists after clearing"
                    } else {
                        "destination exists and overwrite is not allowed"
                    },
                ),
            });
        }

        match with_retry(&self.retry, "move staged app", || {
            self.fs.rename(staged_app, &app_dir)
        }) {
            Ok(()) => {}
            Err(RetryError::Failed(err)) => {
                debug!(error = %err, "rename failed, copying staged tree instead");
                if let Err(source) = copy_dir_recursive(staged_app, &app_dir) {
                    let _ = fs::remove_dir_all(&app_dir);
                    return Err(PatchError::Step {
                        step: PlanStep::MoveStaged,
                        path: app_dir,
                        source,
                    });
                }
            }
            Err(err) => {
                return Err(PatchError::from_retry(PlanStep::MoveStaged, app_dir, err));
            }
        }

        info!(path = %app_dir.display(), "moved staged app into place");
        report.record(PlanStep::MoveStaged, StepStatus::Done);
        Ok(())
    }

    fn remove_archive(&self, report: &mut PatchReport) {
        let archive = self.paths.archive_path();
        let status = self.remove_file_best_effort(&archive, "remove archive");
        report.record(PlanStep::RemoveArchive, status);
    }

    fn prune_manifests(&self, options: &PatchOptions, report: &mut PatchReport) {
        let mut targets = Vec::new();
        if options.remove_update_manifest {
            targets.push(self.paths.update_manifest_path());
        }
        if options.remove_leftover_manifest {
            match self.paths.leftover_manifest_path() {
                Some(path) => targets.push(path),
                None => debug!("no leftover manifest configured"),
            }
        }
        if targets.is_empty() {
            report.record(
                PlanStep::PruneManifests,
                StepStatus::Skipped("not requested".into()),
            );
            return;
        }

        for path in targets {
            let status = self.remove_file_best_effort(&path, "prune manifest");
            report.record(PlanStep::PruneManifests, status);
        }
    }

    fn remove_file_best_effort(&self, path: &Path, label: &str) -> StepStatus {
        if !path.exists() {
            return StepStatus::Skipped(format!("{} not present", path.display()));
        }
        match with_retry(&self.retry, label, || self.fs.remove_file(path)) {
            Ok(()) => {
                debug!(path = %path.display(), "removed");
                StepStatus::Done
            }
            Err(err) => {
                let message = format!("could not remove {}: {err}", path.display());
                warn!("{message}");
                StepStatus::Warned(message)
            }
        }
    }

    fn patch_assets(&self, report: &mut PatchReport) -> Result<(), PatchError> {
        let app_dir = self.paths.app_dir();
        let assets_dir = app_dir.join(self.selector.asset_dir());
        let targets = self
            .selector
            .find_targets(&app_dir)
            .map_err(|source| PatchError::Step {
                step: PlanStep::PatchAssets,
                path: assets_dir.clone(),
                source,
            })?;
        if targets.is_empty() {
            return Err(PatchError::TargetNotFound {
                dir: assets_dir,
                pattern: self.selector.pattern(),
            });
        }

        let mut untouched = Vec::new();
        for target in &targets {
            let content = fs::read_to_string(target).map_err(|source| PatchError::Unreadable {
                path: target.clone(),
                source,
            })?;
            match self.substitution.apply(&content) {
                SubstitutionResult::AlreadyApplied => {
                    debug!(path = %target.display(), "already patched");
                    report.already_patched.push(target.clone());
                }
                SubstitutionResult::TargetMissing => {
                    debug!(path = %target.display(), "substitution target absent");
                    untouched.push(target.display().to_string());
                }
                SubstitutionResult::Applied(patched) => {
                    self.write_asset(target, patched.as_bytes())?;
                    info!(path = %target.display(), "patched asset");
                    report.rewritten.push(target.clone());
                }
            }
        }

        if report.rewritten.is_empty() && report.already_patched.is_empty() {
            return Err(PatchError::NeedleNotFound { files: untouched });
        }
        report.record(PlanStep::PatchAssets, StepStatus::Done);
        Ok(())
    }

    fn write_asset(&self, target: &Path, contents: &[u8]) -> Result<(), PatchError> {
        let mut tmp_name = OsString::from(target.as_os_str());
        tmp_name.push(".bundlepatch-tmp");
        let tmp = PathBuf::from(tmp_name);

        self.fs
            .write(&tmp, contents)
            .map_err(|err| PatchError::Unwritable {
                path: target.to_path_buf(),
                reason: err.to_string(),
            })?;
        with_retry(&self.retry, "replace asset", || self.fs.rename(&tmp, target)).map_err(
            |err| {
                let _ = fs::remove_file(&tmp);
                PatchError::Unwritable {
                    path: target.to_path_buf(),
                    reason: err.to_string(),
                }
            },
        )
    }

    /// True when every installed file equals its staged counterpart after substitution.
    fn installed_tree_in_sync(&self, staged_app: &Path, app_dir: &Path) -> bool {
        let (Ok(staged_files), Ok(installed_files)) = (
            collect_relative_files(staged_app),
            collect_relative_files(app_dir),
        ) else {
            return false;
        };
        if staged_files != installed_files {
            return false;
        }

        let mut saw_patched_asset = false;
        for relative in &staged_files {
            let (Ok(staged), Ok(installed)) = (
                fs::read(staged_app.join(relative)),
                fs::read(app_dir.join(relative)),
            ) else {
                return false;
            };

            let expected = if self.selector.is_target(relative) {
                match std::str::from_utf8(&staged).map(|text| self.substitution.apply(text)) {
                    Ok(SubstitutionResult::Applied(patched)) => {
                        saw_patched_asset = true;
                        patched.into_bytes()
                    }
                    Ok(SubstitutionResult::AlreadyApplied) => {
                        saw_patched_asset = true;
                        staged
                    }
                    _ => staged,
                }
            } else {
                staged
            };

            if sha256_hex(&expected) != sha256_hex(&installed) {
                return false;
            }
        }

        saw_patched_asset
    }
}

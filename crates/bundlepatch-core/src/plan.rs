use thiserror::Error;

use crate::state::{InstallationState, ProbeReport, RequestedAction};

/// Pipeline steps in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlanStep {
    StageBundle,
    StopProcess,
    ClearDestination,
    RemoveLegacyUnpacked,
    MoveStaged,
    RemoveArchive,
    PruneManifests,
    PatchAssets,
}

impl PlanStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StageBundle => "stage-bundle",
            Self::StopProcess => "stop-process",
            Self::ClearDestination => "clear-destination",
            Self::RemoveLegacyUnpacked => "remove-legacy-unpacked",
            Self::MoveStaged => "move-staged",
            Self::RemoveArchive => "remove-archive",
            Self::PruneManifests => "prune-manifests",
            Self::PatchAssets => "patch-assets",
        }
    }

    /// Failure of a load-bearing step aborts the pipeline.
    pub fn is_load_bearing(self) -> bool {
        !matches!(
            self,
            Self::StopProcess | Self::RemoveArchive | Self::PruneManifests
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error(
        "install root holds both the unpacked app folder and the legacy unpacked-resources folder; \
         remove one of them manually before retrying"
    )]
    Ambiguous,
    #[error("nothing is installed to update; run install instead")]
    NotInstalled,
}

/// Validated decision for one run. Only [`reconcile`] builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    action: RequestedAction,
    state: InstallationState,
    steps: Vec<PlanStep>,
    allow_overwrite: bool,
    requires_confirmation: bool,
}

impl Plan {
    pub fn action(&self) -> RequestedAction {
        self.action
    }

    pub fn state(&self) -> InstallationState {
        self.state
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn includes(&self, step: PlanStep) -> bool {
        self.steps.contains(&step)
    }

    pub fn allow_overwrite(&self) -> bool {
        self.allow_overwrite
    }

    /// True when an existing patched app would be replaced under `install`.
    pub fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }
}

pub fn reconcile(action: RequestedAction, probe: &ProbeReport) -> Result<Plan, ReconcileError> {
    let state = probe.state();
    let (allow_overwrite, requires_confirmation) = match (action, state) {
        (_, InstallationState::Ambiguous) => return Err(ReconcileError::Ambiguous),
        (RequestedAction::Update, InstallationState::Absent) => {
            return Err(ReconcileError::NotInstalled)
        }
        (RequestedAction::Install, InstallationState::Absent) => (false, false),
        (RequestedAction::Install, InstallationState::PackedOnly) => (true, false),
        (RequestedAction::Install, InstallationState::PatchedOnly) => (true, true),
        (RequestedAction::Update, InstallationState::PackedOnly) => (true, false),
        (RequestedAction::Update, InstallationState::PatchedOnly) => (true, false),
    };

    let mut steps = vec![PlanStep::StageBundle, PlanStep::StopProcess];
    if allow_overwrite && probe.app_folder_exists {
        steps.push(PlanStep::ClearDestination);
    }
    if probe.unpacked_legacy_exists {
        steps.push(PlanStep::RemoveLegacyUnpacked);
    }
    steps.push(PlanStep::MoveStaged);
    if probe.archive_exists {
        steps.push(PlanStep::RemoveArchive);
    }
    steps.push(PlanStep::PruneManifests);
    steps.push(PlanStep::PatchAssets);

    Ok(Plan {
        action,
        state,
        steps,
        allow_overwrite,
        requires_confirmation,
    })
}

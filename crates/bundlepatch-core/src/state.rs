use std::fmt;

/// What the caller asked the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedAction {
    Install,
    Update,
}

impl RequestedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for RequestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker evidence gathered from an install root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub archive_exists: bool,
    pub app_folder_exists: bool,
    pub unpacked_legacy_exists: bool,
    pub manifest_version: Option<String>,
}

impl ProbeReport {
    pub fn state(&self) -> InstallationState {
        InstallationState::classify(self)
    }
}

/// Installation state derived from a [`ProbeReport`]. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationState {
    Absent,
    PackedOnly,
    PatchedOnly,
    Ambiguous,
}

impl InstallationState {
    /// An app folder next to a legacy unpacked folder means an earlier run was
    /// interrupted or mixed; that pair wins over everything else. A lingering
    /// archive beside the app folder is still `PatchedOnly` because the host
    /// application prefers the unpacked tree.
    pub fn classify(report: &ProbeReport) -> Self {
        match (
            report.app_folder_exists,
            report.unpacked_legacy_exists,
            report.archive_exists,
        ) {
            (true, true, _) => Self::Ambiguous,
            (true, false, _) => Self::PatchedOnly,
            (false, _, true) => Self::PackedOnly,
            (false, _, false) => Self::Absent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::PackedOnly => "packed-only",
            Self::PatchedOnly => "patched-only",
            Self::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for InstallationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

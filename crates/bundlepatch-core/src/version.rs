use semver::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    LocalManifest,
    RemoteRelease,
}

impl VersionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalManifest => "local-manifest",
            Self::RemoteRelease => "remote-release",
        }
    }
}

/// Informational version string; never gates execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub source: VersionSource,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionComparison {
    Same,
    InstalledOlder,
    InstalledNewer,
    /// At least one side is not a semantic version; compared textually.
    Differs,
}

impl VersionInfo {
    pub fn local(value: impl Into<String>) -> Self {
        Self {
            source: VersionSource::LocalManifest,
            value: value.into(),
        }
    }

    pub fn remote(value: impl Into<String>) -> Self {
        Self {
            source: VersionSource::RemoteRelease,
            value: value.into(),
        }
    }
}

pub fn compare_versions(installed: &VersionInfo, release: &VersionInfo) -> VersionComparison {
    let parsed = (
        Version::parse(installed.value.trim().trim_start_matches('v')),
        Version::parse(release.value.trim().trim_start_matches('v')),
    );
    match parsed {
        (Ok(installed), Ok(release)) => match installed.cmp(&release) {
            std::cmp::Ordering::Equal => VersionComparison::Same,
            std::cmp::Ordering::Less => VersionComparison::InstalledOlder,
            std::cmp::Ordering::Greater => VersionComparison::InstalledNewer,
        },
        _ if installed.value.trim() == release.value.trim() => VersionComparison::Same,
        _ => VersionComparison::Differs,
    }
}

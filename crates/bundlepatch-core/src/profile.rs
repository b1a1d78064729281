use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchProfile {
    pub name: String,
    pub install_root: Option<PathBuf>,
    #[serde(default)]
    pub bundle: BundleLayout,
    pub process: ProcessSettings,
    #[serde(default)]
    pub payload: PayloadSettings,
    pub patch: PatchSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub toolchain: ToolchainSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleLayout {
    #[serde(default = "default_archive")]
    pub archive: String,
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    #[serde(default = "default_legacy_unpacked")]
    pub legacy_unpacked: String,
    #[serde(default = "default_update_manifest")]
    pub update_manifest: String,
    pub leftover_manifest: Option<String>,
    #[serde(default = "default_version_manifest")]
    pub version_manifest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessSettings {
    pub name: String,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayloadSettings {
    pub url: Option<String>,
    pub sha256: Option<String>,
    pub archive: Option<String>,
    pub root: Option<String>,
    pub release_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchSettings {
    #[serde(default = "default_asset_dir")]
    pub asset_dir: String,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
    pub needle_file: PathBuf,
    pub replacement_file: PathBuf,
    pub marker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorKind {
    #[default]
    InProcess,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolchainSettings {
    #[serde(default)]
    pub extractor: ExtractorKind,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_package_manager")]
    pub package_manager: String,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_tool_command")]
    pub tool_command: String,
}

impl Default for BundleLayout {
    fn default() -> Self {
        Self {
            archive: default_archive(),
            app_dir: default_app_dir(),
            legacy_unpacked: default_legacy_unpacked(),
            update_manifest: default_update_manifest(),
            leftover_manifest: None,
            version_manifest: default_version_manifest(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            extractor: ExtractorKind::default(),
            runtime: default_runtime(),
            package_manager: default_package_manager(),
            tool: default_tool(),
            tool_command: default_tool_command(),
        }
    }
}

impl PayloadSettings {
    pub fn archive_type(&self) -> anyhow::Result<ArchiveType> {
        if let Some(archive) = &self.archive {
            return ArchiveType::parse(archive).ok_or_else(|| {
                anyhow!("unsupported payload archive type '{archive}'; supported: zip, asar")
            });
        }

        Ok(self
            .url
            .as_deref()
            .and_then(ArchiveType::infer_from_url)
            .unwrap_or(ArchiveType::Zip))
    }

    pub fn root(&self) -> &str {
        self.root.as_deref().unwrap_or("app")
    }
}

impl PatchProfile {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let profile: Self = toml::from_str(input).context("failed to parse patch profile")?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("profile name must not be empty"));
        }
        if self.process.name.trim().is_empty() {
            return Err(anyhow!(
                "process name must not be empty for profile '{}'",
                self.name
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }

        for (field, value) in [
            ("bundle.archive", self.bundle.archive.as_str()),
            ("bundle.app_dir", self.bundle.app_dir.as_str()),
            ("bundle.legacy_unpacked", self.bundle.legacy_unpacked.as_str()),
            ("bundle.update_manifest", self.bundle.update_manifest.as_str()),
            ("bundle.version_manifest", self.bundle.version_manifest.as_str()),
            ("patch.asset_dir", self.patch.asset_dir.as_str()),
            ("payload.root", self.payload.root()),
        ] {
            validate_relative_path(value).with_context(|| format!("invalid {field}"))?;
        }
        if let Some(leftover) = &self.bundle.leftover_manifest {
            validate_relative_path(leftover).context("invalid bundle.leftover_manifest")?;
        }

        if self.patch.file_prefix.is_empty() && self.patch.file_suffix.is_empty() {
            return Err(anyhow!(
                "patch.file_prefix and patch.file_suffix must not both be empty"
            ));
        }
        if let Some(marker) = &self.patch.marker {
            if marker.trim().is_empty() {
                return Err(anyhow!("patch.marker must not be blank when set"));
            }
        }

        self.payload.archive_type()?;
        if let Some(sha256) = &self.payload.sha256 {
            if sha256.len() != 64 || !sha256.chars().all(|ch| ch.is_ascii_hexdigit()) {
                return Err(anyhow!(
                    "payload.sha256 must be 64 hex characters, got '{sha256}'"
                ));
            }
        }
        if let Some(version) = &self.payload.release_version {
            Version::parse(version.trim_start_matches('v')).with_context(|| {
                format!("payload.release_version is not a semantic version: {version}")
            })?;
        }

        Ok(())
    }

    /// Resolves patch input files relative to the directory holding the profile.
    pub fn resolve_patch_file(&self, profile_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            profile_dir.join(path)
        }
    }
}

fn validate_relative_path(value: &str) -> anyhow::Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("path must not be empty"));
    }
    let path = Path::new(value);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(anyhow!(
                    "path must stay inside its root (no '..' or absolute parts): {value}"
                ))
            }
        }
    }
    Ok(())
}

fn default_archive() -> String {
    "app.asar".to_string()
}

fn default_app_dir() -> String {
    "app".to_string()
}

fn default_legacy_unpacked() -> String {
    "app.asar.unpacked".to_string()
}

fn default_update_manifest() -> String {
    "app-update.yml".to_string()
}

fn default_version_manifest() -> String {
    "package.json".to_string()
}

fn default_max_wait_secs() -> u64 {
    10
}

fn default_asset_dir() -> String {
    "background-process/assets".to_string()
}

fn default_file_prefix() -> String {
    "main-".to_string()
}

fn default_file_suffix() -> String {
    ".js".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    2
}

fn default_runtime() -> String {
    "node".to_string()
}

fn default_package_manager() -> String {
    "npm".to_string()
}

fn default_tool() -> String {
    "@electron/asar".to_string()
}

fn default_tool_command() -> String {
    "asar".to_string()
}

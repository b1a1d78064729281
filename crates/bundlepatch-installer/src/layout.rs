use anyhow::{Context, Result};
use bundlepatch_core::{ArchiveType, BundleLayout};
use std::fs;
use std::path::{Path, PathBuf};

/// Marker and destination paths inside an application's install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePaths {
    root: PathBuf,
    bundle: BundleLayout,
}

impl BundlePaths {
    pub fn new(root: impl Into<PathBuf>, bundle: &BundleLayout) -> Self {
        Self {
            root: root.into(),
            bundle: bundle.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.join(&self.bundle.archive)
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join(&self.bundle.app_dir)
    }

    pub fn legacy_unpacked_dir(&self) -> PathBuf {
        self.root.join(&self.bundle.legacy_unpacked)
    }

    pub fn update_manifest_path(&self) -> PathBuf {
        self.root.join(&self.bundle.update_manifest)
    }

    pub fn leftover_manifest_path(&self) -> Option<PathBuf> {
        self.bundle
            .leftover_manifest
            .as_ref()
            .map(|name| self.root.join(name))
    }

    pub fn version_manifest_name(&self) -> &str {
        &self.bundle.version_manifest
    }
}

/// The tool's own state: payload cache and staging work dirs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLayout {
    prefix: PathBuf,
}

impl ToolLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join("cache")
    }

    pub fn payloads_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("payloads")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("state")
    }

    pub fn tmp_state_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn payload_cache_path(&self, profile: &str, archive_type: ArchiveType) -> PathBuf {
        self.payloads_cache_dir()
            .join(profile)
            .join(format!("payload.{}", archive_type.cache_extension()))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.cache_dir(),
            self.payloads_cache_dir(),
            self.state_dir(),
            self.tmp_state_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_tool_prefix() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("BUNDLEPATCH_HOME") {
        if !home.trim().is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows tool prefix")?;
        return Ok(PathBuf::from(app_data).join("Bundlepatch"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve tool prefix")?;
    Ok(PathBuf::from(home).join(".bundlepatch"))
}

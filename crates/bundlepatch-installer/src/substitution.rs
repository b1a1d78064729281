use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bundlepatch_core::PatchSettings;

use crate::fs_ops::collect_relative_files;

/// Find-and-replace applied to matching assets. `marker` is the fragment whose
/// presence proves the replacement is already in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    needle: String,
    replacement: String,
    marker: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstitutionResult {
    AlreadyApplied,
    Applied(String),
    TargetMissing,
}

impl Substitution {
    pub fn new(needle: String, replacement: String, marker: Option<String>) -> Result<Self> {
        if needle.is_empty() {
            return Err(anyhow!("substitution needle must not be empty"));
        }
        let marker = marker.unwrap_or_else(|| replacement.trim().to_string());
        if marker.is_empty() {
            return Err(anyhow!("substitution marker must not be empty"));
        }
        if !replacement.contains(&marker) {
            return Err(anyhow!(
                "substitution marker must appear in the replacement text"
            ));
        }
        if needle.contains(&marker) {
            return Err(anyhow!(
                "substitution marker must not appear in the needle; an unpatched file would look patched"
            ));
        }

        Ok(Self {
            needle,
            replacement,
            marker,
        })
    }

    /// Reads needle and replacement from disk. One trailing line break is
    /// dropped from the needle so editor-saved files still match inline code.
    pub fn load(needle_path: &Path, replacement_path: &Path, marker: Option<String>) -> Result<Self> {
        let needle = fs::read_to_string(needle_path)
            .with_context(|| format!("failed to read needle file {}", needle_path.display()))?;
        let replacement = fs::read_to_string(replacement_path).with_context(|| {
            format!(
                "failed to read replacement file {}",
                replacement_path.display()
            )
        })?;
        let needle = needle
            .strip_suffix("\r\n")
            .or_else(|| needle.strip_suffix('\n'))
            .unwrap_or(&needle)
            .to_string();
        Self::new(needle, replacement, marker)
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn is_applied(&self, content: &str) -> bool {
        content.contains(&self.marker)
    }

    pub fn apply(&self, content: &str) -> SubstitutionResult {
        if self.is_applied(content) {
            return SubstitutionResult::AlreadyApplied;
        }
        if !content.contains(&self.needle) {
            return SubstitutionResult::TargetMissing;
        }
        SubstitutionResult::Applied(content.replace(&self.needle, &self.replacement))
    }
}

/// Which files under the app tree receive the substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSelector {
    asset_dir: PathBuf,
    prefix: String,
    suffix: String,
}

impl AssetSelector {
    pub fn new(asset_dir: impl Into<PathBuf>, prefix: &str, suffix: &str) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        }
    }

    pub fn from_settings(settings: &PatchSettings) -> Self {
        Self::new(
            &settings.asset_dir,
            &settings.file_prefix,
            &settings.file_suffix,
        )
    }

    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    pub fn pattern(&self) -> String {
        format!("{}*{}", self.prefix, self.suffix)
    }

    pub fn matches_name(&self, file_name: &str) -> bool {
        file_name.len() >= self.prefix.len() + self.suffix.len()
            && file_name.starts_with(&self.prefix)
            && file_name.ends_with(&self.suffix)
    }

    /// `relative` is a path inside the app tree.
    pub fn is_target(&self, relative: &Path) -> bool {
        relative.starts_with(&self.asset_dir)
            && relative
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.matches_name(name))
    }

    /// Matching files under `app_dir`, sorted; empty when the asset dir is absent.
    pub fn find_targets(&self, app_dir: &Path) -> io::Result<Vec<PathBuf>> {
        let assets = app_dir.join(&self.asset_dir);
        if !assets.is_dir() {
            return Ok(Vec::new());
        }
        Ok(collect_relative_files(&assets)?
            .into_iter()
            .filter(|relative| {
                relative
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| self.matches_name(name))
            })
            .map(|relative| assets.join(relative))
            .collect())
    }
}

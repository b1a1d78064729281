use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bundlepatch_core::PatchProfile;
use bundlepatch_installer::Substitution;

pub(crate) const DEFAULT_PROFILE_FILE: &str = "bundlepatch.toml";
pub(crate) const INSTALL_ROOT_ENV: &str = "BUNDLEPATCH_INSTALL_ROOT";

/// A validated profile plus the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub(crate) struct LoadedProfile {
    pub(crate) profile: PatchProfile,
    pub(crate) dir: PathBuf,
}

impl LoadedProfile {
    pub(crate) fn resolve(&self, path: &Path) -> PathBuf {
        self.profile.resolve_patch_file(&self.dir, path)
    }
}

pub(crate) fn load_profile(path: Option<&Path>) -> Result<LoadedProfile> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILE_FILE));
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read profile {}", path.display()))?;
    let profile = PatchProfile::from_toml_str(&raw)
        .with_context(|| format!("invalid profile {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(LoadedProfile { profile, dir })
}

/// Flag, then environment, then profile.
pub(crate) fn resolve_install_root(
    flag: Option<&Path>,
    env_value: Option<OsString>,
    loaded: &LoadedProfile,
) -> Result<PathBuf> {
    if let Some(root) = flag {
        return Ok(root.to_path_buf());
    }
    if let Some(root) = env_value.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    if let Some(root) = &loaded.profile.install_root {
        return Ok(loaded.resolve(root));
    }
    Err(anyhow!(
        "no install root for profile '{}'; pass --install-root, set {INSTALL_ROOT_ENV}, or add install_root to the profile",
        loaded.profile.name
    ))
}

pub(crate) fn load_substitution(loaded: &LoadedProfile) -> Result<Substitution> {
    let patch = &loaded.profile.patch;
    Substitution::load(
        &loaded.resolve(&patch.needle_file),
        &loaded.resolve(&patch.replacement_file),
        patch.marker.clone(),
    )
    .with_context(|| format!("invalid patch inputs for profile '{}'", loaded.profile.name))
}

use std::fs;
use std::io;
use std::path::Path;

use bundlepatch_core::ProbeReport;
use serde_json::Value;
use tracing::debug;

use crate::asar::AsarArchive;
use crate::error::ProbeError;
use crate::layout::BundlePaths;

/// Read-only inspection of the install root. Missing paths are a result, not an error.
pub fn probe(paths: &BundlePaths) -> Result<ProbeReport, ProbeError> {
    let root = paths.root();
    match fs::metadata(root) {
        Ok(metadata) if !metadata.is_dir() => {
            return Err(ProbeError {
                path: root.to_path_buf(),
                source: io::Error::other("install root is not a directory"),
            });
        }
        Ok(_) => {
            fs::read_dir(root).map_err(|source| ProbeError {
                path: root.to_path_buf(),
                source,
            })?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(root = %root.display(), "install root does not exist");
            return Ok(ProbeReport::default());
        }
        Err(source) => {
            return Err(ProbeError {
                path: root.to_path_buf(),
                source,
            });
        }
    }

    let archive_path = paths.archive_path();
    let app_dir = paths.app_dir();
    let report = ProbeReport {
        archive_exists: exists(&archive_path)?,
        app_folder_exists: exists(&app_dir)?,
        unpacked_legacy_exists: exists(&paths.legacy_unpacked_dir())?,
        manifest_version: None,
    };

    let manifest_version = if report.app_folder_exists {
        read_tree_version(&app_dir, paths.version_manifest_name())
    } else if report.archive_exists {
        read_archive_version(&archive_path, paths.version_manifest_name())
    } else {
        None
    };

    debug!(?report, ?manifest_version, "probed install root");
    Ok(ProbeReport {
        manifest_version,
        ..report
    })
}

fn exists(path: &Path) -> Result<bool, ProbeError> {
    path.try_exists().map_err(|source| ProbeError {
        path: path.to_path_buf(),
        source,
    })
}

fn read_tree_version(app_dir: &Path, manifest_name: &str) -> Option<String> {
    let path = app_dir.join(manifest_name);
    match fs::read(&path) {
        Ok(raw) => parse_manifest_version(&raw),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "no readable version manifest");
            None
        }
    }
}

fn read_archive_version(archive_path: &Path, manifest_name: &str) -> Option<String> {
    let raw = AsarArchive::open(archive_path)
        .and_then(|archive| archive.read_file(manifest_name))
        .map_err(|err| {
            debug!(
                archive = %archive_path.display(),
                error = %err,
                "no readable version manifest in archive"
            );
        })
        .ok()?;
    parse_manifest_version(&raw)
}

fn parse_manifest_version(raw: &[u8]) -> Option<String> {
    let manifest: Value = serde_json::from_slice(raw).ok()?;
    manifest
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string)
}

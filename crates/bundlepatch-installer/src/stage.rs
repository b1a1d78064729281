use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use bundlepatch_core::ArchiveType;
use tracing::{debug, info, warn};

use crate::asar::AsarArchive;
use crate::error::StageError;
use crate::fs_ops::dir_has_entries;
use crate::layout::ToolLayout;

/// How asar containers are unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extractor {
    InProcess,
    /// An `asar`-compatible CLI invoked as `<command> extract <archive> <dest>`.
    External { command: PathBuf },
}

/// An extracted payload whose expected root subpath exists and is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPayload {
    root: PathBuf,
    app_dir: PathBuf,
    archive_type: ArchiveType,
}

impl StagedPayload {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn archive_type(&self) -> ArchiveType {
        self.archive_type
    }
}

/// Ephemeral work directory, removed when dropped.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
}

impl StagingArea {
    pub fn create(layout: &ToolLayout, label: &str) -> io::Result<Self> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let path = layout
            .tmp_state_dir()
            .join(format!("{label}-{}-{nanos}", std::process::id()));
        fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "created staging area");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove staging area");
            }
        }
    }
}

pub fn stage(
    archive_path: &Path,
    archive_type: ArchiveType,
    work_dir: &Path,
    expected_root: &str,
    extractor: &Extractor,
) -> Result<StagedPayload, StageError> {
    info!(
        archive = %archive_path.display(),
        kind = archive_type.as_str(),
        "staging payload"
    );
    let app_dir = work_dir.join(expected_root);
    match archive_type {
        ArchiveType::Zip => extract_zip(archive_path, work_dir)?,
        ArchiveType::Asar => match extractor {
            Extractor::InProcess => extract_asar(archive_path, &app_dir)?,
            Extractor::External { command } => {
                extract_asar_with_runner(command, archive_path, &app_dir, run_command)?
            }
        },
    }

    if !app_dir.is_dir() || !dir_has_entries(&app_dir) {
        return Err(StageError::MissingExpectedEntry {
            entry: expected_root.to_string(),
            path: app_dir,
        });
    }

    Ok(StagedPayload {
        root: work_dir.to_path_buf(),
        app_dir,
        archive_type,
    })
}

fn extract_zip(archive_path: &Path, dst: &Path) -> Result<(), StageError> {
    let corrupt = |reason: String| StageError::CorruptArchive {
        path: archive_path.to_path_buf(),
        reason,
    };
    let file = File::open(archive_path).map_err(|err| corrupt(err.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| corrupt(err.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| corrupt(err.to_string()))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| corrupt(format!("unsafe entry path '{}'", entry.name())))?;
        let target = dst.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|source| StageError::Io {
                path: target.clone(),
                source,
            })?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| StageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut out = File::create(&target).map_err(|source| StageError::Io {
            path: target.clone(),
            source,
        })?;
        io::copy(&mut entry, &mut out).map_err(|err| match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                corrupt(format!("entry '{}': {err}", entry.name()))
            }
            _ => StageError::Io {
                path: target.clone(),
                source: err,
            },
        })?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;

            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777)).map_err(
                |source| StageError::Io {
                    path: target.clone(),
                    source,
                },
            )?;
        }
    }

    Ok(())
}

fn extract_asar(archive_path: &Path, dst: &Path) -> Result<(), StageError> {
    let archive = AsarArchive::open(archive_path).map_err(|err| StageError::CorruptArchive {
        path: archive_path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let written = archive.extract_to(dst).map_err(|err| match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => StageError::CorruptArchive {
            path: archive_path.to_path_buf(),
            reason: err.to_string(),
        },
        _ => StageError::Io {
            path: dst.to_path_buf(),
            source: err,
        },
    })?;
    debug!(files = written, "unpacked asar in-process");
    Ok(())
}

pub(crate) fn extract_asar_with_runner<RunCommand>(
    command_path: &Path,
    archive_path: &Path,
    dst: &Path,
    mut run: RunCommand,
) -> Result<(), StageError>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    let mut command = build_asar_extract_command(command_path, archive_path, dst);
    run(&mut command, "failed to unpack asar archive").map_err(|err| {
        StageError::CorruptArchive {
            path: archive_path.to_path_buf(),
            reason: format!("{err:#}"),
        }
    })
}

pub(crate) fn build_asar_extract_command(
    command_path: &Path,
    archive_path: &Path,
    dst: &Path,
) -> Command {
    let mut command = Command::new(command_path);
    command.arg("extract").arg(archive_path).arg(dst);
    command
}

pub fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use bundlepatch_core::ToolchainSettings;
use bundlepatch_installer::run_command;
use tracing::{debug, info};

/// Executables handed to callers directly; the process environment is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Toolchain {
    pub(crate) runtime: PathBuf,
    pub(crate) package_manager: PathBuf,
}

pub(crate) trait ToolchainProvisioner {
    fn ensure_toolchain(&self) -> Result<Toolchain>;
}

/// Finds an already installed runtime and package manager on `PATH`.
#[derive(Debug, Clone)]
pub(crate) struct PathToolchain {
    runtime: String,
    package_manager: String,
    path_var: Option<OsString>,
}

impl PathToolchain {
    pub(crate) fn from_settings(settings: &ToolchainSettings) -> Self {
        Self::with_path(settings, env::var_os("PATH"))
    }

    pub(crate) fn with_path(settings: &ToolchainSettings, path_var: Option<OsString>) -> Self {
        Self {
            runtime: settings.runtime.clone(),
            package_manager: settings.package_manager.clone(),
            path_var,
        }
    }

    fn locate(&self, name: &str) -> Result<PathBuf> {
        find_executable(name, self.path_var.as_deref()).ok_or_else(|| {
            anyhow!("'{name}' was not found on PATH; install it and rerun")
        })
    }
}

impl ToolchainProvisioner for PathToolchain {
    fn ensure_toolchain(&self) -> Result<Toolchain> {
        let toolchain = Toolchain {
            runtime: self.locate(&self.runtime)?,
            package_manager: self.locate(&self.package_manager)?,
        };
        debug!(
            runtime = %toolchain.runtime.display(),
            package_manager = %toolchain.package_manager.display(),
            "located toolchain"
        );
        Ok(toolchain)
    }
}

/// Looks `name` up on `path_var` the way the shell would, honouring
/// `PATHEXT` on Windows. Names with a directory part resolve against the cwd.
pub(crate) fn find_executable(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match which::which_in(name, path_var, cwd) {
        Ok(found) => Some(found),
        Err(err) => {
            debug!(name, error = %err, "executable lookup failed");
            None
        }
    }
}

/// Ensures the external extractor exists, installing it globally when missing.
pub(crate) fn provision_extractor(
    provisioner: &dyn ToolchainProvisioner,
    settings: &ToolchainSettings,
) -> Result<PathBuf> {
    let toolchain = provisioner.ensure_toolchain()?;
    let prefix = query_global_prefix(&toolchain.package_manager)?;
    let tool_path = global_tool_path(&prefix, &settings.tool_command);
    if tool_path.is_file() {
        debug!(tool = %tool_path.display(), "extractor already installed");
        return Ok(tool_path);
    }

    info!(tool = %settings.tool, "installing extractor with package manager");
    install_global_tool(&toolchain.package_manager, &settings.tool)?;
    if !tool_path.is_file() {
        return Err(anyhow!(
            "'{}' is still missing at {} after installing {}",
            settings.tool_command,
            tool_path.display(),
            settings.tool
        ));
    }
    Ok(tool_path)
}

pub(crate) fn install_global_tool(package_manager: &Path, tool: &str) -> Result<()> {
    install_global_tool_with_runner(package_manager, tool, run_command)
}

pub(crate) fn install_global_tool_with_runner<RunCommand>(
    package_manager: &Path,
    tool: &str,
    mut run: RunCommand,
) -> Result<()>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    let mut command = build_global_install_command(package_manager, tool);
    run(&mut command, "failed to install extractor tool")
}

pub(crate) fn build_global_install_command(package_manager: &Path, tool: &str) -> Command {
    let mut command = Command::new(package_manager);
    command.arg("install").arg("-g").arg(tool);
    command
}

fn query_global_prefix(package_manager: &Path) -> Result<PathBuf> {
    let output = Command::new(package_manager)
        .arg("prefix")
        .arg("-g")
        .output()
        .with_context(|| format!("failed to run {} prefix -g", package_manager.display()))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{} prefix -g exited with {}",
            package_manager.display(),
            output.status
        ));
    }
    let prefix = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if prefix.is_empty() {
        return Err(anyhow!(
            "{} prefix -g printed nothing",
            package_manager.display()
        ));
    }
    Ok(PathBuf::from(prefix))
}

pub(crate) fn global_tool_path(prefix: &Path, tool_command: &str) -> PathBuf {
    if cfg!(windows) {
        prefix.join(format!("{tool_command}.cmd"))
    } else {
        prefix.join("bin").join(tool_command)
    }
}

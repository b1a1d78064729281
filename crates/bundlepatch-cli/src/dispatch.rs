use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bundlepatch_core::{
    compare_versions, ArchiveType, ExtractorKind, InstallationState, PatchProfile, ProbeReport,
    RequestedAction, ToolchainSettings, VersionInfo,
};
use bundlepatch_installer::{
    default_tool_prefix, probe, AssetSelector, BundlePaths, Extractor, PatchPipeline,
    PayloadSource, PipelineConfig, PipelineError, PipelineRequest, ToolLayout,
};
use bundlepatch_security::verify_sha256_file;
use clap::CommandFactory;
use clap_complete::Shell;
use serde_json::json;
use tracing::debug;

use crate::config::{
    load_profile, load_substitution, resolve_install_root, LoadedProfile, INSTALL_ROOT_ENV,
};
use crate::download::download_payload_with_progress;
use crate::prompt::{resolve_decisions, Confirm, TerminalPrompt};
use crate::render::{
    format_plan_lines, format_report_lines, render_status_line, version_phrase, OutputStyle,
    TerminalProgress, TerminalRenderer,
};
use crate::toolchain::{provision_extractor, PathToolchain};
use crate::{Cli, Commands, PatchArgs};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let Cli {
        profile,
        install_root,
        command,
    } = cli;

    match command {
        Commands::Install(args) => run_patch(
            profile.as_deref(),
            install_root.as_deref(),
            RequestedAction::Install,
            &args,
        ),
        Commands::Update(args) => run_patch(
            profile.as_deref(),
            install_root.as_deref(),
            RequestedAction::Update,
            &args,
        ),
        Commands::Status { json } => {
            run_status(profile.as_deref(), install_root.as_deref(), json)
        }
        Commands::Completions { shell } => write_completions_script(shell, &mut io::stdout()),
        Commands::Version => {
            println!("bundlepatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_patch(
    profile_path: Option<&Path>,
    install_root: Option<&Path>,
    action: RequestedAction,
    args: &PatchArgs,
) -> Result<()> {
    run_patch_with(
        profile_path,
        install_root,
        action,
        args,
        &mut TerminalPrompt,
        &mut |settings: &ToolchainSettings| {
            provision_extractor(&PathToolchain::from_settings(settings), settings)
        },
    )
}

/// The extractor is provisioned only once the plan is accepted and every
/// confirmation is answered, so a rejected run never installs anything.
pub(crate) fn run_patch_with(
    profile_path: Option<&Path>,
    install_root: Option<&Path>,
    action: RequestedAction,
    args: &PatchArgs,
    prompt: &mut dyn Confirm,
    provision: &mut dyn FnMut(&ToolchainSettings) -> Result<PathBuf>,
) -> Result<()> {
    let renderer = TerminalRenderer::current();
    let loaded = load_profile(profile_path)?;
    let profile = &loaded.profile;
    let root = resolve_install_root(install_root, env::var_os(INSTALL_ROOT_ENV), &loaded)?;
    let tool = ToolLayout::new(default_tool_prefix()?);
    let substitution = load_substitution(&loaded)?;
    let payload_type = planned_payload_type(profile, args)?;

    let mut config = PipelineConfig::from_profile(profile, root, tool.clone(), substitution, None);

    renderer.print_section(&format!("{action} {}", profile.name));
    let planned = PatchPipeline::new(&config).plan(action)?;
    renderer.print_lines(&format_plan_lines(&planned, renderer.style()));
    if args.dry_run {
        renderer.print_status("ok", "dry run: nothing was changed");
        return Ok(());
    }

    let decisions = resolve_decisions(&planned.plan, args, &config.paths, prompt)?;
    if planned.plan.requires_confirmation() && !decisions.overwrite_consent {
        return Err(PipelineError::ConfirmationDeclined.into());
    }

    if payload_type == ArchiveType::Asar && profile.toolchain.extractor == ExtractorKind::External
    {
        config.extractor = Extractor::External {
            command: provision(&profile.toolchain)?,
        };
    }

    let payload = acquire_payload(profile, args, &tool, renderer)?;
    let request = PipelineRequest {
        action,
        decisions,
        payload,
        release_version: profile.payload.release_version.clone(),
    };
    let report = PatchPipeline::new(&config).run(&request)?;
    renderer.print_lines(&format_report_lines(&report, renderer.style()));
    Ok(())
}

/// Archive format of whatever will be staged, known before anything is fetched.
pub(crate) fn planned_payload_type(profile: &PatchProfile, args: &PatchArgs) -> Result<ArchiveType> {
    if let Some(path) = &args.payload {
        return payload_file_type(path, profile);
    }
    if profile.payload.url.is_some() {
        return profile.payload.archive_type();
    }
    Ok(ArchiveType::Asar)
}

fn payload_file_type(path: &Path, profile: &PatchProfile) -> Result<ArchiveType> {
    match ArchiveType::infer_from_url(&path.to_string_lossy()) {
        Some(archive_type) => Ok(archive_type),
        None => profile.payload.archive_type(),
    }
}

pub(crate) fn acquire_payload(
    profile: &PatchProfile,
    args: &PatchArgs,
    tool: &ToolLayout,
    renderer: TerminalRenderer,
) -> Result<PayloadSource> {
    if let Some(path) = &args.payload {
        if !path.is_file() {
            return Err(anyhow!("payload file not found: {}", path.display()));
        }
        return Ok(PayloadSource::Archive {
            path: path.clone(),
            archive_type: payload_file_type(path, profile)?,
        });
    }

    let Some(url) = profile.payload.url.as_deref() else {
        debug!("no payload configured; staging the installed bundle");
        return Ok(PayloadSource::InstalledBundle);
    };

    let archive_type = profile.payload.archive_type()?;
    tool.ensure_base_dirs()?;
    let cache_path = tool.payload_cache_path(&profile.name, archive_type);
    let mut progress: Option<TerminalProgress> = None;
    let status = download_payload_with_progress(
        url,
        &cache_path,
        args.force_redownload,
        |downloaded, total| {
            progress
                .get_or_insert_with(|| renderer.start_progress("download", total))
                .set(downloaded);
        },
    );
    let status = match status {
        Ok(status) => {
            if let Some(progress) = progress {
                progress.finish_success();
            }
            status
        }
        Err(err) => {
            if let Some(progress) = progress {
                progress.finish_abandon();
            }
            return Err(err);
        }
    };

    if let Some(expected) = &profile.payload.sha256 {
        if !verify_sha256_file(&cache_path, expected)? {
            let _ = std::fs::remove_file(&cache_path);
            return Err(anyhow!(
                "payload checksum mismatch for {url}; the cached copy was discarded"
            ));
        }
    }
    renderer.print_status(
        "ok",
        &format!("payload {status}: {}", cache_path.display()),
    );

    Ok(PayloadSource::Archive {
        path: cache_path,
        archive_type,
    })
}

fn run_status(profile_path: Option<&Path>, install_root: Option<&Path>, json: bool) -> Result<()> {
    let loaded = load_profile(profile_path)?;
    let root = resolve_install_root(install_root, env::var_os(INSTALL_ROOT_ENV), &loaded)?;
    let paths = BundlePaths::new(root, &loaded.profile.bundle);
    let report = probe(&paths).map_err(PipelineError::from)?;
    let patched = count_patched_assets(&loaded, &paths, &report);

    if json {
        let value = status_json(&loaded.profile, &paths, &report, patched);
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("failed to encode status")?
        );
        return Ok(());
    }

    let renderer = TerminalRenderer::current();
    renderer.print_section(&format!("status {}", loaded.profile.name));
    renderer.print_lines(&format_status_lines(
        &loaded.profile,
        &paths,
        &report,
        patched,
        renderer.style(),
    ));
    Ok(())
}

/// `(patched, matched)` asset counts, when the app folder and patch inputs are readable.
fn count_patched_assets(
    loaded: &LoadedProfile,
    paths: &BundlePaths,
    report: &ProbeReport,
) -> Option<(usize, usize)> {
    if !report.app_folder_exists {
        return None;
    }
    let substitution = load_substitution(loaded).ok()?;
    let selector = AssetSelector::from_settings(&loaded.profile.patch);
    let targets = selector.find_targets(&paths.app_dir()).ok()?;
    let patched = targets
        .iter()
        .filter(|target| {
            std::fs::read_to_string(target)
                .map(|content| substitution.is_applied(&content))
                .unwrap_or(false)
        })
        .count();
    Some((patched, targets.len()))
}

pub(crate) fn format_status_lines(
    profile: &PatchProfile,
    paths: &BundlePaths,
    report: &ProbeReport,
    patched: Option<(usize, usize)>,
    style: OutputStyle,
) -> Vec<String> {
    let state = report.state();
    let state_status = match state {
        InstallationState::PatchedOnly => "ok",
        InstallationState::Ambiguous => "err",
        InstallationState::Absent | InstallationState::PackedOnly => "step",
    };
    let presence = |exists: bool| if exists { "present" } else { "absent" };

    let mut lines = vec![
        format!("install root: {}", paths.root().display()),
        render_status_line(style, state_status, &format!("state: {state}")),
        format!("archive: {}", presence(report.archive_exists)),
        format!("app folder: {}", presence(report.app_folder_exists)),
        format!("legacy unpacked: {}", presence(report.unpacked_legacy_exists)),
        format!(
            "installed version: {}",
            report.manifest_version.as_deref().unwrap_or("unknown")
        ),
    ];
    if let Some(release) = &profile.payload.release_version {
        lines.push(format!("payload release: {release}"));
        if let Some(installed) = &report.manifest_version {
            let comparison =
                compare_versions(&VersionInfo::local(installed), &VersionInfo::remote(release));
            lines.push(format!("installed version {}", version_phrase(comparison)));
        }
    }
    if let Some((patched, matched)) = patched {
        let status = if matched > 0 && patched == matched {
            "ok"
        } else {
            "warn"
        };
        lines.push(render_status_line(
            style,
            status,
            &format!("patched assets: {patched}/{matched}"),
        ));
    }
    if state == InstallationState::Ambiguous {
        if let Some(hint) = PipelineError::Reconcile(bundlepatch_core::ReconcileError::Ambiguous)
            .remediation()
        {
            lines.push(format!("hint: {hint}"));
        }
    }
    lines
}

fn status_json(
    profile: &PatchProfile,
    paths: &BundlePaths,
    report: &ProbeReport,
    patched: Option<(usize, usize)>,
) -> serde_json::Value {
    json!({
        "profile": profile.name,
        "install_root": paths.root().display().to_string(),
        "state": report.state().as_str(),
        "archive_exists": report.archive_exists,
        "app_folder_exists": report.app_folder_exists,
        "unpacked_legacy_exists": report.unpacked_legacy_exists,
        "installed_version": report.manifest_version,
        "release_version": profile.payload.release_version,
        "patched_assets": patched.map(|(patched, _)| patched),
        "matched_assets": patched.map(|(_, matched)| matched),
    })
}

pub(crate) fn write_completions_script<W: Write>(shell: Shell, writer: &mut W) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(shell, &mut command, "bundlepatch", &mut generated);
    writer
        .write_all(&generated)
        .with_context(|| "failed writing generated completion script")?;
    Ok(())
}

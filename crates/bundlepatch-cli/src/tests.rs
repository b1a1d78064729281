use super::*;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use bundlepatch_core::{
    reconcile, ArchiveType, PatchProfile, ProbeReport, RequestedAction, ToolchainSettings,
};
use bundlepatch_installer::{
    BundlePaths, PayloadSource, PipelineError, StageError, ToolLayout,
};
use clap::error::ErrorKind;
use clap::Parser;

use crate::config::{load_profile, load_substitution, resolve_install_root, LoadedProfile};
use crate::dispatch::{
    acquire_payload, format_status_lines, planned_payload_type, run_patch_with,
    write_completions_script,
};
use crate::download::download_payload_with_progress;
use crate::prompt::{parse_answer, resolve_decisions, Confirm};
use crate::render::{
    output_style_for, render_progress_line, render_status_line, OutputStyle, TerminalRenderer,
};
use crate::toolchain::{
    build_global_install_command, find_executable, global_tool_path,
    install_global_tool_with_runner, provision_extractor, PathToolchain, Toolchain,
    ToolchainProvisioner,
};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

const PROFILE: &str = r#"
name = "example"
install_root = "install"

[process]
name = "Example"

[patch]
needle_file = "needle.txt"
replacement_file = "replacement.txt"
marker = "/*bundlepatch*/"
"#;

fn test_dir() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "bundlepatch-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn write_profile(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("bundlepatch.toml");
    fs::write(&path, body).expect("must write profile");
    fs::write(dir.join("needle.txt"), "if(!license.valid){showBanner()}\n").expect("needle");
    fs::write(
        dir.join("replacement.txt"),
        "/*bundlepatch*/if(false){showBanner()}",
    )
    .expect("replacement");
    path
}

fn loaded_profile(dir: &Path) -> LoadedProfile {
    let path = write_profile(dir, PROFILE);
    load_profile(Some(&path)).expect("must load profile")
}

struct ScriptedPrompt {
    answers: VecDeque<bool>,
    asked: Vec<String>,
}

impl ScriptedPrompt {
    fn answering(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            asked: Vec::new(),
        }
    }
}

impl Confirm for ScriptedPrompt {
    fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        self.asked.push(question.to_string());
        Ok(self.answers.pop_front().unwrap_or(false))
    }
}

#[test]
fn cli_parses_install_flags_and_global_options() {
    let cli = Cli::try_parse_from([
        "bundlepatch",
        "install",
        "--payload",
        "payload.zip",
        "--yes",
        "--remove-update-manifest",
        "--dry-run",
        "--install-root",
        "/opt/example",
    ])
    .expect("must parse");

    assert_eq!(cli.install_root.as_deref(), Some(Path::new("/opt/example")));
    match cli.command {
        Commands::Install(args) => {
            assert_eq!(args.payload.as_deref(), Some(Path::new("payload.zip")));
            assert!(args.yes);
            assert!(args.remove_update_manifest);
            assert!(!args.remove_leftover_manifest);
            assert!(args.dry_run);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_parses_status_and_completions() {
    let cli = Cli::try_parse_from(["bundlepatch", "--profile", "p.toml", "status", "--json"])
        .expect("must parse status");
    assert_eq!(cli.profile.as_deref(), Some(Path::new("p.toml")));
    assert!(matches!(cli.command, Commands::Status { json: true }));

    let cli = Cli::try_parse_from(["bundlepatch", "completions", "zsh"])
        .expect("must parse completions");
    assert!(matches!(
        cli.command,
        Commands::Completions {
            shell: clap_complete::Shell::Zsh
        }
    ));
}

#[test]
fn cli_rejects_unknown_subcommand() {
    let err = Cli::try_parse_from(["bundlepatch", "uninstall"]).expect_err("must reject");
    assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
}

#[test]
fn completions_script_mentions_binary_name() {
    let mut out = Vec::new();
    write_completions_script(clap_complete::Shell::Bash, &mut out).expect("must generate");
    let script = String::from_utf8(out).expect("utf8");
    assert!(script.contains("bundlepatch"));
    assert!(script.contains("install"));
}

#[test]
fn exit_codes_follow_pipeline_error_through_context() {
    let err = anyhow::Error::from(PipelineError::ConfirmationDeclined)
        .context("install example failed");
    assert_eq!(exit_code_for(&err), 5);

    let err = anyhow::Error::from(PipelineError::Stage(StageError::MissingExpectedEntry {
        entry: "app".to_string(),
        path: PathBuf::from("/tmp/stage/app"),
    }));
    assert_eq!(exit_code_for(&err), 6);

    assert_eq!(exit_code_for(&anyhow!("profile not found")), 1);
}

#[test]
fn profile_loads_relative_to_its_directory() {
    let dir = test_dir();
    let loaded = loaded_profile(&dir);

    assert_eq!(loaded.profile.name, "example");
    assert_eq!(loaded.dir, dir);
    let substitution = load_substitution(&loaded).expect("must load substitution");
    assert_eq!(substitution.marker(), "/*bundlepatch*/");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_profile_names_the_path() {
    let dir = test_dir();
    let err = load_profile(Some(&dir.join("absent.toml"))).expect_err("must fail");
    assert!(err.to_string().contains("absent.toml"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn install_root_prefers_flag_then_env_then_profile() {
    let dir = test_dir();
    let loaded = loaded_profile(&dir);

    let root = resolve_install_root(
        Some(Path::new("/flag")),
        Some(OsString::from("/env")),
        &loaded,
    )
    .expect("flag");
    assert_eq!(root, PathBuf::from("/flag"));

    let root = resolve_install_root(None, Some(OsString::from("/env")), &loaded).expect("env");
    assert_eq!(root, PathBuf::from("/env"));

    let root = resolve_install_root(None, Some(OsString::new()), &loaded).expect("profile");
    assert_eq!(root, dir.join("install"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn install_root_missing_everywhere_is_an_error() {
    let dir = test_dir();
    let path = write_profile(&dir, &PROFILE.replace("install_root = \"install\"\n", ""));
    let loaded = load_profile(Some(&path)).expect("must load");

    let err = resolve_install_root(None, None, &loaded).expect_err("must fail");
    assert!(err.to_string().contains("--install-root"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn decisions_skip_prompts_with_yes() {
    let dir = test_dir();
    let paths = BundlePaths::new(dir.clone(), &Default::default());
    fs::create_dir_all(paths.app_dir()).expect("app dir");
    fs::write(paths.update_manifest_path(), "provider: generic").expect("manifest");
    let plan = reconcile(
        RequestedAction::Install,
        &ProbeReport {
            app_folder_exists: true,
            ..ProbeReport::default()
        },
    )
    .expect("must plan");
    assert!(plan.requires_confirmation());

    let args = PatchArgs {
        yes: true,
        ..PatchArgs::default()
    };
    let mut prompt = ScriptedPrompt::answering(&[]);
    let decisions = resolve_decisions(&plan, &args, &paths, &mut prompt).expect("decisions");

    assert!(decisions.overwrite_consent);
    assert!(!decisions.remove_update_manifest);
    assert!(prompt.asked.is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn decisions_ask_overwrite_and_existing_manifest_only() {
    let dir = test_dir();
    let paths = BundlePaths::new(dir.clone(), &Default::default());
    fs::write(paths.update_manifest_path(), "provider: generic").expect("manifest");
    let plan = reconcile(
        RequestedAction::Install,
        &ProbeReport {
            app_folder_exists: true,
            ..ProbeReport::default()
        },
    )
    .expect("must plan");

    let mut prompt = ScriptedPrompt::answering(&[false, true]);
    let decisions =
        resolve_decisions(&plan, &PatchArgs::default(), &paths, &mut prompt).expect("decisions");

    assert!(!decisions.overwrite_consent);
    assert!(decisions.remove_update_manifest);
    assert!(!decisions.remove_leftover_manifest);
    assert_eq!(prompt.asked.len(), 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn update_never_asks_for_overwrite() {
    let dir = test_dir();
    let paths = BundlePaths::new(dir.clone(), &Default::default());
    let plan = reconcile(
        RequestedAction::Update,
        &ProbeReport {
            app_folder_exists: true,
            ..ProbeReport::default()
        },
    )
    .expect("must plan");

    let mut prompt = ScriptedPrompt::answering(&[]);
    let decisions =
        resolve_decisions(&plan, &PatchArgs::default(), &paths, &mut prompt).expect("decisions");
    assert!(decisions.overwrite_consent);
    assert!(prompt.asked.is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn prompt_answers_accept_yes_variants() {
    assert!(parse_answer("y\n"));
    assert!(parse_answer(" YES "));
    assert!(!parse_answer(""));
    assert!(!parse_answer("no"));
}

const EXTERNAL_EXTRACTOR: &str = "\n[toolchain]\nextractor = \"external\"\n";

fn count_provisioning(
    calls: &mut usize,
) -> impl FnMut(&ToolchainSettings) -> anyhow::Result<PathBuf> + '_ {
    move |_settings: &ToolchainSettings| {
        *calls += 1;
        Err(anyhow!("provisioning is not available in tests"))
    }
}

#[test]
fn rejected_plan_never_provisions_extractor() {
    let dir = test_dir();
    let profile_path = write_profile(&dir, &format!("{PROFILE}{EXTERNAL_EXTRACTOR}"));
    let root = dir.join("install");
    fs::create_dir_all(root.join("app")).expect("app dir");
    fs::create_dir_all(root.join("app.asar.unpacked")).expect("legacy dir");
    let mut calls = 0;

    let err = run_patch_with(
        Some(&profile_path),
        Some(&root),
        RequestedAction::Install,
        &PatchArgs::default(),
        &mut ScriptedPrompt::answering(&[]),
        &mut count_provisioning(&mut calls),
    )
    .expect_err("ambiguous root must be rejected");

    assert_eq!(exit_code_for(&err), 3);
    assert_eq!(calls, 0);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn declined_overwrite_never_provisions_extractor() {
    let dir = test_dir();
    let profile_path = write_profile(&dir, &format!("{PROFILE}{EXTERNAL_EXTRACTOR}"));
    let root = dir.join("install");
    fs::create_dir_all(root.join("app")).expect("app dir");
    let mut calls = 0;

    let err = run_patch_with(
        Some(&profile_path),
        Some(&root),
        RequestedAction::Install,
        &PatchArgs::default(),
        &mut ScriptedPrompt::answering(&[false]),
        &mut count_provisioning(&mut calls),
    )
    .expect_err("declined overwrite must stop the run");

    assert_eq!(exit_code_for(&err), 5);
    assert_eq!(calls, 0);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn accepted_plan_provisions_extractor_before_staging() {
    let dir = test_dir();
    let profile_path = write_profile(&dir, &format!("{PROFILE}{EXTERNAL_EXTRACTOR}"));
    let root = dir.join("install");
    fs::create_dir_all(&root).expect("install root");
    fs::write(root.join("app.asar"), b"packed").expect("archive");
    let mut calls = 0;

    let err = run_patch_with(
        Some(&profile_path),
        Some(&root),
        RequestedAction::Install,
        &PatchArgs {
            yes: true,
            ..PatchArgs::default()
        },
        &mut ScriptedPrompt::answering(&[]),
        &mut count_provisioning(&mut calls),
    )
    .expect_err("failed provisioning must stop the run");

    assert!(format!("{err:#}").contains("provisioning is not available"));
    assert_eq!(calls, 1);
    assert!(root.join("app.asar").exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn payload_type_follows_flag_then_url_then_installed_bundle() {
    let dir = test_dir();
    let mut loaded = loaded_profile(&dir);

    let args = PatchArgs {
        payload: Some(PathBuf::from("bundle.asar")),
        ..PatchArgs::default()
    };
    assert_eq!(
        planned_payload_type(&loaded.profile, &args).expect("flag"),
        ArchiveType::Asar
    );

    loaded.profile.payload.url = Some("https://example.test/app.zip?sig=1".to_string());
    assert_eq!(
        planned_payload_type(&loaded.profile, &PatchArgs::default()).expect("url"),
        ArchiveType::Zip
    );

    loaded.profile.payload.url = None;
    assert_eq!(
        planned_payload_type(&loaded.profile, &PatchArgs::default()).expect("installed"),
        ArchiveType::Asar
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn local_payload_flag_is_used_without_download() {
    let dir = test_dir();
    let loaded = loaded_profile(&dir);
    let payload = dir.join("payload.zip");
    fs::write(&payload, b"zip bytes").expect("payload");
    let tool = ToolLayout::new(dir.join("tool"));

    let args = PatchArgs {
        payload: Some(payload.clone()),
        ..PatchArgs::default()
    };
    let source = acquire_payload(
        &loaded.profile,
        &args,
        &tool,
        TerminalRenderer::from_style(OutputStyle::Plain),
    )
    .expect("must resolve payload");
    assert_eq!(
        source,
        PayloadSource::Archive {
            path: payload,
            archive_type: ArchiveType::Zip,
        }
    );
    assert!(!tool.cache_dir().exists());

    let missing = PatchArgs {
        payload: Some(dir.join("missing.zip")),
        ..PatchArgs::default()
    };
    acquire_payload(
        &loaded.profile,
        &missing,
        &tool,
        TerminalRenderer::from_style(OutputStyle::Plain),
    )
    .expect_err("missing payload file must fail");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn downloaded_payload_is_verified_against_checksum() {
    let dir = test_dir();
    let mut loaded = loaded_profile(&dir);
    let payload = b"payload-bytes".to_vec();
    let (url, server) = start_one_shot_http_server(payload.clone(), true);
    loaded.profile.payload.url = Some(format!("{url}.zip"));
    loaded.profile.payload.sha256 = Some("0".repeat(64));
    let tool = ToolLayout::new(dir.join("tool"));

    let err = acquire_payload(
        &loaded.profile,
        &PatchArgs::default(),
        &tool,
        TerminalRenderer::from_style(OutputStyle::Plain),
    )
    .expect_err("checksum mismatch must fail");
    server.join().expect("server thread must join");

    assert!(err.to_string().contains("checksum mismatch"));
    assert!(!tool
        .payload_cache_path("example", ArchiveType::Zip)
        .exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn downloaded_payload_with_matching_checksum_is_staged_from_cache() {
    let dir = test_dir();
    let mut loaded = loaded_profile(&dir);
    let payload = b"payload-bytes".to_vec();
    let (url, server) = start_one_shot_http_server(payload.clone(), true);
    loaded.profile.payload.url = Some(format!("{url}.zip"));
    loaded.profile.payload.sha256 = Some(bundlepatch_security::sha256_hex(&payload));
    let tool = ToolLayout::new(dir.join("tool"));

    let source = acquire_payload(
        &loaded.profile,
        &PatchArgs::default(),
        &tool,
        TerminalRenderer::from_style(OutputStyle::Plain),
    )
    .expect("download must succeed");
    server.join().expect("server thread must join");

    let cache_path = tool.payload_cache_path("example", ArchiveType::Zip);
    assert_eq!(
        source,
        PayloadSource::Archive {
            path: cache_path.clone(),
            archive_type: ArchiveType::Zip,
        }
    );
    assert_eq!(fs::read(cache_path).expect("cache"), payload);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn download_reports_progress_with_known_total() {
    let dir = test_dir();
    let payload = b"bundlepatch-progress-known-total".to_vec();
    let (url, server) = start_one_shot_http_server(payload.clone(), true);
    let cache_path = dir.join("download-known.bin");
    let mut observed = Vec::new();

    let status = download_payload_with_progress(&url, &cache_path, false, |downloaded, total| {
        observed.push((downloaded, total));
    })
    .expect("download must succeed");

    server.join().expect("server thread must join");

    assert_eq!(status, "downloaded");
    assert_eq!(fs::read(&cache_path).expect("must read cache file"), payload);
    let last = observed.last().expect("must have progress events");
    assert_eq!(last.0, payload.len() as u64);
    assert_eq!(last.1, Some(payload.len() as u64));
    assert!(!dir.join("download-known.bin.part").exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn download_reports_progress_without_total_for_streamed_response() {
    let dir = test_dir();
    let payload = b"bundlepatch-progress-unknown-total".to_vec();
    let (url, server) = start_one_shot_http_server(payload.clone(), false);
    let cache_path = dir.join("download-unknown.bin");
    let mut observed = Vec::new();

    let status = download_payload_with_progress(&url, &cache_path, false, |downloaded, total| {
        observed.push((downloaded, total));
    })
    .expect("download must succeed");

    server.join().expect("server thread must join");

    assert_eq!(status, "downloaded");
    assert_eq!(fs::read(&cache_path).expect("must read cache file"), payload);
    let last = observed.last().expect("must have progress events");
    assert_eq!(last.0, payload.len() as u64);
    assert_eq!(last.1, None);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn download_cache_hit_skips_network() {
    let dir = test_dir();
    let cache_path = dir.join("cached.bin");
    fs::write(&cache_path, b"cached").expect("must write cache fixture");

    let status = download_payload_with_progress(
        "http://127.0.0.1:9/unreachable.zip",
        &cache_path,
        false,
        |_downloaded, _total| {},
    )
    .expect("cache hit should short-circuit");

    assert_eq!(status, "cache-hit");
    assert_eq!(fs::read(&cache_path).expect("cache"), b"cached");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn download_retries_server_errors_before_succeeding() {
    let dir = test_dir();
    let payload = b"bundlepatch-retry-success".to_vec();
    let (url, server) = start_retry_http_server(payload.clone(), 3);
    let cache_path = dir.join("download-retry.bin");

    let status =
        download_payload_with_progress(&url, &cache_path, true, |_downloaded, _total| {})
            .expect("download must succeed after bounded retries");

    let observed_attempts = server.join().expect("server thread must join");

    assert_eq!(status, "downloaded");
    assert_eq!(fs::read(&cache_path).expect("must read cache file"), payload);
    assert_eq!(observed_attempts, 3, "retries should be bounded");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn download_does_not_retry_client_errors() {
    let dir = test_dir();
    let (url, server) = start_status_http_server("404 Not Found");
    let cache_path = dir.join("download-missing.bin");

    let err = download_payload_with_progress(&url, &cache_path, false, |_downloaded, _total| {})
        .expect_err("404 must fail");
    server.join().expect("server thread must join");

    assert!(err.to_string().contains("404"));
    assert!(!cache_path.exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "patched main-1.js"),
        "patched main-1.js"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "patch applied"),
        "[OK] patch applied"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "archive still locked"),
        "[WARN] archive still locked"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "step", "plan"),
        "[..] plan"
    );
}

#[test]
fn output_style_is_plain_without_terminal_or_with_no_color() {
    assert_eq!(output_style_for(true, true), OutputStyle::Plain);
    assert_eq!(output_style_for(false, false), OutputStyle::Plain);
    assert_eq!(output_style_for(false, true), OutputStyle::Rich);
}

#[test]
fn progress_line_is_hidden_in_plain_mode() {
    assert!(render_progress_line(OutputStyle::Plain, "download", 5, Some(10), None).is_none());
    let line = render_progress_line(OutputStyle::Rich, "download", 5, Some(10), None)
        .expect("rich line");
    assert!(line.contains(" 50%"));
}

#[test]
fn status_lines_report_state_and_patch_progress() {
    let dir = test_dir();
    let loaded = loaded_profile(&dir);
    let paths = BundlePaths::new(dir.join("install"), &loaded.profile.bundle);
    let report = ProbeReport {
        app_folder_exists: true,
        manifest_version: Some("1.2.0".to_string()),
        ..ProbeReport::default()
    };

    let lines = format_status_lines(
        &loaded.profile,
        &paths,
        &report,
        Some((1, 1)),
        OutputStyle::Rich,
    );
    assert!(lines.contains(&"[OK] state: patched-only".to_string()));
    assert!(lines.contains(&"installed version: 1.2.0".to_string()));
    assert!(lines.contains(&"[OK] patched assets: 1/1".to_string()));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn status_lines_flag_ambiguous_state_with_hint() {
    let profile = PatchProfile::from_toml_str(PROFILE).expect("profile");
    let paths = BundlePaths::new("/opt/example", &profile.bundle);
    let report = ProbeReport {
        app_folder_exists: true,
        unpacked_legacy_exists: true,
        ..ProbeReport::default()
    };

    let lines = format_status_lines(&profile, &paths, &report, None, OutputStyle::Plain);
    assert!(lines.contains(&"state: ambiguous".to_string()));
    assert!(lines.iter().any(|line| line.starts_with("hint: ")));
}

#[test]
fn find_executable_searches_path_entries() {
    let dir = test_dir();
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).expect("bin");
    let file_name = if cfg!(windows) { "tool.exe" } else { "tool" };
    fs::write(bin.join(file_name), b"").expect("tool");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(bin.join(file_name), fs::Permissions::from_mode(0o755))
            .expect("must mark tool executable");
    }
    fs::write(bin.join("plain-file"), b"").expect("non-executable");
    let path_var = std::env::join_paths([dir.join("empty"), bin.clone()]).expect("join");

    assert_eq!(
        find_executable("tool", Some(&path_var)),
        Some(bin.join(file_name))
    );
    assert_eq!(find_executable("other", Some(&path_var)), None);
    #[cfg(unix)]
    assert_eq!(find_executable("plain-file", Some(&path_var)), None);
    assert_eq!(find_executable("tool", None), None);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn path_toolchain_reports_missing_runtime() {
    let dir = test_dir();
    let settings = bundlepatch_core::ToolchainSettings::default();
    let provisioner = PathToolchain::with_path(&settings, Some(dir.clone().into_os_string()));

    let err = provisioner.ensure_toolchain().expect_err("must fail");
    assert!(err.to_string().contains("'node' was not found"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn global_install_runner_receives_expected_command() {
    let package_manager = Path::new("/usr/bin/npm");
    let mut observed_args = Vec::new();
    let mut observed_context = String::new();

    install_global_tool_with_runner(package_manager, "@electron/asar", |command, context| {
        observed_args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        observed_context = context.to_string();
        Ok(())
    })
    .expect("runner should succeed");

    assert_eq!(observed_context, "failed to install extractor tool");
    assert_eq!(
        observed_args,
        vec![
            "install".to_string(),
            "-g".to_string(),
            "@electron/asar".to_string()
        ]
    );
    assert_eq!(
        build_global_install_command(package_manager, "x").get_program(),
        package_manager.as_os_str()
    );
}

#[test]
fn global_tool_path_follows_platform_layout() {
    let prefix = Path::new("/usr/local");
    let expected = if cfg!(windows) {
        prefix.join("asar.cmd")
    } else {
        prefix.join("bin").join("asar")
    };
    assert_eq!(global_tool_path(prefix, "asar"), expected);
}

#[test]
fn extractor_provisioning_surfaces_package_manager_failure() {
    struct MissingPackageManager(PathBuf);
    impl ToolchainProvisioner for MissingPackageManager {
        fn ensure_toolchain(&self) -> anyhow::Result<Toolchain> {
            Ok(Toolchain {
                runtime: self.0.join("node"),
                package_manager: self.0.join("npm"),
            })
        }
    }

    let dir = test_dir();
    let settings = bundlepatch_core::ToolchainSettings::default();
    let err = provision_extractor(&MissingPackageManager(dir.clone()), &settings)
        .expect_err("absent package manager must fail");
    assert!(err.to_string().contains("prefix -g"));

    let _ = fs::remove_dir_all(&dir);
}

fn start_one_shot_http_server(
    payload: Vec<u8>,
    with_content_length: bool,
) -> (String, std::thread::JoinHandle<()>) {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("must bind one-shot test server");
    let address = listener
        .local_addr()
        .expect("must read one-shot test server address");
    let url = format!("http://{address}/payload");
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("must accept test client");
        let mut request_buffer = [0_u8; 1024];
        let _ = std::io::Read::read(&mut stream, &mut request_buffer);

        if with_content_length {
            std::io::Write::write_all(
                &mut stream,
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    payload.len()
                )
                .as_bytes(),
            )
            .expect("must write test response headers");
        } else {
            std::io::Write::write_all(&mut stream, b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n")
                .expect("must write test response headers");
        }
        std::io::Write::write_all(&mut stream, &payload)
            .expect("must write test response payload");
        std::io::Write::flush(&mut stream).expect("must flush test response payload");
    });

    (url, handle)
}

fn start_retry_http_server(
    payload: Vec<u8>,
    success_on_attempt: usize,
) -> (String, std::thread::JoinHandle<usize>) {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("must bind retry test server");
    let address = listener
        .local_addr()
        .expect("must read retry test server address");
    let url = format!("http://{address}/payload.zip");
    let handle = std::thread::spawn(move || {
        for attempt in 1..=success_on_attempt {
            let (mut stream, _) = listener.accept().expect("must accept retry test client");
            let mut request_buffer = [0_u8; 1024];
            let _ = std::io::Read::read(&mut stream, &mut request_buffer);

            if attempt < success_on_attempt {
                std::io::Write::write_all(
                    &mut stream,
                    b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .expect("must write retry test failure response");
            } else {
                std::io::Write::write_all(
                    &mut stream,
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        payload.len()
                    )
                    .as_bytes(),
                )
                .expect("must write retry test success headers");
                std::io::Write::write_all(&mut stream, &payload)
                    .expect("must write retry test payload");
            }
            std::io::Write::flush(&mut stream).expect("must flush retry test response");
        }

        success_on_attempt
    });

    (url, handle)
}

fn start_status_http_server(status_line: &'static str) -> (String, std::thread::JoinHandle<()>) {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("must bind status test server");
    let address = listener
        .local_addr()
        .expect("must read status test server address");
    let url = format!("http://{address}/missing.zip");
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("must accept test client");
        let mut request_buffer = [0_u8; 1024];
        let _ = std::io::Read::read(&mut stream, &mut request_buffer);
        std::io::Write::write_all(
            &mut stream,
            format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        )
        .expect("must write status response");
        std::io::Write::flush(&mut stream).expect("must flush status response");
    });

    (url, handle)
}

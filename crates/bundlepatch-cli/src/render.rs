use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use bundlepatch_core::{PlanStep, VersionComparison};
use bundlepatch_installer::{
    GuardOutcome, PatchOutcome, PipelineReport, PlannedRun, StepStatus,
};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: Option<u64>,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

pub(crate) fn current_output_style() -> OutputStyle {
    output_style_for(
        std::env::var_os("NO_COLOR").is_some(),
        std::io::stdout().is_terminal(),
    )
}

pub(crate) fn output_style_for(no_color: bool, stdout_is_terminal: bool) -> OutputStyle {
    if no_color || !stdout_is_terminal {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Plain {
            return;
        }
        println!();
        println!("{}", colorize(section_style(), &format!("== {title} ==")));
    }

    /// `total` is `None` when the server sends no length; a spinner is shown instead.
    pub(crate) fn start_progress(self, label: &str, total: Option<u64>) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let (progress_bar, template) = match total {
                Some(total) => (
                    ProgressBar::new(total.max(1)),
                    "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {bytes:>10}/{total_bytes:10} {elapsed_precise}",
                ),
                None => (
                    ProgressBar::new_spinner(),
                    "{spinner:.cyan.bold} {msg:<12} {bytes:>10} {elapsed_precise}",
                ),
            };
            if let Ok(style) = ProgressStyle::with_template(template) {
                progress_bar.set_style(style.tick_chars("|/-\\ ").progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

impl TerminalProgress {
    pub(crate) fn set(&mut self, current: u64) {
        self.current = current;
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_position(current);
        }
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "err" => "[ERR]",
                _ => "[..]",
            };
            format!("{badge} {message}")
        }
    }
}

pub(crate) fn format_plan_lines(planned: &PlannedRun, style: OutputStyle) -> Vec<String> {
    let probe = &planned.probe;
    let plan = &planned.plan;
    let mut lines = vec![
        render_status_line(
            style,
            "step",
            &format!("state: {} (action={})", plan.state(), plan.action()),
        ),
        render_status_line(
            style,
            "step",
            &format!(
                "installed version: {}",
                probe.manifest_version.as_deref().unwrap_or("unknown")
            ),
        ),
    ];
    let steps = plan
        .steps()
        .iter()
        .map(|step| step.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");
    lines.push(render_status_line(style, "step", &format!("plan: {steps}")));
    if plan.requires_confirmation() {
        lines.push(render_status_line(
            style,
            "warn",
            "replacing the existing patched app requires confirmation",
        ));
    }
    lines
}

pub(crate) fn format_report_lines(report: &PipelineReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if report.guard == GuardOutcome::StillRunning {
        lines.push(render_status_line(
            style,
            "warn",
            "application was still running during the update",
        ));
    }
    if let Some(comparison) = report.version {
        if comparison != VersionComparison::Same {
            lines.push(render_status_line(
                style,
                "warn",
                &format!("installed version {}", version_phrase(comparison)),
            ));
        }
    }
    for record in &report.patch.steps {
        if let StepStatus::Warned(message) = &record.status {
            lines.push(render_status_line(
                style,
                "warn",
                &format!("{}: {message}", record.step.as_str()),
            ));
        }
    }
    for path in &report.patch.rewritten {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("patched {}", path.display()),
        ));
    }

    let summary = match report.patch.outcome {
        PatchOutcome::Applied => "patch applied".to_string(),
        PatchOutcome::AlreadyPatched => format!(
            "already patched ({} asset(s) carry the marker); nothing rewritten",
            report.patch.already_patched.len()
        ),
    };
    lines.push(render_status_line(style, "ok", &summary));
    let archive_removed = report
        .patch
        .steps
        .iter()
        .any(|record| record.step == PlanStep::RemoveArchive && record.status == StepStatus::Done);
    if archive_removed {
        lines.push(render_status_line(style, "ok", "removed packed archive"));
    }
    lines
}

pub(crate) fn version_phrase(comparison: VersionComparison) -> &'static str {
    match comparison {
        VersionComparison::Same => "matches the payload release",
        VersionComparison::InstalledOlder => "is older than the payload release",
        VersionComparison::InstalledNewer => "is newer than the payload release",
        VersionComparison::Differs => "differs from the payload release",
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: Option<u64>,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();
    let Some(total) = total else {
        return Some(format!(
            "{} {}{}",
            colorize(progress_label_style(), label),
            HumanBytes(current),
            suffix
        ));
    };

    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as u128 * width as u128) / safe_total as u128) as usize;
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current as u128 * 100) / safe_total as u128;
    let counts = format!("{}/{}", HumanBytes(current), HumanBytes(total));

    Some(format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    ))
}

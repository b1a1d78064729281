use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use bundlepatch_core::Plan;
use bundlepatch_installer::{BundlePaths, Decisions};

use crate::PatchArgs;

pub(crate) trait Confirm {
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// Asks on stdin when it is a terminal; answers no otherwise.
pub(crate) struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(false);
        }

        print!("{question} [y/N] ");
        io::stdout().flush().context("failed to flush prompt")?;
        let mut answer = String::new();
        stdin
            .lock()
            .read_line(&mut answer)
            .context("failed to read confirmation")?;
        Ok(parse_answer(&answer))
    }
}

pub(crate) fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Every question is asked here, before the pipeline touches the install root.
/// `--yes` answers the overwrite question and suppresses the optional ones.
pub(crate) fn resolve_decisions(
    plan: &Plan,
    args: &PatchArgs,
    paths: &BundlePaths,
    prompt: &mut dyn Confirm,
) -> Result<Decisions> {
    let overwrite_consent = if !plan.requires_confirmation() || args.yes {
        true
    } else {
        prompt.confirm(&format!(
            "{} already holds a patched app. Replace it?",
            paths.root().display()
        ))?
    };

    let remove_update_manifest = args.remove_update_manifest
        || (!args.yes
            && paths.update_manifest_path().is_file()
            && prompt.confirm("Remove the auto-update manifest so the app stops updating itself?")?);

    let leftover = paths
        .leftover_manifest_path()
        .filter(|path| path.is_file());
    let remove_leftover_manifest = args.remove_leftover_manifest
        || match leftover {
            Some(path) if !args.yes => prompt.confirm(&format!(
                "Remove leftover manifest {}?",
                path.display()
            ))?,
            _ => false,
        };

    Ok(Decisions {
        overwrite_consent,
        remove_update_manifest,
        remove_leftover_manifest,
    })
}

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Error, Result};
use bundlepatch_installer::remove_file_if_exists;
use tracing::{debug, warn};

const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

enum FetchFailure {
    Retryable(Error),
    Fatal(Error),
}

/// Returns `"cache-hit"` or `"downloaded"`. The file at `cache_path` is only
/// ever a complete download; partial data lives in a `.part` sibling.
pub(crate) fn download_payload_with_progress<F>(
    url: &str,
    cache_path: &Path,
    force_redownload: bool,
    mut on_progress: F,
) -> Result<&'static str>
where
    F: FnMut(u64, Option<u64>),
{
    if cache_path.exists() && !force_redownload {
        debug!(path = %cache_path.display(), "payload cache hit");
        return Ok("cache-hit");
    }

    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache dir: {}", parent.display()))?;
    }
    let part_path = part_path_for(cache_path);

    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("bundlepatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let mut attempt = 1;
    loop {
        match fetch_once(&client, url, &part_path, &mut on_progress) {
            Ok(()) => break,
            Err(failure) => {
                let _ = remove_file_if_exists(&part_path);
                let err = match failure {
                    FetchFailure::Fatal(err) => return Err(err),
                    FetchFailure::Retryable(err) if attempt >= MAX_DOWNLOAD_ATTEMPTS => {
                        return Err(err.context(format!(
                            "download failed after {attempt} attempts: {url}"
                        )))
                    }
                    FetchFailure::Retryable(err) => err,
                };
                warn!(attempt, error = %format!("{err:#}"), "payload download failed, retrying");
                thread::sleep(RETRY_BACKOFF * attempt);
                attempt += 1;
            }
        }
    }

    if cache_path.exists() {
        fs::remove_file(cache_path)
            .with_context(|| format!("failed to replace cache file: {}", cache_path.display()))?;
    }
    fs::rename(&part_path, cache_path).with_context(|| {
        format!(
            "failed to move downloaded payload into cache: {}",
            cache_path.display()
        )
    })?;

    Ok("downloaded")
}

fn fetch_once<F>(
    client: &reqwest::blocking::Client,
    url: &str,
    out_path: &Path,
    on_progress: &mut F,
) -> std::result::Result<(), FetchFailure>
where
    F: FnMut(u64, Option<u64>),
{
    let mut response = client.get(url).send().map_err(|err| {
        FetchFailure::Retryable(Error::new(err).context(format!("request failed: {url}")))
    })?;
    let status = response.status();
    if status.is_server_error() {
        return Err(FetchFailure::Retryable(anyhow!(
            "server returned {status} for {url}"
        )));
    }
    if !status.is_success() {
        return Err(FetchFailure::Fatal(anyhow!(
            "server returned {status} for {url}"
        )));
    }

    let total = response.content_length();
    let mut file = File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))
        .map_err(FetchFailure::Fatal)?;
    let mut buffer = vec![0_u8; 64 * 1024];
    let mut downloaded = 0_u64;
    on_progress(0, total);
    loop {
        let read = response.read(&mut buffer).map_err(|err| {
            FetchFailure::Retryable(Error::new(err).context(format!("transfer interrupted: {url}")))
        })?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .with_context(|| format!("failed to write {}", out_path.display()))
            .map_err(FetchFailure::Fatal)?;
        downloaded += read as u64;
        on_progress(downloaded, total);
    }
    file.sync_all()
        .with_context(|| format!("failed to flush {}", out_path.display()))
        .map_err(FetchFailure::Fatal)?;

    if let Some(expected) = total {
        if downloaded != expected {
            return Err(FetchFailure::Retryable(anyhow!(
                "short read from {url}: got {downloaded} of {expected} bytes"
            )));
        }
    }
    Ok(())
}

fn part_path_for(cache_path: &Path) -> PathBuf {
    cache_path.with_file_name(format!(
        "{}.part",
        cache_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("payload")
    ))
}

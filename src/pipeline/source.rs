//! Ingest-source resolution: normalise a user-supplied path or URL to
//! in-memory bytes plus a display name.
//!
//! Downloads are pulled fully into memory rather than to a temp file: the
//! very next step is a content hash over the whole byte sequence and a
//! write into the landing zone, so a file-system detour buys nothing.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Bytes plus the name to store them under in the landing zone.
#[derive(Debug)]
pub struct ResolvedSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to document bytes.
///
/// A URL is downloaded (with `timeout_secs`); anything else is treated as
/// a local file path.
pub async fn resolve_source(
    input: &str,
    timeout_secs: u64,
) -> Result<ResolvedSource, PipelineError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

async fn resolve_local(path_str: &str) -> Result<ResolvedSource, PipelineError> {
    if path_str.is_empty() {
        return Err(PipelineError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    let path = PathBuf::from(path_str);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::FileNotFound { path });
        }
        Err(e) => {
            return Err(PipelineError::Storage {
                key: path.display().to_string(),
                detail: e.to_string(),
            });
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::InvalidInput {
            input: path_str.to_string(),
        })?;

    debug!("resolved local document: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedSource { name, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedSource, PipelineError> {
    info!("downloading document from: {url}");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let name = extract_filename(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                PipelineError::DownloadTimeout {
                    url: url.to_string(),
                    secs: timeout_secs,
                }
            } else {
                PipelineError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?
        .to_vec();

    info!("downloaded {} bytes", bytes.len());
    Ok(ResolvedSource { name, bytes })
}

/// Extract a reasonable landing name from the URL's last path segment.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded".to_string()
}

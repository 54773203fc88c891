//! Conditional image download with content-type and minimum-size validation.
//!
//! Bodies are streamed into a temporary file next to the destination and only
//! published (with a no-clobber rename) once they pass validation, so the
//! destination path never holds a partial or rejected body.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use log::debug;

use crate::config::FetchConfig;
use crate::deadline::Deadline;
use crate::http_client::{self, HttpFailureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailureKind {
    Timeout,
    RateLimited,
    Status,
    Transport,
    Io,
    Cancelled,
}

/// Result of one download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    AlreadyExists,
    Downloaded { bytes: u64 },
    NotAnImage { content_type: String },
    TooSmall { bytes: u64 },
    Failed { kind: FetchFailureKind, detail: String },
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AlreadyExists | Self::Downloaded { .. })
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::AlreadyExists => "already-exists",
            Self::Downloaded { .. } => "downloaded",
            Self::NotAnImage { .. } => "not-an-image",
            Self::TooSmall { .. } => "too-small",
            Self::Failed { detail, .. } => detail,
        }
    }
}

/// Anything that can place an image from `url` at `folder/filename`.
pub trait ImageDownloader: Send + Sync {
    fn download(&self, url: &str, filename: &str, folder: &Path, deadline: &Deadline)
        -> DownloadOutcome;
}

pub struct ImageFetcher {
    http_client: ureq::Agent,
    settings: FetchConfig,
}

impl ImageFetcher {
    pub fn new(http_client: ureq::Agent, settings: FetchConfig) -> Self {
        Self {
            http_client,
            settings,
        }
    }

    fn failed(&self, kind: FetchFailureKind, message: impl AsRef<str>) -> DownloadOutcome {
        DownloadOutcome::Failed {
            kind,
            detail: http_client::truncate_detail(
                message.as_ref(),
                self.settings.max_error_detail_chars,
            ),
        }
    }

    fn request_failure(&self, error: &ureq::Error) -> DownloadOutcome {
        let kind = match (error, http_client::classify_ureq_failure(error)) {
            (_, HttpFailureKind::RateLimited) => FetchFailureKind::RateLimited,
            (_, HttpFailureKind::Timeout) => FetchFailureKind::Timeout,
            (ureq::Error::Status(..), HttpFailureKind::Hard) => FetchFailureKind::Status,
            (ureq::Error::Transport(_), HttpFailureKind::Hard) => FetchFailureKind::Transport,
        };
        self.failed(kind, error.to_string())
    }

    /// Streams the response body into `file`, honoring cancellation between chunks.
    fn stream_body(
        &self,
        mut reader: impl Read,
        file: &mut fs::File,
        deadline: &Deadline,
    ) -> Result<u64, DownloadOutcome> {
        let mut chunk = vec![0u8; self.settings.chunk_size_bytes.max(1)];
        let mut written = 0u64;
        loop {
            if deadline.is_cancelled() {
                return Err(self.failed(FetchFailureKind::Cancelled, "item cancelled"));
            }
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    let kind = if http_client::classify_io_timeout(&error) {
                        FetchFailureKind::Timeout
                    } else {
                        FetchFailureKind::Transport
                    };
                    return Err(self.failed(kind, error.to_string()));
                }
            };
            file.write_all(&chunk[..read])
                .map_err(|error| self.failed(FetchFailureKind::Io, error.to_string()))?;
            written = written.saturating_add(read as u64);
        }
        file.flush()
            .map_err(|error| self.failed(FetchFailureKind::Io, error.to_string()))?;
        Ok(written)
    }

    pub fn fetch(
        &self,
        url: &str,
        filename: &str,
        folder: &Path,
        deadline: &Deadline,
    ) -> DownloadOutcome {
        if let Err(error) = fs::create_dir_all(folder) {
            return self.failed(FetchFailureKind::Io, error.to_string());
        }
        let destination = folder.join(filename);
        if destination.exists() {
            return DownloadOutcome::AlreadyExists;
        }

        let Some(timeout) = deadline.cap(self.settings.request_timeout()) else {
            return self.failed(FetchFailureKind::Cancelled, "item deadline reached");
        };
        let response = match self
            .http_client
            .get(url)
            .set("User-Agent", http_client::session_user_agent())
            .set("Accept", http_client::IMAGE_ACCEPT)
            .set("Referer", &self.settings.referer)
            .timeout(timeout)
            .call()
        {
            Ok(response) => response,
            Err(error) => return self.request_failure(&error),
        };

        let content_type = response.header("content-type").unwrap_or_default().to_string();
        if !content_type.to_ascii_lowercase().contains("image") {
            debug!("Rejecting {} with content type '{}'", url, content_type);
            return DownloadOutcome::NotAnImage { content_type };
        }

        let mut staged = match tempfile::Builder::new()
            .prefix(".imagescout-")
            .suffix(".part")
            .tempfile_in(folder)
        {
            Ok(staged) => staged,
            Err(error) => return self.failed(FetchFailureKind::Io, error.to_string()),
        };
        let written = match self.stream_body(response.into_reader(), staged.as_file_mut(), deadline)
        {
            Ok(written) => written,
            Err(outcome) => return outcome,
        };
        if written < self.settings.min_image_bytes {
            debug!(
                "Discarding {} byte body from {} (floor {} bytes)",
                written, url, self.settings.min_image_bytes
            );
            return DownloadOutcome::TooSmall { bytes: written };
        }

        match staged.persist_noclobber(&destination) {
            Ok(_) => DownloadOutcome::Downloaded { bytes: written },
            Err(error) if error.error.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(
                    "{} appeared while downloading; keeping the existing file",
                    destination.display()
                );
                DownloadOutcome::AlreadyExists
            }
            Err(error) => self.failed(FetchFailureKind::Io, error.error.to_string()),
        }
    }
}

impl ImageDownloader for ImageFetcher {
    fn download(
        &self,
        url: &str,
        filename: &str,
        folder: &Path,
        deadline: &Deadline,
    ) -> DownloadOutcome {
        self.fetch(url, filename, folder, deadline)
    }
}

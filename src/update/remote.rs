//! Talking to the download and release endpoints.

use chrono::{DateTime, Utc};
use reqwest::{blocking::Client, header::LAST_MODIFIED};
use serde_derive::Deserialize;
use std::{fs::File, io::Write, path::Path};

use crate::{errors::UpdateError, update::redact::redact_url};

/// A release manifest as served by the GitHub releases API.
#[derive(Clone, Debug, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub name: Option<String>,
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Asset {
    pub browser_download_url: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub id: i64,
}

/// What a completed download reported about itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Download {
    pub bytes: u64,
    /// Length announced by the server, when it announced one.
    pub expected: Option<u64>,
}

/// The remote end of the pipeline.
pub trait RemoteSource {
    /// The raw `Last-Modified` header of `url`, if the server sent one.
    fn last_modified(&self, url: &str) -> Result<Option<String>, UpdateError>;

    /// The raw release-manifest document at `url`.
    fn release_manifest(&self, url: &str) -> Result<String, UpdateError>;

    /// Stream the body of `url` into `out`.
    fn download(&self, url: &str, out: &mut dyn Write) -> Result<Download, UpdateError>;
}

/// `RemoteSource` over a blocking HTTP client.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, UpdateError> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self { client })
    }
}

fn status_error(status: reqwest::StatusCode, url: &str) -> String {
    format!("HTTP {} from {}", status, redact_url(url))
}

impl RemoteSource for HttpSource {
    fn last_modified(&self, url: &str) -> Result<Option<String>, UpdateError> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|err| UpdateError::MetadataUnavailable(err.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(UpdateError::MetadataUnavailable(status_error(
                response.status(),
                url,
            )));
        }
        Ok(response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned))
    }

    fn release_manifest(&self, url: &str) -> Result<String, UpdateError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .map_err(|err| UpdateError::MetadataUnavailable(err.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(UpdateError::MetadataUnavailable(status_error(
                response.status(),
                url,
            )));
        }
        response
            .text()
            .map_err(|err| UpdateError::MetadataUnavailable(err.without_url().to_string()))
    }

    fn download(&self, url: &str, out: &mut dyn Write) -> Result<Download, UpdateError> {
        let mut response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(UpdateError::TransportFailure(status_error(
                response.status(),
                url,
            )));
        }
        let expected = response.content_length();
        let bytes = response.copy_to(out)?;
        Ok(Download { bytes, expected })
    }
}

/// Parse an RFC 1123 `Last-Modified` value.
pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>, UpdateError> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|date| date.with_timezone(&Utc))
        .map_err(|err| {
            UpdateError::MetadataUnavailable(format!(
                "invalid Last-Modified header {:?}: {}",
                value, err
            ))
        })
}

/// Remote freshness of a data artifact. A missing header is fatal.
pub fn remote_last_modified<R: RemoteSource + ?Sized>(
    source: &R,
    url: &str,
) -> Result<DateTime<Utc>, UpdateError> {
    let header = source.last_modified(url)?.ok_or_else(|| {
        UpdateError::MetadataUnavailable(format!(
            "no Last-Modified header from {}",
            redact_url(url)
        ))
    })?;
    parse_http_date(&header)
}

/// Fetch and decode the latest release manifest.
pub fn latest_release<R: RemoteSource + ?Sized>(
    source: &R,
    url: &str,
) -> Result<Release, UpdateError> {
    let body = source.release_manifest(url)?;
    serde_json::from_str(&body).map_err(|err| {
        UpdateError::MetadataUnavailable(format!("malformed release manifest: {}", err))
    })
}

/// Download `url` into a new file at `dest`.
///
/// A body shorter than the announced length is a transport failure. On error
/// the partially written file is left for the caller to delete.
pub fn fetch<R: RemoteSource + ?Sized>(
    source: &R,
    url: &str,
    dest: &Path,
    log: &slog::Logger,
) -> Result<Download, UpdateError> {
    slog::debug!(log, "Downloading {}", redact_url(url));
    let mut file = File::create(dest).map_err(|err| UpdateError::from_write(dest, err))?;
    let download = source.download(url, &mut file)?;
    file.flush()
        .and_then(|_| file.sync_all())
        .map_err(|err| UpdateError::io(dest.display(), err))?;

    if let Some(expected) = download.expected {
        if expected != download.bytes {
            return Err(UpdateError::TransportFailure(format!(
                "received {} of {} bytes from {}",
                download.bytes,
                expected,
                redact_url(url)
            )));
        }
    }
    slog::debug!(log, "Downloaded {} bytes to {}", download.bytes, dest.display());
    Ok(download)
}

//! Keeping the GeoLite2 databases and the executable itself current.
//!
//! Both pipelines run strictly in sequence: check freshness, fetch, unpack,
//! validate, install. Every temporary file lives in a per-attempt staging
//! directory that is removed whether or not the attempt succeeded. Concurrent
//! updates against the same target are not guarded against.

pub mod archive;
pub mod install;
pub mod paths;
pub mod platform;
pub mod redact;
pub mod remote;
pub mod validate;

use chrono::{DateTime, Utc};
use regex::Regex;
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use url::Url;

use crate::{
    errors::UpdateError,
    settings::{LicenseKey, Settings},
    update::{
        archive::{decompress_single, extract_matching},
        install::{install_data, RenameInstaller, SelfInstaller},
        paths::{resolve_database_path, PathKind},
        platform::Platform,
        redact::redact_url,
        remote::{fetch, latest_release, remote_last_modified, Asset, Release, RemoteSource},
        validate::{ArtifactValidator, ExecutableValidator},
    },
};

/// Name used for release assets and staged executables.
pub const TOOL_NAME: &str = "geoip-lookup";

/// The GeoLite2 databases this tool knows how to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edition {
    Country,
    City,
}

impl Edition {
    /// In the order lookups prefer them.
    pub const ALL: [Edition; 2] = [Edition::Country, Edition::City];

    /// MaxMind edition id, which is also the `database_type` in the metadata.
    pub fn id(self) -> &'static str {
        match self {
            Edition::Country => "GeoLite2-Country",
            Edition::City => "GeoLite2-City",
        }
    }

    pub fn filename(self) -> &'static str {
        match self {
            Edition::Country => "GeoLite2-Country.mmdb",
            Edition::City => "GeoLite2-City.mmdb",
        }
    }

    /// Matches the database inside the release archive, whatever directory
    /// it is nested under.
    pub fn entry_pattern(self) -> Regex {
        Regex::new(&format!("{}$", regex::escape(self.filename()))).unwrap()
    }

    pub fn download_url(self, base: &str, key: &LicenseKey) -> Result<String, UpdateError> {
        let url = Url::parse_with_params(
            base,
            &[
                ("edition_id", self.id()),
                ("license_key", key.expose()),
                ("suffix", "tar.gz"),
            ],
        )
        .map_err(|err| UpdateError::Config(format!("Invalid download URL: {}", err)))?;
        Ok(url.into())
    }
}

/// Comparable marker of how recent a remote artifact is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FreshnessToken {
    LastModified(DateTime<Utc>),
    Tag(String),
}

impl fmt::Display for FreshnessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessToken::LastModified(date) => write!(f, "{}", date.to_rfc2822()),
            FreshnessToken::Tag(tag) => write!(f, "{}", tag),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RemoteArtifactDescriptor {
    pub url: String,
    pub freshness: FreshnessToken,
    pub name: String,
}

/// The file currently in use, as found on disk.
#[derive(Clone, Debug)]
pub struct InstalledArtifact {
    pub path: PathBuf,
    pub modified_at: Option<DateTime<Utc>>,
    pub version: Option<String>,
}

impl InstalledArtifact {
    pub fn inspect(path: &Path) -> Self {
        let modified_at = path
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Self {
            path: path.to_path_buf(),
            modified_at,
            version: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateDecision {
    UpdateNeeded,
    UpToDate,
}

fn strip_v(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

/// Compare a remote artifact with what is installed.
///
/// Timestamps must be strictly newer; tags only need to differ. An artifact
/// that is not installed always needs updating.
pub fn check_freshness(
    remote: &RemoteArtifactDescriptor,
    installed: &InstalledArtifact,
) -> UpdateDecision {
    let needed = match &remote.freshness {
        FreshnessToken::LastModified(remote) => match installed.modified_at {
            Some(local) => *remote > local,
            None => true,
        },
        FreshnessToken::Tag(tag) => match &installed.version {
            Some(version) => strip_v(tag) != strip_v(version),
            None => true,
        },
    };
    if needed {
        UpdateDecision::UpdateNeeded
    } else {
        UpdateDecision::UpToDate
    }
}

/// `<tool>_<tag>_<os>_<arch>.gz`
pub fn asset_name(tool: &str, tag: &str, platform: &Platform) -> String {
    format!("{}_{}_{}_{}.gz", tool, tag, platform.os, platform.arch)
}

/// The release asset built for `platform`, matched by exact name.
pub fn select_asset<'a>(
    release: &'a Release,
    tool: &str,
    platform: &Platform,
) -> Result<&'a Asset, UpdateError> {
    let expected = asset_name(tool, &release.tag_name, platform);
    release
        .assets
        .iter()
        .find(|asset| asset.name == expected)
        .ok_or_else(|| {
            UpdateError::NoApplicableRelease(format!("{} (expected {})", platform, expected))
        })
}

/// A candidate artifact in the staging directory.
#[derive(Debug)]
pub struct StagedArtifact {
    pub temp_path: PathBuf,
    pub validated: bool,
}

impl StagedArtifact {
    pub fn new(temp_path: PathBuf) -> Self {
        Self {
            temp_path,
            validated: false,
        }
    }

    pub fn validate(&mut self, validator: &dyn ArtifactValidator) -> Result<(), UpdateError> {
        validator.validate(&self.temp_path)?;
        self.validated = true;
        Ok(())
    }

    /// Path of the artifact, only once it passed validation.
    pub fn validated_path(&self) -> Result<&Path, UpdateError> {
        if self.validated {
            Ok(&self.temp_path)
        } else {
            Err(UpdateError::ValidationFailed(format!(
                "{} was never validated",
                self.temp_path.display()
            )))
        }
    }
}

/// Per-attempt scratch directory.
struct Staging {
    dir: TempDir,
}

impl Staging {
    fn new(root: &Path) -> Result<Self, UpdateError> {
        let dir = tempfile::Builder::new()
            .prefix("geoip-lookup-")
            .tempdir_in(root)
            .map_err(|err| UpdateError::from_write(root, err))?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove everything staged. Failure is logged, never returned.
    fn cleanup(self, log: &slog::Logger) {
        let path = self.dir.path().to_path_buf();
        slog::debug!(log, "Deleting {}", path.display());
        if let Err(err) = self.dir.close() {
            slog::warn!(log, "Could not delete {}: {}", path.display(), err);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { artifact: String, version: String },
    UpToDate { artifact: String },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Updated { artifact, version } => {
                write!(f, "Updated {} to {}", artifact, version)
            }
            UpdateOutcome::UpToDate { artifact } => write!(f, "{} is already up to date", artifact),
        }
    }
}

/// Runs the database and self-update pipelines.
pub struct Updater<R> {
    source: R,
    settings: Settings,
    log: slog::Logger,
    installer: Box<dyn SelfInstaller>,
    platform: Platform,
    current_version: String,
}

impl<R: RemoteSource> Updater<R> {
    pub fn builder(source: R) -> UpdaterBuilder<R> {
        UpdaterBuilder {
            source,
            settings: None,
            log: None,
            installer: None,
            platform: None,
            current_version: None,
        }
    }

    /// The path the database for `edition` is read from and installed to.
    pub fn database_path(&self, edition: Edition) -> PathBuf {
        let dir = &self.settings.data_dir;
        resolve_database_path(dir, PathKind::of(dir), edition.filename())
    }

    /// Download, validate and install `edition` if the remote copy is newer.
    pub fn update_database(
        &self,
        edition: Edition,
        validator: &dyn ArtifactValidator,
    ) -> Result<UpdateOutcome, UpdateError> {
        let key = self.settings.license_key.as_ref().ok_or_else(|| {
            UpdateError::Config(
                "GeoIP license key not set. Set LICENSE_KEY to your MaxMind license key."
                    .to_owned(),
            )
        })?;
        let url = edition.download_url(&self.settings.db_download_url, key)?;
        let target = self.database_path(edition);
        slog::info!(self.log, "Updating {}", target.display());

        slog::debug!(self.log, "Checking {}", redact_url(&url));
        let remote = RemoteArtifactDescriptor {
            freshness: FreshnessToken::LastModified(remote_last_modified(&self.source, &url)?),
            url,
            name: edition.filename().to_owned(),
        };
        let installed = InstalledArtifact::inspect(&target);
        if check_freshness(&remote, &installed) == UpdateDecision::UpToDate {
            slog::info!(
                self.log,
                "{} is newer than the remote copy ({})",
                installed.path.display(),
                remote.freshness
            );
            return Ok(UpdateOutcome::UpToDate {
                artifact: remote.name,
            });
        }

        let staging = Staging::new(&self.settings.staging_root())?;
        let result = self.stage_database(&staging, &remote, edition, &target, validator);
        staging.cleanup(&self.log);
        result?;

        Ok(UpdateOutcome::Updated {
            artifact: remote.name,
            version: remote.freshness.to_string(),
        })
    }

    fn stage_database(
        &self,
        staging: &Staging,
        remote: &RemoteArtifactDescriptor,
        edition: Edition,
        target: &Path,
        validator: &dyn ArtifactValidator,
    ) -> Result<(), UpdateError> {
        let archive = staging.path(&format!("{}.tar.gz", edition.id()));
        fetch(&self.source, &remote.url, &archive, &self.log)?;

        let pattern = edition.entry_pattern();
        let mut staged = StagedArtifact::new(staging.path(edition.filename()));
        if !extract_matching(&archive, &pattern, &staged.temp_path, &self.log)? {
            return Err(UpdateError::ArtifactNotFound {
                pattern: pattern.as_str().to_owned(),
            });
        }

        staged.validate(validator)?;
        install_data(staged.validated_path()?, target, &self.log)
    }

    /// Replace the executable at `target` with the latest release, if it differs.
    pub fn update_self(&self, target: &Path) -> Result<UpdateOutcome, UpdateError> {
        slog::debug!(self.log, "Fetching {}", redact_url(&self.settings.release_url));
        let release = latest_release(&self.source, &self.settings.release_url)?;
        slog::debug!(
            self.log,
            "Latest release is {} ({})",
            release.tag_name,
            release.published_at.as_deref().unwrap_or("unpublished")
        );

        let artifact = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| TOOL_NAME.to_owned());
        if release.prerelease {
            slog::info!(self.log, "Latest release {} is a prerelease, skipping", release.tag_name);
            return Ok(UpdateOutcome::UpToDate { artifact });
        }

        let remote = RemoteArtifactDescriptor {
            url: self.settings.release_url.clone(),
            freshness: FreshnessToken::Tag(release.tag_name.clone()),
            name: artifact.clone(),
        };
        let installed = InstalledArtifact {
            version: Some(self.current_version.clone()),
            ..InstalledArtifact::inspect(target)
        };
        if check_freshness(&remote, &installed) == UpdateDecision::UpToDate {
            slog::info!(
                self.log,
                "You already have the latest version: {}",
                self.current_version
            );
            return Ok(UpdateOutcome::UpToDate { artifact });
        }

        slog::debug!(
            self.log,
            "Searching {} for {}",
            asset_name(TOOL_NAME, &release.tag_name, &self.platform),
            self.platform
        );
        let asset = select_asset(&release, TOOL_NAME, &self.platform)?;
        slog::info!(self.log, "Updating {} to {}", target.display(), release.tag_name);

        let staging = Staging::new(&self.settings.staging_root())?;
        let result = self.stage_self(&staging, asset, target);
        staging.cleanup(&self.log);
        result?;

        Ok(UpdateOutcome::Updated {
            artifact,
            version: release.tag_name,
        })
    }

    fn stage_self(&self, staging: &Staging, asset: &Asset, target: &Path) -> Result<(), UpdateError> {
        let download = staging.path(&asset.name);
        fetch(&self.source, &asset.browser_download_url, &download, &self.log)?;
        ExecutableValidator::new()
            .expected_len(Some(asset.size))
            .validate(&download)?;

        let mut staged = StagedArtifact::new(staging.path(&format!("{}.tmp", TOOL_NAME)));
        slog::debug!(self.log, "Extracting {}", staged.temp_path.display());
        decompress_single(&download, &staged.temp_path)?;
        staged.validate(&ExecutableValidator::new())?;

        self.installer
            .install_self(staged.validated_path()?, target, &self.log)
    }
}

pub struct UpdaterBuilder<R> {
    source: R,
    settings: Option<Settings>,
    log: Option<slog::Logger>,
    installer: Option<Box<dyn SelfInstaller>>,
    platform: Option<Platform>,
    current_version: Option<String>,
}

impl<R: RemoteSource> UpdaterBuilder<R> {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn log(mut self, log: slog::Logger) -> Self {
        self.log = Some(log);
        self
    }

    pub fn installer<I: SelfInstaller + 'static>(mut self, installer: I) -> Self {
        self.installer = Some(Box::new(installer));
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn current_version<S: Into<String>>(mut self, version: S) -> Self {
        self.current_version = Some(version.into());
        self
    }

    pub fn build(self) -> Updater<R> {
        let settings = self.settings.unwrap_or_default();
        let platform = self
            .platform
            .unwrap_or_else(|| Platform::from_settings(&settings));
        Updater {
            source: self.source,
            log: self
                .log
                .unwrap_or_else(|| slog::Logger::root(slog::Discard, slog::o!())),
            installer: self
                .installer
                .unwrap_or_else(|| Box::new(RenameInstaller)),
            platform,
            current_version: self
                .current_version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned()),
            settings,
        }
    }
}

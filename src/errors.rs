use maxminddb::MaxMindDbError;
use std::{fmt, io, path::PathBuf};

/// Every way an update or lookup can fail.
///
/// All variants are fatal for the invocation that produced them; `main`
/// prints the message and exits non-zero.
#[derive(Debug)]
pub enum UpdateError {
    /// Freshness could not be determined. Nothing was downloaded or written.
    MetadataUnavailable(String),
    /// The download itself failed or was cut short.
    TransportFailure(String),
    /// The archive could not be decompressed or read.
    ArchiveCorrupt(String),
    /// The archive was readable but held no entry matching the pattern.
    ArtifactNotFound { pattern: String },
    /// The candidate artifact failed validation and was discarded.
    ValidationFailed(String),
    /// A write or rename was refused.
    PermissionDenied { path: PathBuf, source: io::Error },
    /// The running executable was moved aside but the new one never landed.
    PartialInstall {
        target: PathBuf,
        old: PathBuf,
        new: PathBuf,
        source: io::Error,
    },
    /// The release manifest has no asset built for this platform.
    NoApplicableRelease(String),
    Config(String),
    Io(String),
    Lookup(String),
}

impl UpdateError {
    pub fn io<S: fmt::Display>(context: S, err: io::Error) -> Self {
        UpdateError::Io(format!("{}: {}", context, err))
    }

    /// Classify a failed write or rename on `path`.
    pub fn from_write(path: impl Into<PathBuf>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                UpdateError::PermissionDenied { path, source: err }
            }
            _ => UpdateError::Io(format!("{}: {}", path.display(), err)),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdateError::PermissionDenied { source, .. } => Some(source),
            UpdateError::PartialInstall { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpdateError::MetadataUnavailable(msg) => {
                write!(formatter, "Could not determine remote version: {}", msg)
            }
            UpdateError::TransportFailure(msg) => write!(formatter, "Download failed: {}", msg),
            UpdateError::ArchiveCorrupt(msg) => write!(formatter, "Archive is corrupt: {}", msg),
            UpdateError::ArtifactNotFound { pattern } => {
                write!(formatter, "No entry matching {} found in archive", pattern)
            }
            UpdateError::ValidationFailed(msg) => {
                write!(formatter, "{}, aborting update", msg)
            }
            UpdateError::PermissionDenied { path, source } => write!(
                formatter,
                "Cannot write {}: {}\nYou may require root permissions.",
                path.display(),
                source
            ),
            UpdateError::PartialInstall {
                target,
                old,
                new,
                source,
            } => write!(
                formatter,
                "Failed to move the new executable into {}: {}\n\
                 The previous executable was left at {}. Restore it with:\n    mv {} {}\n\
                 or finish the update with:\n    mv {} {}",
                target.display(),
                source,
                old.display(),
                old.display(),
                target.display(),
                new.display(),
                target.display()
            ),
            UpdateError::NoApplicableRelease(msg) => {
                write!(formatter, "No downloadable update found for {}", msg)
            }
            UpdateError::Config(msg) => write!(formatter, "{}", msg),
            UpdateError::Io(msg) => write!(formatter, "{}", msg),
            UpdateError::Lookup(msg) => write!(formatter, "{}", msg),
        }
    }
}

impl From<MaxMindDbError> for UpdateError {
    fn from(error: MaxMindDbError) -> Self {
        UpdateError::Lookup(format!("GeoIP database error: {}", error))
    }
}

impl From<envy::Error> for UpdateError {
    fn from(error: envy::Error) -> Self {
        UpdateError::Config(format!("Invalid configuration: {}", error))
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(error: reqwest::Error) -> Self {
        // The URL may carry a license key.
        UpdateError::TransportFailure(error.without_url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::UpdateError;
    use std::{io, path::PathBuf};

    #[test]
    fn permission_errors_are_classified() {
        let err = UpdateError::from_write(
            "/usr/bin/geoip-lookup",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, UpdateError::PermissionDenied { .. }));
        assert!(err.to_string().contains("root permissions"));

        let err = UpdateError::from_write("/tmp/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, UpdateError::Io(_)));
    }

    #[test]
    fn partial_install_explains_recovery() {
        let err = UpdateError::PartialInstall {
            target: PathBuf::from("/usr/bin/geoip-lookup"),
            old: PathBuf::from("/usr/bin/geoip-lookup.old"),
            new: PathBuf::from("/usr/bin/geoip-lookup.new"),
            source: io::Error::from(io::ErrorKind::Other),
        };
        let message = err.to_string();
        assert!(message.contains("mv /usr/bin/geoip-lookup.old /usr/bin/geoip-lookup"));
        assert!(message.contains("mv /usr/bin/geoip-lookup.new /usr/bin/geoip-lookup"));
    }
}

use std::path::Path;

use crate::{errors::UpdateError, geoip::GeoIp, update::Edition};

/// Decides whether a staged artifact may replace the installed one.
pub trait ArtifactValidator {
    fn validate(&self, path: &Path) -> Result<(), UpdateError>;
}

/// Opens a candidate database exactly as lookups do.
pub struct DatabaseValidator {
    edition: Edition,
}

impl DatabaseValidator {
    pub fn new(edition: Edition) -> Self {
        Self { edition }
    }
}

impl ArtifactValidator for DatabaseValidator {
    fn validate(&self, path: &Path) -> Result<(), UpdateError> {
        let corrupt = || {
            UpdateError::ValidationFailed(format!(
                "Downloaded {} database ({}) corrupt",
                self.edition.filename(),
                path.display()
            ))
        };

        let geoip = GeoIp::builder().path(path).build().map_err(|_| corrupt())?;
        match geoip.database_type() {
            Some(kind) if kind.contains(self.edition.id()) => Ok(()),
            Some(kind) => Err(UpdateError::ValidationFailed(format!(
                "Downloaded database is {}, expected {}",
                kind,
                self.edition.id()
            ))),
            None => Err(corrupt()),
        }
    }
}

/// Checks that a downloaded or decompressed executable is complete.
#[derive(Default)]
pub struct ExecutableValidator {
    expected_len: Option<u64>,
}

impl ExecutableValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the file to be exactly `len` bytes. Zero means unknown.
    pub fn expected_len(mut self, len: Option<u64>) -> Self {
        self.expected_len = len.filter(|len| *len > 0);
        self
    }
}

impl ArtifactValidator for ExecutableValidator {
    fn validate(&self, path: &Path) -> Result<(), UpdateError> {
        let meta = path
            .metadata()
            .map_err(|err| UpdateError::ValidationFailed(format!("{}: {}", path.display(), err)))?;
        if !meta.is_file() || meta.len() == 0 {
            return Err(UpdateError::ValidationFailed(format!(
                "{} is empty",
                path.display()
            )));
        }
        match self.expected_len {
            Some(expected) if expected != meta.len() => {
                Err(UpdateError::ValidationFailed(format!(
                    "{} is {} bytes, expected {}",
                    path.display(),
                    meta.len(),
                    expected
                )))
            }
            _ => Ok(()),
        }
    }
}

use serde_derive::Deserialize;
use std::{fmt, path::Path, path::PathBuf};

use crate::errors::UpdateError;

fn default_data_dir() -> PathBuf {
    // alternate default for macOS and custom installs
    let local = Path::new("/usr/local/share/GeoIP");
    if local.is_dir() {
        local.into()
    } else {
        "/usr/share/GeoIP".into()
    }
}

fn default_db_download_url() -> String {
    "https://download.maxmind.com/app/geoip_download".to_owned()
}

fn default_release_url() -> String {
    "https://api.github.com/repos/geoip-lookup/geoip-lookup/releases/latest".to_owned()
}

/// A MaxMind license key. Never printed.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LicenseKey(String);

impl LicenseKey {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    /// Raw value, for building the download URL only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub json_logs: bool,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default, alias = "licensekey")]
    pub license_key: Option<LicenseKey>,

    #[serde(default = "default_db_download_url")]
    pub db_download_url: String,

    #[serde(default = "default_release_url")]
    pub release_url: String,

    #[serde(default)]
    pub target_os: Option<String>,

    #[serde(default)]
    pub target_arch: Option<String>,

    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        // Produce a default value by creating a mock empty environment, and
        // then asking envy to deserialize it. Since all settings have a default
        // value specified in the struct, this works and keeps everything in sync.
        let empty_env: Vec<(String, String)> = Vec::new();
        envy::from_iter(empty_env).unwrap()
    }
}

impl Settings {
    /// Load settings from the environment.
    pub fn load() -> Result<Self, UpdateError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, UpdateError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::from_iter(vars)?)
    }

    /// Root directory for per-attempt staging directories.
    pub fn staging_root(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::{LicenseKey, Settings};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_complete() {
        let settings = Settings::default();
        assert!(!settings.debug);
        assert!(settings.license_key.is_none());
        assert!(settings
            .db_download_url
            .starts_with("https://download.maxmind.com/"));
    }

    #[test]
    fn legacy_license_variable_is_read() -> Result<(), Box<dyn std::error::Error>> {
        let settings = Settings::from_vars(vars(&[("LICENSEKEY", "ABCDEF")]))?;
        assert_eq!(settings.license_key, Some(LicenseKey::new("ABCDEF")));

        let settings = Settings::from_vars(vars(&[("LICENSE_KEY", "XYZ")]))?;
        assert_eq!(settings.license_key, Some(LicenseKey::new("XYZ")));
        Ok(())
    }

    #[test]
    fn license_key_never_printed() -> Result<(), Box<dyn std::error::Error>> {
        let settings = Settings::from_vars(vars(&[("LICENSE_KEY", "ABCDEF")]))?;
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("ABCDEF"));
        assert!(printed.contains("[REDACTED]"));
        Ok(())
    }
}

use std::fmt;

use crate::settings::Settings;

/// OS/architecture pair, named the way release assets are named.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new<O: Into<String>, A: Into<String>>(os: O, arch: A) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }

    /// The running platform, with any configured override applied.
    pub fn from_settings(settings: &Settings) -> Self {
        let current = Self::current();
        Self {
            os: settings.target_os.clone().unwrap_or(current.os),
            arch: settings.target_arch.clone().unwrap_or(current.arch),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

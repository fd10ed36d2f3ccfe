use serde_derive::Serialize;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    net::{IpAddr, ToSocketAddrs},
    path::{Path, PathBuf},
};

use crate::{
    errors::UpdateError,
    geoip::{GeoIp, Location},
    update::{
        paths::{resolve_database_path, PathKind},
        Edition,
    },
};

#[derive(Serialize)]
struct CountryResponse<'a> {
    ip: String,
    country_code: &'a str,
    country_name: &'a str,
}

/// Resolve an address or hostname to the first IP it maps to.
pub fn resolve(host: &str) -> Result<IpAddr, UpdateError> {
    if let Ok(ip) = host.parse() {
        return Ok(ip);
    }
    (host, 0)
        .to_socket_addrs()
        .map_err(|err| UpdateError::Lookup(format!("{}: {}", host, err)))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| UpdateError::Lookup(format!("{}: no addresses found", host)))
}

/// The database lookups read from `configured`.
///
/// A file is used whatever it is named. In a directory the Country database
/// is preferred and the City database, which also carries country data, is
/// used when it is the only one installed.
pub fn lookup_database(configured: &Path) -> PathBuf {
    let kind = PathKind::of(configured);
    if kind == PathKind::File {
        return configured.to_path_buf();
    }

    let candidates = Edition::ALL
        .map(|edition| resolve_database_path(configured, kind, edition.filename()));
    candidates
        .iter()
        .find(|path| path.is_file())
        .unwrap_or(&candidates[0])
        .clone()
}

/// Render a result the way `geoiplookup` does.
pub fn format_location(location: Option<&Location>, iso: bool, country: bool) -> String {
    let (code, name) = location
        .map(|l| (l.iso_code.as_str(), l.name.as_str()))
        .unwrap_or(("", ""));

    if iso || country {
        let mut output = Vec::new();
        if iso && !code.is_empty() {
            output.push(code);
        }
        if country && !name.is_empty() {
            output.push(name);
        }
        return output.join(", ");
    }

    if code.is_empty() {
        "GeoIP Country Edition: IP Address not found".to_owned()
    } else {
        format!("GeoIP Country Edition: {}, {}", code, name)
    }
}

pub struct Lookup {
    geoip: GeoIp,
    log: slog::Logger,
}

impl Lookup {
    pub fn open(database: &Path, log: slog::Logger) -> Result<Self, UpdateError> {
        slog::debug!(log, "Opening {}", database.display());
        let geoip = GeoIp::builder().path(database).build()?;
        Ok(Self { geoip, log })
    }

    pub fn locate(&self, host: &str) -> Result<(IpAddr, Option<Location>), UpdateError> {
        let ip = resolve(host)?;
        slog::debug!(self.log, "Ip search for: {}", ip);
        let location = self.geoip.locate(ip)?;
        if location.as_ref().is_some_and(|l| l.iso_code == "A1") {
            slog::debug!(self.log, "Anonymous IP detected");
        }
        Ok((ip, location))
    }

    /// Look up one address per line of `file`, printing a JSON object for each.
    pub fn batch(&self, file: &Path) -> Result<(), UpdateError> {
        let reader = File::open(file)
            .map(BufReader::new)
            .map_err(|err| UpdateError::io(format!("Error opening batch file {}", file.display()), err))?;

        for line in reader.lines() {
            let line = line.map_err(|err| UpdateError::io("Error reading batch file", err))?;
            let host = line.trim();
            if host.is_empty() {
                continue;
            }
            match self.locate(host) {
                Ok((ip, location)) => println!("{}", batch_line(ip, location.as_ref())),
                Err(err) => slog::error!(self.log, "{}: {}", host, err),
            }
        }
        Ok(())
    }
}

fn batch_line(ip: IpAddr, location: Option<&Location>) -> String {
    let response = CountryResponse {
        ip: ip.to_string(),
        country_code: location.map(|l| l.iso_code.as_str()).unwrap_or(""),
        country_name: location.map(|l| l.name.as_str()).unwrap_or(""),
    };
    serde_json::to_string(&response).unwrap_or_default()
}

#![deny(clippy::all)]

//! Tells you which country an IP address or hostname is in, and keeps its
//! GeoLite2 databases and its own executable up to date.

use clap::{CommandFactory, Parser};
use std::{env, path::PathBuf, process};

use crate::{
    errors::UpdateError,
    logging::MozLogger,
    lookup::{format_location, lookup_database, Lookup},
    settings::Settings,
    update::{remote::HttpSource, validate::DatabaseValidator, Edition, Updater},
};

mod errors;
mod geoip;
mod logging;
mod lookup;
mod settings;
mod update;

#[derive(Parser, Debug)]
#[command(
    name = "geoip-lookup",
    version,
    about = "Find the country an IP address or hostname originates from.",
    after_help = "Commands:\n  \
        db-update        Update the GeoLite2-Country database (do not run more than once a month)\n  \
        db-update-city   Update the GeoLite2-City database (do not run more than once a month)\n  \
        self-update      Replace this executable with the latest release"
)]
struct Cli {
    /// Database directory or file
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    /// File containing IPs (one per line)
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Return country name
    #[arg(short = 'c', long)]
    country: bool,

    /// Return country iso code
    #[arg(short = 'i', long)]
    iso: bool,

    /// Verbose/debug output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// IP address, hostname, `db-update`, `db-update-city` or `self-update`
    target: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let mut settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    };
    if let Some(dir) = cli.dir.clone() {
        settings.data_dir = dir;
    }

    let logger = MozLogger::from_settings(&settings, cli.verbose);
    let code = match run(&cli, settings, &logger.log) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };
    // flush the async drain before exiting
    drop(logger);
    process::exit(code);
}

fn run(cli: &Cli, settings: Settings, log: &slog::Logger) -> Result<(), UpdateError> {
    let database = lookup_database(&settings.data_dir);

    if let Some(file) = &cli.file {
        return Lookup::open(&database, log.clone())?.batch(file);
    }

    let target = match &cli.target {
        Some(target) => target.as_str(),
        None => {
            Cli::command()
                .print_help()
                .map_err(|err| UpdateError::io("Cannot print help", err))?;
            return Ok(());
        }
    };

    match target {
        "db-update" => update_database(settings, log, Edition::Country),
        "db-update-city" => update_database(settings, log, Edition::City),
        "self-update" => self_update(settings, log),
        host => {
            let (_, location) = Lookup::open(&database, log.clone())?.locate(host)?;
            println!("{}", format_location(location.as_ref(), cli.iso, cli.country));
            Ok(())
        }
    }
}

fn update_database(
    settings: Settings,
    log: &slog::Logger,
    edition: Edition,
) -> Result<(), UpdateError> {
    let updater = Updater::builder(HttpSource::new()?)
        .settings(settings)
        .log(log.clone())
        .build();
    let outcome = updater.update_database(edition, &DatabaseValidator::new(edition))?;
    println!("{}", outcome);
    Ok(())
}

fn self_update(settings: Settings, log: &slog::Logger) -> Result<(), UpdateError> {
    let target =
        env::current_exe().map_err(|err| UpdateError::io("Cannot locate executable", err))?;
    let updater = Updater::builder(HttpSource::new()?)
        .settings(settings)
        .log(log.clone())
        .build();
    let outcome = updater.update_self(&target)?;
    println!("{}", outcome);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["geoip-lookup", "-i", "-c", "-d", "/tmp/GeoIP", "8.8.8.8"]);
        assert!(cli.iso && cli.country);
        assert_eq!(cli.dir.as_deref(), Some(std::path::Path::new("/tmp/GeoIP")));
        assert_eq!(cli.target.as_deref(), Some("8.8.8.8"));
    }
}

//! Putting validated artifacts in place.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use crate::{errors::UpdateError, update::paths::sibling};

/// Replace `target` with the contents of `staged`.
///
/// The bytes are first copied to a temporary file beside `target` and only
/// renamed over it once the copy is complete, so an interrupted install never
/// leaves a truncated database behind. `staged` is left for the caller.
pub fn install_data(staged: &Path, target: &Path, log: &slog::Logger) -> Result<(), UpdateError> {
    let dir = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        slog::debug!(log, "Creating {}", dir.display());
        fs::create_dir_all(&dir).map_err(|err| UpdateError::from_write(&dir, err))?;
    }

    let expected = staged
        .metadata()
        .map_err(|err| UpdateError::io(staged.display(), err))?
        .len();

    let mut temp = tempfile::Builder::new()
        .prefix(".geoip-lookup-")
        .tempfile_in(&dir)
        .map_err(|err| UpdateError::from_write(&dir, err))?;
    let mut source = File::open(staged).map_err(|err| UpdateError::io(staged.display(), err))?;
    let copied = io::copy(&mut source, temp.as_file_mut())
        .map_err(|err| UpdateError::from_write(temp.path(), err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| UpdateError::from_write(temp.path(), err))?;
    if copied != expected {
        return Err(UpdateError::Io(format!(
            "short copy to {}: {} of {} bytes",
            temp.path().display(),
            copied,
            expected
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o644))
            .map_err(|err| UpdateError::from_write(temp.path(), err))?;
    }

    slog::debug!(log, "Moving new database into {}", target.display());
    temp.persist(target)
        .map_err(|err| UpdateError::from_write(target, err.error))?;
    Ok(())
}

/// Swaps a staged executable in for the one at `target`.
///
/// Kept behind a trait so platforms that cannot rename a running executable
/// can provide their own strategy.
pub trait SelfInstaller {
    fn install_self(
        &self,
        staged: &Path,
        target: &Path,
        log: &slog::Logger,
    ) -> Result<(), UpdateError>;
}

/// Same-directory rename sequence through `<binary>.new` and `<binary>.old`.
#[derive(Default)]
pub struct RenameInstaller;

impl SelfInstaller for RenameInstaller {
    fn install_self(
        &self,
        staged: &Path,
        target: &Path,
        log: &slog::Logger,
    ) -> Result<(), UpdateError> {
        swap_executable(staged, target, log, |from, to| fs::rename(from, to))
    }
}

/// The rename sequence, with the rename primitive injectable for tests.
///
/// Interrupting the process between moving the old executable aside and
/// removing it can leave only `<binary>.old` and `<binary>.new` on disk; this
/// is reported as `PartialInstall` when detected and must be resolved by hand
/// otherwise. Either sibling can be moved back into place.
pub(crate) fn swap_executable<F>(
    staged: &Path,
    target: &Path,
    log: &slog::Logger,
    rename: F,
) -> Result<(), UpdateError>
where
    F: Fn(&Path, &Path) -> io::Result<()>,
{
    let target = target
        .canonicalize()
        .map_err(|err| UpdateError::io(format!("Cannot resolve {}", target.display()), err))?;
    let new = sibling(&target, ".new");
    let old = sibling(&target, ".old");

    // Stage next to the target so both renames stay on one filesystem.
    slog::debug!(log, "Copying {} to {}", staged.display(), new.display());
    if let Err(err) = fs::copy(staged, &new) {
        let _ = fs::remove_file(&new);
        return Err(UpdateError::from_write(&new, err));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) = fs::set_permissions(&new, fs::Permissions::from_mode(0o755)) {
            let _ = fs::remove_file(&new);
            return Err(UpdateError::from_write(&new, err));
        }
    }

    slog::debug!(log, "Renaming {} to {}", target.display(), old.display());
    if let Err(err) = rename(&target, &old) {
        let _ = fs::remove_file(&new);
        return Err(UpdateError::PermissionDenied {
            path: target,
            source: err,
        });
    }

    slog::debug!(log, "Renaming {} to {}", new.display(), target.display());
    if let Err(err) = rename(&new, &target) {
        slog::crit!(
            log,
            "{} is missing, previous executable left at {} and new one at {}",
            target.display(),
            old.display(),
            new.display()
        );
        return Err(UpdateError::PartialInstall {
            target,
            old,
            new,
            source: err,
        });
    }

    slog::debug!(log, "Deleting {}", old.display());
    if let Err(err) = fs::remove_file(&old) {
        slog::warn!(log, "Could not delete {}: {}", old.display(), err);
    }

    slog::debug!(log, "Deleting {}", staged.display());
    if let Err(err) = fs::remove_file(staged) {
        slog::warn!(log, "Could not delete {}: {}", staged.display(), err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MozLogger;
    use std::cell::Cell;

    #[test]
    fn data_install_replaces_target() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let staged = dir.path().join("staged.mmdb");
        let target = dir.path().join("GeoIP").join("GeoLite2-Country.mmdb");
        fs::write(&staged, b"new database")?;

        install_data(&staged, &target, &MozLogger::default().log)?;
        assert_eq!(fs::read(&target)?, b"new database");
        // only the target remains in the data directory
        assert_eq!(fs::read_dir(target.parent().unwrap())?.count(), 1);

        fs::write(&staged, b"newer database")?;
        install_data(&staged, &target, &MozLogger::default().log)?;
        assert_eq!(fs::read(&target)?, b"newer database");
        Ok(())
    }

    #[test]
    fn self_swap_leaves_no_siblings() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let staged_dir = tempfile::tempdir()?;
        let target = dir.path().join("geoip-lookup");
        let staged = staged_dir.path().join("geoip-lookup.tmp");
        fs::write(&target, b"old binary")?;
        fs::write(&staged, b"new binary")?;

        RenameInstaller.install_self(&staged, &target, &MozLogger::default().log)?;

        assert_eq!(fs::read(&target)?, b"new binary");
        assert!(!dir.path().join("geoip-lookup.old").exists());
        assert!(!dir.path().join("geoip-lookup.new").exists());
        assert!(!staged.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&target)?.permissions().mode() & 0o777, 0o755);
        }
        Ok(())
    }

    #[test]
    fn refused_first_rename_keeps_original() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("geoip-lookup");
        let staged = dir.path().join("staged");
        fs::write(&target, b"old binary")?;
        fs::write(&staged, b"new binary")?;

        let result = swap_executable(&staged, &target, &MozLogger::default().log, |_, _| {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });

        assert!(matches!(result, Err(UpdateError::PermissionDenied { .. })));
        assert_eq!(fs::read(&target)?, b"old binary");
        assert!(!dir.path().join("geoip-lookup.new").exists());
        assert!(!dir.path().join("geoip-lookup.old").exists());
        Ok(())
    }

    #[test]
    fn failed_second_rename_is_partial_install() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("geoip-lookup");
        let staged = dir.path().join("staged");
        fs::write(&target, b"old binary")?;
        fs::write(&staged, b"new binary")?;

        let calls = Cell::new(0);
        let result = swap_executable(&staged, &target, &MozLogger::default().log, |from, to| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                fs::rename(from, to)
            } else {
                Err(io::Error::from(io::ErrorKind::Other))
            }
        });

        match result {
            Err(UpdateError::PartialInstall { old, new, .. }) => {
                assert_eq!(fs::read(&old)?, b"old binary");
                assert_eq!(fs::read(&new)?, b"new binary");
            }
            other => panic!("expected PartialInstall, got {:?}", other),
        }
        assert!(!target.exists());
        Ok(())
    }
}

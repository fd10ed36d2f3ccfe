use flate2::read::GzDecoder;
use regex::Regex;
use std::{
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
};

use crate::errors::UpdateError;

fn corrupt<S: std::fmt::Display>(archive: &Path, err: S) -> UpdateError {
    UpdateError::ArchiveCorrupt(format!("{}: {}", archive.display(), err))
}

/// Like `io::copy`, but read failures are blamed on `archive` and write
/// failures on `dest`.
fn copy_out<R: Read, W: Write>(
    from: &mut R,
    to: &mut W,
    archive: &Path,
    dest: &Path,
) -> Result<u64, UpdateError> {
    let mut buf = [0u8; 64 * 1024];
    let mut copied = 0;
    loop {
        let len = match from.read(&mut buf) {
            Ok(0) => return Ok(copied),
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(corrupt(archive, err)),
        };
        to.write_all(&buf[..len])
            .map_err(|err| UpdateError::from_write(dest, err))?;
        copied += len as u64;
    }
}

/// Copy the first regular-file entry of the `.tar.gz` at `archive` whose
/// in-archive path matches `pattern` to a new file at `dest`.
///
/// Entries are read in stream order and reading stops at the first match.
/// Returns `Ok(false)` when the archive was read to the end without a match,
/// which is distinct from the `ArchiveCorrupt` error for unreadable input.
pub fn extract_matching(
    archive: &Path,
    pattern: &Regex,
    dest: &Path,
    log: &slog::Logger,
) -> Result<bool, UpdateError> {
    slog::debug!(log, "Opening {}", archive.display());
    let file = File::open(archive).map_err(|err| UpdateError::io(archive.display(), err))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    for entry in tar.entries().map_err(|err| corrupt(archive, err))? {
        let mut entry = entry.map_err(|err| corrupt(archive, err))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map_err(|err| corrupt(archive, err))?
            .to_string_lossy()
            .into_owned();
        if !pattern.is_match(&name) {
            continue;
        }

        slog::debug!(log, "Extracting {} to {}", name, dest.display());
        let mut out = File::create(dest).map_err(|err| UpdateError::from_write(dest, err))?;
        let copied = copy_out(&mut entry, &mut out, archive, dest)?;
        out.sync_all()
            .map_err(|err| UpdateError::from_write(dest, err))?;

        let size = entry.header().size().map_err(|err| corrupt(archive, err))?;
        if copied != size {
            return Err(corrupt(
                archive,
                format!("{} truncated ({} of {} bytes)", name, copied, size),
            ));
        }
        return Ok(true);
    }

    Ok(false)
}

/// Decompress a single gzip-compressed file (not an archive) into `dest`.
pub fn decompress_single(source: &Path, dest: &Path) -> Result<u64, UpdateError> {
    let file = File::open(source).map_err(|err| UpdateError::io(source.display(), err))?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut out = File::create(dest).map_err(|err| UpdateError::from_write(dest, err))?;
    let written = copy_out(&mut decoder, &mut out, source, dest)?;
    out.sync_all()
        .map_err(|err| UpdateError::from_write(dest, err))?;
    Ok(written)
}

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::update::Edition;

/// What the configured data path currently is on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    Directory,
    File,
    Missing,
}

impl PathKind {
    pub fn of(path: &Path) -> Self {
        match path.metadata() {
            Ok(meta) if meta.is_dir() => PathKind::Directory,
            Ok(_) => PathKind::File,
            Err(_) => PathKind::Missing,
        }
    }
}

/// Map a configured data path to the database file it designates.
///
/// A directory gets `filename` appended; a file is used as-is. A missing path
/// is treated as a file when it already names a `.mmdb`, otherwise as a
/// directory that will be created. A file named for a different edition
/// belongs to that edition, so `filename` resolves to its sibling instead.
pub fn resolve_database_path(configured: &Path, kind: PathKind, filename: &str) -> PathBuf {
    let as_file = match kind {
        PathKind::Directory => false,
        PathKind::File => true,
        PathKind::Missing => configured.extension().is_some_and(|ext| ext == "mmdb"),
    };
    if !as_file {
        return configured.join(filename);
    }

    let other_edition = configured
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            name != filename && Edition::ALL.iter().any(|edition| edition.filename() == name)
        });
    if other_edition {
        configured.with_file_name(filename)
    } else {
        configured.to_path_buf()
    }
}

/// `<dir>/<name><suffix>` next to `path`.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

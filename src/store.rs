use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::unpacked_marker;
use crate::error::OdsError;
use crate::fetch::partial_path;
use crate::manifest::ResourceEntry;

/// The on-disk dataset cache: `<root>/<dataset>/[<dir>/]<file>`.
///
/// There is no index; a file being present is the only state.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

/// Which files of a dataset are on disk right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheState {
    pub dataset: String,
    pub present: Vec<Utf8PathBuf>,
    pub missing: Vec<Utf8PathBuf>,
}

impl CacheState {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClearResult {
    pub dataset: String,
    pub removed_files: Vec<Utf8PathBuf>,
    pub removed_dirs: Vec<Utf8PathBuf>,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset: &str) -> Utf8PathBuf {
        self.root.join(dataset)
    }

    pub fn resource_path(&self, dataset: &str, relative: &Utf8Path) -> Utf8PathBuf {
        self.dataset_dir(dataset).join(relative)
    }

    pub fn ensure_root(&self) -> Result<(), OdsError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| OdsError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    /// `true` when every file of `entry` exists; stops at the first missing one.
    pub fn is_available(&self, dataset: &str, entry: &ResourceEntry) -> bool {
        entry
            .locations()
            .iter()
            .all(|location| self.exists(&self.resource_path(dataset, &location.relative)))
    }

    pub fn cache_state(&self, dataset: &str, entry: &ResourceEntry) -> CacheState {
        let (present, missing) = entry
            .locations()
            .into_iter()
            .map(|location| location.relative)
            .partition(|relative| self.exists(&self.resource_path(dataset, relative)));
        CacheState {
            dataset: dataset.to_string(),
            present,
            missing,
        }
    }

    /// Removes every file of `entry` and, for nested layouts, the directories
    /// that are left empty. Already-absent paths are skipped.
    pub fn clear(&self, dataset: &str, entry: &ResourceEntry) -> Result<ClearResult, OdsError> {
        let mut result = ClearResult {
            dataset: dataset.to_string(),
            ..ClearResult::default()
        };

        for location in entry.locations() {
            let path = self.resource_path(dataset, &location.relative);
            for candidate in [partial_path(&path), path] {
                if remove_file_if_exists(&candidate)? {
                    info!(path = %candidate, "clear_cache: removed file");
                    result.removed_files.push(candidate);
                }
            }
        }

        for archive_name in &entry.unpack {
            let marker = unpacked_marker(&self.dataset_dir(dataset).join(archive_name));
            if remove_file_if_exists(&marker)? {
                info!(path = %marker, "clear_cache: removed unpack marker");
                result.removed_files.push(marker);
            }
        }

        for dir in entry.nested_dirs() {
            let path = self.dataset_dir(dataset).join(&dir);
            if !path.as_std_path().is_dir() {
                continue;
            }
            match fs::remove_dir(path.as_std_path()) {
                Ok(()) => {
                    info!(path = %path, "clear_cache: removed directory");
                    result.removed_dirs.push(path);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => {
                    warn!(path = %path, "clear_cache: directory not empty, leaving it");
                }
                Err(err) => return Err(OdsError::Filesystem(format!("remove {path}: {err}"))),
            }
        }

        Ok(result)
    }
}

fn remove_file_if_exists(path: &Utf8Path) -> Result<bool, OdsError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(OdsError::Filesystem(format!("remove {path}: {err}"))),
    }
}

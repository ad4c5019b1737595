use std::fs;
use std::time::Instant;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive;
use crate::consent::{ConsentGate, Prompt};
use crate::domain::FetchOptions;
use crate::error::OdsError;
use crate::fetch::Fetcher;
use crate::manifest::{Manifest, ResourceEntry, ResourceLocation, ResourceOverrides};
use crate::progress::ProgressSink;
use crate::store::{CacheState, ClearResult, Store};

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub dataset: String,
    pub dry_run: bool,
    pub fetched: Vec<FetchedFile>,
    pub skipped: Vec<Utf8PathBuf>,
    /// Files a dry run would fetch.
    pub planned: Vec<ResourceLocation>,
    pub unpacked: Vec<Utf8PathBuf>,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedFile {
    pub url: String,
    pub path: Utf8PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub data_dir: Utf8PathBuf,
    pub datasets: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub layout: String,
    pub files: usize,
    pub available: bool,
}

/// Metadata that loaders attach to the data they return.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetDetails {
    pub name: String,
    pub layout: String,
    pub license: Option<String>,
    pub citation: Option<String>,
    pub size: Option<u64>,
    pub details: Option<String>,
    pub urls: Vec<String>,
    pub files: Vec<ResourceLocation>,
}

/// A dataset that is fully present in the cache.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetHandle {
    pub name: String,
    pub dir: Utf8PathBuf,
    pub files: Vec<Utf8PathBuf>,
    pub details: DatasetDetails,
}

/// Ties the manifest, the cache and a fetcher together.
pub struct App<F: Fetcher> {
    store: Store,
    manifest: Manifest,
    fetcher: F,
    gate: ConsentGate,
}

impl<F: Fetcher> App<F> {
    pub fn new(store: Store, manifest: Manifest, fetcher: F, override_manual_authorize: bool) -> Self {
        Self {
            store,
            manifest,
            fetcher,
            gate: ConsentGate::new(override_manual_authorize),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    pub fn register_derived(
        &mut self,
        name: &str,
        base: &str,
        overrides: &ResourceOverrides,
    ) -> Result<&ResourceEntry, OdsError> {
        info!(name, base, "registering derived dataset");
        self.manifest.register_derived(name, base, overrides)
    }

    pub fn is_available(&self, name: &str) -> Result<bool, OdsError> {
        let entry = self.manifest.get(name)?;
        Ok(self.store.is_available(name, entry))
    }

    pub fn cache_state(&self, name: &str) -> Result<CacheState, OdsError> {
        let entry = self.manifest.get(name)?;
        Ok(self.store.cache_state(name, entry))
    }

    pub fn clear_cache(&self, name: &str) -> Result<ClearResult, OdsError> {
        let entry = self.manifest.get(name)?;
        self.store.clear(name, entry)
    }

    /// Shows the license notice and, unless consent is overridden, asks the user.
    pub fn authorize(
        &self,
        name: &str,
        prompt: &mut dyn Prompt,
        sink: &dyn ProgressSink,
    ) -> Result<bool, OdsError> {
        let entry = self.manifest.get(name)?;
        let location = self.store.dataset_dir(name);
        self.gate
            .authorize(name, &entry.meta, &location, prompt, sink)
    }

    /// Fetches every missing file of `name` after consent has been given.
    ///
    /// Consent is asked exactly once per call, before the first transfer, even
    /// when every file is already cached. A failed transfer aborts the call;
    /// files fetched before it stay in the cache.
    pub fn download(
        &self,
        name: &str,
        options: &FetchOptions,
        prompt: &mut dyn Prompt,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, OdsError> {
        let entry = self.manifest.get(name)?;
        let started_at = iso_timestamp();
        let locations = entry.locations();

        if options.dry_run {
            let planned = locations
                .into_iter()
                .filter(|location| {
                    options.force
                        || !self
                            .store
                            .exists(&self.store.resource_path(name, &location.relative))
                })
                .collect();
            return Ok(FetchResult {
                dataset: name.to_string(),
                dry_run: true,
                fetched: Vec::new(),
                skipped: Vec::new(),
                planned,
                unpacked: Vec::new(),
                started_at,
                finished_at: iso_timestamp(),
            });
        }

        if !self.authorize(name, prompt, sink)? {
            info!(dataset = name, "download declined");
            return Err(OdsError::ConsentDenied(name.to_string()));
        }
        self.store.ensure_root()?;

        let start = Instant::now();
        let mut fetched = Vec::new();
        let mut skipped = Vec::new();
        for location in locations {
            let path = self.store.resource_path(name, &location.relative);
            if !options.force && self.store.exists(&path) {
                debug!(%path, "already cached, skipping");
                skipped.push(path);
                continue;
            }
            let bytes = self.fetcher.fetch(&location.url, &path, sink)?;
            fetched.push(FetchedFile {
                url: location.url,
                path,
                bytes,
            });
        }

        let unpacked = self.unpack(name, entry, options.force)?;

        info!(
            dataset = name,
            fetched = fetched.len(),
            skipped = skipped.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "download finished"
        );
        Ok(FetchResult {
            dataset: name.to_string(),
            dry_run: false,
            fetched,
            skipped,
            planned: Vec::new(),
            unpacked,
            started_at,
            finished_at: iso_timestamp(),
        })
    }

    /// Downloads `name` if anything is missing and returns where it lives.
    pub fn ensure(
        &self,
        name: &str,
        prompt: &mut dyn Prompt,
        sink: &dyn ProgressSink,
    ) -> Result<DatasetHandle, OdsError> {
        if !self.is_available(name)? {
            self.download(name, &FetchOptions::default(), prompt, sink)?;
        }
        let entry = self.manifest.get(name)?;
        Ok(DatasetHandle {
            name: name.to_string(),
            dir: self.store.dataset_dir(name),
            files: entry
                .locations()
                .iter()
                .map(|location| self.store.resource_path(name, &location.relative))
                .collect(),
            details: self.details(name)?,
        })
    }

    pub fn details(&self, name: &str) -> Result<DatasetDetails, OdsError> {
        let entry = self.manifest.get(name)?;
        let files = entry.locations();
        Ok(DatasetDetails {
            name: name.to_string(),
            layout: entry.layout.kind().to_string(),
            license: entry.meta.license.clone(),
            citation: entry.meta.citation.clone(),
            size: entry.meta.size,
            details: entry.meta.details.clone(),
            urls: files.iter().map(|location| location.url.clone()).collect(),
            files,
        })
    }

    pub fn list(&self) -> ListResult {
        let datasets = self
            .manifest
            .names()
            .filter_map(|name| {
                let entry = self.manifest.get(name).ok()?;
                Some(ListEntry {
                    name: name.to_string(),
                    layout: entry.layout.kind().to_string(),
                    files: entry.file_count(),
                    available: self.store.is_available(name, entry),
                })
            })
            .collect();
        ListResult {
            data_dir: self.store.root().to_path_buf(),
            datasets,
        }
    }

    /// Extracts every listed archive that has no unpacked marker yet, or all
    /// of them when `force` is set.
    fn unpack(
        &self,
        name: &str,
        entry: &ResourceEntry,
        force: bool,
    ) -> Result<Vec<Utf8PathBuf>, OdsError> {
        let dir = self.store.dataset_dir(name);
        let mut unpacked = Vec::new();
        for archive_name in &entry.unpack {
            let path = dir.join(archive_name);
            if !self.store.exists(&path) {
                warn!(%path, "archive listed for unpacking is missing");
                continue;
            }
            let marker = archive::unpacked_marker(&path);
            if !force && self.store.exists(&marker) {
                debug!(%path, "already unpacked");
                continue;
            }
            archive::unpack(&path, &dir)?;
            fs::write(marker.as_std_path(), b"")
                .map_err(|err| OdsError::Filesystem(format!("write {marker}: {err}")))?;
            unpacked.push(path);
        }
        Ok(unpacked)
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

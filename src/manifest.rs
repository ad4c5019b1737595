use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::DatasetName;
use crate::error::OdsError;

const BUILTIN_RESOURCES: &str = include_str!("data_resources.json");

/// On-disk shape of one manifest entry, keyed the same way as the
/// `data_resources.json` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub urls: Vec<String>,
    pub files: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirs: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffices: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unpack: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceMeta {
    pub license: Option<String>,
    pub citation: Option<String>,
    pub size: Option<u64>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatGroup {
    pub url: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedFile {
    pub dir: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedGroup {
    pub url: String,
    pub files: Vec<NestedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixedFile {
    pub file: String,
    pub suffix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixedGroup {
    pub url: String,
    pub files: Vec<SuffixedFile>,
}

/// How the files of a dataset map onto remote URLs and local paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `url/file` stored as `<dataset>/file`.
    Flat(Vec<FlatGroup>),
    /// `url/dir/file` stored as `<dataset>/dir/file`.
    Nested(Vec<NestedGroup>),
    /// `url/file` + suffix stored as `<dataset>/file`.
    Suffixed(Vec<SuffixedGroup>),
}

impl Layout {
    pub fn kind(&self) -> &'static str {
        match self {
            Layout::Flat(_) => "flat",
            Layout::Nested(_) => "nested",
            Layout::Suffixed(_) => "suffixed",
        }
    }
}

/// One file of a dataset: where to get it and where it lives below the
/// dataset directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceLocation {
    pub url: String,
    pub relative: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub layout: Layout,
    pub meta: ResourceMeta,
    /// Downloaded archives to extract into the dataset directory.
    pub unpack: Vec<String>,
}

impl ResourceEntry {
    pub fn from_raw(dataset: &str, raw: RawEntry) -> Result<Self, OdsError> {
        let RawEntry {
            urls,
            files,
            dirs,
            suffices,
            license,
            citation,
            size,
            details,
            unpack,
        } = raw;

        if urls.len() != files.len() {
            return Err(OdsError::manifest(
                dataset,
                format!("{} urls but {} file groups", urls.len(), files.len()),
            ));
        }
        for file in files.iter().flatten() {
            check_segment(dataset, file)?;
        }

        let layout = match (dirs, suffices) {
            (Some(_), Some(_)) => {
                return Err(OdsError::manifest(
                    dataset,
                    "both dirs and suffices are present",
                ));
            }
            (Some(dirs), None) => {
                check_parallel(dataset, "dirs", &files, &dirs)?;
                let groups = urls
                    .into_iter()
                    .zip(files)
                    .zip(dirs)
                    .map(|((url, files), dirs)| {
                        let files = files
                            .into_iter()
                            .zip(dirs)
                            .map(|(file, dir)| {
                                if !dir.is_empty() {
                                    check_segment(dataset, &dir)?;
                                }
                                Ok(NestedFile { dir, file })
                            })
                            .collect::<Result<Vec<_>, OdsError>>()?;
                        Ok(NestedGroup { url, files })
                    })
                    .collect::<Result<Vec<_>, OdsError>>()?;
                Layout::Nested(groups)
            }
            (None, Some(suffices)) => {
                check_parallel(dataset, "suffices", &files, &suffices)?;
                let groups = urls
                    .into_iter()
                    .zip(files)
                    .zip(suffices)
                    .map(|((url, files), suffices)| SuffixedGroup {
                        url,
                        files: files
                            .into_iter()
                            .zip(suffices)
                            .map(|(file, suffix)| SuffixedFile { file, suffix })
                            .collect(),
                    })
                    .collect();
                Layout::Suffixed(groups)
            }
            (None, None) => Layout::Flat(
                urls.into_iter()
                    .zip(files)
                    .map(|(url, files)| FlatGroup { url, files })
                    .collect(),
            ),
        };

        for archive in &unpack {
            check_segment(dataset, archive)?;
        }

        Ok(Self {
            layout,
            meta: ResourceMeta {
                license,
                citation,
                size,
                details,
            },
            unpack,
        })
    }

    pub fn to_raw(&self) -> RawEntry {
        let mut raw = RawEntry {
            license: self.meta.license.clone(),
            citation: self.meta.citation.clone(),
            size: self.meta.size,
            details: self.meta.details.clone(),
            unpack: self.unpack.clone(),
            ..RawEntry::default()
        };
        match &self.layout {
            Layout::Flat(groups) => {
                for group in groups {
                    raw.urls.push(group.url.clone());
                    raw.files.push(group.files.clone());
                }
            }
            Layout::Nested(groups) => {
                let mut dirs = Vec::new();
                for group in groups {
                    raw.urls.push(group.url.clone());
                    raw.files
                        .push(group.files.iter().map(|f| f.file.clone()).collect());
                    dirs.push(group.files.iter().map(|f| f.dir.clone()).collect());
                }
                raw.dirs = Some(dirs);
            }
            Layout::Suffixed(groups) => {
                let mut suffices = Vec::new();
                for group in groups {
                    raw.urls.push(group.url.clone());
                    raw.files
                        .push(group.files.iter().map(|f| f.file.clone()).collect());
                    suffices.push(group.files.iter().map(|f| f.suffix.clone()).collect());
                }
                raw.suffices = Some(suffices);
            }
        }
        raw
    }

    /// Every file of the dataset in manifest order.
    pub fn locations(&self) -> Vec<ResourceLocation> {
        match &self.layout {
            Layout::Flat(groups) => groups
                .iter()
                .flat_map(|group| {
                    group.files.iter().map(|file| ResourceLocation {
                        url: join_url(&group.url, &[file.as_str()]),
                        relative: Utf8PathBuf::from(file),
                    })
                })
                .collect(),
            Layout::Nested(groups) => groups
                .iter()
                .flat_map(|group| {
                    group.files.iter().map(|entry| ResourceLocation {
                        url: join_url(&group.url, &[entry.dir.as_str(), entry.file.as_str()]),
                        relative: Utf8Path::new(&entry.dir).join(&entry.file),
                    })
                })
                .collect(),
            Layout::Suffixed(groups) => groups
                .iter()
                .flat_map(|group| {
                    group.files.iter().map(|entry| ResourceLocation {
                        url: format!(
                            "{}{}",
                            join_url(&group.url, &[entry.file.as_str()]),
                            entry.suffix
                        ),
                        relative: Utf8PathBuf::from(&entry.file),
                    })
                })
                .collect(),
        }
    }

    /// Sub-directories created by a nested layout, deepest first, without duplicates.
    pub fn nested_dirs(&self) -> Vec<Utf8PathBuf> {
        let Layout::Nested(groups) = &self.layout else {
            return Vec::new();
        };
        let mut dirs: Vec<Utf8PathBuf> = Vec::new();
        for entry in groups.iter().flat_map(|group| &group.files) {
            let mut current = Some(Utf8Path::new(&entry.dir));
            while let Some(dir) = current.filter(|dir| !dir.as_str().is_empty()) {
                if !dirs.iter().any(|known| known == dir) {
                    dirs.push(dir.to_path_buf());
                }
                current = dir.parent();
            }
        }
        dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        dirs
    }

    pub fn file_count(&self) -> usize {
        match &self.layout {
            Layout::Flat(groups) => groups.iter().map(|g| g.files.len()).sum(),
            Layout::Nested(groups) => groups.iter().map(|g| g.files.len()).sum(),
            Layout::Suffixed(groups) => groups.iter().map(|g| g.files.len()).sum(),
        }
    }
}

/// Changes applied to a copy of a base entry by [`Manifest::register_derived`].
#[derive(Debug, Clone, Default)]
pub struct ResourceOverrides {
    /// Replaces the base URLs.
    pub urls: Option<Vec<String>>,
    /// Appended to every base URL (after `urls` is applied).
    pub url_suffix: Option<String>,
    pub files: Option<Vec<Vec<String>>>,
    pub dirs: Option<Vec<Vec<String>>>,
    pub details: Option<String>,
}

/// Registry of every dataset the process knows how to fetch.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: BTreeMap<String, ResourceEntry>,
}

impl Manifest {
    pub fn builtin() -> Result<Self, OdsError> {
        Self::from_json(BUILTIN_RESOURCES)
    }

    pub fn from_json(content: &str) -> Result<Self, OdsError> {
        let raw: BTreeMap<String, RawEntry> = serde_json::from_str(content)
            .map_err(|err| OdsError::manifest("<manifest>", err.to_string()))?;
        let entries = raw
            .into_iter()
            .map(|(name, entry)| {
                name.parse::<DatasetName>()?;
                let entry = ResourceEntry::from_raw(&name, entry)?;
                Ok((name, entry))
            })
            .collect::<Result<BTreeMap<_, _>, OdsError>>()?;
        Ok(Self { entries })
    }

    pub fn load(path: &Utf8Path) -> Result<Self, OdsError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| OdsError::ConfigRead(path.as_std_path().to_path_buf()))?;
        Self::from_json(&content)
    }

    /// Adds every entry of `other`, replacing entries with the same name.
    pub fn merge(&mut self, other: Manifest) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, name: &str) -> Result<&ResourceEntry, OdsError> {
        self.entries
            .get(name)
            .ok_or_else(|| OdsError::UnknownDataset(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, name: &DatasetName, entry: ResourceEntry) {
        self.entries.insert(name.as_str().to_string(), entry);
    }

    /// Registers `name` as a modified copy of `base`. The base entry is left untouched.
    pub fn register_derived(
        &mut self,
        name: &str,
        base: &str,
        overrides: &ResourceOverrides,
    ) -> Result<&ResourceEntry, OdsError> {
        let name: DatasetName = name.parse()?;
        let mut raw = self.get(base)?.to_raw();

        if let Some(urls) = &overrides.urls {
            raw.urls = urls.clone();
        }
        if let Some(suffix) = &overrides.url_suffix {
            for url in &mut raw.urls {
                url.push_str(suffix);
            }
        }
        if let Some(files) = &overrides.files {
            raw.files = files.clone();
        }
        if let Some(dirs) = &overrides.dirs {
            raw.dirs = Some(dirs.clone());
        }
        if let Some(details) = &overrides.details {
            raw.details = Some(details.clone());
        }

        let entry = ResourceEntry::from_raw(name.as_str(), raw)?;
        self.insert(&name, entry);
        self.get(name.as_str())
    }
}

fn check_parallel(
    dataset: &str,
    field: &str,
    files: &[Vec<String>],
    other: &[Vec<String>],
) -> Result<(), OdsError> {
    if files.len() != other.len() {
        return Err(OdsError::manifest(
            dataset,
            format!("{} file groups but {} {field} groups", files.len(), other.len()),
        ));
    }
    for (index, (files, other)) in files.iter().zip(other).enumerate() {
        if files.len() != other.len() {
            return Err(OdsError::manifest(
                dataset,
                format!(
                    "group {index} has {} files but {} {field}",
                    files.len(),
                    other.len()
                ),
            ));
        }
    }
    Ok(())
}

fn check_segment(dataset: &str, value: &str) -> Result<(), OdsError> {
    let path = Utf8Path::new(value);
    let is_valid = !value.is_empty()
        && !value.contains('\\')
        && path
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)));
    if !is_valid {
        return Err(OdsError::manifest(
            dataset,
            format!("invalid relative path {value:?}"),
        ));
    }
    Ok(())
}

/// Joins path segments onto a base URL, percent-encoding each segment.
/// Escapes already present in a segment (`%20`) are kept as they are.
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.replace(' ', "%20");
    for segment in segments.iter().filter(|segment| !segment.is_empty()) {
        if !url.is_empty() && !url.ends_with('/') {
            url.push('/');
        }
        let encoded = segment
            .split('/')
            .map(encode_part)
            .collect::<Vec<_>>()
            .join("/");
        url.push_str(&encoded);
    }
    url
}

fn encode_part(part: &str) -> String {
    let mut encoded = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(index) = rest.find('%') {
        encoded.push_str(&urlencoding::encode(&rest[..index]));
        let escape = rest[index..].as_bytes();
        if escape.len() >= 3 && escape[1].is_ascii_hexdigit() && escape[2].is_ascii_hexdigit() {
            encoded.push_str(&rest[index..index + 3]);
            rest = &rest[index + 3..];
        } else {
            encoded.push_str("%25");
            rest = &rest[index + 1..];
        }
    }
    encoded.push_str(&urlencoding::encode(rest));
    encoded
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn flat(urls: &[&str], files: &[&[&str]]) -> RawEntry {
        RawEntry {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            files: files
                .iter()
                .map(|group| group.iter().map(|f| f.to_string()).collect())
                .collect(),
            ..RawEntry::default()
        }
    }

    #[test]
    fn join_url_escapes_spaces() {
        assert_eq!(
            join_url("http://h/data sets", &["my file.csv"]),
            "http://h/data%20sets/my%20file.csv"
        );
        assert_eq!(join_url("http://h/", &["d1", "x"]), "http://h/d1/x");
        assert_eq!(join_url("http://h/", &["", "x"]), "http://h/x");
    }

    #[test]
    fn join_url_keeps_existing_escapes() {
        assert_eq!(
            join_url("http://h/", &["my%20file.csv"]),
            "http://h/my%20file.csv"
        );
        assert_eq!(
            join_url("http://h/", &["d%2Fx", "a b%41.csv"]),
            "http://h/d%2Fx/a%20b%41.csv"
        );
        assert_eq!(join_url("http://h/", &["100%.csv"]), "http://h/100%25.csv");
        assert_eq!(join_url("http://h/", &["50%zz"]), "http://h/50%25zz");
    }

    #[test]
    fn rejects_both_dirs_and_suffices() {
        let mut raw = flat(&["http://h/"], &[&["a"]]);
        raw.dirs = Some(vec![vec!["d".to_string()]]);
        raw.suffices = Some(vec![vec!["?x".to_string()]]);
        assert_matches!(
            ResourceEntry::from_raw("bad", raw),
            Err(OdsError::InvalidManifest { .. })
        );
    }

    #[test]
    fn rejects_mismatched_groups() {
        let raw = flat(&["http://h/", "http://g/"], &[&["a"]]);
        assert_matches!(
            ResourceEntry::from_raw("bad", raw),
            Err(OdsError::InvalidManifest { .. })
        );

        let mut raw = flat(&["http://h/"], &[&["a", "b"]]);
        raw.dirs = Some(vec![vec!["d".to_string()]]);
        assert_matches!(
            ResourceEntry::from_raw("bad", raw),
            Err(OdsError::InvalidManifest { .. })
        );
    }

    #[test]
    fn rejects_parent_segments() {
        let raw = flat(&["http://h/"], &[&["../escape"]]);
        assert_matches!(
            ResourceEntry::from_raw("bad", raw),
            Err(OdsError::InvalidManifest { .. })
        );
    }

    #[test]
    fn raw_round_trip_preserves_nested_layout() {
        let mut raw = flat(&["http://h/"], &[&["x", "y"]]);
        raw.dirs = Some(vec![vec!["d1".to_string(), "d2".to_string()]]);
        raw.license = Some("CC-BY".to_string());
        let entry = ResourceEntry::from_raw("nested", raw.clone()).unwrap();
        assert_eq!(entry.layout.kind(), "nested");
        assert_eq!(entry.to_raw(), raw);
    }

    #[test]
    fn nested_dirs_deepest_first() {
        let mut raw = flat(&["http://h/"], &[&["x", "y", "z"]]);
        raw.dirs = Some(vec![vec![
            "a".to_string(),
            "a/b".to_string(),
            "c".to_string(),
        ]]);
        let entry = ResourceEntry::from_raw("nested", raw).unwrap();
        let dirs = entry.nested_dirs();
        assert_eq!(dirs[0], Utf8PathBuf::from("a/b"));
        assert_eq!(dirs.len(), 3);
    }
}

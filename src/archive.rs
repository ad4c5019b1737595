//! Extraction of archives that datasets are distributed as.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::OdsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveKind {
    pub fn detect(path: &Utf8Path) -> Option<Self> {
        let name = path.file_name()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

/// Extracts `archive` into `target_dir`, choosing the format from the file name.
pub fn unpack(archive: &Utf8Path, target_dir: &Utf8Path) -> Result<(), OdsError> {
    let kind = ArchiveKind::detect(archive)
        .ok_or_else(|| OdsError::Archive(format!("unsupported archive format: {archive}")))?;
    info!(%archive, %target_dir, "extracting");
    fs::create_dir_all(target_dir.as_std_path())
        .map_err(|err| OdsError::Filesystem(err.to_string()))?;
    match kind {
        ArchiveKind::Zip => extract_zip(open(archive)?, target_dir.as_std_path()),
        ArchiveKind::TarGz => {
            let file = open(archive)?;
            extract_tar(GzDecoder::new(file), target_dir.as_std_path())
        }
        ArchiveKind::Tar => extract_tar(open(archive)?, target_dir.as_std_path()),
    }
}

/// Empty file written next to an archive once it has been fully extracted.
pub fn unpacked_marker(archive: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{archive}.unpacked"))
}

fn open(path: &Utf8Path) -> Result<fs::File, OdsError> {
    fs::File::open(path.as_std_path())
        .map_err(|err| OdsError::Archive(format!("open archive {path}: {err}")))
}

fn extract_zip(file: fs::File, target_dir: &Path) -> Result<(), OdsError> {
    let mut archive = ZipArchive::new(file).map_err(|err| OdsError::Archive(err.to_string()))?;

    for index in 0..archive.len() {
        let mut member = archive
            .by_index(index)
            .map_err(|err| OdsError::Archive(err.to_string()))?;
        // Archives built on Windows use backslash separators.
        let name = PathBuf::from(member.name().replace('\\', "/"));
        let destination = member_path(target_dir, &name)?;
        if member.is_dir() {
            create_dir(&destination)?;
        } else {
            write_member(&mut member, &destination)?;
        }
    }
    Ok(())
}

fn extract_tar(reader: impl io::Read, target_dir: &Path) -> Result<(), OdsError> {
    let mut archive = Archive::new(reader);
    let members = archive
        .entries()
        .map_err(|err| OdsError::Archive(err.to_string()))?;
    for member in members {
        let mut member = member.map_err(|err| OdsError::Archive(err.to_string()))?;
        let name = member
            .path()
            .map_err(|err| OdsError::Archive(err.to_string()))?
            .into_owned();
        let destination = member_path(target_dir, &name)?;
        let kind = member.header().entry_type();
        if kind.is_dir() {
            create_dir(&destination)?;
        } else if kind.is_file() {
            write_member(&mut member, &destination)?;
        } else {
            debug!(member = %name.display(), "skipping non-regular tar member");
        }
    }
    Ok(())
}

/// Where an archive member named `name` lands under `target_dir`. Members
/// whose name is absolute or climbs with `..` are refused.
fn member_path(target_dir: &Path, name: &Path) -> Result<PathBuf, OdsError> {
    let mut destination = target_dir.to_path_buf();
    for component in name.components() {
        match component {
            Component::Normal(part) => destination.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(OdsError::Archive(format!(
                    "archive member {} resolves outside {}",
                    name.display(),
                    target_dir.display()
                )));
            }
        }
    }
    Ok(destination)
}

fn create_dir(path: &Path) -> Result<(), OdsError> {
    fs::create_dir_all(path)
        .map_err(|err| OdsError::Filesystem(format!("create {}: {err}", path.display())))
}

fn write_member(reader: &mut impl io::Read, destination: &Path) -> Result<(), OdsError> {
    if let Some(parent) = destination.parent() {
        create_dir(parent)?;
    }
    let mut file = fs::File::create(destination)
        .map_err(|err| OdsError::Filesystem(format!("create {}: {err}", destination.display())))?;
    io::copy(reader, &mut file)
        .map_err(|err| OdsError::Archive(format!("extract {}: {err}", destination.display())))?;
    Ok(())
}

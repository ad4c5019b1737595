//! Builders for manifest entries derived from a base entry at runtime.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::OdsError;
use crate::manifest::{Manifest, ResourceEntry, ResourceOverrides, join_url};
use crate::store::Store;

pub const FOOTBALL_BASE: &str = "football_data";
pub const CMU_MOCAP_BASE: &str = "cmu_mocap_full";
pub const CMU_MOCAP: &str = "cmu_mocap";
pub const KEPLER_BASE: &str = "kepler_telescope_base";
pub const KEPLER: &str = "kepler_telescope";

/// Name and overrides of the football-data entry for one season, e.g. `"1314"`.
///
/// Divisions E0-E3 exist for every season; the Conference (EC) is only
/// published from the 0506 season on.
pub fn football_season(season: &str) -> Result<(String, ResourceOverrides), OdsError> {
    let pattern =
        Regex::new(r"^(\d{2})(\d{2})$").map_err(|err| OdsError::InvalidSeason(err.to_string()))?;
    let captures = pattern
        .captures(season)
        .ok_or_else(|| OdsError::InvalidSeason(season.to_string()))?;
    let start_year: u32 = captures[1]
        .parse()
        .map_err(|_| OdsError::InvalidSeason(season.to_string()))?;

    let mut files = ["E0.csv", "E1.csv", "E2.csv", "E3.csv"]
        .iter()
        .map(|file| file.to_string())
        .collect::<Vec<_>>();
    if start_year > 4 && start_year < 93 {
        files.push("EC.csv".to_string());
    }

    let overrides = ResourceOverrides {
        url_suffix: Some(format!("{season}/")),
        files: Some(vec![files]),
        ..ResourceOverrides::default()
    };
    Ok((format!("{FOOTBALL_BASE}_{season}"), overrides))
}

/// Registers the season entry in `manifest` and returns its name.
pub fn register_football_season<'a>(
    manifest: &'a mut Manifest,
    season: &str,
) -> Result<(String, &'a ResourceEntry), OdsError> {
    let (name, overrides) = football_season(season)?;
    let entry = manifest.register_derived(&name, FOOTBALL_BASE, &overrides)?;
    Ok((name, entry))
}

/// Overrides for the CMU motion capture files of the given subjects that
/// are not cached yet. `motions[i]` lists the motions of `subjects[i]`.
///
/// Each subject needs its skeleton (`NN.asf`) plus one `NN_MM.amc` per
/// motion, all served from `<base>/NN/`. Subjects whose files are all
/// present contribute no group.
pub fn cmu_mocap_motions(
    manifest: &Manifest,
    store: &Store,
    subjects: &[u32],
    motions: &[Vec<u32>],
) -> Result<ResourceOverrides, OdsError> {
    if subjects.len() != motions.len() {
        return Err(OdsError::manifest(
            CMU_MOCAP,
            format!(
                "{} subjects but {} motion lists",
                subjects.len(),
                motions.len()
            ),
        ));
    }
    let base_url = first_url(manifest, CMU_MOCAP_BASE)?;

    let mut urls = Vec::new();
    let mut files = Vec::new();
    for (subject, subject_motions) in subjects.iter().zip(motions) {
        let subject = format!("{subject:02}");
        let wanted = std::iter::once(format!("{subject}.asf")).chain(
            subject_motions
                .iter()
                .map(|motion| format!("{subject}_{motion:02}.amc")),
        );
        let missing = wanted
            .filter(|file| !is_cached(store, CMU_MOCAP, file))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            continue;
        }
        urls.push(format!("{}/", join_url(&base_url, &[subject.as_str()])));
        files.push(missing);
    }

    Ok(ResourceOverrides {
        urls: Some(urls),
        files: Some(files),
        ..ResourceOverrides::default()
    })
}

pub fn register_cmu_mocap<'a>(
    manifest: &'a mut Manifest,
    store: &Store,
    subjects: &[u32],
    motions: &[Vec<u32>],
) -> Result<&'a ResourceEntry, OdsError> {
    let overrides = cmu_mocap_motions(manifest, store, subjects, motions)?;
    manifest.register_derived(CMU_MOCAP, CMU_MOCAP_BASE, &overrides)
}

/// Overrides for the Kepler long-cadence light curves that are not cached yet.
///
/// `datasets` maps a quarter stamp such as `"2009350155506"` to Kepler ids.
/// Each file is `kplr<id>-<quarter>_llc.fits` under `<base>/<id[..4]>/<id>/`.
pub fn kepler_lightcurves(
    manifest: &Manifest,
    store: &Store,
    datasets: &BTreeMap<String, Vec<String>>,
) -> Result<ResourceOverrides, OdsError> {
    let digits = Regex::new(r"^\d{4,}$").map_err(|err| OdsError::manifest(KEPLER, err.to_string()))?;
    let base_url = first_url(manifest, KEPLER_BASE)?;

    let mut urls = Vec::new();
    let mut files = Vec::new();
    for (quarter, ids) in datasets {
        if !digits.is_match(quarter) {
            return Err(OdsError::manifest(KEPLER, format!("invalid quarter {quarter:?}")));
        }
        for id in ids {
            if !digits.is_match(id) {
                return Err(OdsError::manifest(KEPLER, format!("invalid kepler id {id:?}")));
            }
            let file = format!("kplr{id}-{quarter}_llc.fits");
            if is_cached(store, KEPLER, &file) {
                continue;
            }
            urls.push(format!("{}/", join_url(&base_url, &[&id[..4], id.as_str()])));
            files.push(vec![file]);
        }
    }

    Ok(ResourceOverrides {
        urls: Some(urls),
        files: Some(files),
        ..ResourceOverrides::default()
    })
}

pub fn register_kepler_lightcurves<'a>(
    manifest: &'a mut Manifest,
    store: &Store,
    datasets: &BTreeMap<String, Vec<String>>,
) -> Result<&'a ResourceEntry, OdsError> {
    let overrides = kepler_lightcurves(manifest, store, datasets)?;
    manifest.register_derived(KEPLER, KEPLER_BASE, &overrides)
}

fn first_url(manifest: &Manifest, base: &str) -> Result<String, OdsError> {
    manifest
        .get(base)?
        .to_raw()
        .urls
        .into_iter()
        .next()
        .ok_or_else(|| OdsError::manifest(base, "no base url"))
}

fn is_cached(store: &Store, dataset: &str, file: &str) -> bool {
    store.exists(&store.dataset_dir(dataset).join(file))
}

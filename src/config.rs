use std::env;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::OdsError;

pub const DEFAULT_CONFIG_FILE: &str = "ods-data.json";
pub const DEFAULT_DATA_DIR: &str = "~/ods_data_cache";
pub const ENV_DATA_DIR: &str = "ODS_DATA_DIR";
pub const ENV_OVERRIDE_AUTHORIZE: &str = "ODS_OVERRIDE_AUTHORIZE";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub override_manual_authorize: Option<bool>,
    /// Extra manifest merged over the builtin one.
    #[serde(default)]
    pub manifest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub data_dir: Utf8PathBuf,
    pub override_manual_authorize: bool,
    pub manifest: Option<Utf8PathBuf>,
}

/// Values taken from the process environment, split out so resolution can
/// be tested without touching the real environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub data_dir: Option<String>,
    pub override_manual_authorize: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            data_dir: env::var(ENV_DATA_DIR).ok(),
            override_manual_authorize: env::var(ENV_OVERRIDE_AUTHORIZE).ok(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, OdsError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| OdsError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| OdsError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, EnvOverrides::from_env())
    }

    /// Environment values win over the file; unset values fall back to defaults.
    pub fn resolve_config(config: Config, env: EnvOverrides) -> Result<ResolvedConfig, OdsError> {
        let data_dir = env
            .data_dir
            .filter(|dir| !dir.trim().is_empty())
            .or(config.data_dir)
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        let override_manual_authorize = match env.override_manual_authorize {
            Some(value) => parse_flag(&value),
            None => config.override_manual_authorize.unwrap_or(false),
        };

        Ok(ResolvedConfig {
            data_dir: expand_path(&data_dir)?,
            override_manual_authorize,
            manifest: config.manifest.as_deref().map(expand_path).transpose()?,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Expands a leading `~` and `$VAR` / `${VAR}` references. Unset variables
/// are left as written.
pub fn expand_path(value: &str) -> Result<Utf8PathBuf, OdsError> {
    let pattern = Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .map_err(|err| OdsError::ConfigParse(err.to_string()))?;
    let expanded = pattern.replace_all(value, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    let home_relative = expanded
        .strip_prefix('~')
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .map(|rest| rest.trim_start_matches('/').to_string());
    let Some(rest) = home_relative else {
        return Ok(Utf8PathBuf::from(expanded.into_owned()));
    };

    let home = BaseDirs::new()
        .ok_or_else(|| OdsError::ConfigParse("cannot determine home directory".to_string()))?
        .home_dir()
        .to_path_buf();
    let home = Utf8PathBuf::from_path_buf(home).map_err(|path| {
        OdsError::ConfigParse(format!("non-utf8 home directory {}", path.display()))
    })?;
    let expanded = if rest.is_empty() { home } else { home.join(rest) };
    Ok(expanded)
}

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum OdsError {
    #[error("unknown dataset: {0}")]
    #[diagnostic(help("run `ods-data list` to see the datasets in the manifest"))]
    UnknownDataset(String),

    #[error("invalid dataset name: {0}")]
    InvalidDatasetName(String),

    #[error("invalid resource manifest for {dataset}: {reason}")]
    InvalidManifest { dataset: String, reason: String },

    #[error("permission to download dataset {0} denied")]
    ConsentDenied(String),

    #[error("cannot ask for consent to download {0}: no interactive input available")]
    #[diagnostic(help(
        "set override_manual_authorize=true (config), ODS_OVERRIDE_AUTHORIZE=1 or pass --yes to proceed"
    ))]
    ConsentUnavailable(String),

    #[error("tried url {url} and received client error {status}")]
    ClientError { url: String, status: u16 },

    #[error("tried url {url} and received server error {status}")]
    ServerError { url: String, status: u16 },

    #[error("tried url {url} and received unexpected status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("tried url {url} and failed with error {reason}")]
    Network { url: String, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid football season {0} (expected four digits such as 1314)")]
    InvalidSeason(String),
}

impl OdsError {
    pub(crate) fn manifest(dataset: &str, reason: impl Into<String>) -> Self {
        OdsError::InvalidManifest {
            dataset: dataset.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            OdsError::ClientError { status, .. }
            | OdsError::ServerError { status, .. }
            | OdsError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

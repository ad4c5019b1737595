use std::error::Error as _;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use crate::error::OdsError;
use crate::progress::{DownloadProgress, ProgressEvent, ProgressSink};

pub const CHUNK_SIZE: usize = 8 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT_VALUE: &str = concat!("ods-datasets/", env!("CARGO_PKG_VERSION"));

/// Transfers a single URL into a single local file.
pub trait Fetcher: Send + Sync {
    /// Returns the number of bytes written to `destination`.
    fn fetch(
        &self,
        url: &str,
        destination: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, OdsError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, OdsError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Option::<Duration>::None)
            .build()
            .map_err(|err| OdsError::Network {
                url: String::new(),
                reason: error_chain(&err),
            })?;
        Ok(Self { client })
    }

    fn check_status(url: &str, response: Response) -> Result<Response, OdsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(classify_status(url, status))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        destination: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, OdsError> {
        info!(%url, %destination, "downloading");
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| OdsError::Filesystem(format!("create {parent}: {err}")))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| OdsError::Network {
                url: url.to_string(),
                reason: error_chain(&err),
            })?;
        let mut response = Self::check_status(url, response)?;
        let total = parse_content_length(response.headers().get(CONTENT_LENGTH));

        let partial = partial_path(destination);
        let file = File::create(partial.as_std_path())
            .map_err(|err| OdsError::Filesystem(format!("create {partial}: {err}")))?;
        let mut writer = BufWriter::new(file);

        sink.event(ProgressEvent::Started {
            url: url.to_string(),
            destination: destination.to_path_buf(),
            total,
        });
        let bytes = stream_body(url, &mut response, &mut writer, total, sink)?;
        writer
            .flush()
            .map_err(|err| OdsError::Filesystem(format!("write {partial}: {err}")))?;
        drop(writer);

        fs::rename(partial.as_std_path(), destination.as_std_path())
            .map_err(|err| OdsError::Filesystem(format!("rename {partial}: {err}")))?;
        sink.event(ProgressEvent::Finished(DownloadProgress { bytes, total }));
        info!(%url, bytes, "download complete");
        Ok(bytes)
    }
}

fn stream_body(
    url: &str,
    reader: &mut impl Read,
    writer: &mut impl Write,
    total: Option<u64>,
    sink: &dyn ProgressSink,
) -> Result<u64, OdsError> {
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut bytes = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(OdsError::Network {
                    url: url.to_string(),
                    reason: err.to_string(),
                });
            }
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|err| OdsError::Filesystem(err.to_string()))?;
        bytes += read as u64;
        sink.event(ProgressEvent::Advanced(DownloadProgress { bytes, total }));
    }
    Ok(bytes)
}

/// Maps a non-success status onto the client/server error taxonomy.
pub fn classify_status(url: &str, status: StatusCode) -> OdsError {
    let url = url.to_string();
    let status = status.as_u16();
    match status {
        400..=499 => OdsError::ClientError { url, status },
        500..=u16::MAX => OdsError::ServerError { url, status },
        _ => OdsError::UnexpectedStatus { url, status },
    }
}

/// Expected body length, or `None` when the header is absent, unparsable or
/// one of the placeholder values servers send for unknown lengths.
pub fn parse_content_length(value: Option<&HeaderValue>) -> Option<u64> {
    let value = value?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    match first.parse::<u64>() {
        Ok(length) if length > 1 => Some(length),
        Ok(_) => None,
        Err(_) => {
            debug!(value, "ignoring unparsable content-length");
            None
        }
    }
}

/// Where an in-flight transfer is written before it is committed.
pub fn partial_path(destination: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{destination}.part"))
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    reason
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn content_length_tolerates_garbage() {
        let header = |value: &str| HeaderValue::from_str(value).unwrap();
        assert_eq!(parse_content_length(Some(&header("8192"))), Some(8192));
        assert_eq!(parse_content_length(Some(&header("4096, 4096"))), Some(4096));
        assert_eq!(parse_content_length(Some(&header("lots"))), None);
        assert_eq!(parse_content_length(Some(&header("1"))), None);
        assert_eq!(parse_content_length(Some(&header("-5"))), None);
        assert_eq!(parse_content_length(None), None);
    }

    #[test]
    fn status_classification() {
        assert_matches!(
            classify_status("http://h/x", StatusCode::NOT_FOUND),
            OdsError::ClientError { status: 404, .. }
        );
        assert_matches!(
            classify_status("http://h/x", StatusCode::SERVICE_UNAVAILABLE),
            OdsError::ServerError { status: 503, .. }
        );
        assert_matches!(
            classify_status("http://h/x", StatusCode::NOT_MODIFIED),
            OdsError::UnexpectedStatus { status: 304, .. }
        );
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Utf8Path::new("/cache/ds/a.csv")),
            Utf8PathBuf::from("/cache/ds/a.csv.part")
        );
    }
}

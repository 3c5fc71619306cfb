use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::error::LtxError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_http_client() -> Result<Client, LtxError> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(format!("ltx/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| LtxError::Fatal(format!("failed to build HTTP client: {err}")))
}

/// Where a remote artifact set is served from.
///
/// An `http(s)://` base is fetched over the wire. A `file://` URL or a path
/// naming an existing directory is served from the local filesystem with the
/// same contract — a missing file counts as a 404. Local bases keep every
/// network interaction testable offline.
#[derive(Clone, Debug)]
pub(crate) enum RemoteBase {
    Http(String),
    Local(PathBuf),
}

impl RemoteBase {
    pub(crate) fn parse(raw: &str) -> Self {
        let trimmed = raw.trim().trim_end_matches('/');
        if let Ok(url) = Url::parse(trimmed) {
            if url.scheme() == "file" {
                if let Ok(path) = url.to_file_path() {
                    return RemoteBase::Local(path);
                }
            }
            return RemoteBase::Http(trimmed.to_string());
        }
        // Not a URL: treat an existing directory as a local base.
        let path = Path::new(trimmed);
        if path.is_dir() {
            return RemoteBase::Local(path.to_path_buf());
        }
        RemoteBase::Http(trimmed.to_string())
    }

    /// Fetch `rel` under the base. `Ok(None)` is a definitive absence (HTTP
    /// 404 or missing local file); transport failures are `TransientIo`.
    pub(crate) fn get(&self, client: &Client, rel: &str) -> Result<Option<Vec<u8>>, LtxError> {
        match self {
            RemoteBase::Local(root) => {
                let path = root.join(rel);
                match std::fs::read(&path) {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(err) => Err(LtxError::TransientIo(format!(
                        "failed to read {}: {err}",
                        path.display()
                    ))),
                }
            }
            RemoteBase::Http(base) => {
                let url = format!("{base}/{rel}");
                debug!(url = %url, "fetching");
                let response = client
                    .get(&url)
                    .send()
                    .map_err(|err| LtxError::TransientIo(format!("GET {url}: {err}")))?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(LtxError::TransientIo(format!(
                        "GET {url}: status {}",
                        response.status()
                    )));
                }
                let bytes = response
                    .bytes()
                    .map_err(|err| LtxError::TransientIo(format!("GET {url}: {err}")))?;
                Ok(Some(bytes.to_vec()))
            }
        }
    }
}

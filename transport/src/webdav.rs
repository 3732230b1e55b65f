//! WebDAV transport.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, TransportError};
use crate::profile::Credentials;
use crate::transport::{SendRequest, Transport};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Delivers files with `MKCOL` + `PUT`.
pub struct WebDavTransport {
    /// Base collection URL, always ending in `/`.
    base_url: Url,

    /// Credentials for basic auth.
    credentials: Credentials,

    /// HTTP client.
    client: reqwest::Client,

    /// Collections known to exist on the server.
    known_collections: Mutex<HashSet<String>>,
}

impl WebDavTransport {
    /// Create a transport for the collection at `base_url`.
    pub fn new(base_url: Url, credentials: Credentials) -> Result<Self> {
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(base_url.to_string()));
        }
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            base_url,
            credentials,
            client,
            known_collections: Mutex::new(HashSet::new()),
        })
    }

    /// Base collection URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of `segments` below the base, with a trailing `/` for collections.
    fn url_for<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
        collection: bool,
    ) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| TransportError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty().extend(segments);
            if collection {
                path.push("");
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        if self.credentials.is_anonymous() {
            builder
        } else {
            builder.basic_auth(&self.credentials.user, Some(&self.credentials.password))
        }
    }

    /// Create every missing parent collection of the request's remote path.
    async fn ensure_collections(&self, request: &SendRequest) -> Result<()> {
        let segments: Vec<&str> = request.remote_segments().collect();
        let parents = segments.len().saturating_sub(1);

        for depth in 1..=parents {
            let url = self.url_for(segments[..depth].iter().copied(), true)?;
            if self.is_known(&url) {
                continue;
            }

            let mkcol = Method::from_bytes(b"MKCOL").map_err(|e| TransportError::Task(e.to_string()))?;
            let response = self.request(mkcol, url.clone()).send().await?;
            match response.status() {
                // Created, or already there.
                StatusCode::CREATED | StatusCode::METHOD_NOT_ALLOWED | StatusCode::MOVED_PERMANENTLY => {
                    debug!("Collection ready: {url}");
                    self.remember(&url);
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(TransportError::Auth(url.to_string()));
                }
                status => {
                    return Err(TransportError::Status {
                        method: "MKCOL",
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
            }
        }
        Ok(())
    }

    fn is_known(&self, url: &Url) -> bool {
        self.known_collections
            .lock()
            .map(|known| known.contains(url.as_str()))
            .unwrap_or(false)
    }

    fn remember(&self, url: &Url) {
        if let Ok(mut known) = self.known_collections.lock() {
            known.insert(url.to_string());
        }
    }
}

#[async_trait]
impl Transport for WebDavTransport {
    fn name(&self) -> &str {
        "webdav"
    }

    async fn connect(&self) -> Result<()> {
        let propfind =
            Method::from_bytes(b"PROPFIND").map_err(|e| TransportError::Task(e.to_string()))?;
        let response = self
            .request(propfind, self.base_url.clone())
            .header("Depth", "0")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("Connected to WebDAV endpoint {}", self.base_url);
            return Ok(());
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(TransportError::Auth(self.base_url.to_string()));
        }
        Err(TransportError::Status {
            method: "PROPFIND",
            url: self.base_url.to_string(),
            status: status.as_u16(),
        })
    }

    async fn send_file(&self, request: &SendRequest) -> Result<()> {
        self.ensure_collections(request).await?;

        let url = self.url_for(request.remote_segments(), false)?;
        let file = tokio::fs::File::open(&request.local_path).await?;
        let body = Body::wrap_stream(ReaderStream::new(file));

        debug!("PUT {url} ({} bytes)", request.size);
        let response = self
            .request(Method::PUT, url.clone())
            .header(CONTENT_LENGTH, request.size)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("Sent {} to {url}", request.local_path.display());
            return Ok(());
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(TransportError::Auth(url.to_string()));
        }
        Err(TransportError::Status {
            method: "PUT",
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

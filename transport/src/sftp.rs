//! SFTP transport.
//!
//! libssh2 is blocking, so every session operation runs on the blocking
//! thread pool. One session is cached and reused until a send fails.

use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{Session, Sftp};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, TransportError};
use crate::profile::Credentials;
use crate::transport::{SendRequest, Transport};

const DEFAULT_PORT: u16 = 22;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An authenticated SSH session with its SFTP channel.
struct SftpSession {
    // Keeps the underlying connection alive for `sftp`.
    _session: Session,
    sftp: Sftp,
}

#[derive(Clone)]
struct Endpoint {
    host: String,
    port: u16,
    base_path: String,
    credentials: Credentials,
    timeout: Duration,
}

/// Delivers files over SFTP with password authentication.
pub struct SftpTransport {
    endpoint: Endpoint,
    session: Arc<Mutex<Option<SftpSession>>>,
}

impl SftpTransport {
    /// Create a transport for `sftp://host[:port]/base/path`.
    pub fn new(url: &Url, credentials: Credentials) -> Result<Self> {
        if url.scheme() != "sftp" {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?
            .to_string();
        let base_path = match url.path() {
            "" => ".".to_string(),
            path => path.trim_end_matches('/').to_string(),
        };
        // `sftp://host/` addresses the filesystem root.
        let base_path = if base_path.is_empty() { "/".to_string() } else { base_path };

        Ok(Self {
            endpoint: Endpoint {
                host,
                port: url.port().unwrap_or(DEFAULT_PORT),
                base_path,
                credentials,
                timeout: DEFAULT_TIMEOUT,
            },
            session: Arc::new(Mutex::new(None)),
        })
    }

    /// Remote directory files are delivered into.
    pub fn base_path(&self) -> &str {
        &self.endpoint.base_path
    }

    /// Run `op` with a live session, opening one if needed.
    ///
    /// The cached session is dropped when `op` fails so the next call
    /// reconnects.
    async fn with_session<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Endpoint, &SftpSession) -> Result<T> + Send + 'static,
    {
        let endpoint = self.endpoint.clone();
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| TransportError::Task("sftp session lock poisoned".to_string()))?;
            if guard.is_none() {
                *guard = Some(open_session(&endpoint)?);
            }
            let Some(live) = guard.as_ref() else {
                return Err(TransportError::Task("sftp session unavailable".to_string()));
            };

            let result = op(&endpoint, live);
            if result.is_err() {
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
    }
}

fn open_session(endpoint: &Endpoint) -> Result<SftpSession> {
    debug!("Opening SSH session to {}:{}", endpoint.host, endpoint.port);
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))?;
    tcp.set_read_timeout(Some(endpoint.timeout))?;
    tcp.set_write_timeout(Some(endpoint.timeout))?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(endpoint.timeout.as_millis()).unwrap_or(u32::MAX));
    session.handshake()?;
    session.userauth_password(&endpoint.credentials.user, &endpoint.credentials.password)?;
    if !session.authenticated() {
        return Err(TransportError::Auth(format!(
            "{}@{}",
            endpoint.credentials.user, endpoint.host
        )));
    }

    let sftp = session.sftp()?;
    Ok(SftpSession {
        _session: session,
        sftp,
    })
}

fn upload(endpoint: &Endpoint, live: &SftpSession, request: &SendRequest) -> Result<()> {
    let segments: Vec<&str> = request.remote_segments().collect();
    let Some((file_name, parents)) = segments.split_last() else {
        return Err(TransportError::InvalidUrl(format!(
            "empty remote path for {}",
            request.local_path.display()
        )));
    };

    let mut remote_dir = endpoint.base_path.clone();
    for part in parents {
        remote_dir = join_remote(&remote_dir, part);
        let dir = Path::new(&remote_dir);
        if live.sftp.stat(dir).is_err() {
            // Another writer may have created it in between; the open below
            // reports the real problem if it still does not exist.
            if let Err(e) = live.sftp.mkdir(dir, 0o755) {
                debug!("mkdir {remote_dir} failed: {e}");
            }
        }
    }

    let remote_file = join_remote(&remote_dir, file_name);
    let mut source = File::open(&request.local_path)?;
    let mut target = live.sftp.create(Path::new(&remote_file))?;
    let written = io::copy(&mut source, &mut target)?;
    target.close()?;
    check_written(&remote_file, written, request.size)?;
    info!(
        "Sent {} to sftp://{}{remote_file}",
        request.local_path.display(),
        endpoint.host
    );
    Ok(())
}

fn check_written(remote: &str, written: u64, expected: u64) -> Result<()> {
    if written == expected {
        return Ok(());
    }
    Err(TransportError::Incomplete {
        remote: remote.to_string(),
        written,
        expected,
    })
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[async_trait]
impl Transport for SftpTransport {
    fn name(&self) -> &str {
        "sftp"
    }

    async fn connect(&self) -> Result<()> {
        self.with_session(|endpoint, _| {
            info!("Connected to SFTP endpoint {}:{}", endpoint.host, endpoint.port);
            Ok(())
        })
        .await
    }

    async fn send_file(&self, request: &SendRequest) -> Result<()> {
        let request = request.clone();
        self.with_session(move |endpoint, live| upload(endpoint, live, &request))
            .await
    }
}

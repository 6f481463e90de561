use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{best_port, Connection, Identity, IncomingQuery, Listener, Responder, Transport};

const SOCKET_SUFFIX: &str = ".sock";
const MAX_QUERY_LEN: usize = 4096;
const QUERY_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Unix domain socket transport.
///
/// Every registered port is one socket file `<dir>/<port>.sock`. A dialer
/// picks the socket whose port best matches the query, connects, and sends
/// the query as the first line on the stream. Identities are derived from
/// peer credentials (`uid:<n>`).
#[derive(Debug, Clone)]
pub struct UnixTransport {
    dir: PathBuf,
    mode: u32,
    identity: Identity,
}

impl UnixTransport {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Use `dir` as the socket directory. The directory must exist.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            mode: Self::DEFAULT_SOCKET_MODE,
            identity: Identity::new(format!("uid:{}", current_uid())),
        }
    }

    /// Override the permission mode of created socket files.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// The socket directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Socket path for a port.
    pub fn socket_path(&self, port: &str) -> PathBuf {
        self.dir.join(format!("{port}{SOCKET_SUFFIX}"))
    }

    fn bind(&self, port: &str) -> Result<UdsListener> {
        let path = self.socket_path(port);

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Remove stale socket if it exists, but never remove non-socket files.
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(TransportError::Bind {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                });
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(self.mode)).map_err(
            |e| TransportError::Bind {
                path: path.clone(),
                source: e,
            },
        )?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        info!(?path, port, "listening on unix domain socket");

        Ok(UdsListener {
            listener,
            port: port.to_string(),
            path,
            created_inode: (created.dev(), created.ino()),
        })
    }

    /// Ports with a socket file in the directory.
    pub fn ports(&self) -> Result<Vec<String>> {
        let mut ports = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_socket() {
                continue;
            }
            let name = entry.file_name();
            if let Some(port) = name.to_str().and_then(|n| n.strip_suffix(SOCKET_SUFFIX)) {
                ports.push(port.to_string());
            }
        }
        ports.sort();
        Ok(ports)
    }
}

impl Transport for UnixTransport {
    type Listener = UdsListener;

    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    async fn register(&self, port: &str) -> Result<UdsListener> {
        self.bind(port)
    }

    async fn query(&self, target: &Identity, query: &str) -> Result<Connection> {
        let ports = self.ports()?;
        let port = best_port(ports.iter().map(String::as_str), query)
            .ok_or_else(|| TransportError::NoListener(query.to_string()))?;
        let path = self.socket_path(port);

        let mut stream = UnixStream::connect(&path)
            .await
            .map_err(|e| TransportError::Connect {
                path: path.clone(),
                source: e,
            })?;
        let remote = peer_identity(&stream);
        if !target.is_anyone() && remote != *target {
            return Err(TransportError::Rejected(query.to_string()));
        }

        stream.write_all(query.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        debug!(?path, query, "connected to unix domain socket");

        Ok(Connection {
            stream: Box::new(stream),
            remote,
            query: query.to_string(),
        })
    }
}

/// A bound socket file delivering incoming queries.
pub struct UdsListener {
    listener: UnixListener,
    port: String,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl UdsListener {
    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Listener for UdsListener {
    fn port(&self) -> &str {
        &self.port
    }

    async fn next(&mut self) -> Option<IncomingQuery> {
        loop {
            let (mut stream, _addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(path = ?self.path, error = %TransportError::Accept(err), "accept failed");
                    return None;
                }
            };
            let caller = peer_identity(&stream);
            let query =
                match tokio::time::timeout(QUERY_READ_TIMEOUT, read_query_line(&mut stream)).await
                {
                    Ok(Ok(query)) => query,
                    Ok(Err(err)) => {
                        debug!(%caller, error = %err, "dropping connection without query line");
                        continue;
                    }
                    Err(_) => {
                        debug!(%caller, "timed out waiting for query line");
                        continue;
                    }
                };
            debug!(%caller, query = %query, "accepted connection");
            return Some(IncomingQuery::new(
                query,
                caller,
                Responder::Stream(Box::new(stream)),
            ));
        }
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

/// Read the query preamble one byte at a time so no protocol bytes are
/// buffered away from the stream.
async fn read_query_line(stream: &mut UnixStream) -> std::io::Result<String> {
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_QUERY_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "query line too long",
            ));
        }
        line.push(byte);
    }
    String::from_utf8(line).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn peer_identity(stream: &UnixStream) -> Identity {
    match stream.peer_cred() {
        Ok(cred) => Identity::new(format!("uid:{}", cred.uid())),
        Err(_) => Identity::anyone(),
    }
}

fn current_uid() -> u32 {
    std::fs::metadata("/proc/self")
        .map(|m| m.uid())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "jrpc-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[tokio::test]
    async fn register_query_accept() {
        let dir = temp_dir("roundtrip");
        let transport = UnixTransport::new(&dir);
        let mut listener = transport.register("demo*").await.unwrap();
        assert!(listener.path().exists());

        let client = transport.clone();
        let dial = tokio::spawn(async move {
            let mut conn = client
                .query(&Identity::anyone(), "demo.echo[1]")
                .await
                .expect("dial should succeed");
            conn.stream.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            conn.stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let incoming = listener.next().await.expect("query should arrive");
        assert_eq!(incoming.query(), "demo.echo[1]");
        assert!(incoming.caller().as_str().starts_with("uid:"));
        let mut conn = incoming.accept();
        let mut buf = [0u8; 4];
        conn.stream.read_exact(&mut buf).await.unwrap();
        conn.stream.write_all(&buf).await.unwrap();

        assert_eq!(&dial.await.unwrap(), b"ping");

        let path = listener.path().to_path_buf();
        drop(listener);
        assert!(!path.exists(), "socket file should be cleaned up on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn path_too_long() {
        let transport = UnixTransport::new(format!("/tmp/{}", "a".repeat(200)));
        let result = transport.register("demo").await;
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[tokio::test]
    async fn bind_default_permissions_hardened() {
        let dir = temp_dir("perms");
        let transport = UnixTransport::new(&dir);
        let listener = transport.register("perm").await.unwrap();
        let mode = std::fs::metadata(listener.path())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn bind_rejects_existing_non_socket_file() {
        let dir = temp_dir("not-socket");
        let transport = UnixTransport::new(&dir);
        std::fs::write(transport.socket_path("svc"), b"regular-file").unwrap();
        let result = transport.register("svc").await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn query_without_socket_has_no_listener() {
        let dir = temp_dir("empty");
        let transport = UnixTransport::new(&dir);
        let err = transport
            .query(&Identity::anyone(), "demo")
            .await
            .expect_err("no sockets registered");
        assert!(matches!(err, TransportError::NoListener(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}

//! Connection targets and boxed socket halves
//!
//! The broker and the client speak the same framing over TCP or over a local
//! socket path. Both are reduced to a boxed reader/writer pair plus the two
//! endpoint addresses used for routing.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Local socket path.
    Path(PathBuf),
    HostPort { host: String, port: u16 },
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::HostPort { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// One established connection.
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// Our own endpoint, stamped as `sender` on outgoing frames.
    pub local_address: String,
    /// The remote endpoint; the broker keys clients by it.
    pub peer_address: String,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local_address", &self.local_address)
            .field("peer_address", &self.peer_address)
            .finish()
    }
}

impl Connection {
    fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local_address = stream.local_addr()?.to_string();
        let peer_address = stream.peer_addr()?.to_string();
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            local_address,
            peer_address,
        })
    }
}

impl ConnectionTarget {
    pub async fn connect(&self) -> io::Result<Connection> {
        match self {
            Self::HostPort { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                Connection::from_tcp(stream)
            }
            #[cfg(unix)]
            Self::Path(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                let (reader, writer) = stream.into_split();
                Ok(Connection {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    local_address: format!("unix:{}#{}", path.display(), std::process::id()),
                    peer_address: format!("unix:{}", path.display()),
                })
            }
            #[cfg(not(unix))]
            Self::Path(path) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("local sockets are not supported here: {}", path.display()),
            )),
        }
    }
}

pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
        accepted: u64,
    },
}

impl Listener {
    pub async fn bind(target: &ConnectionTarget) -> io::Result<Self> {
        match target {
            ConnectionTarget::HostPort { host, port } => {
                Ok(Self::Tcp(TcpListener::bind((host.as_str(), *port)).await?))
            }
            #[cfg(unix)]
            ConnectionTarget::Path(path) => {
                remove_stale_socket(path).await?;
                Ok(Self::Unix {
                    listener: tokio::net::UnixListener::bind(path)?,
                    path: path.clone(),
                    accepted: 0,
                })
            }
            #[cfg(not(unix))]
            ConnectionTarget::Path(path) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("local sockets are not supported here: {}", path.display()),
            )),
        }
    }

    pub fn local_address(&self) -> io::Result<String> {
        match self {
            Self::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            #[cfg(unix)]
            Self::Unix { path, .. } => Ok(format!("unix:{}", path.display())),
        }
    }

    /// Accept the next connection.
    ///
    /// Local-socket peers have no usable address, so each one gets a
    /// per-listener sequence number instead.
    pub async fn accept(&mut self) -> io::Result<Connection> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Connection::from_tcp(stream)
            }
            #[cfg(unix)]
            Self::Unix {
                listener,
                path,
                accepted,
            } => {
                let (stream, _) = listener.accept().await?;
                *accepted += 1;
                let (reader, writer) = stream.into_split();
                Ok(Connection {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    local_address: format!("unix:{}", path.display()),
                    peer_address: format!("unix:{}#{}", path.display(), accepted),
                })
            }
        }
    }
}

/// Clear a socket file left behind by a previous run.
///
/// A path that is not a socket, or a socket something still listens on, is
/// left alone and reported as an error.
#[cfg(unix)]
async fn remove_stale_socket(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        ));
    }

    match tokio::net::UnixStream::connect(path).await {
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("a server is already listening on {}", path.display()),
        )),
        Err(_) => {
            debug!(path = %path.display(), "removing stale socket file");
            tokio::fs::remove_file(path).await
        }
    }
}

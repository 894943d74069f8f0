//! Listener bootstrap: turn a port, host and port, unix socket path, or
//! pre-bound listener into something axum can serve.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use tether_core::{Result, TetherError};

/// Where a server accepts connections.
pub enum ListenTarget {
    /// Port on the configured host.
    Port(u16),
    /// Explicit host (name or address) and port.
    HostPort(String, u16),
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
    /// Listener the host application already bound.
    Tcp(TcpListener),
}

impl fmt::Debug for ListenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(port) => f.debug_tuple("Port").field(port).finish(),
            Self::HostPort(host, port) => f.debug_tuple("HostPort").field(host).field(port).finish(),
            #[cfg(unix)]
            Self::Unix(path) => f.debug_tuple("Unix").field(path).finish(),
            Self::Tcp(listener) => f.debug_tuple("Tcp").field(&listener.local_addr().ok()).finish(),
        }
    }
}

/// Address a server ended up bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundAddr {
    /// TCP socket address.
    Tcp(SocketAddr),
    /// Unix socket path.
    Unix(PathBuf),
}

impl BoundAddr {
    /// Websocket URL for a TCP address; `None` for unix sockets.
    pub fn ws_url(&self, path: &str) -> Option<String> {
        match self {
            Self::Tcp(addr) => Some(format!("ws://{addr}{path}")),
            Self::Unix(_) => None,
        }
    }
}

impl fmt::Display for BoundAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// A bound listener ready to serve.
#[derive(Debug)]
pub(crate) enum BoundListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

fn invalid(message: impl Into<String>) -> TetherError {
    TetherError::InvalidTransport {
        message: message.into(),
    }
}

async fn bind_tcp(host: &str, port: u16) -> Result<BoundListener> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| invalid(format!("cannot resolve '{host}': {e}")))?
        .next()
        .ok_or_else(|| invalid(format!("'{host}' resolved to no address")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| invalid(format!("cannot bind {addr}: {e}")))?;
    Ok(BoundListener::Tcp(listener))
}

impl ListenTarget {
    /// Bind the target. `default_host` is used for [`ListenTarget::Port`].
    pub(crate) async fn bind(self, default_host: &str) -> Result<(BoundListener, BoundAddr)> {
        let listener = match self {
            Self::Port(port) => bind_tcp(default_host, port).await?,
            Self::HostPort(host, port) => {
                if host.trim().is_empty() {
                    return Err(invalid("empty host"));
                }
                bind_tcp(&host, port).await?
            }
            #[cfg(unix)]
            Self::Unix(path) => {
                if path.as_os_str().is_empty() {
                    return Err(invalid("empty unix socket path"));
                }
                let listener = UnixListener::bind(&path)
                    .map_err(|e| invalid(format!("cannot bind {}: {e}", path.display())))?;
                BoundListener::Unix(listener, path)
            }
            Self::Tcp(listener) => BoundListener::Tcp(listener),
        };
        let addr = match &listener {
            BoundListener::Tcp(l) => BoundAddr::Tcp(
                l.local_addr()
                    .map_err(|e| invalid(format!("listener has no address: {e}")))?,
            ),
            #[cfg(unix)]
            BoundListener::Unix(_, path) => BoundAddr::Unix(path.clone()),
        };
        Ok((listener, addr))
    }
}

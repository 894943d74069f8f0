//! Where a client connects to.

use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

use tether_core::TetherError;

/// Request URI used for the upgrade when connecting over a unix socket.
pub const DEFAULT_UNIX_URI: &str = "ws://localhost/ws";

/// Connection target for a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectTarget {
    /// `ws://` or `wss://` URL.
    Url(String),
    /// Unix domain socket carrying a websocket upgrade for `uri`.
    #[cfg(unix)]
    Unix {
        /// Socket file.
        path: PathBuf,
        /// Request URI sent in the upgrade.
        uri: String,
    },
}

impl ConnectTarget {
    /// Websocket URL target.
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    /// Unix socket target upgrading on `ws_path`.
    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>, ws_path: &str) -> Self {
        Self::Unix {
            path: path.into(),
            uri: format!("ws://localhost{ws_path}"),
        }
    }
}

impl FromStr for ConnectTarget {
    type Err = TetherError;

    /// Accepts `ws://…`, `wss://…` or `unix:<path>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("ws://") || s.starts_with("wss://") {
            return Ok(Self::Url(s.to_owned()));
        }
        if let Some(path) = s.strip_prefix("unix:") {
            return unix_target(path);
        }
        Err(TetherError::InvalidTransport {
            message: format!("unsupported connect target: {s}"),
        })
    }
}

#[cfg(unix)]
fn unix_target(path: &str) -> Result<ConnectTarget, TetherError> {
    if path.is_empty() {
        return Err(TetherError::InvalidTransport {
            message: "unix target needs a socket path".into(),
        });
    }
    Ok(ConnectTarget::Unix {
        path: PathBuf::from(path),
        uri: DEFAULT_UNIX_URI.to_owned(),
    })
}

#[cfg(not(unix))]
fn unix_target(_path: &str) -> Result<ConnectTarget, TetherError> {
    Err(TetherError::InvalidTransport {
        message: "unix sockets are not supported on this platform".into(),
    })
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            #[cfg(unix)]
            Self::Unix { path, .. } => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_urls() {
        let target: ConnectTarget = "ws://127.0.0.1:9000/ws".parse().unwrap();
        assert_eq!(target, ConnectTarget::url("ws://127.0.0.1:9000/ws"));
        assert!("wss://example.com/ws".parse::<ConnectTarget>().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn parses_unix_paths() {
        let target: ConnectTarget = "unix:/tmp/tether.sock".parse().unwrap();
        assert_matches!(
            target,
            ConnectTarget::Unix { ref path, ref uri }
                if path == &PathBuf::from("/tmp/tether.sock") && uri == DEFAULT_UNIX_URI
        );
        assert_eq!(target.to_string(), "unix:/tmp/tether.sock");
    }

    #[cfg(unix)]
    #[test]
    fn unix_constructor_uses_path() {
        let target = ConnectTarget::unix("/run/t.sock", "/rpc");
        assert_matches!(target, ConnectTarget::Unix { uri, .. } if uri == "ws://localhost/rpc");
    }

    #[test]
    fn rejects_other_schemes() {
        let err = "http://example.com".parse::<ConnectTarget>().unwrap_err();
        assert_matches!(err, TetherError::InvalidTransport { .. });
        assert!("unix:".parse::<ConnectTarget>().is_err());
    }
}

//! Opening websockets.

use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use tether_rpc::TransportError;

use crate::target::ConnectTarget;

/// Any websocket the transport task can drive.
pub trait WsSocket:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

impl<T> WsSocket for T where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

/// Type-erased websocket.
pub type BoxSocket = Box<dyn WsSocket>;

/// Opens one websocket to a target. Called again for every reconnect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and complete the websocket handshake.
    async fn connect(&self, target: &ConnectTarget) -> Result<BoxSocket, TransportError>;
}

/// Default connector built on `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<BoxSocket, TransportError> {
        debug!(%target, "connecting");
        match target {
            ConnectTarget::Url(url) => {
                let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
                    .await
                    .map_err(|e| TransportError::Handshake(e.to_string()))?;
                Ok(Box::new(ws))
            }
            #[cfg(unix)]
            ConnectTarget::Unix { path, uri } => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|e| TransportError::Handshake(format!("{}: {e}", path.display())))?;
                let (ws, _response) = tokio_tungstenite::client_async(uri.as_str(), stream)
                    .await
                    .map_err(|e| TransportError::Handshake(e.to_string()))?;
                Ok(Box::new(ws))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn refused_connection_is_handshake_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = ConnectTarget::url(format!("ws://{addr}/ws"));
        let err = TungsteniteConnector.connect(&target).await.err().unwrap();
        assert_matches!(err, TransportError::Handshake(_));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_socket_file_is_handshake_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = ConnectTarget::unix(dir.path().join("absent.sock"), "/ws");
        let err = TungsteniteConnector.connect(&target).await.err().unwrap();
        assert_matches!(err, TransportError::Handshake(msg) if msg.contains("absent.sock"));
    }
}

//! Duplex connection to the live endpoint

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::protocol::{ClientMessage, ServerMessage, Setup};
use crate::{Error, Result};

/// Default bidirectional streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default bound on the websocket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `close` waits for the remote to answer our close frame
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a transport needs to open a session
#[derive(Debug)]
pub struct ConnectRequest<'a> {
    pub endpoint: &'a str,
    pub api_key: &'a SecretString,
    /// Sent as the first message once connected
    pub setup: &'a Setup,
}

/// An open duplex message stream
#[async_trait]
pub trait Connection: Send {
    /// Send one message
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the message could not be written
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Next inbound message; `None` once the remote closed normally
    async fn recv(&mut self) -> Option<Result<ServerMessage>>;

    /// Close the connection; repeated calls are no-ops
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the close handshake failed
    async fn close(&mut self) -> Result<()>;
}

/// Opens connections to the live endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and send the setup message
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the handshake fails or times out
    async fn connect(&self, request: &ConnectRequest<'_>) -> Result<Box<dyn Connection>>;
}

/// Websocket transport over `tokio-tungstenite`
#[derive(Debug, Clone)]
pub struct LiveTransport {
    connect_timeout: Duration,
}

impl Default for LiveTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl LiveTransport {
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

/// Endpoint URL with the API key attached as `?key=`
///
/// # Errors
///
/// Returns `Config` if the endpoint is not a websocket URL
pub fn endpoint_url(endpoint: &str, api_key: &SecretString) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| Error::Config(format!("invalid endpoint: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(Error::Config(format!(
            "endpoint must use ws or wss, got {}",
            url.scheme()
        )));
    }
    url.query_pairs_mut().append_pair("key", api_key.expose_secret());
    Ok(url)
}

#[async_trait]
impl Transport for LiveTransport {
    async fn connect(&self, request: &ConnectRequest<'_>) -> Result<Box<dyn Connection>> {
        let url = endpoint_url(request.endpoint, request.api_key)?;

        // The key is in the query string; log only the configured endpoint
        tracing::info!(endpoint = request.endpoint, model = %request.setup.model, "connecting");

        let (ws, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    Error::Connection(format!(
                        "handshake timed out after {}s",
                        self.connect_timeout.as_secs()
                    ))
                })?
                .map_err(|e| Error::Connection(e.to_string()))?;

        let mut connection = LiveConnection::new(ws);
        connection
            .send(&ClientMessage::Setup(request.setup.clone()))
            .await?;

        tracing::debug!("setup sent");
        Ok(Box::new(connection))
    }
}

struct LiveConnection<S = MaybeTlsStream<TcpStream>> {
    ws: WebSocketStream<S>,
    closed: bool,
    close_timeout: Duration,
}

impl<S> LiveConnection<S> {
    const fn new(ws: WebSocketStream<S>) -> Self {
        Self {
            ws,
            closed: false,
            close_timeout: CLOSE_HANDSHAKE_TIMEOUT,
        }
    }
}

impl<S> LiveConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Read until the remote's close reply or end of stream
    async fn await_close_reply(&mut self) {
        let ws = &mut self.ws;
        let drain = async {
            while let Some(message) = ws.next().await {
                match message {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        if tokio::time::timeout(self.close_timeout, drain).await.is_err() {
            tracing::debug!("no close reply from remote");
        }
    }
}

#[async_trait]
impl<S> Connection for LiveConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        if self.closed {
            return Err(Error::Connection("connection already closed".to_string()));
        }
        let json = message.to_json()?;
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        if self.closed {
            return None;
        }

        loop {
            let message = match self.ws.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(Error::Connection(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(ServerMessage::parse(text.as_str().as_bytes())),
                Message::Binary(data) => return Some(ServerMessage::parse(&data)),
                Message::Ping(data) => {
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        return Some(Err(Error::Connection(e.to_string())));
                    }
                }
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(frame) => {
                    self.closed = true;
                    return match frame {
                        Some(frame) if !matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
                            Some(Err(Error::Connection(format!(
                                "closed by remote ({}): {}",
                                u16::from(frame.code),
                                frame.reason
                            ))))
                        }
                        _ => {
                            tracing::info!("websocket closed by remote");
                            None
                        }
                    };
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.ws.close(None).await {
            Ok(()) => {
                self.await_close_reply().await;
                tracing::debug!("websocket closed");
                Ok(())
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                tracing::debug!("websocket already closed");
                Ok(())
            }
            Err(e) => Err(Error::Connection(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;

    async fn pair() -> (LiveConnection<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (client, server) = tokio::io::duplex(4096);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        (LiveConnection::new(client), server)
    }

    #[test]
    fn key_goes_into_query() {
        let key = SecretString::from("abc 123".to_string());
        let url = endpoint_url("wss://example.test/ws?alt=1", &key).unwrap();
        assert_eq!(url.as_str(), "wss://example.test/ws?alt=1&key=abc+123");
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let key = SecretString::from("k".to_string());
        assert!(matches!(
            endpoint_url("https://example.test", &key),
            Err(Error::Config(_))
        ));
        assert!(matches!(endpoint_url("not a url", &key), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn close_waits_for_the_remote_reply() {
        let (mut connection, mut remote) = pair().await;

        let remote = tokio::spawn(async move {
            let mut saw_close = false;
            // Reading the close frame queues the reply; the stream then ends
            while let Some(Ok(message)) = remote.next().await {
                saw_close |= message.is_close();
            }
            saw_close
        });

        connection.close().await.unwrap();

        assert!(remote.await.unwrap());
        assert!(connection.recv().await.is_none());
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_gives_up_on_a_silent_remote() {
        let (mut connection, _remote) = pair().await;
        connection.close_timeout = Duration::from_millis(50);

        let started = tokio::time::Instant::now();
        connection.close().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn remote_close_code_maps_to_stream_end_or_error() {
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;

        let (mut connection, mut remote) = pair().await;
        remote
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))
            .await
            .unwrap();
        assert!(connection.recv().await.is_none());

        let (mut connection, mut remote) = pair().await;
        remote
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "quota".into(),
            }))
            .await
            .unwrap();
        assert!(matches!(connection.recv().await, Some(Err(Error::Connection(_)))));
    }

    #[test]
    fn default_endpoint_is_valid() {
        let key = SecretString::from("k".to_string());
        assert!(endpoint_url(DEFAULT_ENDPOINT, &key).is_ok());
    }
}

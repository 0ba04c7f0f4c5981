//! CamillaDSP reload over the websocket control socket
//!
//! A reload is a one-shot exchange: connect to `ws://localhost:<port>`, send
//! the `"Reload"` command, wait for one reply, close. The engine may well be
//! offline (for instance while its output device is unplugged), so failures
//! are reported as values and never retried here.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// Upper bound for a whole reload exchange
pub const RELOAD_TIMEOUT: Duration = Duration::from_millis(1500);

const DEFAULT_HOST: &str = "localhost";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Invalid control port {0} (expected 1-65535)")]
    InvalidPort(u32),

    #[error("No reply from CamillaDSP within {0:?}")]
    Timeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Connection closed before CamillaDSP replied")]
    Closed,

    #[error("Unexpected reply from CamillaDSP: {0}")]
    Malformed(String),

    #[error("CamillaDSP rejected the reload: {0}")]
    Rejected(String),
}

/// Check that `port` is a usable TCP port
pub fn validate_port(port: u32) -> Result<u16, ReloadError> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(ReloadError::InvalidPort(port))
}

/// Something that can ask the engine to reload its config
#[async_trait]
pub trait Reloader: Send + Sync {
    /// Request a reload; returns the engine's reply on success
    async fn reload(&self, port: u32) -> Result<String, ReloadError>;
}

/// Websocket reload client
#[derive(Debug, Clone)]
pub struct ReloadClient {
    /// Host CamillaDSP listens on, always `localhost` outside tests
    host: String,
    /// Budget for connect, send and reply together
    timeout: Duration,
}

impl Default for ReloadClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadClient {
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            timeout: RELOAD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, url: &str) -> Result<String, ReloadError> {
        let (mut socket, _) = connect_async(url).await?;
        let result = Self::request(&mut socket).await;

        if let Err(e) = socket.close(None).await {
            debug!("WebSocket not closed cleanly: {}", e);
        }
        result
    }

    async fn request(socket: &mut Socket) -> Result<String, ReloadError> {
        let command = serde_json::Value::from("Reload").to_string();
        socket.send(Message::Text(command)).await?;

        while let Some(message) = socket.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
                Message::Close(_) => return Err(ReloadError::Closed),
                _ => continue,
            };
            check_reply(&text)?;
            return Ok(text);
        }

        Err(ReloadError::Closed)
    }
}

#[async_trait]
impl Reloader for ReloadClient {
    async fn reload(&self, port: u32) -> Result<String, ReloadError> {
        let port = validate_port(port)?;
        let url = format!("ws://{}:{}", self.host, port);
        debug!("Requesting CamillaDSP reload via {}", url);

        let reply = tokio::time::timeout(self.timeout, self.exchange(&url))
            .await
            .map_err(|_| ReloadError::Timeout(self.timeout))??;

        info!("CamillaDSP configuration reloaded: {}", reply);
        Ok(reply)
    }
}

/// Validate a reply of the form `{"Reload": {"result": "Ok"}}`
fn check_reply(text: &str) -> Result<(), ReloadError> {
    let reply: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ReloadError::Malformed(text.to_string()))?;

    match reply
        .get("Reload")
        .and_then(|r| r.get("result"))
        .and_then(serde_json::Value::as_str)
    {
        Some("Ok") => Ok(()),
        Some(other) => Err(ReloadError::Rejected(other.to_string())),
        None => Err(ReloadError::Malformed(text.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reloader that records calls instead of connecting anywhere
    #[derive(Default)]
    pub struct CountingReloader {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingReloader {
        pub fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reloader for CountingReloader {
        async fn reload(&self, port: u32) -> Result<String, ReloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ReloadError::Closed);
            }
            validate_port(port)?;
            Ok(r#"{"Reload":{"result":"Ok"}}"#.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one websocket client, check the command and answer with `reply`
    async fn serve_once(reply: Option<&'static str>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let command = ws.next().await.unwrap().unwrap();
            assert_eq!(command, Message::Text("\"Reload\"".to_string()));

            match reply {
                Some(text) => {
                    ws.send(Message::Text(text.to_string())).await.unwrap();
                    // Drain until the client closes
                    while let Some(Ok(_)) = ws.next().await {}
                }
                None => tokio::time::sleep(Duration::from_secs(5)).await,
            }
        });

        port
    }

    impl ReloadClient {
        fn with_host(mut self, host: impl Into<String>) -> Self {
            self.host = host.into();
            self
        }
    }

    fn client() -> ReloadClient {
        ReloadClient::new().with_host("127.0.0.1")
    }

    #[tokio::test]
    async fn test_invalid_ports_fail_without_connecting() {
        let client = client();
        assert!(matches!(client.reload(0).await, Err(ReloadError::InvalidPort(0))));
        assert!(matches!(client.reload(70000).await, Err(ReloadError::InvalidPort(70000))));
        assert!(matches!(client.reload(65536).await, Err(ReloadError::InvalidPort(65536))));
    }

    #[test]
    fn test_validate_port() {
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(validate_port(0).is_err());
        assert!(validate_port(65536).is_err());
    }

    #[tokio::test]
    async fn test_successful_reload() {
        let port = serve_once(Some(r#"{"Reload":{"result":"Ok"}}"#)).await;
        let reply = client().reload(u32::from(port)).await.unwrap();
        assert!(reply.contains("Ok"));
    }

    #[tokio::test]
    async fn test_rejected_reload() {
        let port = serve_once(Some(r#"{"Reload":{"result":"Error"}}"#)).await;
        let err = client().reload(u32::from(port)).await.unwrap_err();
        assert!(matches!(err, ReloadError::Rejected(ref r) if r == "Error"));
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let port = serve_once(Some("definitely not json")).await;
        let err = client().reload(u32::from(port)).await.unwrap_err();
        assert!(matches!(err, ReloadError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_silent_engine_times_out() {
        let port = serve_once(None).await;
        let client = client().with_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = client.reload(u32::from(port)).await.unwrap_err();
        assert!(matches!(err, ReloadError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = client().reload(u32::from(port)).await.unwrap_err();
        assert!(matches!(err, ReloadError::WebSocket(_)));
    }

    #[test]
    fn test_check_reply() {
        assert!(check_reply(r#"{"Reload":{"result":"Ok"}}"#).is_ok());
        assert!(matches!(check_reply(r#"{"Other":{}}"#), Err(ReloadError::Malformed(_))));
    }
}

use crate::error::ClientError;
use futures::{SinkExt, StreamExt};
use ordering::protocol::{ClientMessage, ServerMessage};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

/// A message-oriented connection to the tracking server.
pub trait Transport: Send {
    fn connect(&mut self) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn send(&mut self, message: ClientMessage)
    -> impl Future<Output = Result<(), ClientError>> + Send;

    /// `None` once the connection is gone.
    fn next_message(&mut self) -> impl Future<Output = Option<ServerMessage>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

pub struct WsTransport {
    url: String,
    headers: Vec<(&'static str, String)>,
    socket: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            socket: None,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

impl Transport for WsTransport {
    async fn connect(&mut self) -> Result<(), ClientError> {
        let mut request = self.url.as_str().into_client_request()?;
        for (name, value) in &self.headers {
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Network(format!("invalid header {name}: {e}")))?;
            request.headers_mut().insert(*name, value);
        }
        let (socket, _) = connect_async(request).await?;
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), ClientError> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(ClientError::Network("not connected".to_owned()));
        };
        let text = serde_json::to_string(&message)?;
        socket.send(Message::text(text)).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Option<ServerMessage> {
        let socket = self.socket.as_mut()?;
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(message) => return Some(message),
                        Err(e) => warn!("Ignoring malformed server frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("Tracking socket failed: {e}");
                    break;
                }
            }
        }
        self.socket = None;
        None
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take()
            && let Err(e) = socket.close(None).await
        {
            debug!("Closing tracking socket: {e}");
        }
    }
}

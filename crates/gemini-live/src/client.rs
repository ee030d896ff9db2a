use crate::config::Config;
use crate::types::{ClientMessage, ServerMessage};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

type WsWriter =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One decoded frame from the server.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Message(ServerMessage),
    /// A frame that was not valid JSON for any server message.
    Unrecognized(String),
    /// The server closed the connection, possibly with a reason.
    Closed(Option<String>),
}

/// A client for the Gemini Live bidirectional WebSocket API.
pub struct GeminiClient {
    write: GeminiWriter,
    read: GeminiReader,
}

/// The sending half of a [`GeminiClient`].
pub struct GeminiWriter {
    write: WsWriter,
}

/// The receiving half of a [`GeminiClient`].
pub struct GeminiReader {
    read: WsReader,
}

/// Establishes a connection to the Gemini Live service.
pub async fn connect(config: &Config, token: Option<&str>) -> Result<GeminiClient> {
    let url = config.endpoint(token)?;
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .context("Failed to connect to Gemini WebSocket")?;

    tracing::info!("Successfully connected to Gemini WebSocket.");
    let (write, read) = ws_stream.split();
    Ok(GeminiClient {
        write: GeminiWriter { write },
        read: GeminiReader { read },
    })
}

impl GeminiClient {
    /// Sends a single client message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.write.send(message).await
    }

    /// Reads the next frame from the server.
    pub async fn next_frame(&mut self) -> Result<ServerFrame> {
        self.read.next_frame().await
    }

    /// Splits the client so sending and receiving can live in separate tasks.
    pub fn split(self) -> (GeminiWriter, GeminiReader) {
        (self.write, self.read)
    }
}

impl GeminiWriter {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.write
            .send(Message::Text(json))
            .await
            .context("Failed to send message to Gemini")
    }

    /// Sends a close frame. Errors are ignored since the peer may already be gone.
    pub async fn close(&mut self) {
        if let Err(e) = self.write.close().await {
            tracing::debug!("Closing Gemini WebSocket: {}", e);
        }
    }
}

impl GeminiReader {
    /// Reads the next frame from the server.
    ///
    /// Text and binary frames both carry JSON. A stream that ends without a
    /// close frame is reported as `Closed(None)`.
    pub async fn next_frame(&mut self) -> Result<ServerFrame> {
        while let Some(msg) = self.read.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(decode(&text)),
                Ok(Message::Binary(bin)) => match std::str::from_utf8(&bin) {
                    Ok(text) => return Ok(decode(text)),
                    Err(_) => {
                        tracing::warn!(
                            "Received non UTF-8 binary message ({} bytes) from Gemini server.",
                            bin.len()
                        );
                        return Ok(ServerFrame::Unrecognized(format!(
                            "<{} binary bytes>",
                            bin.len()
                        )));
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!("Gemini WebSocket connection closed: {:?}", frame);
                    return Ok(ServerFrame::Closed(
                        frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()),
                    ));
                }
                Err(e) => {
                    tracing::error!("Error reading from Gemini WebSocket: {}", e);
                    return Err(e.into());
                }
                _ => { /* Ignore Ping/Pong */ }
            }
        }
        Ok(ServerFrame::Closed(None))
    }
}

fn decode(text: &str) -> ServerFrame {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => ServerFrame::Message(message),
        Err(e) => {
            tracing::warn!("Failed to deserialize Gemini server message: {}", e);
            ServerFrame::Unrecognized(text.to_string())
        }
    }
}

use axum::extract::ws::{Message, WebSocket};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Downstream (caller) side of a realtime exchange.
pub type ClientSocket = WebSocket;
/// Upstream (provider) side of a realtime exchange.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_AUDIO_FORMAT: &str = "pcm16";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

/// Socket pair and negotiated state of a realtime session.
///
/// Both sockets are owned here for the lifetime of the exchange. Dropping the
/// session releases them; [`RealtimeSession::close`] additionally sends close
/// frames and should be awaited on every exit path.
pub struct RealtimeSession {
    client: Option<ClientSocket>,
    upstream: Option<UpstreamSocket>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub tools: Vec<RealtimeTool>,
    pub is_first_request: bool,
    pub audio_usage: bool,
}

impl RealtimeSession {
    pub fn new(client: Option<ClientSocket>) -> Self {
        Self {
            client,
            upstream: None,
            input_audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
            output_audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
            tools: Vec::new(),
            is_first_request: true,
            audio_usage: false,
        }
    }

    pub fn client_mut(&mut self) -> Option<&mut ClientSocket> {
        self.client.as_mut()
    }

    pub fn upstream_mut(&mut self) -> Option<&mut UpstreamSocket> {
        self.upstream.as_mut()
    }

    /// Attaches the provider connection. A previously attached one is returned
    /// so the caller can close it.
    pub fn attach_upstream(&mut self, socket: UpstreamSocket) -> Option<UpstreamSocket> {
        self.upstream.replace(socket)
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    /// Sends close frames to both peers and releases the sockets. Errors are
    /// logged; the sockets are dropped either way.
    pub async fn close(&mut self) {
        if let Some(mut upstream) = self.upstream.take() {
            if let Err(err) = upstream.close(None).await {
                tracing::warn!(error = %err, "failed to close upstream realtime socket");
            }
        }
        if let Some(mut client) = self.client.take() {
            if let Err(err) = client.send(Message::Close(None)).await {
                tracing::debug!(error = %err, "client realtime socket already closed");
            }
        }
    }
}

impl fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("client", &self.client.is_some())
            .field("upstream", &self.upstream.is_some())
            .field("input_audio_format", &self.input_audio_format)
            .field("output_audio_format", &self.output_audio_format)
            .field("tools", &self.tools.len())
            .field("is_first_request", &self.is_first_request)
            .field("audio_usage", &self.audio_usage)
            .finish()
    }
}

use crate::channel::full_request_url;
use crate::context::{RealtimeTool, SessionContext};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use axum::Json;
use axum::extract::ws::Message;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};

/// Hands a built context and its sanitized body to whatever talks to the
/// upstream provider.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, ctx: &mut SessionContext, body: Bytes) -> AppResult<Response>;

    /// Drives a realtime exchange. The caller closes the sockets afterwards.
    async fn relay_realtime(&self, ctx: &mut SessionContext) -> AppResult<()>;
}

/// Answers every call with a description of its context instead of
/// contacting an upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct InspectDispatcher;

fn upstream_url(ctx: &SessionContext) -> Option<String> {
    let channel = ctx.channel()?;
    if channel.base_url.is_empty() {
        return None;
    }
    Some(full_request_url(
        &channel.base_url,
        &ctx.request_url_path,
        channel.channel_type,
    ))
}

#[async_trait]
impl Dispatcher for InspectDispatcher {
    async fn dispatch(&self, ctx: &mut SessionContext, body: Bytes) -> AppResult<Response> {
        ctx.set_first_response_time();
        ctx.send_response_count += 1;
        let body = serde_json::from_slice::<Value>(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        tracing::info!(
            request_id = %ctx.request_id,
            relay_format = %ctx.relay_format,
            model = %ctx.origin_model_name,
            stream = ctx.is_stream,
            "inspect dispatch"
        );
        Ok(Json(json!({
            "context": ctx.describe(),
            "upstream_url": upstream_url(ctx),
            "body": body,
        }))
        .into_response())
    }

    async fn relay_realtime(&self, ctx: &mut SessionContext) -> AppResult<()> {
        let first = {
            let session = ctx.realtime_mut()?;
            let client = session.client_mut().ok_or_else(|| {
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "realtime_client_missing",
                    "realtime session has no client socket",
                )
            })?;
            match next_text(client).await {
                Some(text) => text,
                None => return Ok(()),
            }
        };
        ctx.received_response_count += 1;

        {
            let session = ctx.realtime_mut()?;
            if let Ok(event) = serde_json::from_str::<Value>(&first) {
                apply_session_update(session, &event);
            }
            session.is_first_request = false;
        }

        ctx.set_first_response_time();
        let reply = json!({"type": "session.inspected", "context": ctx.describe()}).to_string();
        let session = ctx.realtime_mut()?;
        if let Some(client) = session.client_mut() {
            if let Err(err) = client.send(Message::Text(reply.into())).await {
                tracing::debug!(error = %err, "client left before inspection reply");
                return Ok(());
            }
        }
        ctx.send_response_count += 1;
        Ok(())
    }
}

/// First text frame from the caller; `None` once the socket closes.
async fn next_text(client: &mut axum::extract::ws::WebSocket) -> Option<String> {
    while let Some(message) = client.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.as_str().to_string()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(error = %err, "realtime client read failed");
                return None;
            }
        }
    }
    None
}

/// Applies a `session.update` event's audio formats and tools.
fn apply_session_update(session: &mut crate::context::RealtimeSession, event: &Value) {
    if event.get("type").and_then(Value::as_str) != Some("session.update") {
        return;
    }
    let Some(update) = event.get("session") else {
        return;
    };
    if let Some(format) = update.get("input_audio_format").and_then(Value::as_str) {
        session.input_audio_format = format.to_string();
    }
    if let Some(format) = update.get("output_audio_format").and_then(Value::as_str) {
        session.output_audio_format = format.to_string();
    }
    if let Some(tools) = update.get("tools") {
        match serde_json::from_value::<Vec<RealtimeTool>>(tools.clone()) {
            Ok(tools) => session.tools = tools,
            Err(err) => tracing::warn!(error = %err, "ignoring malformed realtime tools"),
        }
    }
    if update.get("modalities").and_then(Value::as_array).is_some_and(|m| {
        m.iter().any(|v| v.as_str() == Some("audio"))
    }) {
        session.audio_usage = true;
    }
}

use crate::app::AppState;
use crate::config::ChannelOtherSettings;
use crate::context::{SessionContext, build_session_context};
use crate::error::{AppError, AppResult};
use crate::facts::RequestFacts;
use crate::format::RelayFormat;
use crate::request::{
    GeneralRequest, RelayRequest, RerankRequest, ResponsesCompactionRequest, ResponsesRequest,
};
use crate::sanitize::{remove_disabled_fields, remove_gemini_disabled_fields};
use crate::task::{
    TASK_ACTION_GENERATE, TaskPayload, validate_basic_task_request, validate_direct_task_request,
};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

const GEMINI_STREAM_ACTION: &str = "streamGenerateContent";

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn create_chat_completions(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    relay_body(&state, RelayFormat::OpenAi, &uri, &headers, body).await
}

pub async fn create_messages(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    relay_body(&state, RelayFormat::Claude, &uri, &headers, body).await
}

pub async fn create_embeddings(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    relay_body(&state, RelayFormat::Embedding, &uri, &headers, body).await
}

pub async fn create_rerank(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    relay_body(&state, RelayFormat::Rerank, &uri, &headers, body).await
}

pub async fn create_response(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    relay_body(&state, RelayFormat::OpenAiResponses, &uri, &headers, body).await
}

pub async fn compact_response(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    relay_body(
        &state,
        RelayFormat::OpenAiResponsesCompaction,
        &uri,
        &headers,
        body,
    )
    .await
}

pub async fn create_image(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    relay_body(&state, RelayFormat::OpenAiImage, &uri, &headers, body).await
}

pub async fn create_speech(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    relay_body(&state, RelayFormat::OpenAiAudio, &uri, &headers, body).await
}

/// Relays a body under a format named in the path.
pub async fn relay_by_format(
    State(state): State<AppState>,
    Path(format): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let format: RelayFormat = format.parse()?;
    relay_body(&state, format, &uri, &headers, body).await
}

/// `POST /v1beta/models/{model}:{action}`. The model lives in the path.
pub async fn gemini_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let (model, action) = model_action
        .split_once(':')
        .unwrap_or((model_action.as_str(), ""));
    let mut request: GeneralRequest = decode_body(&body)?;
    if request.model.is_empty() {
        request.model = model.to_string();
    }
    if action == GEMINI_STREAM_ACTION {
        request.stream = Some(true);
    }
    relay_request(
        &state,
        RelayFormat::Gemini,
        &uri,
        &headers,
        RelayRequest::General(request),
        body,
    )
    .await
}

/// Direct video submission with per-model size and duration rules.
pub async fn submit_video(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    payload: TaskPayload,
) -> AppResult<Response> {
    let facts = RequestFacts::from_http(&uri, &headers);
    let mut ctx = build_session_context(RelayFormat::Task, None, &facts, None)?;
    validate_direct_task_request(&mut ctx, payload)?;
    dispatch_task(&state, ctx).await
}

pub async fn submit_task(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    payload: TaskPayload,
) -> AppResult<Response> {
    let action = query
        .get("action")
        .filter(|a| !a.is_empty())
        .map(String::as_str)
        .unwrap_or(TASK_ACTION_GENERATE);
    let facts = RequestFacts::from_http(&uri, &headers);
    let mut ctx = build_session_context(RelayFormat::Task, None, &facts, None)?;
    validate_basic_task_request(&mut ctx, action, payload)?;
    dispatch_task(&state, ctx).await
}

pub async fn submit_mj(
    State(state): State<AppState>,
    Path(action): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    payload: TaskPayload,
) -> AppResult<Response> {
    let facts = RequestFacts::from_http(&uri, &headers);
    let mut ctx = build_session_context(RelayFormat::MjProxy, None, &facts, None)?;
    validate_basic_task_request(&mut ctx, &action, payload)?;
    dispatch_task(&state, ctx).await
}

pub async fn realtime(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let mut facts = RequestFacts::from_http(&uri, &headers);
    if facts.original_model.is_empty() {
        if let Some(model) = query.get("model") {
            facts.original_model = model.clone();
        }
    }
    ws.on_upgrade(move |socket| async move {
        let mut ctx = match build_session_context(
            RelayFormat::OpenAiRealtime,
            None,
            &facts,
            Some(socket),
        ) {
            Ok(ctx) => ctx,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build realtime context");
                return;
            }
        };
        if let Err(err) = state.dispatcher.relay_realtime(&mut ctx).await {
            tracing::warn!(
                request_id = %ctx.request_id,
                code = %err.code,
                "realtime relay failed: {}",
                err.message
            );
        }
        ctx.close_realtime().await;
    })
}

async fn relay_body(
    state: &AppState,
    format: RelayFormat,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let request = match format {
        RelayFormat::Rerank => RelayRequest::Rerank(decode_body::<RerankRequest>(&body)?),
        RelayFormat::OpenAiResponses => {
            RelayRequest::Responses(decode_body::<ResponsesRequest>(&body)?)
        }
        RelayFormat::OpenAiResponsesCompaction => RelayRequest::ResponsesCompaction(
            decode_body::<ResponsesCompactionRequest>(&body)?,
        ),
        RelayFormat::OpenAiRealtime | RelayFormat::Task | RelayFormat::MjProxy => {
            return Err(AppError::new(
                StatusCode::BAD_REQUEST,
                "invalid_format",
                format!("format {format} has its own endpoint"),
            ));
        }
        RelayFormat::OpenAi
        | RelayFormat::OpenAiAudio
        | RelayFormat::OpenAiImage
        | RelayFormat::Claude
        | RelayFormat::Gemini
        | RelayFormat::Embedding => RelayRequest::General(decode_body::<GeneralRequest>(&body)?),
    };
    relay_request(state, format, uri, headers, request, body).await
}

async fn relay_request(
    state: &AppState,
    format: RelayFormat,
    uri: &Uri,
    headers: &HeaderMap,
    request: RelayRequest,
    body: Bytes,
) -> AppResult<Response> {
    let mut facts = RequestFacts::from_http(uri, headers);
    if facts.original_model.is_empty() {
        facts.original_model = request.model_name().to_string();
    }
    let mut ctx = build_session_context(format, Some(request), &facts, None)?;
    // the context is not Sync; nothing borrowed from it may cross an await
    let is_gemini = ctx.relay_format == RelayFormat::Gemini;
    let other_settings = ctx
        .channel()
        .map(|channel| channel.other_settings.clone())
        .unwrap_or_default();
    let body = sanitize_body(state, is_gemini, &other_settings, body).await;
    state.dispatcher.dispatch(&mut ctx, body).await
}

async fn sanitize_body(
    state: &AppState,
    is_gemini: bool,
    other_settings: &ChannelOtherSettings,
    body: Bytes,
) -> Bytes {
    if is_gemini {
        let gemini = state.settings_store.gemini().await;
        return remove_gemini_disabled_fields(body, &gemini);
    }
    remove_disabled_fields(body, other_settings)
}

async fn dispatch_task(state: &AppState, mut ctx: SessionContext) -> AppResult<Response> {
    let model = ctx.task_request()?.model.clone();
    if ctx.origin_model_name.is_empty() {
        ctx.origin_model_name = model;
    }
    let body = serde_json::to_vec(ctx.task_request()?).map_err(|err| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "task_encode_failed",
            err.to_string(),
        )
    })?;
    state.dispatcher.dispatch(&mut ctx, Bytes::from(body)).await
}

fn decode_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|err| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("invalid request body: {err}"),
        )
    })
}

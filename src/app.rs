use crate::dispatch::{Dispatcher, InspectDispatcher};
use crate::error::{AppError, AppResult};
use crate::settings::{SettingsStore, SystemSettings};
use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Once, OnceLock};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub metrics: PrometheusHandle,
    pub settings_store: SettingsStore,
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl AppState {
    /// Swaps the upstream dispatcher, keeping everything else.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub metrics_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let listen = std::env::var("RELAYGATE_LISTEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.listen);
        let metrics_path = std::env::var("RELAYGATE_METRICS_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.metrics_path);
        Self {
            listen,
            metrics_path,
        }
    }
}

pub async fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env()).await
}

pub async fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let metrics = init_metrics()?;
    let settings_store = SettingsStore::new(SystemSettings::from_env());
    let gemini = settings_store.gemini().await;
    tracing::info!(
        listen = %runtime.listen,
        metrics_path = %runtime.metrics_path,
        gemini_remove_function_response_id = gemini.remove_function_response_id_enabled,
        "runtime configuration loaded"
    );
    Ok(AppState {
        runtime: Arc::new(runtime),
        metrics,
        settings_store,
        dispatcher: Arc::new(InspectDispatcher),
    })
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::new(
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "metrics_init_failed",
            "metrics recorder not available",
        )
    })
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    build_relay_router(&metrics_path)
        .with_state(state)
        // layers wrap outward: the id must be set before it is propagated
        .layer(PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
}

fn build_relay_router(metrics_path: &str) -> Router<AppState> {
    Router::new()
        .route(
            "/v1/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
        .route(
            "/pg/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
        .route("/v1/messages", post(crate::handlers::create_messages))
        .route("/v1/embeddings", post(crate::handlers::create_embeddings))
        .route("/v1/rerank", post(crate::handlers::create_rerank))
        .route("/v1/responses", post(crate::handlers::create_response))
        .route(
            "/v1/responses/compact",
            post(crate::handlers::compact_response),
        )
        .route(
            "/v1/images/generations",
            post(crate::handlers::create_image),
        )
        .route("/v1/audio/speech", post(crate::handlers::create_speech))
        .route(
            "/v1beta/models/{model_action}",
            post(crate::handlers::gemini_generate),
        )
        .route("/v1/video/generations", post(crate::handlers::submit_video))
        .route("/v1/tasks/submit", post(crate::handlers::submit_task))
        .route("/mj/submit/{action}", post(crate::handlers::submit_mj))
        .route("/v1/realtime", get(crate::handlers::realtime))
        .route("/relay/{format}", post(crate::handlers::relay_by_format))
        .route(metrics_path, get(crate::handlers::metrics))
}

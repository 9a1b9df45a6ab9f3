//! Normalization and validation of generative task submissions.
//!
//! Submissions arrive as JSON or as multipart forms. Both are reduced to one
//! [`TaskSubmission`] before validation.

use crate::context::SessionContext;
use crate::error::{AppError, AppResult};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{StatusCode, header};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

pub const TASK_ACTION_GENERATE: &str = "generate";
pub const TASK_ACTION_TEXT_GENERATE: &str = "textGenerate";

const SORA_FAMILY_PREFIX: &str = "sora-2";
const SORA_DEFAULT_SIZE: &str = "720x1280";
const SORA_DEFAULT_SECONDS: i64 = 4;
const SORA_STANDARD_SIZES: [&str; 2] = ["720x1280", "1280x720"];
const SORA_HIGH_RES_SIZES: [&str; 2] = ["1792x1024", "1024x1792"];
const SORA_HIGH_RES_RATIO: f64 = 1.666667;

/// Form fields with a dedicated slot; everything else lands in metadata.
const KNOWN_FIELDS: [&str; 8] = [
    "prompt",
    "model",
    "mode",
    "image",
    "images",
    "size",
    "duration",
    "input_reference",
];

/// Canonical task submission, whatever the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTaskSubmission")]
pub struct TaskSubmission {
    pub prompt: String,
    pub model: String,
    pub mode: String,
    pub image: String,
    pub images: Vec<String>,
    pub size: String,
    pub duration: i64,
    pub seconds: String,
    pub input_reference: String,
    /// Fields the gateway does not interpret. Always present, possibly empty.
    pub metadata: Map<String, Value>,
}

/// Wire shape. `null` on any field reads as its zero value.
#[derive(Deserialize)]
struct RawTaskSubmission {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    images: Option<Vec<String>>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    seconds: Option<String>,
    #[serde(default)]
    input_reference: Value,
    #[serde(default)]
    metadata: Value,
}

impl From<RawTaskSubmission> for TaskSubmission {
    fn from(raw: RawTaskSubmission) -> Self {
        let mut images = raw.images.unwrap_or_default();
        let input_reference = match raw.input_reference {
            Value::String(reference) => reference,
            refs @ Value::Array(_) => match serde_json::from_value::<Vec<String>>(refs) {
                Ok(refs) => {
                    let first = refs.first().cloned().unwrap_or_default();
                    images.extend(refs);
                    first
                }
                Err(err) => {
                    tracing::debug!(error = %err, "ignoring non-string input_reference list");
                    String::new()
                }
            },
            Value::Null => String::new(),
            other => {
                tracing::debug!(value = %other, "ignoring unexpected input_reference");
                String::new()
            }
        };

        let metadata = match raw.metadata {
            Value::Object(map) => map,
            // clients that stringify metadata before embedding it
            Value::String(encoded) => serde_json::from_str::<Map<String, Value>>(&encoded)
                .unwrap_or_else(|err| {
                    tracing::debug!(error = %err, "ignoring undecodable metadata string");
                    Map::new()
                }),
            Value::Null => Map::new(),
            other => {
                tracing::debug!(value = %other, "ignoring non-object metadata");
                Map::new()
            }
        };

        Self {
            prompt: raw.prompt.unwrap_or_default(),
            model: raw.model.unwrap_or_default(),
            mode: raw.mode.unwrap_or_default(),
            image: raw.image.unwrap_or_default(),
            images,
            size: raw.size.unwrap_or_default(),
            duration: raw.duration.unwrap_or_default(),
            seconds: raw.seconds.unwrap_or_default(),
            input_reference,
            metadata,
        }
    }
}

impl TaskSubmission {
    /// Builds a submission from multipart form fields, in arrival order.
    pub fn from_form(fields: &[(String, String)]) -> Self {
        let first = |name: &str| {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        };
        let all = |name: &str| -> Vec<String> {
            fields
                .iter()
                .filter(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .collect()
        };

        let mut submission = Self {
            prompt: first("prompt"),
            model: first("model"),
            mode: first("mode"),
            image: first("image"),
            size: first("size"),
            ..Self::default()
        };

        if let Ok(seconds) = first("seconds").trim().parse::<i64>() {
            submission.duration = seconds;
        }

        let refs = all("input_reference");
        if let Some(reference) = refs.first() {
            submission.input_reference = reference.clone();
            submission.images.extend(refs.iter().cloned());
        }

        let images = all("images");
        if !images.is_empty() {
            submission.images = images;
        }

        for (key, value) in fields {
            if KNOWN_FIELDS.contains(&key.as_str()) || submission.metadata.contains_key(key) {
                continue;
            }
            submission.metadata.insert(key.clone(), coerce_form_value(value));
        }
        submission
    }

    pub fn has_image(&self) -> bool {
        !self.images.is_empty()
    }

    /// Re-decodes the metadata bucket into a typed view.
    pub fn metadata_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.metadata.clone()))
    }
}

/// Integer, then float, then plain string.
fn coerce_form_value(value: &str) -> Value {
    if let Ok(int) = value.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(number) = value.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    Value::String(value.to_string())
}

/// Task body as received, before decoding.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    Json(Bytes),
    Form(Vec<(String, String)>),
}

impl TaskPayload {
    /// Decodes into a submission. `json_error_code` names the error reported
    /// when a JSON body is malformed; the two validation paths differ here.
    pub fn into_submission(self, json_error_code: &str) -> AppResult<TaskSubmission> {
        match self {
            TaskPayload::Form(fields) => Ok(TaskSubmission::from_form(&fields)),
            TaskPayload::Json(body) => serde_json::from_slice(&body).map_err(|err| {
                AppError::new(
                    StatusCode::BAD_REQUEST,
                    json_error_code,
                    format!("invalid task request body: {err}"),
                )
            }),
        }
    }
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA)
}

fn multipart_error(err: impl std::fmt::Display) -> AppError {
    AppError::new(
        StatusCode::BAD_REQUEST,
        "invalid_multipart_form",
        format!("invalid multipart form: {err}"),
    )
}

impl<S> FromRequest<S> for TaskPayload
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_multipart(&req) {
            let body = Bytes::from_request(req, state).await.map_err(|err| {
                AppError::new(StatusCode::BAD_REQUEST, "invalid_request", err.body_text())
            })?;
            return Ok(TaskPayload::Json(body));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|err| multipart_error(err.body_text()))?;
        let mut fields = Vec::new();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            // file parts are not form values
            if field.file_name().is_some() {
                continue;
            }
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let value = field.text().await.map_err(multipart_error)?;
            fields.push((name, value));
        }
        Ok(TaskPayload::Form(fields))
    }
}

pub fn validate_prompt(prompt: &str) -> AppResult<()> {
    if prompt.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "prompt is required",
        ));
    }
    Ok(())
}

/// Validates a task submission for providers without model-specific rules and
/// stores it on the context under `action`.
pub fn validate_basic_task_request(
    ctx: &mut SessionContext,
    action: &str,
    payload: TaskPayload,
) -> AppResult<()> {
    let mut submission = payload.into_submission("invalid_request")?;
    validate_prompt(&submission.prompt)?;

    if submission.images.is_empty() && !submission.image.trim().is_empty() {
        submission.images = vec![submission.image.clone()];
    }

    ctx.store_task_request(action, submission)?;
    Ok(())
}

/// Validates a direct video submission, resolving the action from the
/// presence of images and applying per-model size and duration rules.
pub fn validate_direct_task_request(
    ctx: &mut SessionContext,
    payload: TaskPayload,
) -> AppResult<()> {
    let mut submission = payload.into_submission("invalid_json")?;

    let mut seconds = submission.seconds.trim().parse::<i64>().unwrap_or(0);
    if seconds == 0 {
        seconds = submission.duration;
    }
    if submission.images.is_empty() && !submission.input_reference.is_empty() {
        submission.images = vec![submission.input_reference.clone()];
    }

    if submission.model.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "missing_model",
            "model field is required",
        ));
    }
    validate_prompt(&submission.prompt)?;

    let action = if submission.has_image() {
        TASK_ACTION_GENERATE
    } else {
        TASK_ACTION_TEXT_GENERATE
    };

    if submission.model.starts_with(SORA_FAMILY_PREFIX) {
        if submission.size.is_empty() {
            submission.size = SORA_DEFAULT_SIZE.to_string();
        }
        if seconds <= 0 {
            seconds = SORA_DEFAULT_SECONDS;
        }
        check_sora_size(&submission.model, &submission.size)?;

        let size_ratio = if SORA_HIGH_RES_SIZES.contains(&submission.size.as_str()) {
            SORA_HIGH_RES_RATIO
        } else {
            1.0
        };
        let ratios = &mut ctx.price_data.other_ratios;
        ratios.clear();
        ratios.insert("seconds".to_string(), seconds as f64);
        ratios.insert("size".to_string(), size_ratio);
    }
    submission.duration = seconds;

    tracing::debug!(
        model = %submission.model,
        action,
        size = %submission.size,
        seconds,
        "direct task submission accepted"
    );
    ctx.store_task_request(action, submission)?;
    Ok(())
}

/// Only the two named tiers carry an allow-list; other family members pass.
fn check_sora_size(model: &str, size: &str) -> AppResult<()> {
    let allowed = match model {
        "sora-2" => SORA_STANDARD_SIZES.contains(&size),
        "sora-2-pro" => {
            SORA_STANDARD_SIZES.contains(&size) || SORA_HIGH_RES_SIZES.contains(&size)
        }
        _ => true,
    };
    if allowed {
        return Ok(());
    }
    Err(AppError::new(
        StatusCode::BAD_REQUEST,
        "invalid_size",
        format!("{model} size is invalid"),
    )
    .with_param("size"))
}

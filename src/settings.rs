use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiSettings {
    /// Drop `id` from `functionResponse` parts before forwarding; Vertex AI rejects it.
    pub remove_function_response_id_enabled: bool,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            remove_function_response_id_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    pub gemini: GeminiSettings,
    pub updated_at: DateTime<Utc>,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            gemini: GeminiSettings::default(),
            updated_at: Utc::now(),
        }
    }
}

impl SystemSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(enabled) = std::env::var("RELAYGATE_GEMINI_REMOVE_FUNCTION_RESPONSE_ID")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            settings.gemini.remove_function_response_id_enabled = enabled;
        }
        settings
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Process-wide model settings. Read on every request, written by operators.
#[derive(Clone, Default)]
pub struct SettingsStore {
    inner: Arc<RwLock<SystemSettings>>,
}

impl SettingsStore {
    pub fn new(settings: SystemSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub async fn get_all(&self) -> SystemSettings {
        self.inner.read().await.clone()
    }

    pub async fn gemini(&self) -> GeminiSettings {
        self.inner.read().await.gemini.clone()
    }

    pub async fn update(&self, update: impl FnOnce(&mut SystemSettings)) -> SystemSettings {
        let mut guard = self.inner.write().await;
        update(&mut guard);
        guard.updated_at = Utc::now();
        guard.clone()
    }
}

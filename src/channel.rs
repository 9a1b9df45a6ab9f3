use crate::capability::{ApiType, ChannelType, api_type_for, supports_stream_options};
use crate::config::{ChannelOtherSettings, ChannelSettings};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Raw channel facts as selected by the distributor for this request.
#[derive(Debug, Clone, Default)]
pub struct ChannelFacts {
    pub channel_type: ChannelType,
    pub channel_id: i64,
    pub is_multi_key: bool,
    pub multi_key_index: i64,
    pub base_url: String,
    pub api_key: String,
    pub organization: String,
    pub create_time: i64,
    /// Version stored on the channel.
    pub api_version: String,
    /// `api-version` query parameter of the inbound request.
    pub query_api_version: Option<String>,
    pub region: String,
    pub param_override: Map<String, Value>,
    pub header_override: Map<String, Value>,
    pub settings: Option<ChannelSettings>,
    pub other_settings: Option<ChannelOtherSettings>,
}

/// Resolved capabilities of the channel serving a request.
#[derive(Clone, Serialize)]
pub struct ChannelMeta {
    pub channel_type: ChannelType,
    pub channel_id: i64,
    pub is_multi_key: bool,
    pub multi_key_index: i64,
    pub base_url: String,
    pub api_type: ApiType,
    pub api_version: String,
    #[serde(skip)]
    pub api_key: String,
    pub organization: String,
    pub create_time: i64,
    pub param_override: Map<String, Value>,
    pub header_override: Map<String, Value>,
    pub settings: ChannelSettings,
    pub other_settings: ChannelOtherSettings,
    pub upstream_model_name: String,
    pub is_model_mapped: bool,
    pub support_stream_options: bool,
}

impl ChannelMeta {
    pub fn resolve(facts: &ChannelFacts, original_model: &str) -> Self {
        Self {
            channel_type: facts.channel_type,
            channel_id: facts.channel_id,
            is_multi_key: facts.is_multi_key,
            multi_key_index: facts.multi_key_index,
            base_url: facts.base_url.clone(),
            api_type: api_type_for(facts.channel_type).unwrap_or_default(),
            api_version: resolve_api_version(facts),
            api_key: facts.api_key.clone(),
            organization: facts.organization.clone(),
            create_time: facts.create_time,
            param_override: facts.param_override.clone(),
            header_override: facts.header_override.clone(),
            settings: facts.settings.clone().unwrap_or_default(),
            other_settings: facts.other_settings.clone().unwrap_or_default(),
            upstream_model_name: original_model.to_string(),
            is_model_mapped: false,
            support_stream_options: supports_stream_options(facts.channel_type),
        }
    }
}

impl fmt::Debug for ChannelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelMeta")
            .field("channel_type", &self.channel_type)
            .field("channel_id", &self.channel_id)
            .field("is_multi_key", &self.is_multi_key)
            .field("multi_key_index", &self.multi_key_index)
            .field("base_url", &self.base_url)
            .field("api_type", &self.api_type)
            .field("api_version", &self.api_version)
            .field("api_key", &"***masked***")
            .field("upstream_model_name", &self.upstream_model_name)
            .field("is_model_mapped", &self.is_model_mapped)
            .field("support_stream_options", &self.support_stream_options)
            .finish_non_exhaustive()
    }
}

fn resolve_api_version(facts: &ChannelFacts) -> String {
    match facts.channel_type {
        ChannelType::AZURE => facts
            .query_api_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(&facts.api_version)
            .to_string(),
        ChannelType::VERTEX_AI => facts.region.clone(),
        _ => facts.api_version.clone(),
    }
}

const CLOUDFLARE_GATEWAY_PREFIX: &str = "https://gateway.ai.cloudflare.com";

/// Joins a channel base URL and request path, undoing the path prefix that
/// Cloudflare's AI gateway already carries in its base URL.
pub fn full_request_url(base_url: &str, request_path: &str, channel_type: ChannelType) -> String {
    if base_url.starts_with(CLOUDFLARE_GATEWAY_PREFIX) {
        match channel_type {
            ChannelType::OPENAI => {
                let path = request_path.strip_prefix("/v1").unwrap_or(request_path);
                return format!("{base_url}{path}");
            }
            ChannelType::AZURE => {
                let path = request_path
                    .strip_prefix("/openai/deployments")
                    .unwrap_or(request_path);
                return format!("{base_url}{path}");
            }
            _ => {}
        }
    }
    format!("{base_url}{request_path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts(channel_type: ChannelType) -> ChannelFacts {
        ChannelFacts {
            channel_type,
            channel_id: 7,
            base_url: "https://api.example.com".to_string(),
            api_key: "sk-secret".to_string(),
            api_version: "2024-02-01".to_string(),
            region: "us-central1".to_string(),
            ..ChannelFacts::default()
        }
    }

    #[test]
    fn azure_prefers_query_api_version() {
        let mut f = facts(ChannelType::AZURE);
        f.query_api_version = Some("2025-04-01-preview".to_string());
        assert_eq!(
            ChannelMeta::resolve(&f, "gpt-4o").api_version,
            "2025-04-01-preview"
        );

        f.query_api_version = Some(String::new());
        assert_eq!(ChannelMeta::resolve(&f, "gpt-4o").api_version, "2024-02-01");
    }

    #[test]
    fn vertex_uses_region_as_api_version() {
        let meta = ChannelMeta::resolve(&facts(ChannelType::VERTEX_AI), "gemini-2.5-pro");
        assert_eq!(meta.api_version, "us-central1");
        assert_eq!(meta.api_type, ApiType::VertexAi);
    }

    #[test]
    fn other_channels_keep_recorded_api_version() {
        let mut f = facts(ChannelType::OPENAI);
        f.query_api_version = Some("ignored".to_string());
        let meta = ChannelMeta::resolve(&f, "gpt-4o");
        assert_eq!(meta.api_version, "2024-02-01");
        assert_eq!(meta.upstream_model_name, "gpt-4o");
        assert!(!meta.is_model_mapped);
        assert!(meta.support_stream_options);
    }

    #[test]
    fn unlisted_channel_does_not_support_stream_options() {
        let meta = ChannelMeta::resolve(&facts(ChannelType(4242)), "m");
        assert!(!meta.support_stream_options);
        assert_eq!(meta.api_type, ApiType::OpenAi);
    }

    #[test]
    fn missing_settings_blobs_resolve_to_defaults() {
        let mut f = facts(ChannelType::OPENAI);
        f.param_override = json!({"temperature": 0.2}).as_object().cloned().unwrap();
        let meta = ChannelMeta::resolve(&f, "m");
        assert_eq!(meta.other_settings, ChannelOtherSettings::default());
        assert_eq!(meta.param_override["temperature"], json!(0.2));
    }

    #[test]
    fn debug_masks_api_key() {
        let meta = ChannelMeta::resolve(&facts(ChannelType::OPENAI), "m");
        let rendered = format!("{meta:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("***masked***"));
    }

    #[test]
    fn cloudflare_gateway_paths_are_trimmed() {
        let base = "https://gateway.ai.cloudflare.com/v1/acct/gw/openai";
        assert_eq!(
            full_request_url(base, "/v1/chat/completions", ChannelType::OPENAI),
            format!("{base}/chat/completions")
        );
        assert_eq!(
            full_request_url(
                "https://gateway.ai.cloudflare.com/v1/acct/gw/azure-openai/res",
                "/openai/deployments/gpt/chat/completions",
                ChannelType::AZURE
            ),
            "https://gateway.ai.cloudflare.com/v1/acct/gw/azure-openai/res/gpt/chat/completions"
        );
        assert_eq!(
            full_request_url("https://api.openai.com", "/v1/chat/completions", ChannelType::OPENAI),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}

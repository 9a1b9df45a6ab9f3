use serde::{Deserialize, Serialize};

/// Per-channel relay behaviour configured by the operator.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub force_format: bool,
    pub thinking_to_content: bool,
    pub proxy: String,
    pub pass_through_body_enabled: bool,
    pub system_prompt: String,
    pub system_prompt_override: bool,
}

/// Provider-specific channel switches, including the outbound field policy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelOtherSettings {
    pub azure_responses_version: String,
    pub vertex_key_type: String,
    pub openrouter_enterprise: Option<bool>,
    pub claude_beta_query: bool,
    /// Forward `service_tier` upstream. Off unless set, since tiers can bill extra.
    pub allow_service_tier: bool,
    /// Strip `store` before forwarding. Off unless set.
    pub disable_store: bool,
    /// Forward `safety_identifier` upstream. Off unless set.
    pub allow_safety_identifier: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UserSetting {
    pub notify_type: String,
    pub quota_warning_threshold: f64,
    pub webhook_url: String,
    pub notification_email: String,
    pub accept_unset_model_ratio_model: bool,
    pub record_ip_log: bool,
}

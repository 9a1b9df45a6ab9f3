use crate::capability::ChannelType;
use crate::channel::ChannelFacts;
use crate::config::UserSetting;
use crate::format::RelayMode;
use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;

/// Everything the session layer knows about a request before it is built,
/// captured once at the transport boundary.
#[derive(Debug, Clone, Default)]
pub struct RequestFacts {
    pub request_id: Option<String>,
    pub path: String,
    pub raw_query: Option<String>,
    pub relay_mode_hint: Option<RelayMode>,
    pub beta_query: bool,
    pub user_id: i64,
    pub user_group: String,
    pub using_group: String,
    pub user_quota: i64,
    pub user_email: String,
    pub user_setting: Option<UserSetting>,
    pub token_id: i64,
    pub token_key: String,
    pub token_group: String,
    pub token_unlimited: bool,
    pub original_model: String,
    pub start_time: Option<DateTime<Utc>>,
    pub estimated_prompt_tokens: i64,
    pub channel: ChannelFacts,
}

impl RequestFacts {
    /// The request URL as the caller sent it: path plus query.
    pub fn request_url(&self) -> String {
        match self.raw_query.as_deref() {
            Some(query) if !query.is_empty() => format!("{}?{}", self.path, query),
            _ => self.path.clone(),
        }
    }

    /// Reads facts from the `x-relay-*` headers stamped by the auth and
    /// distribution layers in front of this service. Malformed values are
    /// treated as absent.
    pub fn from_http(uri: &Uri, headers: &HeaderMap) -> Self {
        let query: HashMap<String, String> = Query::try_from_uri(uri)
            .map(|Query(q)| q)
            .unwrap_or_default();

        let channel = ChannelFacts {
            channel_type: ChannelType(header_parse(headers, "x-relay-channel-type").unwrap_or(0)),
            channel_id: header_parse(headers, "x-relay-channel-id").unwrap_or(0),
            is_multi_key: header_parse(headers, "x-relay-channel-multi-key").unwrap_or(false),
            multi_key_index: header_parse(headers, "x-relay-channel-multi-key-index")
                .unwrap_or(0),
            base_url: header_string(headers, "x-relay-channel-base-url"),
            api_key: header_string(headers, "x-relay-channel-key"),
            organization: header_string(headers, "x-relay-channel-organization"),
            create_time: header_parse(headers, "x-relay-channel-create-time").unwrap_or(0),
            api_version: header_string(headers, "x-relay-api-version"),
            query_api_version: query.get("api-version").cloned(),
            region: header_string(headers, "x-relay-region"),
            param_override: header_json::<Map<String, Value>>(headers, "x-relay-param-override")
                .unwrap_or_default(),
            header_override: header_json::<Map<String, Value>>(
                headers,
                "x-relay-header-override",
            )
            .unwrap_or_default(),
            settings: header_json(headers, "x-relay-channel-settings"),
            other_settings: header_json(headers, "x-relay-channel-other-settings"),
        };

        Self {
            request_id: Some(header_string(headers, "x-request-id")).filter(|v| !v.is_empty()),
            path: uri.path().to_string(),
            raw_query: uri.query().map(str::to_string),
            relay_mode_hint: None,
            beta_query: query.get("beta").map(String::as_str) == Some("true"),
            user_id: header_parse(headers, "x-relay-user-id").unwrap_or(0),
            user_group: header_string(headers, "x-relay-user-group"),
            using_group: header_string(headers, "x-relay-using-group"),
            user_quota: header_parse(headers, "x-relay-user-quota").unwrap_or(0),
            user_email: header_string(headers, "x-relay-user-email"),
            user_setting: header_json(headers, "x-relay-user-setting"),
            token_id: header_parse(headers, "x-relay-token-id").unwrap_or(0),
            token_key: header_string(headers, "x-relay-token-key"),
            token_group: header_string(headers, "x-relay-token-group"),
            token_unlimited: header_parse(headers, "x-relay-token-unlimited").unwrap_or(false),
            original_model: header_string(headers, "x-relay-original-model"),
            start_time: Some(Utc::now()),
            estimated_prompt_tokens: header_parse(headers, "x-relay-estimated-tokens")
                .unwrap_or(0),
            channel,
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn header_parse<T: FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<T>().ok())
}

fn header_json<T: DeserializeOwned>(headers: &HeaderMap, name: &str) -> Option<T> {
    let raw = headers.get(name)?.to_str().ok()?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(header = name, error = %err, "ignoring malformed JSON fact header");
            None
        }
    }
}

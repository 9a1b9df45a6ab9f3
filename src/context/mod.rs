//! Per-request session context shared by every relay path.
//!
//! A [`SessionContext`] is built once per inbound call by
//! [`build_session_context`], owned by the task handling that call, and
//! dropped when the call completes. It is never shared between requests.

use crate::billing::{BillingSettler, BillingSource, PriceData, SubscriptionBilling};
use crate::channel::{ChannelFacts, ChannelMeta};
use crate::config::UserSetting;
use crate::error::ContextError;
use crate::format::{RelayFormat, RelayMode};
use crate::request::RelayRequest;
use crate::task::TaskSubmission;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

pub mod build;
pub mod chain;
pub mod extension;
pub mod realtime;

pub use build::build_session_context;
pub use chain::ConversionChain;
pub use extension::{
    BuiltInTool, FormatExtension, LastMessageType, MessagesConvertState, RerankState,
    ResponsesUsage, TaskState, Usage,
};
pub use realtime::{ClientSocket, RealtimeSession, RealtimeTool, UpstreamSocket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThinkingContentInfo {
    pub is_first_thinking_content: bool,
    pub send_last_thinking_content: bool,
    pub has_sent_thinking_content: bool,
}

impl Default for ThinkingContentInfo {
    fn default() -> Self {
        Self {
            is_first_thinking_content: true,
            send_last_thinking_content: false,
            has_sent_thinking_content: false,
        }
    }
}

pub struct SessionContext {
    pub request_id: String,
    pub user_id: i64,
    pub user_group: String,
    /// Group used for routing; changes when auto-group retries cross groups.
    pub using_group: String,
    pub user_quota: i64,
    pub user_email: String,
    pub user_setting: UserSetting,
    pub token_id: i64,
    pub token_key: String,
    pub token_group: String,
    pub token_unlimited: bool,

    pub start_time: DateTime<Utc>,
    first_response_time: DateTime<Utc>,
    is_first_response: bool,

    pub relay_format: RelayFormat,
    pub relay_mode: RelayMode,
    pub request_url_path: String,
    pub origin_model_name: String,
    pub is_stream: bool,
    pub is_playground: bool,
    pub is_claude_beta_query: bool,
    pub reasoning_effort: String,

    pub should_include_usage: bool,
    /// Suppress the gateway's own keep-alive pings towards the caller.
    pub disable_ping: bool,
    pub send_response_count: u64,
    pub received_response_count: u64,
    pub thinking: ThinkingContentInfo,
    estimate_prompt_tokens: i64,

    billing: Option<Arc<dyn BillingSettler>>,
    pub billing_source: BillingSource,
    pub subscription: SubscriptionBilling,
    pub final_pre_consumed_quota: i64,
    pub price_data: PriceData,

    pub request: Option<RelayRequest>,
    /// Format of the body finally sent upstream, once known.
    pub final_request_relay_format: Option<RelayFormat>,
    channel: Option<ChannelMeta>,
    extension: FormatExtension,
    conversion_chain: ConversionChain,
    task_request: Option<TaskSubmission>,
}

impl SessionContext {
    pub fn extension(&self) -> &FormatExtension {
        &self.extension
    }

    fn extension_mismatch(&self, expected: &'static str) -> ContextError {
        ContextError::ExtensionMismatch {
            format: self.relay_format.as_str(),
            expected,
        }
    }

    pub fn messages_state(&self) -> Result<&MessagesConvertState, ContextError> {
        match &self.extension {
            FormatExtension::Messages(state) => Ok(state),
            _ => Err(self.extension_mismatch("messages")),
        }
    }

    pub fn messages_state_mut(&mut self) -> Result<&mut MessagesConvertState, ContextError> {
        let err = self.extension_mismatch("messages");
        match &mut self.extension {
            FormatExtension::Messages(state) => Ok(state),
            _ => Err(err),
        }
    }

    pub fn rerank_state(&self) -> Result<&RerankState, ContextError> {
        match &self.extension {
            FormatExtension::Rerank(state) => Ok(state),
            _ => Err(self.extension_mismatch("rerank")),
        }
    }

    pub fn responses_usage(&self) -> Result<&ResponsesUsage, ContextError> {
        match &self.extension {
            FormatExtension::Responses(usage) => Ok(usage),
            _ => Err(self.extension_mismatch("responses")),
        }
    }

    pub fn responses_usage_mut(&mut self) -> Result<&mut ResponsesUsage, ContextError> {
        let err = self.extension_mismatch("responses");
        match &mut self.extension {
            FormatExtension::Responses(usage) => Ok(usage),
            _ => Err(err),
        }
    }

    pub fn task_state(&self) -> Result<&TaskState, ContextError> {
        match &self.extension {
            FormatExtension::Task(state) => Ok(state),
            _ => Err(self.extension_mismatch("task")),
        }
    }

    pub fn task_state_mut(&mut self) -> Result<&mut TaskState, ContextError> {
        let err = self.extension_mismatch("task");
        match &mut self.extension {
            FormatExtension::Task(state) => Ok(state),
            _ => Err(err),
        }
    }

    pub fn realtime(&self) -> Result<&RealtimeSession, ContextError> {
        match &self.extension {
            FormatExtension::Realtime(session) => Ok(session),
            _ => Err(self.extension_mismatch("realtime")),
        }
    }

    pub fn realtime_mut(&mut self) -> Result<&mut RealtimeSession, ContextError> {
        let err = self.extension_mismatch("realtime");
        match &mut self.extension {
            FormatExtension::Realtime(session) => Ok(session),
            _ => Err(err),
        }
    }

    /// Closes the realtime socket pair if this is a realtime context.
    pub async fn close_realtime(&mut self) {
        if let FormatExtension::Realtime(session) = &mut self.extension {
            session.close().await;
        }
    }

    pub fn conversion_chain(&self) -> &ConversionChain {
        &self.conversion_chain
    }

    pub fn init_request_conversion_chain(&mut self) {
        self.conversion_chain.initialize(self.relay_format);
    }

    pub fn append_request_conversion(&mut self, format: RelayFormat) {
        self.conversion_chain.append(format);
    }

    pub fn channel(&self) -> Option<&ChannelMeta> {
        self.channel.as_ref()
    }

    /// Resolves and attaches the serving channel's capabilities, then
    /// re-applies the caller's model name to the parsed request.
    pub fn init_channel_meta(&mut self, facts: &ChannelFacts) {
        self.channel = Some(ChannelMeta::resolve(facts, &self.origin_model_name));
        if self.origin_model_name.is_empty() {
            return;
        }
        if let Some(request) = self.request.as_mut() {
            request.set_model_name(&self.origin_model_name);
        }
    }

    /// Records that model mapping rewrote the upstream model name.
    pub fn set_model_mapped(&mut self, upstream_model_name: impl Into<String>) {
        if let Some(channel) = self.channel.as_mut() {
            channel.upstream_model_name = upstream_model_name.into();
            channel.is_model_mapped = true;
        }
    }

    pub fn first_response_time(&self) -> DateTime<Utc> {
        self.first_response_time
    }

    /// Stamps the arrival of the first upstream byte. Later calls are ignored.
    pub fn set_first_response_time(&mut self) {
        if self.is_first_response {
            self.first_response_time = Utc::now();
            self.is_first_response = false;
        }
    }

    pub fn has_send_response(&self) -> bool {
        self.first_response_time > self.start_time
    }

    pub fn estimate_prompt_tokens(&self) -> i64 {
        self.estimate_prompt_tokens
    }

    pub fn set_estimate_prompt_tokens(&mut self, tokens: i64) {
        self.estimate_prompt_tokens = tokens;
    }

    pub fn attach_billing(&mut self, settler: Arc<dyn BillingSettler>) {
        self.billing = Some(settler);
    }

    /// Settlement session, `None` for free and per-call paths.
    pub fn billing(&self) -> Option<&Arc<dyn BillingSettler>> {
        self.billing.as_ref()
    }

    pub fn store_task_request(
        &mut self,
        action: &str,
        submission: TaskSubmission,
    ) -> Result<(), ContextError> {
        self.task_state_mut()?.action = action.to_string();
        self.task_request = Some(submission);
        Ok(())
    }

    pub fn task_request(&self) -> Result<&TaskSubmission, ContextError> {
        self.task_request
            .as_ref()
            .ok_or(ContextError::TaskRequestMissing)
    }

    pub fn describe(&self) -> Value {
        let extension = match &self.extension {
            FormatExtension::Plain => Value::Null,
            FormatExtension::Messages(state) => json!(state),
            FormatExtension::Rerank(state) => json!(state),
            FormatExtension::Responses(usage) => json!(usage),
            FormatExtension::Task(state) => json!(state),
            FormatExtension::Realtime(session) => json!({
                "input_audio_format": session.input_audio_format,
                "output_audio_format": session.output_audio_format,
                "tools": session.tools,
                "is_first_request": session.is_first_request,
            }),
        };
        json!({
            "request_id": self.request_id,
            "relay_format": self.relay_format,
            "relay_mode": self.relay_mode.code(),
            "request_url_path": self.request_url_path,
            "origin_model_name": self.origin_model_name,
            "is_stream": self.is_stream,
            "is_playground": self.is_playground,
            "is_claude_beta_query": self.is_claude_beta_query,
            "user_id": self.user_id,
            "token_id": self.token_id,
            "token_group": self.token_group,
            "using_group": self.using_group,
            "billing_source": self.billing_source,
            "price_data": self.price_data,
            "extension_kind": self.extension.name(),
            "extension": extension,
            "channel": self.channel,
            "conversion_chain": self.conversion_chain,
            "task_request": self.task_request,
        })
    }
}

fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        None if email.is_empty() => String::new(),
        None => "***".to_string(),
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionContext{{ format: {}, mode: {}, stream: {}, playground: {}, path: {:?}, model: {:?}, \
             estimated_prompt_tokens: {}, include_usage: {}, disable_ping: {}, sent: {}, pre_consumed: {}, ",
            self.relay_format,
            self.relay_mode.code(),
            self.is_stream,
            self.is_playground,
            self.request_url_path,
            self.origin_model_name,
            self.estimate_prompt_tokens,
            self.should_include_usage,
            self.disable_ping,
            self.send_response_count,
            self.final_pre_consumed_quota,
        )?;
        write!(
            f,
            "user{{ id: {}, email: {:?}, group: {:?}, using_group: {:?}, quota: {} }}, ",
            self.user_id,
            mask_email(&self.user_email),
            self.user_group,
            self.using_group,
            self.user_quota,
        )?;
        write!(
            f,
            "token{{ id: {}, unlimited: {}, key: ***masked*** }}, ",
            self.token_id, self.token_unlimited
        )?;
        let latency_ms = (self.first_response_time - self.start_time).num_milliseconds();
        write!(
            f,
            "timing{{ start: {}, first_response: {}, latency_ms: {} }}, ",
            self.start_time.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.first_response_time
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
            latency_ms,
        )?;
        if let FormatExtension::Realtime(session) = &self.extension {
            write!(
                f,
                "realtime{{ audio_usage: {}, in: {:?}, out: {:?}, tools: {} }}, ",
                session.audio_usage,
                session.input_audio_format,
                session.output_audio_format,
                session.tools.len(),
            )?;
        }
        if !self.reasoning_effort.is_empty() {
            write!(f, "reasoning_effort: {:?}, ", self.reasoning_effort)?;
        }
        if self.price_data.use_price || !self.price_data.other_ratios.is_empty() {
            write!(
                f,
                "price{{ model_ratio: {}, group_ratio: {}, other_ratios: {:?} }}, ",
                self.price_data.model_ratio,
                self.price_data.group_ratio,
                self.price_data.other_ratios,
            )?;
        }
        if let Some(channel) = &self.channel {
            write!(
                f,
                "channel{{ type: {}, id: {}, multi_key: {}, key_index: {}, base_url: {:?}, \
                 api_type: {:?}, api_version: {:?}, upstream_model: {:?}, mapped: {}, \
                 stream_options: {}, key: ***masked*** }}, ",
                channel.channel_type,
                channel.channel_id,
                channel.is_multi_key,
                channel.multi_key_index,
                channel.base_url,
                channel.api_type,
                channel.api_version,
                channel.upstream_model_name,
                channel.is_model_mapped,
                channel.support_stream_options,
            )?;
        }
        if let FormatExtension::Responses(usage) = &self.extension {
            if !usage.built_in_tools.is_empty() {
                let tools: Vec<String> = usage
                    .built_in_tools
                    .iter()
                    .map(|(name, tool)| format!("{name}: calls={}", tool.call_count))
                    .collect();
                write!(f, "tools{{ {} }}, ", tools.join(", "))?;
            }
        }
        write!(f, "chain: {:?} }}", self.conversion_chain.as_slice())
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_email_keeps_first_char_and_domain() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
        assert_eq!(mask_email(""), "");
        assert_eq!(mask_email("nodomain"), "***");
    }
}

use super::realtime::RealtimeSession;
use crate::format::RelayFormat;
use crate::request::ResponsesRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const WEB_SEARCH_PREVIEW_TOOL: &str = "web_search_preview";
pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const DEFAULT_SEARCH_CONTEXT_SIZE: &str = "medium";

/// Kind of content block most recently emitted while converting a stream
/// into the messages format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastMessageType {
    #[default]
    None,
    Text,
    Tools,
    Thinking,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessagesConvertState {
    pub last_message_type: LastMessageType,
    pub index: usize,
    pub usage: Option<Usage>,
    pub finish_reason: String,
    pub done: bool,
    pub tool_call_base_index: usize,
    pub tool_call_max_index_offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RerankState {
    pub documents: Vec<Value>,
    pub return_documents: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuiltInTool {
    pub tool_name: String,
    pub call_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_context_size: Option<String>,
}

/// Built-in tools declared on a responses request, with call counts filled
/// in as the upstream reports tool invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponsesUsage {
    pub built_in_tools: BTreeMap<String, BuiltInTool>,
}

impl ResponsesUsage {
    pub fn from_request(request: &ResponsesRequest) -> Self {
        let mut built_in_tools = BTreeMap::new();
        for tool in request.tool_objects() {
            let Some(tool_type) = tool.get("type").and_then(Value::as_str) else {
                continue;
            };
            let search_context_size = match tool_type {
                WEB_SEARCH_PREVIEW_TOOL | WEB_SEARCH_TOOL => Some(
                    tool.get("search_context_size")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .unwrap_or(DEFAULT_SEARCH_CONTEXT_SIZE)
                        .to_string(),
                ),
                _ => None,
            };
            built_in_tools.insert(
                tool_type.to_string(),
                BuiltInTool {
                    tool_name: tool_type.to_string(),
                    call_count: 0,
                    search_context_size,
                },
            );
        }
        Self { built_in_tools }
    }

    /// Counts one invocation. Tools the request never declared are ignored.
    pub fn record_call(&mut self, tool_name: &str) -> bool {
        match self.built_in_tools.get_mut(tool_name) {
            Some(tool) => {
                tool.call_count = tool.call_count.saturating_add(1);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskState {
    pub action: String,
    pub origin_task_id: String,
    pub consume_quota: bool,
}

/// Format-specific state. Exactly one variant is attached to every context,
/// chosen by its declared format.
#[derive(Debug)]
pub enum FormatExtension {
    /// Formats that carry no state beyond the base context.
    Plain,
    Messages(MessagesConvertState),
    Rerank(RerankState),
    Responses(ResponsesUsage),
    Task(TaskState),
    Realtime(RealtimeSession),
}

impl FormatExtension {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Messages(_) => "messages",
            Self::Rerank(_) => "rerank",
            Self::Responses(_) => "responses",
            Self::Task(_) => "task",
            Self::Realtime(_) => "realtime",
        }
    }

    /// Name of the variant a context of `format` carries.
    pub fn expected_for(format: RelayFormat) -> &'static str {
        match format {
            RelayFormat::Claude => "messages",
            RelayFormat::Rerank => "rerank",
            RelayFormat::OpenAiResponses => "responses",
            RelayFormat::Task | RelayFormat::MjProxy => "task",
            RelayFormat::OpenAiRealtime => "realtime",
            RelayFormat::OpenAi
            | RelayFormat::OpenAiAudio
            | RelayFormat::OpenAiImage
            | RelayFormat::Gemini
            | RelayFormat::Embedding
            | RelayFormat::OpenAiResponsesCompaction => "plain",
        }
    }

    pub fn matches(&self, format: RelayFormat) -> bool {
        self.name() == Self::expected_for(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn responses_usage_defaults_search_context_size() {
        let req: ResponsesRequest = serde_json::from_value(json!({
            "model": "gpt-5",
            "tools": [
                {"type": "web_search_preview"},
                {"type": "web_search", "search_context_size": "high"},
                {"type": "file_search", "vector_store_ids": ["vs_1"]},
                {"name": "no_type"}
            ]
        }))
        .unwrap();
        let usage = ResponsesUsage::from_request(&req);
        assert_eq!(usage.built_in_tools.len(), 3);
        assert_eq!(
            usage.built_in_tools["web_search_preview"]
                .search_context_size
                .as_deref(),
            Some("medium")
        );
        assert_eq!(
            usage.built_in_tools["web_search"].search_context_size.as_deref(),
            Some("high")
        );
        assert_eq!(usage.built_in_tools["file_search"].search_context_size, None);
    }

    #[test]
    fn record_call_counts_declared_tools_only() {
        let req: ResponsesRequest = serde_json::from_value(json!({
            "model": "gpt-5",
            "tools": [{"type": "web_search_preview"}]
        }))
        .unwrap();
        let mut usage = ResponsesUsage::from_request(&req);
        assert!(usage.record_call("web_search_preview"));
        assert!(usage.record_call("web_search_preview"));
        assert!(!usage.record_call("code_interpreter"));
        assert_eq!(usage.built_in_tools["web_search_preview"].call_count, 2);
    }

    #[test]
    fn every_format_has_a_matching_variant() {
        assert!(FormatExtension::Plain.matches(RelayFormat::Embedding));
        assert!(FormatExtension::Task(TaskState::default()).matches(RelayFormat::MjProxy));
        assert!(!FormatExtension::Plain.matches(RelayFormat::Claude));
    }
}

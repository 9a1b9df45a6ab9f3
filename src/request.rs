use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body shape shared by chat, messages, audio, image, embedding and gemini calls.
/// Only the fields the session layer reads are typed; the rest ride along.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra_body: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerankRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub documents: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_documents: Option<bool>,
    #[serde(flatten)]
    pub extra_body: Map<String, Value>,
}

impl RerankRequest {
    pub fn return_documents(&self) -> bool {
        self.return_documents.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(flatten)]
    pub extra_body: Map<String, Value>,
}

impl ResponsesRequest {
    /// Declared tools that are JSON objects; anything else is skipped.
    pub fn tool_objects(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.tools.iter().filter_map(Value::as_object)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesCompactionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(flatten)]
    pub extra_body: Map<String, Value>,
}

/// An already-parsed inbound body, tagged by concrete shape.
#[derive(Debug, Clone)]
pub enum RelayRequest {
    General(GeneralRequest),
    Rerank(RerankRequest),
    Responses(ResponsesRequest),
    ResponsesCompaction(ResponsesCompactionRequest),
}

impl RelayRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::General(_) => "GeneralRequest",
            Self::Rerank(_) => "RerankRequest",
            Self::Responses(_) => "ResponsesRequest",
            Self::ResponsesCompaction(_) => "ResponsesCompactionRequest",
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            Self::General(r) => &r.model,
            Self::Rerank(r) => &r.model,
            Self::Responses(r) => &r.model,
            Self::ResponsesCompaction(r) => &r.model,
        }
    }

    pub fn set_model_name(&mut self, model: &str) {
        let slot = match self {
            Self::General(r) => &mut r.model,
            Self::Rerank(r) => &mut r.model,
            Self::Responses(r) => &mut r.model,
            Self::ResponsesCompaction(r) => &mut r.model,
        };
        *slot = model.to_string();
    }

    pub fn is_stream(&self) -> bool {
        match self {
            Self::General(r) => r.stream.unwrap_or(false),
            Self::Responses(r) => r.stream.unwrap_or(false),
            Self::Rerank(_) | Self::ResponsesCompaction(_) => false,
        }
    }

    pub fn to_value(&self) -> Value {
        let encoded = match self {
            Self::General(r) => serde_json::to_value(r),
            Self::Rerank(r) => serde_json::to_value(r),
            Self::Responses(r) => serde_json::to_value(r),
            Self::ResponsesCompaction(r) => serde_json::to_value(r),
        };
        encoded.unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn general_request_keeps_unknown_fields() {
        let req: GeneralRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert_eq!(req.model, "gpt-4o");
        assert!(req.extra_body.contains_key("messages"));
        assert!(RelayRequest::General(req).is_stream());
    }

    #[test]
    fn set_model_name_rewrites_every_shape() {
        let mut req = RelayRequest::Rerank(RerankRequest {
            model: "alias".to_string(),
            ..RerankRequest::default()
        });
        req.set_model_name("bge-reranker-v2");
        assert_eq!(req.model_name(), "bge-reranker-v2");
        assert_eq!(req.to_value()["model"], json!("bge-reranker-v2"));
    }

    #[test]
    fn responses_tool_objects_skip_non_objects() {
        let req: ResponsesRequest = serde_json::from_value(json!({
            "model": "gpt-5",
            "tools": [{"type": "web_search_preview"}, "bogus", {"type": "file_search"}]
        }))
        .unwrap();
        assert_eq!(req.tool_objects().count(), 2);
    }
}

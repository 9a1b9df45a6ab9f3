use crate::error::ContextError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire format a caller used to reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayFormat {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openai_audio")]
    OpenAiAudio,
    #[serde(rename = "openai_image")]
    OpenAiImage,
    #[serde(rename = "openai_realtime")]
    OpenAiRealtime,
    #[serde(rename = "claude")]
    Claude,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "rerank")]
    Rerank,
    #[serde(rename = "embedding")]
    Embedding,
    #[serde(rename = "openai_responses")]
    OpenAiResponses,
    #[serde(rename = "openai_responses_compaction")]
    OpenAiResponsesCompaction,
    #[serde(rename = "task")]
    Task,
    #[serde(rename = "mj_proxy")]
    MjProxy,
}

impl RelayFormat {
    pub const ALL: [RelayFormat; 12] = [
        RelayFormat::OpenAi,
        RelayFormat::OpenAiAudio,
        RelayFormat::OpenAiImage,
        RelayFormat::OpenAiRealtime,
        RelayFormat::Claude,
        RelayFormat::Gemini,
        RelayFormat::Rerank,
        RelayFormat::Embedding,
        RelayFormat::OpenAiResponses,
        RelayFormat::OpenAiResponsesCompaction,
        RelayFormat::Task,
        RelayFormat::MjProxy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenAiAudio => "openai_audio",
            Self::OpenAiImage => "openai_image",
            Self::OpenAiRealtime => "openai_realtime",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Rerank => "rerank",
            Self::Embedding => "embedding",
            Self::OpenAiResponses => "openai_responses",
            Self::OpenAiResponsesCompaction => "openai_responses_compaction",
            Self::Task => "task",
            Self::MjProxy => "mj_proxy",
        }
    }
}

impl fmt::Display for RelayFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayFormat {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| ContextError::InvalidFormat(s.to_string()))
    }
}

/// Endpoint family derived from the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    Unknown,
    ChatCompletions,
    Completions,
    Embeddings,
    Moderations,
    ImagesGenerations,
    ImagesEdits,
    Edits,
    AudioSpeech,
    AudioTranscription,
    AudioTranslation,
    Rerank,
    Responses,
    ResponsesCompact,
    Realtime,
    Gemini,
    Midjourney,
    Task,
}

impl RelayMode {
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::ChatCompletions => 1,
            Self::Completions => 2,
            Self::Embeddings => 3,
            Self::Moderations => 4,
            Self::ImagesGenerations => 5,
            Self::Edits => 6,
            Self::AudioSpeech => 7,
            Self::AudioTranscription => 8,
            Self::AudioTranslation => 9,
            Self::ImagesEdits => 10,
            Self::Rerank => 11,
            Self::Responses => 12,
            Self::Realtime => 13,
            Self::Gemini => 14,
            Self::ResponsesCompact => 15,
            Self::Midjourney => 16,
            Self::Task => 17,
        }
    }

    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/v1/chat/completions") || path.starts_with("/pg/chat/completions") {
            Self::ChatCompletions
        } else if path.starts_with("/v1/completions") {
            Self::Completions
        } else if path.starts_with("/v1/embeddings") || path.ends_with("embeddings") {
            Self::Embeddings
        } else if path.starts_with("/v1/moderations") {
            Self::Moderations
        } else if path.starts_with("/v1/images/generations") {
            Self::ImagesGenerations
        } else if path.starts_with("/v1/images/edits") {
            Self::ImagesEdits
        } else if path.starts_with("/v1/edits") {
            Self::Edits
        } else if path.starts_with("/v1/audio/speech") {
            Self::AudioSpeech
        } else if path.starts_with("/v1/audio/transcriptions") {
            Self::AudioTranscription
        } else if path.starts_with("/v1/audio/translations") {
            Self::AudioTranslation
        } else if path.starts_with("/v1/rerank") {
            Self::Rerank
        } else if path.starts_with("/v1/responses/compact") {
            Self::ResponsesCompact
        } else if path.starts_with("/v1/responses") {
            Self::Responses
        } else if path.starts_with("/v1/realtime") {
            Self::Realtime
        } else if path.starts_with("/v1beta/models") || path.starts_with("/v1/models/") {
            Self::Gemini
        } else if path.starts_with("/mj/") {
            Self::Midjourney
        } else if path.starts_with("/v1/video/") || path.starts_with("/v1/tasks/") {
            Self::Task
        } else {
            Self::Unknown
        }
    }
}

//! Static lookup tables describing what each upstream channel type can do.
//!
//! Everything here is immutable data; lookups are safe from any thread.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier of an upstream provider integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelType(pub i32);

impl ChannelType {
    pub const UNKNOWN: Self = Self(0);
    pub const OPENAI: Self = Self(1);
    pub const MIDJOURNEY: Self = Self(2);
    pub const AZURE: Self = Self(3);
    pub const OLLAMA: Self = Self(4);
    pub const MIDJOURNEY_PLUS: Self = Self(5);
    pub const CUSTOM: Self = Self(8);
    pub const PALM: Self = Self(11);
    pub const ANTHROPIC: Self = Self(14);
    pub const BAIDU: Self = Self(15);
    pub const ZHIPU: Self = Self(16);
    pub const ALI: Self = Self(17);
    pub const XUNFEI: Self = Self(18);
    pub const OPENROUTER: Self = Self(20);
    pub const TENCENT: Self = Self(23);
    pub const GEMINI: Self = Self(24);
    pub const MOONSHOT: Self = Self(25);
    pub const ZHIPU_V4: Self = Self(26);
    pub const PERPLEXITY: Self = Self(27);
    pub const AWS: Self = Self(33);
    pub const COHERE: Self = Self(34);
    pub const MINIMAX: Self = Self(35);
    pub const SUNO: Self = Self(36);
    pub const DIFY: Self = Self(37);
    pub const JINA: Self = Self(38);
    pub const CLOUDFLARE: Self = Self(39);
    pub const SILICONFLOW: Self = Self(40);
    pub const VERTEX_AI: Self = Self(41);
    pub const MISTRAL: Self = Self(42);
    pub const DEEPSEEK: Self = Self(43);
    pub const MOKAAI: Self = Self(44);
    pub const VOLCENGINE: Self = Self(45);
    pub const BAIDU_V2: Self = Self(46);
    pub const XINFERENCE: Self = Self(47);
    pub const XAI: Self = Self(48);
    pub const COZE: Self = Self(49);
    pub const KLING: Self = Self(50);
    pub const JIMENG: Self = Self(51);
    pub const VIDU: Self = Self(52);
    pub const SUBMODEL: Self = Self(53);
    pub const DOUBAO_VIDEO: Self = Self(54);
    pub const SORA: Self = Self(55);
    pub const CODEX: Self = Self(57);
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel types whose upstream accepts `stream_options` (usage in stream).
const STREAM_OPTIONS_CHANNELS: [ChannelType; 18] = [
    ChannelType::OPENAI,
    ChannelType::ANTHROPIC,
    ChannelType::AWS,
    ChannelType::GEMINI,
    ChannelType::CLOUDFLARE,
    ChannelType::AZURE,
    ChannelType::VOLCENGINE,
    ChannelType::OLLAMA,
    ChannelType::XAI,
    ChannelType::DEEPSEEK,
    ChannelType::BAIDU_V2,
    ChannelType::ZHIPU_V4,
    ChannelType::ALI,
    ChannelType::SUBMODEL,
    ChannelType::CODEX,
    ChannelType::MOONSHOT,
    ChannelType::MINIMAX,
    ChannelType::SILICONFLOW,
];

pub fn supports_stream_options(channel_type: ChannelType) -> bool {
    STREAM_OPTIONS_CHANNELS.contains(&channel_type)
}

/// Request/response adaptor family used to talk to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    #[default]
    OpenAi,
    Anthropic,
    PaLm,
    Baidu,
    Zhipu,
    Ali,
    Xunfei,
    Tencent,
    Gemini,
    ZhipuV4,
    Ollama,
    Perplexity,
    Aws,
    Cohere,
    Dify,
    Jina,
    Cloudflare,
    SiliconFlow,
    VertexAi,
    Mistral,
    DeepSeek,
    MokaAi,
    VolcEngine,
    BaiduV2,
    OpenRouter,
    Xinference,
    Xai,
    Coze,
    Moonshot,
    MiniMax,
    Submodel,
    Codex,
}

/// Maps a channel type to its adaptor family. `None` for channel types that
/// are served by a task or proxy adaptor rather than a chat adaptor.
pub fn api_type_for(channel_type: ChannelType) -> Option<ApiType> {
    let api_type = match channel_type {
        ChannelType::OPENAI | ChannelType::AZURE | ChannelType::CUSTOM => ApiType::OpenAi,
        ChannelType::ANTHROPIC => ApiType::Anthropic,
        ChannelType::PALM => ApiType::PaLm,
        ChannelType::BAIDU => ApiType::Baidu,
        ChannelType::ZHIPU => ApiType::Zhipu,
        ChannelType::ALI => ApiType::Ali,
        ChannelType::XUNFEI => ApiType::Xunfei,
        ChannelType::TENCENT => ApiType::Tencent,
        ChannelType::GEMINI => ApiType::Gemini,
        ChannelType::ZHIPU_V4 => ApiType::ZhipuV4,
        ChannelType::OLLAMA => ApiType::Ollama,
        ChannelType::PERPLEXITY => ApiType::Perplexity,
        ChannelType::AWS => ApiType::Aws,
        ChannelType::COHERE => ApiType::Cohere,
        ChannelType::DIFY => ApiType::Dify,
        ChannelType::JINA => ApiType::Jina,
        ChannelType::CLOUDFLARE => ApiType::Cloudflare,
        ChannelType::SILICONFLOW => ApiType::SiliconFlow,
        ChannelType::VERTEX_AI => ApiType::VertexAi,
        ChannelType::MISTRAL => ApiType::Mistral,
        ChannelType::DEEPSEEK => ApiType::DeepSeek,
        ChannelType::MOKAAI => ApiType::MokaAi,
        ChannelType::VOLCENGINE => ApiType::VolcEngine,
        ChannelType::BAIDU_V2 => ApiType::BaiduV2,
        ChannelType::OPENROUTER => ApiType::OpenRouter,
        ChannelType::XINFERENCE => ApiType::Xinference,
        ChannelType::XAI => ApiType::Xai,
        ChannelType::COZE => ApiType::Coze,
        ChannelType::MOONSHOT => ApiType::Moonshot,
        ChannelType::MINIMAX => ApiType::MiniMax,
        ChannelType::SUBMODEL => ApiType::Submodel,
        ChannelType::CODEX => ApiType::Codex,
        _ => return None,
    };
    Some(api_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_options_table_lookup() {
        assert!(supports_stream_options(ChannelType::OPENAI));
        assert!(supports_stream_options(ChannelType::SILICONFLOW));
        assert!(!supports_stream_options(ChannelType::MIDJOURNEY));
        assert!(!supports_stream_options(ChannelType(9999)));
    }

    #[test]
    fn unlisted_channel_types_have_no_api_type() {
        assert_eq!(api_type_for(ChannelType::AZURE), Some(ApiType::OpenAi));
        assert_eq!(api_type_for(ChannelType::VERTEX_AI), Some(ApiType::VertexAi));
        assert_eq!(api_type_for(ChannelType::SORA), None);
    }
}

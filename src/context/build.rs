use super::extension::{
    FormatExtension, MessagesConvertState, RerankState, ResponsesUsage, TaskState,
};
use super::realtime::{ClientSocket, RealtimeSession};
use super::{ConversionChain, SessionContext, ThinkingContentInfo};
use crate::billing::{BillingSource, PriceData, SubscriptionBilling};
use crate::error::ContextError;
use crate::facts::RequestFacts;
use crate::format::{RelayFormat, RelayMode};
use crate::request::RelayRequest;
use chrono::{Duration, Utc};

const PLAYGROUND_PREFIX: &str = "/pg";

/// Builds the session context for one inbound call.
///
/// `request` is the parsed body; socket and task formats ignore it.
/// `client_socket` is only kept for [`RelayFormat::OpenAiRealtime`].
/// Formats that depend on a specific body shape (rerank, responses,
/// responses compaction) fail with [`ContextError::TypeMismatch`] when given
/// anything else.
pub fn build_session_context(
    format: RelayFormat,
    request: Option<RelayRequest>,
    facts: &RequestFacts,
    client_socket: Option<ClientSocket>,
) -> Result<SessionContext, ContextError> {
    match dispatch(format, request, facts, client_socket) {
        Ok(ctx) => {
            metrics::counter!("relaygate_context_built_total", "format" => format.as_str())
                .increment(1);
            tracing::debug!(
                request_id = %ctx.request_id,
                relay_format = %format,
                relay_mode = ctx.relay_mode.code(),
                extension = ctx.extension.name(),
                "session context built"
            );
            Ok(ctx)
        }
        Err(err) => {
            metrics::counter!("relaygate_context_failed_total", "code" => err.code())
                .increment(1);
            tracing::debug!(relay_format = %format, error = %err, "session context rejected");
            Err(err)
        }
    }
}

fn dispatch(
    format: RelayFormat,
    request: Option<RelayRequest>,
    facts: &RequestFacts,
    client_socket: Option<ClientSocket>,
) -> Result<SessionContext, ContextError> {
    let extension = match format {
        RelayFormat::Claude => FormatExtension::Messages(MessagesConvertState::default()),
        RelayFormat::Rerank => match &request {
            Some(RelayRequest::Rerank(req)) => FormatExtension::Rerank(RerankState {
                documents: req.documents.clone(),
                return_documents: req.return_documents(),
            }),
            _ => return Err(type_mismatch(format, "RerankRequest", request.as_ref())),
        },
        RelayFormat::OpenAiResponses => match &request {
            Some(RelayRequest::Responses(req)) => {
                FormatExtension::Responses(ResponsesUsage::from_request(req))
            }
            _ => return Err(type_mismatch(format, "ResponsesRequest", request.as_ref())),
        },
        RelayFormat::OpenAiResponsesCompaction => match &request {
            Some(RelayRequest::ResponsesCompaction(_)) => FormatExtension::Plain,
            _ => {
                return Err(type_mismatch(
                    format,
                    "ResponsesCompactionRequest",
                    request.as_ref(),
                ));
            }
        },
        RelayFormat::OpenAiRealtime => {
            FormatExtension::Realtime(RealtimeSession::new(client_socket))
        }
        RelayFormat::Task | RelayFormat::MjProxy => FormatExtension::Task(TaskState::default()),
        RelayFormat::OpenAi
        | RelayFormat::OpenAiAudio
        | RelayFormat::OpenAiImage
        | RelayFormat::Gemini
        | RelayFormat::Embedding => FormatExtension::Plain,
    };

    let request = match format {
        RelayFormat::OpenAiRealtime | RelayFormat::Task | RelayFormat::MjProxy => None,
        _ => request,
    };

    let mut ctx = base_context(format, request, facts, extension);
    match format {
        RelayFormat::Claude => {
            ctx.is_claude_beta_query = facts.beta_query
                || facts
                    .channel
                    .other_settings
                    .as_ref()
                    .is_some_and(|s| s.claude_beta_query);
        }
        RelayFormat::Rerank => ctx.relay_mode = RelayMode::Rerank,
        RelayFormat::OpenAiResponses => ctx.relay_mode = RelayMode::Responses,
        RelayFormat::OpenAiResponsesCompaction => {
            if ctx.relay_mode == RelayMode::Unknown {
                ctx.relay_mode = RelayMode::ResponsesCompact;
            }
        }
        _ => {}
    }

    ctx.init_channel_meta(&facts.channel);
    ctx.init_request_conversion_chain();
    Ok(ctx)
}

fn type_mismatch(
    format: RelayFormat,
    expected: &'static str,
    found: Option<&RelayRequest>,
) -> ContextError {
    ContextError::TypeMismatch {
        format: format.as_str(),
        expected,
        found: found.map_or("missing request", RelayRequest::kind),
    }
}

fn base_context(
    format: RelayFormat,
    request: Option<RelayRequest>,
    facts: &RequestFacts,
    extension: FormatExtension,
) -> SessionContext {
    let token_group = if facts.token_group.is_empty() {
        facts.user_group.clone()
    } else {
        facts.token_group.clone()
    };
    let start_time = facts.start_time.unwrap_or_else(Utc::now);
    let request_id = facts
        .request_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_request_id);

    let mut relay_mode = RelayMode::from_path(&facts.path);
    if relay_mode == RelayMode::Unknown {
        relay_mode = facts.relay_mode_hint.unwrap_or(RelayMode::Unknown);
    }

    let mut request_url_path = facts.request_url();
    let is_playground = is_playground_path(&facts.path);
    if is_playground {
        let rest = request_url_path
            .strip_prefix(PLAYGROUND_PREFIX)
            .unwrap_or(&request_url_path);
        request_url_path = format!("/v1{rest}");
    }

    SessionContext {
        request_id,
        user_id: facts.user_id,
        user_group: facts.user_group.clone(),
        using_group: facts.using_group.clone(),
        user_quota: facts.user_quota,
        user_email: facts.user_email.clone(),
        user_setting: facts.user_setting.clone().unwrap_or_default(),
        token_id: facts.token_id,
        token_key: facts.token_key.clone(),
        token_group,
        token_unlimited: facts.token_unlimited,
        start_time,
        // one second before start means "no upstream byte yet"
        first_response_time: start_time - Duration::seconds(1),
        is_first_response: true,
        relay_format: format,
        relay_mode,
        request_url_path,
        origin_model_name: facts.original_model.clone(),
        is_stream: request.as_ref().is_some_and(RelayRequest::is_stream),
        is_playground,
        is_claude_beta_query: false,
        reasoning_effort: String::new(),
        should_include_usage: false,
        disable_ping: false,
        send_response_count: 0,
        received_response_count: 0,
        thinking: ThinkingContentInfo::default(),
        estimate_prompt_tokens: facts.estimated_prompt_tokens,
        billing: None,
        billing_source: BillingSource::Wallet,
        subscription: SubscriptionBilling::default(),
        final_pre_consumed_quota: 0,
        price_data: PriceData::default(),
        request,
        final_request_relay_format: None,
        channel: None,
        extension,
        conversion_chain: ConversionChain::default(),
        task_request: None,
    }
}

fn is_playground_path(path: &str) -> bool {
    path.strip_prefix(PLAYGROUND_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Time-ordered id with a random suffix, used when the transport supplied none.
fn generate_request_id() -> String {
    let now = Utc::now();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}{}{}",
        now.format("%Y%m%d%H%M%S"),
        now.timestamp_subsec_nanos(),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{BillingError, BillingSettler};
    use crate::capability::ChannelType;
    use crate::config::ChannelOtherSettings;
    use crate::context::LastMessageType;
    use crate::request::{
        GeneralRequest, RerankRequest, ResponsesCompactionRequest, ResponsesRequest,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn facts(path: &str) -> RequestFacts {
        RequestFacts {
            path: path.to_string(),
            user_id: 1,
            user_group: "default".to_string(),
            original_model: "gpt-4o".to_string(),
            start_time: Some(Utc::now() - Duration::seconds(5)),
            ..RequestFacts::default()
        }
    }

    fn general(model: &str, stream: bool) -> Option<RelayRequest> {
        Some(RelayRequest::General(GeneralRequest {
            model: model.to_string(),
            stream: Some(stream),
            ..GeneralRequest::default()
        }))
    }

    fn request_for(format: RelayFormat) -> Option<RelayRequest> {
        match format {
            RelayFormat::Rerank => Some(RelayRequest::Rerank(RerankRequest::default())),
            RelayFormat::OpenAiResponses => {
                Some(RelayRequest::Responses(ResponsesRequest::default()))
            }
            RelayFormat::OpenAiResponsesCompaction => Some(RelayRequest::ResponsesCompaction(
                ResponsesCompactionRequest::default(),
            )),
            RelayFormat::OpenAiRealtime | RelayFormat::Task | RelayFormat::MjProxy => None,
            _ => general("gpt-4o", false),
        }
    }

    #[test]
    fn every_format_gets_exactly_its_extension() {
        for format in RelayFormat::ALL {
            let ctx = build_session_context(format, request_for(format), &facts("/v1/x"), None)
                .unwrap_or_else(|err| panic!("{format}: {err}"));
            assert!(
                ctx.extension().matches(format),
                "{format} got {}",
                ctx.extension().name()
            );
            assert_eq!(ctx.conversion_chain().as_slice(), &[format]);
        }
    }

    #[test]
    fn base_fields_fall_back_sensibly() {
        let ctx = build_session_context(
            RelayFormat::OpenAi,
            general("gpt-4o", true),
            &facts("/v1/chat/completions"),
            None,
        )
        .unwrap();
        assert_eq!(ctx.token_group, "default");
        assert!(!ctx.request_id.is_empty());
        assert!(ctx.is_stream);
        assert_eq!(ctx.relay_mode, RelayMode::ChatCompletions);
        assert!(!ctx.has_send_response());
        assert_eq!(ctx.first_response_time(), ctx.start_time - Duration::seconds(1));
        assert!(ctx.thinking.is_first_thinking_content);
    }

    #[test]
    fn token_group_wins_over_user_group() {
        let mut f = facts("/v1/chat/completions");
        f.token_group = "vip".to_string();
        f.request_id = Some("req-1".to_string());
        let ctx = build_session_context(RelayFormat::OpenAi, general("m", false), &f, None)
            .unwrap();
        assert_eq!(ctx.token_group, "vip");
        assert_eq!(ctx.request_id, "req-1");
    }

    #[test]
    fn first_response_time_is_recorded_once() {
        let mut ctx = build_session_context(
            RelayFormat::OpenAi,
            general("m", true),
            &facts("/v1/chat/completions"),
            None,
        )
        .unwrap();
        ctx.set_first_response_time();
        let first = ctx.first_response_time();
        assert!(ctx.has_send_response());
        ctx.set_first_response_time();
        assert_eq!(ctx.first_response_time(), first);
    }

    #[test]
    fn rerank_requires_rerank_request() {
        let err = build_session_context(
            RelayFormat::Rerank,
            general("m", false),
            &facts("/v1/rerank"),
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "type_mismatch");
        assert!(matches!(
            err,
            ContextError::TypeMismatch {
                found: "GeneralRequest",
                ..
            }
        ));

        let err = build_session_context(
            RelayFormat::OpenAiResponses,
            None,
            &facts("/v1/responses"),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ContextError::TypeMismatch {
                found: "missing request",
                ..
            }
        ));

        let err = build_session_context(
            RelayFormat::OpenAiResponsesCompaction,
            Some(RelayRequest::Responses(ResponsesRequest::default())),
            &facts("/v1/responses/compact"),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "request for format openai_responses_compaction is a ResponsesRequest, expected a ResponsesCompactionRequest"
        );
    }

    #[test]
    fn rerank_captures_documents_and_echo_flag() {
        let req: RerankRequest = serde_json::from_value(json!({
            "model": "bge",
            "query": "q",
            "documents": ["a", "b"],
            "return_documents": true
        }))
        .unwrap();
        let ctx = build_session_context(
            RelayFormat::Rerank,
            Some(RelayRequest::Rerank(req)),
            &facts("/v1/rerank"),
            None,
        )
        .unwrap();
        let state = ctx.rerank_state().unwrap();
        assert_eq!(state.documents, vec![json!("a"), json!("b")]);
        assert!(state.return_documents);
        assert_eq!(ctx.relay_mode, RelayMode::Rerank);
    }

    #[test]
    fn messages_state_starts_with_no_content() {
        let mut f = facts("/v1/messages");
        f.channel.other_settings = Some(ChannelOtherSettings {
            claude_beta_query: true,
            ..ChannelOtherSettings::default()
        });
        let mut ctx =
            build_session_context(RelayFormat::Claude, general("claude", false), &f, None)
                .unwrap();
        assert!(ctx.is_claude_beta_query);
        let state = ctx.messages_state_mut().unwrap();
        assert_eq!(state.last_message_type, LastMessageType::None);
        assert_eq!(state.index, 0);
        assert!(!state.done);
        assert!(ctx.rerank_state().is_err());
    }

    #[test]
    fn compaction_mode_only_set_when_path_unknown() {
        let ctx = build_session_context(
            RelayFormat::OpenAiResponsesCompaction,
            request_for(RelayFormat::OpenAiResponsesCompaction),
            &facts("/internal/compact"),
            None,
        )
        .unwrap();
        assert_eq!(ctx.relay_mode, RelayMode::ResponsesCompact);

        let mut f = facts("/internal/other");
        f.relay_mode_hint = Some(RelayMode::Responses);
        let ctx = build_session_context(
            RelayFormat::OpenAiResponsesCompaction,
            request_for(RelayFormat::OpenAiResponsesCompaction),
            &f,
            None,
        )
        .unwrap();
        assert_eq!(ctx.relay_mode, RelayMode::Responses);
    }

    #[test]
    fn realtime_defaults_to_pcm16() {
        let ctx = build_session_context(
            RelayFormat::OpenAiRealtime,
            general("ignored", true),
            &facts("/v1/realtime"),
            None,
        )
        .unwrap();
        let session = ctx.realtime().unwrap();
        assert_eq!(session.input_audio_format, "pcm16");
        assert_eq!(session.output_audio_format, "pcm16");
        assert!(session.is_first_request);
        assert!(ctx.request.is_none());
        assert!(!ctx.is_stream);
    }

    #[test]
    fn playground_prefix_is_rewritten() {
        let mut f = facts("/pg/chat/completions");
        f.raw_query = Some("x=1".to_string());
        let ctx = build_session_context(RelayFormat::OpenAi, general("m", false), &f, None)
            .unwrap();
        assert!(ctx.is_playground);
        assert_eq!(ctx.request_url_path, "/v1/chat/completions?x=1");
        assert_eq!(ctx.relay_format, RelayFormat::OpenAi);
        assert_eq!(ctx.relay_mode, RelayMode::ChatCompletions);

        let ctx = build_session_context(
            RelayFormat::OpenAi,
            general("m", false),
            &facts("/pgx/chat"),
            None,
        )
        .unwrap();
        assert!(!ctx.is_playground);
    }

    #[test]
    fn channel_meta_reapplies_origin_model() {
        let mut f = facts("/v1/chat/completions");
        f.original_model = "gpt-4o".to_string();
        f.channel.channel_type = ChannelType::OPENAI;
        let mut ctx = build_session_context(
            RelayFormat::OpenAi,
            general("rewritten-by-someone", false),
            &f,
            None,
        )
        .unwrap();
        assert_eq!(ctx.request.as_ref().unwrap().model_name(), "gpt-4o");
        let channel = ctx.channel().unwrap();
        assert!(channel.support_stream_options);
        assert_eq!(channel.upstream_model_name, "gpt-4o");

        ctx.set_model_mapped("gpt-4o-2024-11-20");
        let channel = ctx.channel().unwrap();
        assert!(channel.is_model_mapped);
        assert_eq!(channel.upstream_model_name, "gpt-4o-2024-11-20");
    }

    #[test]
    fn task_request_round_trips_through_context() {
        let mut ctx =
            build_session_context(RelayFormat::Task, None, &facts("/v1/video/generations"), None)
                .unwrap();
        assert!(ctx.task_request().is_err());
        let submission = crate::task::TaskSubmission {
            prompt: "a cat".to_string(),
            ..Default::default()
        };
        ctx.store_task_request("generate", submission).unwrap();
        assert_eq!(ctx.task_request().unwrap().prompt, "a cat");
        assert_eq!(ctx.task_state().unwrap().action, "generate");

        let mut chat = build_session_context(
            RelayFormat::OpenAi,
            general("m", false),
            &facts("/v1/chat/completions"),
            None,
        )
        .unwrap();
        let err = chat
            .store_task_request("generate", Default::default())
            .unwrap_err();
        assert_eq!(err.code(), "extension_mismatch");
    }

    #[derive(Debug)]
    struct FixedSettler(i64);

    #[async_trait::async_trait]
    impl BillingSettler for FixedSettler {
        fn pre_consumed_quota(&self) -> i64 {
            self.0
        }
        fn needs_refund(&self) -> bool {
            false
        }
        async fn settle(&self, _actual_quota: i64) -> Result<(), BillingError> {
            Ok(())
        }
        async fn refund(&self) -> Result<(), BillingError> {
            Ok(())
        }
    }

    #[test]
    fn billing_handle_is_shared_not_owned() {
        let settler: Arc<dyn BillingSettler> = Arc::new(FixedSettler(500));
        let mut ctx = build_session_context(
            RelayFormat::OpenAi,
            general("m", false),
            &facts("/v1/chat/completions"),
            None,
        )
        .unwrap();
        assert!(ctx.billing().is_none());
        ctx.attach_billing(settler.clone());
        assert_eq!(ctx.billing().unwrap().pre_consumed_quota(), 500);
        drop(ctx);
        assert_eq!(Arc::strong_count(&settler), 1);
    }

    #[test]
    fn display_masks_secrets() {
        let mut f = facts("/v1/responses");
        f.token_key = "sk-live-123".to_string();
        f.user_email = "bob@example.com".to_string();
        f.channel.api_key = "upstream-secret".to_string();
        let req: ResponsesRequest = serde_json::from_value(json!({
            "model": "gpt-5",
            "tools": [{"type": "web_search_preview"}]
        }))
        .unwrap();
        let ctx = build_session_context(
            RelayFormat::OpenAiResponses,
            Some(RelayRequest::Responses(req)),
            &f,
            None,
        )
        .unwrap();
        let rendered = ctx.to_string();
        assert!(!rendered.contains("sk-live-123"));
        assert!(!rendered.contains("upstream-secret"));
        assert!(!rendered.contains("bob@"));
        assert!(rendered.contains("web_search_preview: calls=0"));
    }

    #[test]
    fn generated_request_ids_differ() {
        assert_ne!(generate_request_id(), generate_request_id());
    }
}

//! Best-effort removal of request fields a channel must not forward.
//!
//! Both strippers decode the body, edit the object tree and re-encode it.
//! A body that does not decode is logged and passed through untouched.

use crate::config::ChannelOtherSettings;
use crate::settings::GeminiSettings;
use bytes::Bytes;
use serde_json::{Map, Value};

const SERVICE_TIER_FIELD: &str = "service_tier";
const STORE_FIELD: &str = "store";
const SAFETY_IDENTIFIER_FIELD: &str = "safety_identifier";

/// Removes fields the channel's policy does not allow through.
///
/// `service_tier` and `safety_identifier` are dropped unless explicitly
/// allowed. `store` passes unless explicitly disabled.
pub fn remove_disabled_fields(body: Bytes, settings: &ChannelOtherSettings) -> Bytes {
    edit_object(body, "generic", |object| {
        let mut changed = false;
        if !settings.allow_service_tier {
            changed |= object.remove(SERVICE_TIER_FIELD).is_some();
        }
        if settings.disable_store {
            changed |= object.remove(STORE_FIELD).is_some();
        }
        if !settings.allow_safety_identifier {
            changed |= object.remove(SAFETY_IDENTIFIER_FIELD).is_some();
        }
        changed
    })
}

/// Removes `id` from function responses nested in `contents[].parts[]`.
/// Both `functionResponse` and `function_response` spellings are handled.
pub fn remove_gemini_disabled_fields(body: Bytes, settings: &GeminiSettings) -> Bytes {
    if !settings.remove_function_response_id_enabled {
        return body;
    }
    edit_object(body, "gemini", |object| {
        let Some(Value::Array(contents)) = object.get_mut("contents") else {
            return false;
        };
        let mut changed = false;
        for content in contents.iter_mut() {
            let Some(Value::Array(parts)) = content.get_mut("parts") else {
                continue;
            };
            for part in parts.iter_mut() {
                for key in ["functionResponse", "function_response"] {
                    if let Some(Value::Object(response)) = part.get_mut(key) {
                        changed |= response.remove("id").is_some();
                    }
                }
            }
        }
        changed
    })
}

/// Applies `edit` to the top-level object. Re-encodes only when the edit
/// reports a change; otherwise the original bytes are returned as-is.
fn edit_object(
    body: Bytes,
    stripper: &'static str,
    edit: impl FnOnce(&mut Map<String, Value>) -> bool,
) -> Bytes {
    let mut object: Map<String, Value> = match serde_json::from_slice(&body) {
        Ok(object) => object,
        Err(err) => {
            tracing::error!(stripper, error = %err, "failed to decode request body for sanitizing");
            return body;
        }
    };
    if !edit(&mut object) {
        return body;
    }
    match serde_json::to_vec(&object) {
        Ok(encoded) => Bytes::from(encoded),
        Err(err) => {
            tracing::error!(stripper, error = %err, "failed to re-encode sanitized request body");
            body
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(value: Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).unwrap())
    }

    fn decode(body: &Bytes) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[test]
    fn service_tier_removed_store_kept_by_default() {
        let out = remove_disabled_fields(
            bytes(json!({"service_tier": "x", "store": true})),
            &ChannelOtherSettings::default(),
        );
        assert_eq!(decode(&out), json!({"store": true}));
    }

    #[test]
    fn sanitizing_twice_is_a_fixed_point() {
        let settings = ChannelOtherSettings {
            disable_store: true,
            ..ChannelOtherSettings::default()
        };
        let once = remove_disabled_fields(
            bytes(json!({
                "model": "gpt-4o",
                "service_tier": "priority",
                "store": false,
                "safety_identifier": "u-1"
            })),
            &settings,
        );
        let twice = remove_disabled_fields(once.clone(), &settings);
        assert_eq!(once, twice);
        assert_eq!(decode(&twice), json!({"model": "gpt-4o"}));
    }

    #[test]
    fn allowed_fields_pass_through() {
        let settings = ChannelOtherSettings {
            allow_service_tier: true,
            allow_safety_identifier: true,
            ..ChannelOtherSettings::default()
        };
        let input = bytes(json!({"service_tier": "flex", "safety_identifier": "u-1"}));
        let out = remove_disabled_fields(input.clone(), &settings);
        assert_eq!(out, input);
    }

    #[test]
    fn undecodable_body_is_returned_unchanged() {
        let input = Bytes::from_static(b"not json {");
        let out = remove_disabled_fields(input.clone(), &ChannelOtherSettings::default());
        assert_eq!(out, input);
        let out = remove_gemini_disabled_fields(input.clone(), &GeminiSettings::default());
        assert_eq!(out, input);
    }

    #[test]
    fn gemini_function_response_ids_are_removed() {
        let input = bytes(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "function", "parts": [
                    {"functionResponse": {"id": "a", "name": "f", "response": {}}},
                    {"function_response": {"id": "b", "name": "g"}}
                ]}
            ]
        }));
        let out = remove_gemini_disabled_fields(input, &GeminiSettings::default());
        let value = decode(&out);
        let parts = &value["contents"][1]["parts"];
        assert_eq!(parts[0]["functionResponse"], json!({"name": "f", "response": {}}));
        assert_eq!(parts[1]["function_response"], json!({"name": "g"}));
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn gemini_stripper_respects_setting() {
        let input = bytes(json!({
            "contents": [{"parts": [{"functionResponse": {"id": "a"}}]}]
        }));
        let settings = GeminiSettings {
            remove_function_response_id_enabled: false,
        };
        assert_eq!(remove_gemini_disabled_fields(input.clone(), &settings), input);
    }
}

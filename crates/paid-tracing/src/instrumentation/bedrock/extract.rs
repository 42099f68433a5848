//! GenAI semantic attributes for Bedrock calls
//!
//! Extraction is best effort and field by field: a missing or malformed
//! field is skipped without affecting the others, and nothing here returns
//! an error.
//!
//! Raw InvokeModel bodies differ per model family, so every field is looked
//! up across the layouts below and the first readable value wins.
//!
//! | Field            | Anthropic                        | Titan / Nova                    | Llama                    |
//! |------------------|----------------------------------|---------------------------------|--------------------------|
//! | max tokens       | `max_tokens`                     | `textGenerationConfig.maxTokenCount`, `inferenceConfig.max_new_tokens` | `max_gen_len` |
//! | input tokens     | `usage.input_tokens`             | `inputTextTokenCount`, `usage.inputTokens` | `prompt_token_count` |
//! | output tokens    | `usage.output_tokens`            | `results[0].tokenCount`, `usage.outputTokens` | `generation_token_count` |
//! | stop reason      | `stop_reason`                    | `results[0].completionReason`, `stopReason` | `stop_reason` |

use opentelemetry::KeyValue;
use serde_json::Value;

use super::model::{
    BedrockRequest, BedrockResponse, ConverseMetrics, ConverseRequest, ConverseResponse,
    ConverseStreamResponse, InvokeModelRequest, InvokeModelResponse, TokenUsage,
};

pub const GEN_AI_SYSTEM: &str = "gen_ai.system";
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";
pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";
pub const GEN_AI_REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";
pub const GEN_AI_REQUEST_TOP_P: &str = "gen_ai.request.top_p";
pub const GEN_AI_RESPONSE_ID: &str = "gen_ai.response.id";
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";
pub const GEN_AI_RESPONSE_LATENCY_MS: &str = "gen_ai.response.latency_ms";
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
pub const GEN_AI_USAGE_CACHE_READ_INPUT_TOKENS: &str = "gen_ai.usage.cache_read_input_tokens";
pub const GEN_AI_USAGE_CACHE_CREATION_INPUT_TOKENS: &str =
    "gen_ai.usage.cache_creation_input_tokens";

/// Value of `gen_ai.system` for every Bedrock span
pub const BEDROCK_SYSTEM: &str = "bedrock";

const MAX_TOKENS_PATHS: &[&str] = &[
    "/max_tokens",
    "/max_gen_len",
    "/textGenerationConfig/maxTokenCount",
    "/inferenceConfig/max_new_tokens",
    "/inferenceConfig/maxTokens",
];
const TEMPERATURE_PATHS: &[&str] = &[
    "/temperature",
    "/textGenerationConfig/temperature",
    "/inferenceConfig/temperature",
];
const TOP_P_PATHS: &[&str] = &[
    "/top_p",
    "/p",
    "/textGenerationConfig/topP",
    "/inferenceConfig/top_p",
    "/inferenceConfig/topP",
];

const RESPONSE_ID_PATHS: &[&str] = &["/id"];
const RESPONSE_MODEL_PATHS: &[&str] = &["/model"];
const STOP_REASON_PATHS: &[&str] = &[
    "/stop_reason",
    "/stopReason",
    "/results/0/completionReason",
    "/generations/0/finish_reason",
];
const INPUT_TOKENS_PATHS: &[&str] = &[
    "/usage/input_tokens",
    "/usage/inputTokens",
    "/prompt_token_count",
    "/inputTextTokenCount",
];
const OUTPUT_TOKENS_PATHS: &[&str] = &[
    "/usage/output_tokens",
    "/usage/outputTokens",
    "/generation_token_count",
    "/results/0/tokenCount",
];
const CACHE_READ_PATHS: &[&str] = &[
    "/usage/cache_read_input_tokens",
    "/usage/cacheReadInputTokens",
    "/usage/cacheReadInputTokenCount",
];
const CACHE_CREATION_PATHS: &[&str] = &[
    "/usage/cache_creation_input_tokens",
    "/usage/cache_write_input_tokens",
    "/usage/cacheWriteInputTokens",
    "/usage/cacheWriteInputTokenCount",
];

/// Attributes known when the call starts
pub fn request_attributes(request: &BedrockRequest) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new(GEN_AI_SYSTEM, BEDROCK_SYSTEM)];
    match request {
        BedrockRequest::Converse(req) | BedrockRequest::ConverseStream(req) => {
            converse_request(req, &mut attrs)
        }
        BedrockRequest::InvokeModel(req) | BedrockRequest::InvokeModelWithResponseStream(req) => {
            invoke_request(req, &mut attrs)
        }
        BedrockRequest::Other(_) => {}
    }
    attrs
}

/// Attributes known when the call completes
pub fn response_attributes(response: &BedrockResponse) -> Vec<KeyValue> {
    let mut attrs = Vec::new();
    match response {
        BedrockResponse::Converse(resp) => converse_response(resp, &mut attrs),
        BedrockResponse::ConverseStream(resp) => converse_stream_response(resp, &mut attrs),
        BedrockResponse::InvokeModel(resp) => invoke_response(resp, &mut attrs),
        BedrockResponse::InvokeModelWithResponseStream { request_id } => {
            push_str(&mut attrs, GEN_AI_RESPONSE_ID, request_id.as_deref());
        }
        BedrockResponse::Other => {}
    }
    attrs
}

fn converse_request(request: &ConverseRequest, attrs: &mut Vec<KeyValue>) {
    push_str(attrs, GEN_AI_REQUEST_MODEL, Some(&request.model_id));

    if let Some(config) = &request.inference_config {
        if let Some(max_tokens) = config.max_tokens {
            attrs.push(KeyValue::new(GEN_AI_REQUEST_MAX_TOKENS, i64::from(max_tokens)));
        }
        if let Some(temperature) = config.temperature {
            attrs.push(KeyValue::new(GEN_AI_REQUEST_TEMPERATURE, f64::from(temperature)));
        }
        if let Some(top_p) = config.top_p {
            attrs.push(KeyValue::new(GEN_AI_REQUEST_TOP_P, f64::from(top_p)));
        }
    }
}

fn invoke_request(request: &InvokeModelRequest, attrs: &mut Vec<KeyValue>) {
    push_str(attrs, GEN_AI_REQUEST_MODEL, Some(&request.model_id));

    let Some(body) = parse_body(&request.body) else {
        return;
    };
    if let Some(max_tokens) = lookup(&body, MAX_TOKENS_PATHS, as_i64) {
        attrs.push(KeyValue::new(GEN_AI_REQUEST_MAX_TOKENS, max_tokens));
    }
    if let Some(temperature) = lookup(&body, TEMPERATURE_PATHS, as_f64) {
        attrs.push(KeyValue::new(GEN_AI_REQUEST_TEMPERATURE, temperature));
    }
    if let Some(top_p) = lookup(&body, TOP_P_PATHS, as_f64) {
        attrs.push(KeyValue::new(GEN_AI_REQUEST_TOP_P, top_p));
    }
}

fn converse_response(response: &ConverseResponse, attrs: &mut Vec<KeyValue>) {
    push_str(attrs, GEN_AI_RESPONSE_ID, response.request_id.as_deref());
    push_str(attrs, GEN_AI_RESPONSE_FINISH_REASONS, response.stop_reason.as_deref());
    push_metrics(attrs, response.metrics.as_ref());
    push_usage(attrs, response.usage.as_ref());
}

fn converse_stream_response(response: &ConverseStreamResponse, attrs: &mut Vec<KeyValue>) {
    push_str(attrs, GEN_AI_RESPONSE_ID, response.request_id.as_deref());
    push_str(attrs, GEN_AI_RESPONSE_FINISH_REASONS, response.stop_reason.as_deref());
    if let Some(metadata) = &response.metadata {
        push_metrics(attrs, metadata.metrics.as_ref());
        push_usage(attrs, metadata.usage.as_ref());
    }
}

fn invoke_response(response: &InvokeModelResponse, attrs: &mut Vec<KeyValue>) {
    let body = parse_body(&response.body);
    let body_id = body.as_ref().and_then(|b| lookup(b, RESPONSE_ID_PATHS, as_string));

    // The model's own message id is more specific than the request id.
    match body_id {
        Some(id) => attrs.push(KeyValue::new(GEN_AI_RESPONSE_ID, id)),
        None => push_str(attrs, GEN_AI_RESPONSE_ID, response.request_id.as_deref()),
    }

    let Some(body) = body else {
        return;
    };
    if let Some(model) = lookup(&body, RESPONSE_MODEL_PATHS, as_string) {
        attrs.push(KeyValue::new(GEN_AI_RESPONSE_MODEL, model));
    }
    if let Some(reason) = lookup(&body, STOP_REASON_PATHS, as_string) {
        attrs.push(KeyValue::new(GEN_AI_RESPONSE_FINISH_REASONS, reason));
    }

    let usage_fields = [
        (GEN_AI_USAGE_INPUT_TOKENS, INPUT_TOKENS_PATHS),
        (GEN_AI_USAGE_OUTPUT_TOKENS, OUTPUT_TOKENS_PATHS),
        (GEN_AI_USAGE_CACHE_READ_INPUT_TOKENS, CACHE_READ_PATHS),
        (GEN_AI_USAGE_CACHE_CREATION_INPUT_TOKENS, CACHE_CREATION_PATHS),
    ];
    for (key, paths) in usage_fields {
        if let Some(tokens) = lookup(&body, paths, as_i64) {
            attrs.push(KeyValue::new(key, tokens));
        }
    }
}

fn push_metrics(attrs: &mut Vec<KeyValue>, metrics: Option<&ConverseMetrics>) {
    if let Some(latency) = metrics.and_then(|m| m.latency_ms) {
        attrs.push(KeyValue::new(GEN_AI_RESPONSE_LATENCY_MS, latency));
    }
}

fn push_usage(attrs: &mut Vec<KeyValue>, usage: Option<&TokenUsage>) {
    let Some(usage) = usage else {
        return;
    };
    let fields = [
        (GEN_AI_USAGE_INPUT_TOKENS, usage.input_tokens),
        (GEN_AI_USAGE_OUTPUT_TOKENS, usage.output_tokens),
        (GEN_AI_USAGE_CACHE_READ_INPUT_TOKENS, usage.cache_read_input_tokens),
        (GEN_AI_USAGE_CACHE_CREATION_INPUT_TOKENS, usage.cache_write_input_tokens),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            attrs.push(KeyValue::new(key, value));
        }
    }
}

fn push_str(attrs: &mut Vec<KeyValue>, key: &'static str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        attrs.push(KeyValue::new(key, value.to_string()));
    }
}

fn parse_body(body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Bedrock body is not JSON, skipping body attributes");
            None
        }
    }
}

fn lookup<T>(body: &Value, paths: &[&str], read: fn(&Value) -> Option<T>) -> Option<T> {
    paths
        .iter()
        .filter_map(|path| body.pointer(path))
        .find_map(read)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

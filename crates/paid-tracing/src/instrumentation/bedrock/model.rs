//! Bedrock runtime request and response shapes seen by the interceptor
//!
//! Only the fields the interceptor reads are modelled. Structured types
//! follow the Converse API's camelCase JSON so hosts can deserialize them
//! straight from the wire.

use serde::{Deserialize, Serialize};

/// Runtime operations that produce spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BedrockOperation {
    Converse,
    ConverseStream,
    InvokeModel,
    InvokeModelWithResponseStream,
}

impl BedrockOperation {
    pub const ALL: [BedrockOperation; 4] = [
        BedrockOperation::Converse,
        BedrockOperation::ConverseStream,
        BedrockOperation::InvokeModel,
        BedrockOperation::InvokeModelWithResponseStream,
    ];

    /// Match a client operation name; unknown operations are not traced
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BedrockOperation::Converse => "Converse",
            BedrockOperation::ConverseStream => "ConverseStream",
            BedrockOperation::InvokeModel => "InvokeModel",
            BedrockOperation::InvokeModelWithResponseStream => "InvokeModelWithResponseStream",
        }
    }

    /// Span name before namespacing, e.g. `bedrock.converse`
    pub fn span_name(&self) -> String {
        format!("bedrock.{}", self.as_str().to_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

/// Converse and ConverseStream request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_config: Option<InferenceConfiguration>,
}

impl ConverseRequest {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            inference_config: None,
        }
    }

    pub fn with_inference_config(mut self, config: InferenceConfiguration) -> Self {
        self.inference_config = Some(config);
        self
    }
}

/// InvokeModel request carrying a model-specific body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeModelRequest {
    pub model_id: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl InvokeModelRequest {
    pub fn new(model_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            model_id: model_id.into(),
            body: body.into(),
            content_type: Some("application/json".to_string()),
        }
    }
}

/// A request as it enters the client pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum BedrockRequest {
    Converse(ConverseRequest),
    ConverseStream(ConverseRequest),
    InvokeModel(InvokeModelRequest),
    InvokeModelWithResponseStream(InvokeModelRequest),
    /// Any other runtime operation, by name
    Other(String),
}

impl BedrockRequest {
    pub fn operation_name(&self) -> &str {
        match self {
            BedrockRequest::Converse(_) => BedrockOperation::Converse.as_str(),
            BedrockRequest::ConverseStream(_) => BedrockOperation::ConverseStream.as_str(),
            BedrockRequest::InvokeModel(_) => BedrockOperation::InvokeModel.as_str(),
            BedrockRequest::InvokeModelWithResponseStream(_) => {
                BedrockOperation::InvokeModelWithResponseStream.as_str()
            }
            BedrockRequest::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: Option<i64>,
    #[serde(default)]
    pub output_tokens: Option<i64>,
    #[serde(default)]
    pub total_tokens: Option<i64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<i64>,
    #[serde(default)]
    pub cache_write_input_tokens: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseMetrics {
    #[serde(default)]
    pub latency_ms: Option<i64>,
}

/// Converse response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseResponse {
    /// From the `x-amzn-requestid` response header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub metrics: Option<ConverseMetrics>,
}

/// Trailing `metadata` event of a Converse stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseStreamMetadata {
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub metrics: Option<ConverseMetrics>,
}

/// ConverseStream response.
///
/// Usage only exists once the stream has been consumed; hosts that
/// aggregate the stream can pass the trailing events here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConverseStreamResponse {
    pub request_id: Option<String>,
    pub stop_reason: Option<String>,
    pub metadata: Option<ConverseStreamMetadata>,
}

/// InvokeModel response carrying a model-specific body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeModelResponse {
    pub request_id: Option<String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl InvokeModelResponse {
    pub fn new(request_id: Option<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id,
            body: body.into(),
            content_type: Some("application/json".to_string()),
        }
    }
}

/// A response as it leaves the client pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum BedrockResponse {
    Converse(ConverseResponse),
    ConverseStream(ConverseStreamResponse),
    InvokeModel(InvokeModelResponse),
    /// Body arrives as stream events; only response metadata is known here
    InvokeModelWithResponseStream { request_id: Option<String> },
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_lookup() {
        assert_eq!(BedrockOperation::from_name("Converse"), Some(BedrockOperation::Converse));
        assert_eq!(
            BedrockOperation::from_name("InvokeModelWithResponseStream"),
            Some(BedrockOperation::InvokeModelWithResponseStream)
        );
        assert_eq!(BedrockOperation::from_name("ListFoundationModels"), None);
        assert_eq!(BedrockOperation::from_name("converse"), None);
    }

    #[test]
    fn test_span_names() {
        assert_eq!(BedrockOperation::Converse.span_name(), "bedrock.converse");
        assert_eq!(
            BedrockOperation::InvokeModelWithResponseStream.span_name(),
            "bedrock.invokemodelwithresponsestream"
        );
    }

    #[test]
    fn test_request_operation_names() {
        let request = BedrockRequest::Converse(ConverseRequest::new("anthropic.claude-3-haiku"));
        assert_eq!(request.operation_name(), "Converse");
        let request = BedrockRequest::Other("ApplyGuardrail".to_string());
        assert_eq!(request.operation_name(), "ApplyGuardrail");
    }

    #[test]
    fn test_converse_response_from_wire_json() {
        let response: ConverseResponse = serde_json::from_value(serde_json::json!({
            "output": {"message": {"role": "assistant", "content": [{"text": "hi"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 12, "outputTokens": 3, "totalTokens": 15},
            "metrics": {"latencyMs": 412}
        }))
        .unwrap();

        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.usage.as_ref().and_then(|u| u.input_tokens), Some(12));
        assert_eq!(response.metrics.and_then(|m| m.latency_ms), Some(412));
        assert_eq!(response.request_id, None);
    }
}

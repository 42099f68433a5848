//! Bridge into the AWS SDK's interceptor chain
//!
//! [`PaidBedrockInterceptor`] implements the smithy runtime's
//! [`Intercept`] trait and forwards the first and last hooks of every call
//! to a [`BedrockExecutionInterceptor`]. The call's [`CallCorrelation`]
//! lives in the call's own `ConfigBag` layer, so it follows the call
//! wherever the orchestrator polls it.
//!
//! ```ignore
//! paid_tracing::initialize_from_env()?;
//! paid_tracing::instrumentation::bedrock::instrument();
//!
//! let config = aws_sdk_bedrockruntime::config::Builder::from(&sdk_config)
//!     .interceptor(PaidBedrockInterceptor::new())
//!     .build();
//! let client = aws_sdk_bedrockruntime::Client::from_conf(config);
//! ```

use std::sync::Arc;

use aws_sdk_bedrockruntime::operation::converse::{ConverseInput, ConverseOutput};
use aws_sdk_bedrockruntime::operation::converse_stream::ConverseStreamInput;
use aws_sdk_bedrockruntime::operation::invoke_model::{InvokeModelInput, InvokeModelOutput};
use aws_sdk_bedrockruntime::operation::invoke_model_with_response_stream::InvokeModelWithResponseStreamInput;
use aws_sdk_bedrockruntime::operation::RequestId;
use aws_sdk_bedrockruntime::types::InferenceConfiguration as SdkInferenceConfiguration;
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_runtime_api::client::interceptors::context::{
    BeforeSerializationInterceptorContextRef, FinalizerInterceptorContextRef, Input, Output,
};
use aws_smithy_runtime_api::client::interceptors::Intercept;
use aws_smithy_runtime_api::client::orchestrator::Metadata;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_types::config_bag::{ConfigBag, Storable, StoreReplace};
use thiserror::Error;

use super::interceptor::BedrockExecutionInterceptor;
use super::model::{
    BedrockOperation, BedrockRequest, BedrockResponse, ConverseMetrics, ConverseRequest,
    ConverseResponse, ConverseStreamResponse, InferenceConfiguration, InvokeModelRequest,
    InvokeModelResponse, TokenUsage,
};
use crate::instrumentation::hooks::{CallCorrelation, ExecutionAttributes, ExecutionInterceptor};

impl Storable for CallCorrelation {
    type Storer = StoreReplace<Self>;
}

/// Reported when the orchestrator finishes a call without an outcome
#[derive(Error, Debug)]
#[error("call finished without a response")]
struct MissingOutcome;

/// [`Intercept`] implementation for `aws-sdk-bedrockruntime` clients
///
/// The client span is not attached to the orchestrator's task. Code that
/// wants its own spans nested under the call reads the context from
/// [`BedrockExecutionInterceptor::call_context`].
#[derive(Debug, Clone)]
pub struct PaidBedrockInterceptor {
    hooks: Arc<BedrockExecutionInterceptor>,
}

impl PaidBedrockInterceptor {
    /// Adapter over the process-wide pipeline and loader
    pub fn new() -> Self {
        Self::with_hooks(Arc::new(BedrockExecutionInterceptor::new()))
    }

    pub fn with_hooks(hooks: Arc<BedrockExecutionInterceptor>) -> Self {
        Self { hooks }
    }
}

impl Default for PaidBedrockInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Intercept for PaidBedrockInterceptor {
    fn name(&self) -> &'static str {
        self.hooks.name()
    }

    fn read_before_execution(
        &self,
        context: &BeforeSerializationInterceptorContextRef<'_>,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let Some(operation) = operation_name(cfg) else {
            return Ok(());
        };
        let request = request_from_input(&operation, context.input());

        let mut attributes = ExecutionAttributes::new(operation);
        self.hooks.before_execution(&request, &mut attributes);
        if let Some(correlation) = attributes.take::<CallCorrelation>() {
            cfg.interceptor_state().store_put(correlation);
        }
        Ok(())
    }

    fn read_after_execution(
        &self,
        context: &FinalizerInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let Some(correlation) = cfg.load::<CallCorrelation>().cloned() else {
            return Ok(());
        };
        cfg.interceptor_state().unset::<CallCorrelation>();

        let operation = operation_name(cfg).unwrap_or_default();
        let mut attributes = ExecutionAttributes::new(operation.clone());
        attributes.put(correlation);

        match context.output_or_error() {
            Some(Ok(output)) => {
                let response = response_from_output(&operation, output);
                self.hooks.after_execution(&response, &mut attributes);
            }
            Some(Err(error)) => self.hooks.on_execution_failure(error, &mut attributes),
            None => self.hooks.on_execution_failure(&MissingOutcome, &mut attributes),
        }
        Ok(())
    }
}

fn operation_name(cfg: &ConfigBag) -> Option<String> {
    cfg.load::<Metadata>()
        .map(|metadata| metadata.name().to_string())
}

fn inference_config(config: Option<&SdkInferenceConfiguration>) -> Option<InferenceConfiguration> {
    config.map(|config| InferenceConfiguration {
        max_tokens: config.max_tokens(),
        temperature: config.temperature(),
        top_p: config.top_p(),
        stop_sequences: config.stop_sequences().to_vec(),
    })
}

fn converse_request(model_id: Option<&str>, config: Option<&SdkInferenceConfiguration>) -> ConverseRequest {
    ConverseRequest {
        model_id: model_id.unwrap_or_default().to_string(),
        inference_config: inference_config(config),
    }
}

fn invoke_request(model_id: Option<&str>, body: Option<&[u8]>, content_type: Option<&str>) -> InvokeModelRequest {
    InvokeModelRequest {
        model_id: model_id.unwrap_or_default().to_string(),
        body: body.map(<[u8]>::to_vec).unwrap_or_default(),
        content_type: content_type.map(str::to_string),
    }
}

/// Copy the fields the hooks read out of the SDK's typed input
fn request_from_input(operation: &str, input: &Input) -> BedrockRequest {
    let request = match BedrockOperation::from_name(operation) {
        Some(BedrockOperation::Converse) => input
            .downcast_ref::<ConverseInput>()
            .map(|i| BedrockRequest::Converse(converse_request(i.model_id(), i.inference_config()))),
        Some(BedrockOperation::ConverseStream) => input
            .downcast_ref::<ConverseStreamInput>()
            .map(|i| {
                BedrockRequest::ConverseStream(converse_request(i.model_id(), i.inference_config()))
            }),
        Some(BedrockOperation::InvokeModel) => input.downcast_ref::<InvokeModelInput>().map(|i| {
            BedrockRequest::InvokeModel(invoke_request(
                i.model_id(),
                i.body().map(|b| b.as_ref()),
                i.content_type(),
            ))
        }),
        Some(BedrockOperation::InvokeModelWithResponseStream) => input
            .downcast_ref::<InvokeModelWithResponseStreamInput>()
            .map(|i| {
                BedrockRequest::InvokeModelWithResponseStream(invoke_request(
                    i.model_id(),
                    i.body().map(|b| b.as_ref()),
                    i.content_type(),
                ))
            }),
        None => None,
    };
    request.unwrap_or_else(|| BedrockRequest::Other(operation.to_string()))
}

/// Copy the fields the hooks read out of the SDK's typed output.
///
/// Streaming outputs carry no usage until the caller drains the stream.
fn response_from_output(operation: &str, output: &Output) -> BedrockResponse {
    let response = match BedrockOperation::from_name(operation) {
        Some(BedrockOperation::Converse) => output.downcast_ref::<ConverseOutput>().map(|o| {
            let usage = o.usage().map(|u| TokenUsage {
                input_tokens: Some(i64::from(u.input_tokens())),
                output_tokens: Some(i64::from(u.output_tokens())),
                total_tokens: Some(i64::from(u.total_tokens())),
                cache_read_input_tokens: None,
                cache_write_input_tokens: None,
            });
            BedrockResponse::Converse(ConverseResponse {
                request_id: o.request_id().map(str::to_string),
                stop_reason: Some(o.stop_reason().as_str().to_string()),
                usage,
                metrics: o.metrics().map(|m| ConverseMetrics {
                    latency_ms: Some(m.latency_ms()),
                }),
            })
        }),
        Some(BedrockOperation::InvokeModel) => output.downcast_ref::<InvokeModelOutput>().map(|o| {
            BedrockResponse::InvokeModel(InvokeModelResponse {
                request_id: o.request_id().map(str::to_string),
                body: o.body().as_ref().to_vec(),
                content_type: Some(o.content_type().to_string()),
            })
        }),
        Some(BedrockOperation::ConverseStream) => {
            Some(BedrockResponse::ConverseStream(ConverseStreamResponse::default()))
        }
        Some(BedrockOperation::InvokeModelWithResponseStream) => {
            Some(BedrockResponse::InvokeModelWithResponseStream { request_id: None })
        }
        None => None,
    };
    response.unwrap_or(BedrockResponse::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::bedrock::extract::{
        GEN_AI_REQUEST_MAX_TOKENS, GEN_AI_REQUEST_MODEL, GEN_AI_USAGE_INPUT_TOKENS,
        GEN_AI_USAGE_OUTPUT_TOKENS,
    };
    use crate::instrumentation::{DependencyProbe, InstrumentationLoader, ProbeError};
    use crate::{TelemetryPipeline, TracingConfig};
    use aws_sdk_bedrockruntime::primitives::Blob;
    use aws_smithy_runtime_api::client::interceptors::context::InterceptorContext;
    use aws_smithy_runtime_api::client::orchestrator::OrchestratorError;
    use aws_smithy_runtime_api::client::runtime_components::RuntimeComponentsBuilder;
    use aws_smithy_types::config_bag::Layer;
    use opentelemetry::trace::{SpanKind, Status};
    use opentelemetry::Value;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
    use serde_json::json;

    struct Linked;

    impl DependencyProbe for Linked {
        fn library(&self) -> &'static str {
            "aws-sdk-bedrockruntime"
        }

        fn probe(&self) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    fn adapter() -> (PaidBedrockInterceptor, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let pipeline = Arc::new(TelemetryPipeline::new());
        let config = TracingConfig::new("pk_test_sdk", "http://localhost:4318/v1/traces").unwrap();
        pipeline
            .initialize_with_exporter(config, exporter.clone())
            .unwrap();
        let loader = Arc::new(InstrumentationLoader::new(Linked));
        loader.instrument();

        let hooks = BedrockExecutionInterceptor::with_components(pipeline, loader);
        (PaidBedrockInterceptor::with_hooks(Arc::new(hooks)), exporter)
    }

    fn call_config(operation: &'static str) -> ConfigBag {
        let mut layer = Layer::new("bedrock-call");
        layer.store_put(Metadata::new(operation, "bedrockruntime"));
        ConfigBag::of_layers(vec![layer])
    }

    fn invoke_input() -> InterceptorContext {
        let body = json!({"max_tokens": 256, "messages": []}).to_string();
        let input = InvokeModelInput::builder()
            .model_id("anthropic.claude-3-haiku")
            .body(Blob::new(body))
            .build()
            .unwrap();
        InterceptorContext::new(Input::erase(input))
    }

    fn int_attr(span: &SpanData, key: &str) -> Option<i64> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .and_then(|kv| match kv.value {
                Value::I64(n) => Some(n),
                _ => None,
            })
    }

    #[test]
    fn test_invoke_model_call_is_traced() {
        let (adapter, exporter) = adapter();
        let runtime_components = RuntimeComponentsBuilder::for_tests().build().unwrap();
        let mut cfg = call_config("InvokeModel");
        let mut context = invoke_input();

        adapter
            .read_before_execution(&(&context).into(), &mut cfg)
            .unwrap();
        assert!(cfg.load::<CallCorrelation>().is_some());

        let body = json!({"usage": {"input_tokens": 12, "output_tokens": 30}}).to_string();
        let output = InvokeModelOutput::builder()
            .body(Blob::new(body))
            .content_type("application/json")
            .build()
            .unwrap();
        context.set_output_or_error(Ok(Output::erase(output)));

        adapter
            .read_after_execution(&(&context).into(), &runtime_components, &mut cfg)
            .unwrap();
        assert!(cfg.load::<CallCorrelation>().is_none());

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "paid.tracing.bedrock.invokemodel");
        assert_eq!(span.span_kind, SpanKind::Client);
        assert_eq!(span.status, Status::Ok);
        assert!(span
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == GEN_AI_REQUEST_MODEL));
        assert_eq!(int_attr(span, GEN_AI_REQUEST_MAX_TOKENS), Some(256));
        assert_eq!(int_attr(span, GEN_AI_USAGE_INPUT_TOKENS), Some(12));
        assert_eq!(int_attr(span, GEN_AI_USAGE_OUTPUT_TOKENS), Some(30));
    }

    #[test]
    fn test_failed_call_marks_span_error() {
        let (adapter, exporter) = adapter();
        let runtime_components = RuntimeComponentsBuilder::for_tests().build().unwrap();
        let mut cfg = call_config("InvokeModel");
        let mut context = invoke_input();

        adapter
            .read_before_execution(&(&context).into(), &mut cfg)
            .unwrap();
        context.set_output_or_error(Err(OrchestratorError::other("connection reset")));
        adapter
            .read_after_execution(&(&context).into(), &runtime_components, &mut cfg)
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert!(matches!(spans[0].status, Status::Error { .. }));
    }

    #[test]
    fn test_untraced_operation_leaves_config_untouched() {
        let (adapter, exporter) = adapter();
        let mut cfg = call_config("ListAsyncInvokes");
        let context = invoke_input();

        adapter
            .read_before_execution(&(&context).into(), &mut cfg)
            .unwrap();

        assert!(cfg.load::<CallCorrelation>().is_none());
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn test_unexpected_input_type_falls_back_to_other() {
        let input = Input::erase("not a runtime input".to_string());
        assert_eq!(
            request_from_input("Converse", &input),
            BedrockRequest::Other("Converse".to_string())
        );
    }
}

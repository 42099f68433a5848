//! Execution interceptor for the Bedrock runtime client

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use opentelemetry::trace::{SpanKind, Status, TraceContextExt};
use opentelemetry::Context;

use super::extract;
use super::model::{BedrockOperation, BedrockRequest, BedrockResponse};
use crate::instrumentation::hooks::{
    CallCorrelation, CallLifecycle, ExecutionAttributes, ExecutionInterceptor,
};
use crate::instrumentation::InstrumentationLoader;
use crate::pipeline::{self, TelemetryPipeline};

/// Opens a client span per Bedrock call and fills it with GenAI attributes.
///
/// Install one instance in the client's interceptor chain. Spans are only
/// created once Bedrock instrumentation has been enabled.
pub struct BedrockExecutionInterceptor {
    pipeline: Arc<TelemetryPipeline>,
    loader: Arc<InstrumentationLoader>,
}

impl BedrockExecutionInterceptor {
    /// Interceptor bound to the process-wide pipeline and loader
    pub fn new() -> Self {
        Self::with_components(Arc::clone(pipeline::global()), Arc::clone(super::loader()))
    }

    pub fn with_components(
        pipeline: Arc<TelemetryPipeline>,
        loader: Arc<InstrumentationLoader>,
    ) -> Self {
        Self { pipeline, loader }
    }

    /// Context owning the call span, for attaching on transport threads
    pub fn call_context(attributes: &ExecutionAttributes) -> Option<Context> {
        attributes
            .get::<CallCorrelation>()
            .map(|correlation| correlation.context().clone())
    }

    /// Hook progress recorded for the call
    pub fn lifecycle(attributes: &ExecutionAttributes) -> CallLifecycle {
        attributes
            .get::<CallLifecycle>()
            .copied()
            .unwrap_or(CallLifecycle::NotStarted)
    }
}

impl Default for BedrockExecutionInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BedrockExecutionInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BedrockExecutionInterceptor")
            .field("pipeline", &self.pipeline)
            .field("loader", &self.loader)
            .finish()
    }
}

impl ExecutionInterceptor for BedrockExecutionInterceptor {
    type Request = BedrockRequest;
    type Response = BedrockResponse;

    fn name(&self) -> &'static str {
        "paid-bedrock"
    }

    fn before_execution(&self, request: &BedrockRequest, attributes: &mut ExecutionAttributes) {
        if !self.loader.is_instrumented() {
            return;
        }
        let Some(operation) = BedrockOperation::from_name(attributes.operation_name()) else {
            tracing::trace!(operation = %attributes.operation_name(), "Operation not traced");
            return;
        };
        if attributes.contains::<CallCorrelation>() {
            tracing::debug!(operation = operation.as_str(), "Call span already open, skipping");
            return;
        }

        let cx = self.pipeline.tracer().start_span(
            operation.span_name(),
            SpanKind::Client,
            &Context::current(),
        );
        {
            let span = cx.span();
            for attribute in extract::request_attributes(request) {
                span.set_attribute(attribute);
            }
        }

        attributes.put(CallCorrelation::new(cx));
        attributes.put(CallLifecycle::BeforeHookRan);
    }

    fn after_execution(&self, response: &BedrockResponse, attributes: &mut ExecutionAttributes) {
        let Some(correlation) = attributes.take::<CallCorrelation>() else {
            return;
        };
        attributes.put(CallLifecycle::AfterHookRan);

        let cx = correlation.into_context();
        let span = cx.span();
        for attribute in extract::response_attributes(response) {
            span.set_attribute(attribute);
        }
        span.set_status(Status::Ok);
        span.end();

        attributes.put(CallLifecycle::Closed);
    }

    fn on_execution_failure(
        &self,
        error: &(dyn Error + 'static),
        attributes: &mut ExecutionAttributes,
    ) {
        let Some(correlation) = attributes.take::<CallCorrelation>() else {
            return;
        };
        attributes.put(CallLifecycle::FailureHookRan);

        tracing::debug!(
            operation = %attributes.operation_name(),
            error = %error,
            "Bedrock call failed"
        );

        let cx = correlation.into_context();
        let span = cx.span();
        span.record_error(error);
        span.set_status(Status::error(error.to_string()));
        span.end();

        attributes.put(CallLifecycle::Closed);
    }
}

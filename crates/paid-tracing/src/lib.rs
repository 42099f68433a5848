//! Paid tracing core
//!
//! Correlates AI workload telemetry with Paid customers and agents.
//!
//! # Overview
//!
//! ```text
//! initialize(api_key, endpoint)
//!   └─ TelemetryPipeline ── OTLP/HTTP ──▶ collector
//!        ├─ SpanEnricher      (paid.tracing.* names, correlation attributes)
//!        └─ TracerHandle
//!             ├─ trace()  ─▶ TraceScope   (parent_span + PropagationContext)
//!             ├─ signal() ─▶ signal span  (event_name, data)
//!             └─ BedrockExecutionInterceptor ─▶ bedrock.* client spans
//! ```
//!
//! # Usage
//!
//! 1. Call [`initialize`] (or [`initialize_from_env`]) once at startup.
//! 2. Optionally call [`instrumentation::bedrock::instrument`] and install a
//!    [`BedrockExecutionInterceptor`] in the Bedrock client.
//! 3. Wrap work in [`trace`] scopes and record [`signal`]s inside them.
//! 4. Call [`flush`] or [`shutdown`] before the process exits.
//!
//! Every function here delegates to the process-wide [`TelemetryPipeline`];
//! create a pipeline of your own for isolated use.

pub mod config;
pub mod context;
pub mod enricher;
pub mod error;
pub mod instrumentation;
pub mod logging;
pub mod pipeline;
pub mod scope;
pub mod signal;

use std::time::Duration;

use serde::Serialize;

pub use config::{TracingConfig, TracingConfigBuilder};
pub use context::PropagationContext;
pub use enricher::SpanEnricher;
pub use error::{Result, TracingError};
pub use instrumentation::bedrock::BedrockExecutionInterceptor;
pub use instrumentation::{InstrumentationLoader, InstrumentationState};
pub use pipeline::{TelemetryPipeline, TracerHandle};
pub use scope::{ScopeState, TraceScope, TraceScopeBuilder};

/// Initialize the process-wide pipeline with an explicit endpoint
pub fn initialize(api_key: &str, endpoint: &str) -> Result<()> {
    pipeline::global().initialize(api_key, endpoint)
}

/// Initialize the process-wide pipeline against the default collector
pub fn initialize_with_key(api_key: &str) -> Result<()> {
    pipeline::global().initialize_with_key(api_key)
}

/// Initialize the process-wide pipeline from `PAID_*` environment variables
pub fn initialize_from_env() -> Result<()> {
    pipeline::global().initialize_from_env()
}

/// Start building a trace scope.
///
/// If the pipeline has never been initialized, initialization from the
/// environment is attempted first; on failure the scope is inert. After
/// [`shutdown`] scopes are inert without another attempt.
pub fn trace() -> TraceScopeBuilder {
    let global = pipeline::global();
    if let Err(e) = global.ensure_initialized() {
        tracing::error!(error = %e, "Paid tracing is not initialized, scope will not be exported");
    }
    global.trace()
}

/// Current tracer of the process-wide pipeline
pub fn tracer() -> TracerHandle {
    pipeline::global().tracer()
}

/// Record a signal under the current scope
pub fn signal(event_name: &str) {
    pipeline::global().signal(event_name);
}

/// Record a signal, optionally flagged for cost tracing
pub fn signal_with_cost_tracing(event_name: &str, enable_cost_tracing: bool) {
    pipeline::global().signal_with_cost_tracing(event_name, enable_cost_tracing);
}

/// Record a signal carrying a JSON object payload
pub fn signal_with_data<D>(event_name: &str, enable_cost_tracing: bool, data: &D)
where
    D: Serialize + ?Sized,
{
    pipeline::global().signal_with_data(event_name, enable_cost_tracing, data);
}

/// Push pending spans, waiting at most `timeout`
pub fn flush(timeout: Duration) -> bool {
    pipeline::global().flush(timeout)
}

/// Flush and stop exporting, waiting at most `timeout`
pub fn shutdown(timeout: Duration) -> bool {
    pipeline::global().shutdown(timeout)
}

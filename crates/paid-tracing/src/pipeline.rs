//! Telemetry pipeline: exporter wiring, tracer publication, flush and shutdown
//!
//! A [`TelemetryPipeline`] is an ordinary value that can be created per test
//! or per component. The crate-level free functions delegate to the
//! process-wide instance returned by [`global`].

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use opentelemetry::trace::noop::NoopTracer;
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::{
    SdkTracer, SdkTracerProvider, Span, SpanData, SpanExporter, SpanProcessor,
};
use opentelemetry_sdk::Resource;
use serde::Serialize;

use crate::config::{TracingConfig, DEFAULT_OTEL_ENDPOINT};
use crate::enricher::SpanEnricher;
use crate::error::{Result, TracingError};
use crate::scope::TraceScopeBuilder;
use crate::signal;

/// Instrumentation scope name reported by the tracer
pub const TRACER_NAME: &str = "paid.tracing";

/// Resource attribute carrying the API key
pub const API_KEY_RESOURCE_ATTRIBUTE: &str = "api.key";

/// Handle used to start spans. Inert until the pipeline is initialized.
#[derive(Clone, Default)]
pub enum TracerHandle {
    #[default]
    Noop,
    Sdk(SdkTracer),
}

impl TracerHandle {
    pub fn is_noop(&self) -> bool {
        matches!(self, TracerHandle::Noop)
    }

    /// Start a span under `parent` and return a context that owns it.
    ///
    /// Work on the span through `cx.span()`. The span ends when
    /// `cx.span().end()` is called or when the last clone of the returned
    /// context is dropped.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: &Context,
    ) -> Context {
        match self {
            TracerHandle::Noop => start_with(&NoopTracer::new(), name.into(), kind, parent),
            TracerHandle::Sdk(tracer) => start_with(tracer, name.into(), kind, parent),
        }
    }
}

fn start_with<T>(tracer: &T, name: Cow<'static, str>, kind: SpanKind, parent: &Context) -> Context
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    let span = tracer
        .span_builder(name)
        .with_kind(kind)
        .start_with_context(tracer, parent);
    parent.with_span(span)
}

impl fmt::Debug for TracerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracerHandle::Noop => f.write_str("TracerHandle::Noop"),
            TracerHandle::Sdk(_) => f.write_str("TracerHandle::Sdk"),
        }
    }
}

/// Counts spans that ended and have not been flushed yet
#[derive(Debug, Clone, Default)]
struct ExportBacklog {
    ended: Arc<AtomicUsize>,
}

impl ExportBacklog {
    fn pending(&self) -> usize {
        self.ended.load(Ordering::Acquire)
    }

    /// Forget `count` spans once a flush has delivered them
    fn settle(&self, count: usize) {
        let _ = self
            .ended
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ended| {
                Some(ended.saturating_sub(count))
            });
    }
}

impl SpanProcessor for ExportBacklog {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {}

    fn on_end(&self, _span: SpanData) {
        self.ended.fetch_add(1, Ordering::AcqRel);
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }
}

struct Installed {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
    backlog: ExportBacklog,
    config: TracingConfig,
}

/// How spans are handed to the exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportMode {
    Batch,
    Simple,
}

/// Owns the tracer provider and its exporter
pub struct TelemetryPipeline {
    installed: OnceLock<Installed>,
    init_lock: Mutex<()>,
    shut_down: AtomicBool,
}

impl Default for TelemetryPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TelemetryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryPipeline")
            .field("initialized", &self.is_initialized())
            .field("shut_down", &self.shut_down.load(Ordering::Acquire))
            .finish()
    }
}

impl TelemetryPipeline {
    /// Create an uninitialized pipeline
    pub fn new() -> Self {
        Self {
            installed: OnceLock::new(),
            init_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Initialize with an OTLP/HTTP exporter targeting `endpoint`.
    ///
    /// Input is validated before anything else. Repeated calls after a
    /// successful initialization are logged and ignored.
    pub fn initialize(&self, api_key: &str, endpoint: &str) -> Result<()> {
        let config = TracingConfig::new(api_key, endpoint)?;
        self.initialize_with_config(config)
    }

    /// Initialize against the default collector endpoint
    pub fn initialize_with_key(&self, api_key: &str) -> Result<()> {
        self.initialize(api_key, DEFAULT_OTEL_ENDPOINT)
    }

    /// Initialize from `PAID_API_KEY` and `PAID_OTEL_COLLECTOR_ENDPOINT`
    pub fn initialize_from_env(&self) -> Result<()> {
        let config = TracingConfig::from_env()?;
        self.initialize_with_config(config)
    }

    /// Initialize from the environment unless an exporter was ever
    /// installed. A shut down pipeline counts as installed.
    ///
    /// Returns whether an installation was attempted.
    pub fn ensure_initialized(&self) -> Result<bool> {
        if self.installed.get().is_some() {
            return Ok(false);
        }
        self.initialize_from_env().map(|()| true)
    }

    /// Initialize from a prepared config with the OTLP exporter
    pub fn initialize_with_config(&self, config: TracingConfig) -> Result<()> {
        self.install(config, ExportMode::Batch, |config| {
            opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(config.endpoint())
                .with_timeout(config.export_timeout())
                .build()
                .map_err(|e| TracingError::initialization(e.to_string()))
        })
    }

    /// Initialize with a caller-supplied exporter.
    ///
    /// Spans are exported synchronously as they end, which suits tests and
    /// short-lived processes.
    pub fn initialize_with_exporter<E>(&self, config: TracingConfig, exporter: E) -> Result<()>
    where
        E: SpanExporter + 'static,
    {
        self.install(config, ExportMode::Simple, move |_| Ok(exporter))
    }

    fn install<E, F>(&self, config: TracingConfig, mode: ExportMode, make_exporter: F) -> Result<()>
    where
        E: SpanExporter + 'static,
        F: FnOnce(&TracingConfig) -> Result<E>,
    {
        if self.installed.get().is_some() {
            tracing::info!("Paid tracing is already initialized, ignoring repeated call");
            return Ok(());
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.installed.get().is_some() {
            tracing::info!("Paid tracing is already initialized, ignoring repeated call");
            return Ok(());
        }

        let exporter = make_exporter(&config)?;
        let backlog = ExportBacklog::default();
        let resource = Resource::builder()
            .with_service_name(config.service_name().to_string())
            .with_attribute(KeyValue::new(
                API_KEY_RESOURCE_ATTRIBUTE,
                config.api_key().to_string(),
            ))
            .build();

        let builder = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_span_processor(SpanEnricher::new())
            .with_span_processor(backlog.clone());
        let provider = match mode {
            ExportMode::Batch => builder.with_batch_exporter(exporter).build(),
            ExportMode::Simple => builder.with_simple_exporter(exporter).build(),
        };
        let tracer = provider.tracer(TRACER_NAME);

        tracing::info!(
            endpoint = %config.endpoint(),
            service = %config.service_name(),
            "Paid tracing initialized"
        );

        // The lock serializes installers, so the cell is still empty here.
        let _ = self.installed.set(Installed {
            provider,
            tracer,
            backlog,
            config,
        });
        Ok(())
    }

    /// True once an exporter is installed and the pipeline is not shut down
    pub fn is_initialized(&self) -> bool {
        self.installed.get().is_some() && !self.shut_down.load(Ordering::Acquire)
    }

    /// Config of the installed exporter, if any
    pub fn config(&self) -> Option<&TracingConfig> {
        self.installed.get().map(|installed| &installed.config)
    }

    /// Current tracer; the no-op handle before initialization or after shutdown
    pub fn tracer(&self) -> TracerHandle {
        match self.installed.get() {
            Some(installed) if !self.shut_down.load(Ordering::Acquire) => {
                TracerHandle::Sdk(installed.tracer.clone())
            }
            _ => TracerHandle::Noop,
        }
    }

    /// Start building a trace scope bound to this pipeline
    pub fn trace(&self) -> TraceScopeBuilder {
        TraceScopeBuilder::new(self.tracer())
    }

    /// Emit a signal span under the current context
    pub fn signal(&self, event_name: &str) {
        signal::emit::<()>(&self.tracer(), event_name, false, None);
    }

    /// Emit a signal span, optionally flagged for cost tracing
    pub fn signal_with_cost_tracing(&self, event_name: &str, enable_cost_tracing: bool) {
        signal::emit::<()>(&self.tracer(), event_name, enable_cost_tracing, None);
    }

    /// Emit a signal span with a JSON object payload
    pub fn signal_with_data<D>(&self, event_name: &str, enable_cost_tracing: bool, data: &D)
    where
        D: Serialize + ?Sized,
    {
        signal::emit(&self.tracer(), event_name, enable_cost_tracing, Some(data));
    }

    /// Push pending spans to the exporter, waiting at most `timeout`.
    ///
    /// Returns true only when spans were pending and the flush completed in
    /// time. Spans stay pending after a failed or timed out flush, so a
    /// later call tries again. Never fails; problems are logged.
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(installed) = self.installed.get() else {
            tracing::debug!("Flush requested before initialization");
            return false;
        };
        if timeout.is_zero() {
            return false;
        }

        let pending = installed.backlog.pending();
        if pending == 0 {
            return false;
        }

        let provider = installed.provider.clone();
        match run_bounded(timeout, move || provider.force_flush()) {
            Some(Ok(())) => {
                installed.backlog.settle(pending);
                tracing::debug!(spans = pending, "Flushed spans");
                true
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Span flush failed");
                false
            }
            None => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Span flush timed out");
                false
            }
        }
    }

    /// Flush and shut down the exporter, waiting at most `timeout`.
    ///
    /// Afterwards the pipeline hands out the no-op tracer.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let Some(installed) = self.installed.get() else {
            return false;
        };
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        let provider = installed.provider.clone();
        match run_bounded(timeout, move || provider.shutdown()) {
            Some(Ok(())) => true,
            Some(Err(OTelSdkError::AlreadyShutdown)) => false,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Tracer provider shutdown failed");
                false
            }
            None => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Tracer provider shutdown timed out");
                false
            }
        }
    }
}

/// Run `op` on a helper thread and wait for it at most `timeout`
fn run_bounded<F>(timeout: Duration, op: F) -> Option<OTelSdkResult>
where
    F: FnOnce() -> OTelSdkResult + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("paid-tracing-flush".to_string())
        .spawn(move || {
            let _ = tx.send(op());
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Could not start flush thread");
        return None;
    }
    rx.recv_timeout(timeout).ok()
}

/// Process-wide pipeline used by the crate-level functions
pub fn global() -> &'static Arc<TelemetryPipeline> {
    static GLOBAL: OnceLock<Arc<TelemetryPipeline>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(TelemetryPipeline::new()))
}

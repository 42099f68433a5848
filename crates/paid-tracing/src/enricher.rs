//! Span processor that stamps correlation attributes onto every span
//!
//! Runs inside the SDK's span start path, so it also sees spans created by
//! foreign instrumentation that shares the provider.

use std::time::Duration;

use opentelemetry::trace::Span as _;
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{Span, SpanData, SpanProcessor};

use crate::context::PropagationContext;

/// Namespace prepended to every span name
pub const SPAN_NAME_PREFIX: &str = "paid.tracing.";

/// Renames spans into the Paid namespace and copies the ambient
/// [`PropagationContext`] onto them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpanEnricher;

impl SpanEnricher {
    pub fn new() -> Self {
        Self
    }
}

/// Prefixed span name, or `None` when `name` is already namespaced
pub fn namespaced(name: &str) -> Option<String> {
    if name.starts_with(SPAN_NAME_PREFIX) {
        None
    } else {
        Some(format!("{}{}", SPAN_NAME_PREFIX, name))
    }
}

impl SpanProcessor for SpanEnricher {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        // The SDK span exposes its name only through a full `SpanData`
        // copy. Renaming must happen here rather than in `on_end`, where
        // each processor receives its own copy.
        if let Some(renamed) = span
            .exported_data()
            .and_then(|data| namespaced(&data.name))
        {
            span.update_name(renamed);
        }

        let propagation = PropagationContext::from_context(cx);
        for (key, value) in propagation.iter().filter(|(_, v)| !v.is_empty()) {
            span.set_attribute(KeyValue::new(key.to_string(), value.to_string()));
        }
    }

    fn on_end(&self, _span: SpanData) {}

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }
}

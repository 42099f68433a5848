//! Signal emission
//!
//! A signal is a discrete business event recorded as a short `signal` span
//! under whatever scope is current, so it carries that scope's correlation
//! attributes.

use opentelemetry::trace::{SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::pipeline::TracerHandle;

/// Name of the span created for each signal
pub const SIGNAL_SPAN_NAME: &str = "signal";

/// Attribute holding the event name
pub const EVENT_NAME_ATTRIBUTE: &str = "event_name";

/// Attribute holding the JSON payload
pub const DATA_ATTRIBUTE: &str = "data";

/// Payload key carrying the cost tracing flag
pub const COST_TRACING_KEY: &str = "paid";

/// Payload written when the caller's data cannot be serialized
pub const COST_TRACING_FALLBACK: &str = r#"{"paid":{"enable_cost_tracing":true}}"#;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("signal data could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("signal data must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Build the `data` attribute value, or `None` when there is nothing to record
pub fn build_payload<D>(cost_tracing: bool, data: Option<&D>) -> Result<Option<String>, PayloadError>
where
    D: Serialize + ?Sized,
{
    let mut payload = match data.map(serde_json::to_value).transpose()? {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(Value::Array(_)) => return Err(PayloadError::NotAnObject("array")),
        Some(Value::String(_)) => return Err(PayloadError::NotAnObject("string")),
        Some(Value::Number(_)) => return Err(PayloadError::NotAnObject("number")),
        Some(Value::Bool(_)) => return Err(PayloadError::NotAnObject("bool")),
    };

    if cost_tracing {
        payload.insert(
            COST_TRACING_KEY.to_string(),
            json!({ "enable_cost_tracing": true }),
        );
    }

    if payload.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(&payload)?))
}

/// Ends the span when dropped, whatever path the emitter takes
struct EndOnDrop(Context);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.0.span().end();
    }
}

/// Record one signal span under the current context.
///
/// Never fails: an uninitialized tracer or an unserializable payload is
/// logged and the call returns normally.
pub fn emit<D>(tracer: &TracerHandle, event_name: &str, cost_tracing: bool, data: Option<&D>)
where
    D: Serialize + ?Sized,
{
    if tracer.is_noop() {
        tracing::warn!(event = %event_name, "Cannot emit signal, Paid tracing is not initialized");
        return;
    }

    let cx = tracer.start_span(SIGNAL_SPAN_NAME, SpanKind::Internal, &Context::current());
    let span = EndOnDrop(cx);
    let span_ref = span.0.span();

    span_ref.set_attribute(KeyValue::new(EVENT_NAME_ATTRIBUTE, event_name.to_string()));

    match build_payload(cost_tracing, data) {
        Ok(Some(payload)) => span_ref.set_attribute(KeyValue::new(DATA_ATTRIBUTE, payload)),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(event = %event_name, error = %e, "Failed to serialize signal data");
            if cost_tracing {
                span_ref.set_attribute(KeyValue::new(DATA_ATTRIBUTE, COST_TRACING_FALLBACK));
            }
        }
    }

    span_ref.set_status(Status::Ok);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde::Serializer;
    use std::collections::BTreeMap;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to serialize"))
        }
    }

    #[test]
    fn test_payload_absent_without_data_or_flag() {
        assert_eq!(build_payload::<()>(false, None).unwrap(), None);
        assert_eq!(build_payload(false, Some(&Value::Null)).unwrap(), None);
    }

    #[test]
    fn test_payload_cost_flag_only() {
        let payload = build_payload::<()>(true, None).unwrap().unwrap();
        assert_eq!(payload, COST_TRACING_FALLBACK);
    }

    #[test]
    fn test_payload_merges_data_and_flag() {
        let mut data = BTreeMap::new();
        data.insert("a", "1");
        let payload = build_payload(true, Some(&data)).unwrap().unwrap();

        let parsed: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            parsed,
            json!({"a": "1", "paid": {"enable_cost_tracing": true}})
        );
    }

    #[test]
    fn test_payload_rejects_non_objects() {
        assert!(matches!(
            build_payload(false, Some(&vec![1, 2])),
            Err(PayloadError::NotAnObject("array"))
        ));
        assert!(matches!(
            build_payload(true, Some(&Unserializable)),
            Err(PayloadError::Serialize(_))
        ));
    }

    #[test]
    fn test_emit_without_tracer_is_noop() {
        emit::<()>(&TracerHandle::Noop, "ignored", true, None);
    }
}

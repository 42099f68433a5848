//! Trace scopes
//!
//! A [`TraceScopeBuilder`] collects correlation attributes. Starting it
//! merges them over the enclosing [`PropagationContext`], opens a
//! `parent_span` and attaches both to the calling thread until the returned
//! [`TraceScope`] is closed or dropped.
//!
//! ```text
//! trace()                         scope (Active)
//!   .external_customer_id("c")  ─▶  Context { propagation, span }
//!   .metadata("tier", "gold")         │
//!   .start()                          ├─ child spans inherit attributes
//!                                     └─ close()/drop ─▶ Closed
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use opentelemetry::context::FutureExt as _;
use opentelemetry::trace::{SpanContext, SpanKind, SpanRef, Status, TraceContextExt};
use opentelemetry::{Context, ContextGuard, KeyValue};
use serde_json::Value;

use crate::context::{PropagationContext, EXTERNAL_AGENT_ID, EXTERNAL_CUSTOMER_ID, METADATA_PREFIX};
use crate::pipeline::TracerHandle;

/// Name of the span opened by every trace scope
pub const PARENT_SPAN_NAME: &str = "parent_span";

/// Lifecycle of a trace scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Created,
    Active,
    Closed,
}

/// Collects attributes for a new trace scope
#[derive(Debug, Clone)]
pub struct TraceScopeBuilder {
    tracer: TracerHandle,
    attributes: BTreeMap<String, String>,
}

impl TraceScopeBuilder {
    pub fn new(tracer: TracerHandle) -> Self {
        Self {
            tracer,
            attributes: BTreeMap::new(),
        }
    }

    /// Customer the work is attributed to. Empty values are ignored.
    pub fn external_customer_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.attributes.insert(EXTERNAL_CUSTOMER_ID.to_string(), id);
        }
        self
    }

    /// Agent the work is attributed to. Empty values are ignored.
    pub fn external_agent_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.attributes.insert(EXTERNAL_AGENT_ID.to_string(), id);
        }
        self
    }

    /// Single metadata entry, stored as `metadata.<key>`
    pub fn metadata(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        let key = key.as_ref();
        if !key.is_empty() {
            self.attributes
                .insert(format!("{}{}", METADATA_PREFIX, key), value.into());
        }
        self
    }

    /// Nested metadata object, flattened with `.` separators.
    ///
    /// Strings are stored as-is, other scalars and arrays as JSON text, and
    /// nulls are skipped. Non-object input is ignored.
    pub fn metadata_map(mut self, metadata: &Value) -> Self {
        match metadata {
            Value::Object(_) => {
                let mut flat = BTreeMap::new();
                flatten_into(METADATA_PREFIX.trim_end_matches('.'), metadata, &mut flat);
                self.attributes.extend(flat);
            }
            Value::Null => {}
            other => {
                tracing::debug!(kind = %json_kind(other), "Ignoring non-object metadata");
            }
        }
        self
    }

    /// Attributes collected so far
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Merge attributes over the ambient context and open the scope span
    /// without attaching anything to the current thread.
    fn open_context(self) -> Context {
        let ambient = Context::current();
        let merged = PropagationContext::from_context(&ambient).merged_with(&self.attributes);
        let parent = merged.attach_to(&ambient);
        self.tracer
            .start_span(PARENT_SPAN_NAME, SpanKind::Internal, &parent)
    }

    /// Open the scope and attach it to the calling thread
    pub fn start(self) -> TraceScope {
        TraceScope::open(self.open_context())
    }

    /// Run `f` inside the scope, recording its outcome on the scope span
    pub fn call<T, E, F>(self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let mut scope = self.start();
        let result = f();
        match &result {
            Ok(_) => scope.mark_ok(),
            Err(e) => scope.mark_error(e.to_string()),
        }
        scope.close();
        result
    }

    /// Run `f` inside the scope and mark the scope span OK
    pub fn run<T, F>(self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let mut scope = self.start();
        let output = f();
        scope.mark_ok();
        scope.close();
        output
    }

    /// Run `future` with the scope context attached on every poll.
    ///
    /// Nothing is bound to a thread, so the future may move between
    /// runtime workers. The enclosing context is captured when this is
    /// called, not when the future is first polled.
    pub fn call_async<T, E, Fut>(self, future: Fut) -> impl Future<Output = Result<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let cx = self.open_context();
        async move {
            let result = future.with_context(cx.clone()).await;
            let span = cx.span();
            match &result {
                Ok(_) => span.set_status(Status::Ok),
                Err(e) => record_failure(&span, e.to_string()),
            }
            span.end();
            result
        }
    }
}

/// An open trace scope attached to the current thread
///
/// Closing is idempotent. Dropping an active scope closes it, and a scope
/// dropped during a panic is marked as errored first.
pub struct TraceScope {
    context: Context,
    guard: Option<ContextGuard>,
    state: ScopeState,
}

impl TraceScope {
    fn open(context: Context) -> Self {
        let mut scope = Self {
            context,
            guard: None,
            state: ScopeState::Created,
        };
        scope.activate();
        scope
    }

    fn activate(&mut self) {
        if self.state == ScopeState::Created {
            self.guard = Some(self.context.clone().attach());
            self.state = ScopeState::Active;
        }
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// Context to hand to work running on other threads or tasks
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Correlation attributes visible inside this scope
    pub fn propagation(&self) -> PropagationContext {
        PropagationContext::from_context(&self.context)
    }

    pub fn span_context(&self) -> SpanContext {
        self.context.span().span_context().clone()
    }

    /// Mark the scope span as successful
    pub fn mark_ok(&mut self) {
        if self.state == ScopeState::Active {
            self.context.span().set_status(Status::Ok);
        }
    }

    /// Record a failure on the scope span
    pub fn mark_error(&mut self, message: impl Into<String>) {
        if self.state == ScopeState::Active {
            record_failure(&self.context.span(), message.into());
        }
    }

    /// Detach the context and end the span. Later calls do nothing.
    pub fn close(&mut self) {
        if self.state != ScopeState::Active {
            return;
        }
        self.state = ScopeState::Closed;
        drop(self.guard.take());
        self.context.span().end();
    }
}

impl Drop for TraceScope {
    fn drop(&mut self) {
        if self.state == ScopeState::Active && std::thread::panicking() {
            self.mark_error("panicked inside trace scope");
        }
        self.close();
    }
}

impl fmt::Debug for TraceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceScope")
            .field("state", &self.state)
            .field("span_context", &self.span_context())
            .finish()
    }
}

fn record_failure(span: &SpanRef<'_>, message: String) {
    span.add_event(
        "exception",
        vec![KeyValue::new("exception.message", message.clone())],
    );
    span.set_status(Status::error(message));
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(&format!("{}.{}", prefix, key), nested, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn noop_builder() -> TraceScopeBuilder {
        TraceScopeBuilder::new(TracerHandle::Noop)
    }

    #[test]
    fn test_builder_ignores_empty_ids() {
        let builder = noop_builder()
            .external_customer_id("")
            .external_agent_id("")
            .metadata("", "dropped");
        assert!(builder.attributes().is_empty());
    }

    #[test]
    fn test_metadata_map_flattens() {
        let builder = noop_builder().metadata_map(&json!({
            "request": {"type": "chat", "retries": 2},
            "tags": ["a", "b"],
            "beta": true,
            "skipped": null,
            "empty": {}
        }));

        let attrs = builder.attributes();
        assert_eq!(attrs.get("metadata.request.type").map(String::as_str), Some("chat"));
        assert_eq!(attrs.get("metadata.request.retries").map(String::as_str), Some("2"));
        assert_eq!(attrs.get("metadata.tags").map(String::as_str), Some(r#"["a","b"]"#));
        assert_eq!(attrs.get("metadata.beta").map(String::as_str), Some("true"));
        assert!(!attrs.contains_key("metadata.skipped"));
        assert!(!attrs.contains_key("metadata.empty"));
        assert!(!attrs.contains_key("metadata.request"));
        assert_eq!(attrs.len(), 4);
    }

    #[test]
    fn test_metadata_map_ignores_scalars() {
        let builder = noop_builder().metadata_map(&json!("just a string"));
        assert!(builder.attributes().is_empty());
    }

    #[test]
    fn test_scope_state_transitions() {
        let mut scope = noop_builder().external_customer_id("cust-1").start();
        assert_eq!(scope.state(), ScopeState::Active);
        assert_eq!(PropagationContext::current().external_customer_id(), Some("cust-1"));

        scope.close();
        assert_eq!(scope.state(), ScopeState::Closed);
        assert!(PropagationContext::current().is_empty());

        scope.close();
        assert_eq!(scope.state(), ScopeState::Closed);
    }

    #[test]
    fn test_drop_detaches_context() {
        {
            let _scope = noop_builder().external_agent_id("agent-1").start();
            assert_eq!(PropagationContext::current().external_agent_id(), Some("agent-1"));
        }
        assert!(PropagationContext::current().is_empty());
    }

    #[test]
    fn test_call_returns_result() {
        let ok: Result<u32, String> = noop_builder().call(|| Ok(7));
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> = noop_builder().call(|| Err("boom".to_string()));
        assert_eq!(err, Err("boom".to_string()));
        assert!(PropagationContext::current().is_empty());
    }

    fn count_leaves(value: &Value) -> usize {
        match value {
            Value::Null => 0,
            Value::Object(map) => map.values().map(count_leaves).sum(),
            _ => 1,
        }
    }

    fn json_tree() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect()))
        })
    }

    proptest! {
        #[test]
        fn prop_flatten_yields_one_key_per_leaf(tree in json_tree()) {
            let root = json!({ "root": tree });
            let builder = noop_builder().metadata_map(&root);
            let attrs = builder.attributes();

            prop_assert_eq!(attrs.len(), count_leaves(&root));
            for key in attrs.keys() {
                prop_assert!(key.starts_with("metadata.root"));
                prop_assert!(!key.contains(".."));
                prop_assert!(!key.ends_with('.'));
            }
        }
    }
}

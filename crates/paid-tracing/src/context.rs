//! Correlation attributes carried alongside the active span
//!
//! A [`PropagationContext`] is an immutable string map stored as a value in
//! the OpenTelemetry [`Context`]. Each trace scope merges its own attributes
//! over the enclosing map and attaches the result, so the map travels with
//! the `Context` wherever it is cloned or moved, including other threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use opentelemetry::Context;

/// Key for the caller's customer identifier
pub const EXTERNAL_CUSTOMER_ID: &str = "external_customer_id";

/// Key for the caller's agent identifier
pub const EXTERNAL_AGENT_ID: &str = "external_agent_id";

/// Prefix applied to user metadata keys
pub const METADATA_PREFIX: &str = "metadata.";

/// Immutable correlation attributes for the current scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationContext {
    entries: Arc<BTreeMap<String, String>>,
}

impl PropagationContext {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// The map attached to the calling thread's current context
    pub fn current() -> Self {
        Self::from_context(&Context::current())
    }

    /// The map carried by `cx`, or an empty map
    pub fn from_context(cx: &Context) -> Self {
        cx.get::<PropagationContext>().cloned().unwrap_or_default()
    }

    /// New map with `overrides` layered on top. Keys in `overrides` win.
    pub fn merged_with(&self, overrides: &BTreeMap<String, String>) -> Self {
        if overrides.is_empty() {
            return self.clone();
        }
        let mut merged = (*self.entries).clone();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::new(merged)
    }

    /// Copy of `cx` carrying this map
    pub fn attach_to(&self, cx: &Context) -> Context {
        cx.with_value(self.clone())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn external_customer_id(&self) -> Option<&str> {
        self.get(EXTERNAL_CUSTOMER_ID)
    }

    pub fn external_agent_id(&self) -> Option<&str> {
        self.get(EXTERNAL_AGENT_ID)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

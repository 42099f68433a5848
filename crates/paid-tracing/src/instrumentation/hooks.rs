//! Client call pipeline contract
//!
//! Instrumented clients run each call through a chain of
//! [`ExecutionInterceptor`]s and hand every hook the same
//! [`ExecutionAttributes`] bag. The before hook may run on the caller's
//! thread while the after or failure hook runs on a transport worker, so
//! anything a hook needs later is stored in the bag rather than on the
//! thread.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use opentelemetry::Context;

/// Per-call storage shared by every hook of one call
pub struct ExecutionAttributes {
    operation_name: String,
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ExecutionAttributes {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            values: HashMap::new(),
        }
    }

    /// Client operation being executed, e.g. `Converse`
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Store a value, returning the previous value of the same type
    pub fn put<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove and return a value
    pub fn take<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for ExecutionAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionAttributes")
            .field("operation_name", &self.operation_name)
            .field("values", &self.values.len())
            .finish()
    }
}

/// Where a call is in its hook sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLifecycle {
    NotStarted,
    BeforeHookRan,
    AfterHookRan,
    FailureHookRan,
    Closed,
}

/// Links the hooks of one call to the span opened for it
#[derive(Debug, Clone)]
pub struct CallCorrelation {
    context: Context,
}

impl CallCorrelation {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    /// Context owning the call span
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn into_context(self) -> Context {
        self.context
    }
}

/// Hooks around one client call
///
/// Implementations must not fail the call: every hook swallows and logs
/// its own problems.
///
/// A span opened by the before hook is stored in the bag as a
/// [`CallCorrelation`] and is not attached to any thread, because a
/// `ContextGuard` cannot leave the thread that created it. Hosts whose
/// transport opens spans of its own attach [`CallCorrelation::context`]
/// around that work so those spans nest under the call span.
pub trait ExecutionInterceptor: Send + Sync {
    type Request;
    type Response;

    fn name(&self) -> &'static str;

    fn before_execution(&self, _request: &Self::Request, _attributes: &mut ExecutionAttributes) {}

    fn after_execution(&self, _response: &Self::Response, _attributes: &mut ExecutionAttributes) {}

    fn on_execution_failure(
        &self,
        _error: &(dyn Error + 'static),
        _attributes: &mut ExecutionAttributes,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn test_put_get_take() {
        let mut attrs = ExecutionAttributes::new("Converse");
        assert_eq!(attrs.operation_name(), "Converse");
        assert!(attrs.get::<Marker>().is_none());

        assert_eq!(attrs.put(Marker(1)), None);
        assert_eq!(attrs.put(Marker(2)), Some(Marker(1)));
        assert_eq!(attrs.get::<Marker>(), Some(&Marker(2)));
        assert!(attrs.contains::<Marker>());

        assert_eq!(attrs.take::<Marker>(), Some(Marker(2)));
        assert_eq!(attrs.take::<Marker>(), None);
    }

    #[test]
    fn test_attributes_move_across_threads() {
        let mut attrs = ExecutionAttributes::new("InvokeModel");
        attrs.put(CallLifecycle::BeforeHookRan);

        let attrs = std::thread::spawn(move || {
            assert_eq!(attrs.get::<CallLifecycle>(), Some(&CallLifecycle::BeforeHookRan));
            attrs
        })
        .join()
        .unwrap();

        assert_eq!(attrs.operation_name(), "InvokeModel");
    }
}

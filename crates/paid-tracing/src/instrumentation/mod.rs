//! Optional client instrumentation
//!
//! Instrumentation for a third-party client is only activated when that
//! client is actually part of the build. An [`InstrumentationLoader`] asks a
//! [`DependencyProbe`] once, caches the answer as an
//! [`InstrumentationState`], and never lets a probe failure reach the host.

pub mod bedrock;
pub mod hooks;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Outcome of an instrumentation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentationState {
    NotAttempted,
    Instrumented,
    SkippedMissingDependency,
    FailedError,
}

impl InstrumentationState {
    fn as_u8(self) -> u8 {
        match self {
            InstrumentationState::NotAttempted => 0,
            InstrumentationState::Instrumented => 1,
            InstrumentationState::SkippedMissingDependency => 2,
            InstrumentationState::FailedError => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => InstrumentationState::Instrumented,
            2 => InstrumentationState::SkippedMissingDependency,
            3 => InstrumentationState::FailedError,
            _ => InstrumentationState::NotAttempted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentationState::NotAttempted => "not_attempted",
            InstrumentationState::Instrumented => "instrumented",
            InstrumentationState::SkippedMissingDependency => "skipped_missing_dependency",
            InstrumentationState::FailedError => "failed_error",
        }
    }
}

impl fmt::Display for InstrumentationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a probe did not find a usable dependency
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The library is not part of this build
    #[error("{0} is not available in this build")]
    Missing(&'static str),

    /// The library is present but could not be set up
    #[error("instrumentation setup failed: {0}")]
    Failed(String),
}

/// Capability check for an optional dependency
#[cfg_attr(test, mockall::automock)]
pub trait DependencyProbe: Send + Sync {
    /// Library the probe looks for
    fn library(&self) -> &'static str;

    /// Check that the library is present and usable
    fn probe(&self) -> Result<(), ProbeError>;
}

/// Resolves instrumentation for one library exactly once
pub struct InstrumentationLoader {
    state: AtomicU8,
    lock: Mutex<()>,
    probe: Box<dyn DependencyProbe>,
}

impl InstrumentationLoader {
    pub fn new(probe: impl DependencyProbe + 'static) -> Self {
        Self {
            state: AtomicU8::new(InstrumentationState::NotAttempted.as_u8()),
            lock: Mutex::new(()),
            probe: Box::new(probe),
        }
    }

    /// Resolve the state on first call and return it.
    ///
    /// Concurrent first callers wait for the one running the probe and then
    /// observe its result. Never fails.
    pub fn instrument(&self) -> InstrumentationState {
        let state = self.state();
        if state != InstrumentationState::NotAttempted {
            return state;
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.state();
        if state != InstrumentationState::NotAttempted {
            return state;
        }

        let library = self.probe.library();
        let resolved = match self.probe.probe() {
            Ok(()) => {
                tracing::info!(
                    library = library,
                    "Instrumentation enabled, the interceptor applies to every client that installs it"
                );
                InstrumentationState::Instrumented
            }
            Err(ProbeError::Missing(_)) => {
                tracing::debug!(library = library, "Library not present, skipping instrumentation");
                InstrumentationState::SkippedMissingDependency
            }
            Err(e) => {
                tracing::error!(library = library, error = %e, "Failed to enable instrumentation");
                InstrumentationState::FailedError
            }
        };

        self.state.store(resolved.as_u8(), Ordering::Release);
        resolved
    }

    /// Current state without attempting anything
    pub fn state(&self) -> InstrumentationState {
        InstrumentationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_instrumented(&self) -> bool {
        self.state() == InstrumentationState::Instrumented
    }

    pub fn library(&self) -> &'static str {
        self.probe.library()
    }
}

impl fmt::Debug for InstrumentationLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationLoader")
            .field("library", &self.library())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn mock_probe(result: Result<(), ProbeError>, times: usize) -> MockDependencyProbe {
        let mut probe = MockDependencyProbe::new();
        probe.expect_library().return_const("test-client");
        probe.expect_probe().times(times).return_const(result);
        probe
    }

    #[test]
    fn test_starts_not_attempted() {
        let loader = InstrumentationLoader::new(mock_probe(Ok(()), 0));
        assert_eq!(loader.state(), InstrumentationState::NotAttempted);
        assert!(!loader.is_instrumented());
    }

    #[test]
    fn test_present_dependency_instruments_once() {
        let loader = InstrumentationLoader::new(mock_probe(Ok(()), 1));
        assert_eq!(loader.instrument(), InstrumentationState::Instrumented);
        assert_eq!(loader.instrument(), InstrumentationState::Instrumented);
        assert!(loader.is_instrumented());
    }

    #[test]
    fn test_missing_dependency_is_skipped() {
        let loader =
            InstrumentationLoader::new(mock_probe(Err(ProbeError::Missing("test-client")), 1));
        assert_eq!(loader.instrument(), InstrumentationState::SkippedMissingDependency);
        assert_eq!(loader.instrument(), InstrumentationState::SkippedMissingDependency);
        assert!(!loader.is_instrumented());
    }

    #[test]
    fn test_probe_failure_is_contained() {
        let loader = InstrumentationLoader::new(mock_probe(
            Err(ProbeError::Failed("bad interceptor registry".to_string())),
            1,
        ));
        assert_eq!(loader.instrument(), InstrumentationState::FailedError);
        assert_eq!(loader.state(), InstrumentationState::FailedError);
    }

    #[test]
    fn test_concurrent_callers_probe_once() {
        let loader = Arc::new(InstrumentationLoader::new(mock_probe(Ok(()), 1)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let loader = Arc::clone(&loader);
                std::thread::spawn(move || loader.instrument())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), InstrumentationState::Instrumented);
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            InstrumentationState::SkippedMissingDependency.to_string(),
            "skipped_missing_dependency"
        );
    }
}

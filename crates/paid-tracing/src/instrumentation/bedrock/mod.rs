//! AWS Bedrock runtime instrumentation
//!
//! Build with the `bedrock` feature to link `aws-sdk-bedrockruntime`. Then
//! call [`instrument`] once at startup and register
//! `sdk::PaidBedrockInterceptor` on the client config. Without the
//! feature, [`instrument`] reports
//! [`InstrumentationState::SkippedMissingDependency`] and the hooks stay
//! inert.

pub mod extract;
pub mod interceptor;
pub mod model;
#[cfg(feature = "bedrock")]
pub mod sdk;

use std::sync::{Arc, OnceLock};

pub use interceptor::BedrockExecutionInterceptor;
#[cfg(feature = "bedrock")]
pub use sdk::PaidBedrockInterceptor;
pub use model::{
    BedrockOperation, BedrockRequest, BedrockResponse, ConverseRequest, ConverseResponse,
    InvokeModelRequest, InvokeModelResponse,
};

use super::{DependencyProbe, InstrumentationLoader, InstrumentationState, ProbeError};

/// Crate name of the AWS Bedrock runtime client
pub const BEDROCK_RUNTIME_LIBRARY: &str = "aws-sdk-bedrockruntime";

/// Reports the runtime client as present when built with `bedrock`, which
/// links it together with [`sdk::PaidBedrockInterceptor`]
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedClientProbe;

impl DependencyProbe for LinkedClientProbe {
    fn library(&self) -> &'static str {
        BEDROCK_RUNTIME_LIBRARY
    }

    fn probe(&self) -> Result<(), ProbeError> {
        if cfg!(feature = "bedrock") {
            Ok(())
        } else {
            Err(ProbeError::Missing(BEDROCK_RUNTIME_LIBRARY))
        }
    }
}

/// Process-wide loader for Bedrock instrumentation
pub fn loader() -> &'static Arc<InstrumentationLoader> {
    static LOADER: OnceLock<Arc<InstrumentationLoader>> = OnceLock::new();
    LOADER.get_or_init(|| Arc::new(InstrumentationLoader::new(LinkedClientProbe)))
}

/// Enable Bedrock instrumentation if the client is available.
///
/// Safe to call any number of times from any thread.
pub fn instrument() -> InstrumentationState {
    loader().instrument()
}

pub fn is_instrumented() -> bool {
    loader().is_instrumented()
}

pub fn state() -> InstrumentationState {
    loader().state()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_follows_feature() {
        let result = LinkedClientProbe.probe();
        if cfg!(feature = "bedrock") {
            assert_eq!(result, Ok(()));
        } else {
            assert_eq!(result, Err(ProbeError::Missing(BEDROCK_RUNTIME_LIBRARY)));
        }
    }

    #[test]
    fn test_global_instrument_is_stable() {
        let first = instrument();
        assert_ne!(first, InstrumentationState::NotAttempted);
        assert_eq!(instrument(), first);
        assert_eq!(state(), first);
        assert_eq!(is_instrumented(), first == InstrumentationState::Instrumented);
    }
}

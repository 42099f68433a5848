//! Pipeline configuration
//!
//! `TracingConfig` holds everything the exporter needs. It can be built
//! explicitly, through [`TracingConfigBuilder`], or resolved from the
//! `PAID_*` environment variables.

use std::fmt;
use std::time::Duration;

use crate::error::{Result, TracingError};

/// Environment variable holding the Paid API key
pub const ENV_API_KEY: &str = "PAID_API_KEY";

/// Environment variable overriding the collector endpoint
pub const ENV_OTEL_ENDPOINT: &str = "PAID_OTEL_COLLECTOR_ENDPOINT";

/// Collector endpoint used when none is configured
pub const DEFAULT_OTEL_ENDPOINT: &str = "https://collector.agentpaid.io:4318/v1/traces";

/// Service name reported on the exported resource
pub const DEFAULT_SERVICE_NAME: &str = "paid-tracing";

const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the telemetry pipeline
#[derive(Clone, PartialEq, Eq)]
pub struct TracingConfig {
    api_key: String,
    endpoint: String,
    service_name: String,
    export_timeout: Duration,
}

impl TracingConfig {
    /// Create a validated config. Empty values are rejected.
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        Self::builder().api_key(api_key).endpoint(endpoint).build()
    }

    /// Create a config builder
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::new()
    }

    /// Resolve config from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve config through an arbitrary variable lookup.
    ///
    /// The API key is required; the endpoint falls back to
    /// [`DEFAULT_OTEL_ENDPOINT`] when unset or blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY)
            .filter(|v| !v.trim().is_empty())
            .ok_or(TracingError::MissingEnvironment(ENV_API_KEY))?;

        let endpoint = lookup(ENV_OTEL_ENDPOINT)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OTEL_ENDPOINT.to_string());

        Self::new(api_key, endpoint)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn export_timeout(&self) -> Duration {
        self.export_timeout
    }

    /// API key with everything but the last four characters hidden
    pub fn masked_api_key(&self) -> String {
        let count = self.api_key.chars().count();
        if count <= 4 {
            return "****".to_string();
        }
        let tail: String = self.api_key.chars().skip(count - 4).collect();
        format!("****{}", tail)
    }
}

impl fmt::Debug for TracingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingConfig")
            .field("api_key", &self.masked_api_key())
            .field("endpoint", &self.endpoint)
            .field("service_name", &self.service_name)
            .field("export_timeout", &self.export_timeout)
            .finish()
    }
}

/// Builder for TracingConfig
#[derive(Debug, Clone)]
pub struct TracingConfigBuilder {
    api_key: String,
    endpoint: String,
    service_name: String,
    export_timeout: Duration,
}

impl TracingConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_OTEL_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
        }
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Set the collector endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the reported service name
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the per-export timeout
    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<TracingConfig> {
        if self.api_key.trim().is_empty() {
            return Err(TracingError::configuration("API key cannot be empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(TracingError::configuration("Collector endpoint cannot be empty"));
        }
        if self.service_name.trim().is_empty() {
            return Err(TracingError::configuration("Service name cannot be empty"));
        }

        Ok(TracingConfig {
            api_key: self.api_key,
            endpoint: self.endpoint,
            service_name: self.service_name,
            export_timeout: self.export_timeout,
        })
    }
}

impl Default for TracingConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_new_validates_input() {
        let err = TracingConfig::new("", DEFAULT_OTEL_ENDPOINT).unwrap_err();
        assert!(err.is_configuration());

        let err = TracingConfig::new("key", "  ").unwrap_err();
        assert!(err.is_configuration());

        let config = TracingConfig::new("key", "http://localhost:4318/v1/traces").unwrap();
        assert_eq!(config.api_key(), "key");
        assert_eq!(config.endpoint(), "http://localhost:4318/v1/traces");
        assert_eq!(config.service_name(), DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn test_from_lookup_requires_api_key() {
        let err = TracingConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err, TracingError::MissingEnvironment(ENV_API_KEY));
    }

    #[test]
    fn test_from_lookup_defaults_endpoint() {
        let config = TracingConfig::from_lookup(lookup_from(&[(ENV_API_KEY, "pk_live")])).unwrap();
        assert_eq!(config.endpoint(), DEFAULT_OTEL_ENDPOINT);

        let config = TracingConfig::from_lookup(lookup_from(&[
            (ENV_API_KEY, "pk_live"),
            (ENV_OTEL_ENDPOINT, ""),
        ]))
        .unwrap();
        assert_eq!(config.endpoint(), DEFAULT_OTEL_ENDPOINT);
    }

    #[test]
    fn test_from_lookup_custom_endpoint() {
        let config = TracingConfig::from_lookup(lookup_from(&[
            (ENV_API_KEY, "pk_live"),
            (ENV_OTEL_ENDPOINT, "http://collector:4318/v1/traces"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint(), "http://collector:4318/v1/traces");
    }

    #[test]
    fn test_builder() {
        let config = TracingConfig::builder()
            .api_key("pk_test")
            .service_name("billing-agent")
            .export_timeout(Duration::from_secs(3))
            .build()
            .unwrap();

        assert_eq!(config.service_name(), "billing-agent");
        assert_eq!(config.export_timeout(), Duration::from_secs(3));
        assert_eq!(config.endpoint(), DEFAULT_OTEL_ENDPOINT);
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = TracingConfig::new("pk_live_123456789", DEFAULT_OTEL_ENDPOINT).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("pk_live_123456789"));
        assert!(debug.contains("****6789"));

        let short = TracingConfig::new("abc", DEFAULT_OTEL_ENDPOINT).unwrap();
        assert_eq!(short.masked_api_key(), "****");
    }
}

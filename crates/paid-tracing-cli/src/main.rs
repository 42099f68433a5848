//! paid-trace entry point
//!
//! Emits Paid signals from scripts and reports how tracing resolves in the
//! current environment.

use std::time::Duration;

use anyhow::{anyhow, Context as _};
use clap::{Parser, Subcommand, ValueEnum};
use paid_tracing::config::{TracingConfig, DEFAULT_OTEL_ENDPOINT, ENV_API_KEY, ENV_OTEL_ENDPOINT};
use paid_tracing::instrumentation::bedrock;
use paid_tracing::logging::{self, LoggingConfig};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "paid-trace")]
#[command(about = "Emit Paid signals and inspect tracing setup")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit a signal inside a trace scope and flush it
    Signal {
        /// Event name recorded on the signal
        #[arg(short, long)]
        event: String,

        /// Flag the signal for cost tracing
        #[arg(long)]
        cost_tracing: bool,

        /// JSON object attached as signal data
        #[arg(long)]
        data: Option<String>,

        /// External customer id for the scope
        #[arg(long)]
        customer_id: Option<String>,

        /// External agent id for the scope
        #[arg(long)]
        agent_id: Option<String>,

        /// Scope metadata as KEY=VALUE, repeatable
        #[arg(long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,

        /// Paid API key
        #[arg(long, env = ENV_API_KEY, hide_env_values = true)]
        api_key: Option<String>,

        /// OTLP/HTTP collector endpoint
        #[arg(long, env = ENV_OTEL_ENDPOINT, default_value = DEFAULT_OTEL_ENDPOINT)]
        endpoint: String,

        /// Maximum time to wait for the export
        #[arg(long, default_value = "5000")]
        flush_timeout_ms: u64,
    },

    /// Show resolved configuration and instrumentation state
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct SignalReport {
    event: String,
    cost_tracing: bool,
    flushed: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    api_key: Option<String>,
    endpoint: Option<String>,
    config_error: Option<String>,
    bedrock_feature: bool,
    bedrock_instrumentation: String,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn main() -> anyhow::Result<()> {
    logging::init_logging_with(LoggingConfig::from_env().with_target(env!("CARGO_CRATE_NAME")))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Signal {
            event,
            cost_tracing,
            data,
            customer_id,
            agent_id,
            metadata,
            api_key,
            endpoint,
            flush_timeout_ms,
        } => {
            let api_key = api_key
                .ok_or_else(|| anyhow!("missing API key: pass --api-key or set {}", ENV_API_KEY))?;
            let data: Option<serde_json::Value> = data
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--data must be valid JSON")?;
            if matches!(&data, Some(value) if !value.is_object()) {
                return Err(anyhow!("--data must be a JSON object"));
            }

            paid_tracing::initialize(&api_key, &endpoint)?;

            let mut scope = paid_tracing::trace();
            if let Some(id) = customer_id {
                scope = scope.external_customer_id(id);
            }
            if let Some(id) = agent_id {
                scope = scope.external_agent_id(id);
            }
            for (key, value) in metadata {
                scope = scope.metadata(key, value);
            }

            scope.run(|| match &data {
                Some(payload) => paid_tracing::signal_with_data(&event, cost_tracing, payload),
                None => paid_tracing::signal_with_cost_tracing(&event, cost_tracing),
            });

            let timeout = Duration::from_millis(flush_timeout_ms);
            let flushed = paid_tracing::flush(timeout);
            paid_tracing::shutdown(timeout);

            tracing::info!(event = %event, flushed, "Signal emitted");
            let report = SignalReport {
                event,
                cost_tracing,
                flushed,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !flushed {
                std::process::exit(1);
            }
        }

        Commands::Status { format } => {
            let resolved = TracingConfig::from_env();
            let state = bedrock::instrument();

            let report = StatusReport {
                api_key: resolved.as_ref().ok().map(|c| c.masked_api_key()),
                endpoint: resolved.as_ref().ok().map(|c| c.endpoint().to_string()),
                config_error: resolved.as_ref().err().map(|e| e.to_string()),
                bedrock_feature: cfg!(feature = "bedrock"),
                bedrock_instrumentation: state.to_string(),
            };

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    match (&report.api_key, &report.endpoint) {
                        (Some(key), Some(endpoint)) => {
                            println!("Configuration: ok");
                            println!("  API key:  {}", key);
                            println!("  Endpoint: {}", endpoint);
                        }
                        _ => {
                            println!("Configuration: unavailable");
                            if let Some(error) = &report.config_error {
                                println!("  {}", error);
                            }
                        }
                    }
                    println!("Bedrock instrumentation: {}", report.bedrock_instrumentation);
                    if !report.bedrock_feature {
                        println!("  (built without the `bedrock` feature)");
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("tier=gold"),
            Ok(("tier".to_string(), "gold".to_string()))
        );
        assert_eq!(
            parse_key_value("expr=a=b"),
            Ok(("expr".to_string(), "a=b".to_string()))
        );
        assert!(parse_key_value("=x").is_err());
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_signal_args() {
        let cli = Cli::try_parse_from([
            "paid-trace",
            "signal",
            "--event",
            "order_completed",
            "--cost-tracing",
            "--metadata",
            "tier=gold",
            "--api-key",
            "pk_test",
        ])
        .unwrap();

        match cli.command {
            Commands::Signal {
                event,
                cost_tracing,
                metadata,
                ..
            } => {
                assert_eq!(event, "order_completed");
                assert!(cost_tracing);
                assert_eq!(metadata, vec![("tier".to_string(), "gold".to_string())]);
            }
            Commands::Status { .. } => panic!("expected signal command"),
        }
    }
}

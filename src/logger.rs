use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{Context, Result};
use bridge_protocol::LogLevel;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub const LOG_FILE: &str = "cardbridge.log";
pub const EVENT_FILE: &str = "cardbridge-requests.json";

/// Install the global subscriber.
///
/// - stderr always gets a human-readable layer filtered by `level`
///   (or `RUST_LOG` when set).
/// - with a `log_dir`, a daily rolling text log and a rolling JSON file that
///   only receives `target: "request"` events are added.
///
/// A second call is a no-op, so tests and embedders can call this freely.
pub fn init_tracing(level: LogLevel, log_dir: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},request=info", level.as_directive())));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false);

    let (file_layer, json_layer) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;

            let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let file_layer = fmt::layer().with_writer(txt_appender).with_ansi(false);

            let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, EVENT_FILE);
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_appender)
                .with_target(true)
                .with_filter(EnvFilter::new("request=info"));
            (Some(file_layer), Some(json_layer))
        }
        None => (None, None),
    };

    let installed = Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(json_layer)
        .try_init()
        .is_ok();

    if installed {
        info!(level = %level, log_dir = ?log_dir, "tracing initialised");
    }
    Ok(())
}

/// Request counters and latency, recorded through the global meter.
///
/// With no meter provider installed these go to the no-op provider, which
/// keeps the call sites identical whether or not an exporter is configured.
pub struct BridgeTelemetry {
    pub requests_started: Counter<u64>,
    pub requests_succeeded: Counter<u64>,
    pub requests_failed: Counter<u64>,
    pub request_latency_ms: Histogram<f64>,
}

static TELEMETRY: OnceLock<BridgeTelemetry> = OnceLock::new();

impl BridgeTelemetry {
    pub fn global() -> &'static BridgeTelemetry {
        TELEMETRY.get_or_init(BridgeTelemetry::new)
    }

    fn new() -> Self {
        let meter = global::meter("cardbridge");

        let requests_started = meter
            .u64_counter("requests_started")
            .with_description("Total tool calls started")
            .build();
        let requests_succeeded = meter.u64_counter("requests_succeeded").build();
        let requests_failed = meter.u64_counter("requests_failed").build();
        let request_latency_ms = meter
            .f64_histogram("request_latency_ms")
            .with_description("Round-trip latency per tool call in ms")
            .with_unit("ms")
            .build();

        Self {
            requests_started,
            requests_succeeded,
            requests_failed,
            request_latency_ms,
        }
    }

    /// Wrap one tool call with metrics and a `target: "request"` JSON event.
    pub async fn instrument_request<F, Fut, T, E>(&self, name: &str, handler: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attrs = [KeyValue::new("operation", name.to_owned())];
        self.requests_started.add(1, &attrs);
        let start = Instant::now();

        let result = handler().await;

        let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
        self.request_latency_ms.record(elapsed, &attrs);

        match &result {
            Ok(_) => {
                self.requests_succeeded.add(1, &attrs);
                info!("tool `{}` succeeded in {:.1} ms", name, elapsed);
            }
            Err(err) => {
                self.requests_failed.add(1, &attrs);
                error!(error = %err, "tool `{}` failed in {:.1} ms", name, elapsed);
            }
        }

        tracing::event!(
            target: "request",
            tracing::Level::INFO,
            request = name,
            latency_ms = elapsed,
            status = if result.is_ok() { "ok" } else { "error" },
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_twice_is_harmless() {
        let dir = tempdir().unwrap();
        init_tracing(LogLevel::Debug, Some(dir.path())).unwrap();
        init_tracing(LogLevel::Info, None).unwrap();
    }

    #[test]
    fn init_creates_missing_log_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("logs").join("bridge");
        init_tracing(LogLevel::Info, Some(&nested)).unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn instrument_passes_result_through() {
        let telemetry = BridgeTelemetry::global();
        let ok: Result<u32, String> = telemetry.instrument_request("ok", || async { Ok(3) }).await;
        assert_eq!(ok, Ok(3));
        let err: Result<u32, String> = telemetry
            .instrument_request("bad", || async { Err("nope".to_string()) })
            .await;
        assert_eq!(err, Err("nope".to_string()));
    }
}

/*!
 * Tracing
 * Subscriber setup and per-operation spans with trace ids
 */

use crate::core::OrchestratorError;
use std::time::Instant;
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Operations slower than this are logged at warn
const SLOW_OPERATION_MS: u128 = 30_000;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - ORCH_TRACE_JSON: Enable JSON output (default: false)
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("ORCH_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
        info!("Structured tracing initialized with JSON output");
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .init();
        info!("Structured tracing initialized");
    }
}

/// Generate a unique trace ID for request correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span around one guarded entry point
///
/// Logs duration and outcome when finished; dropping it unfinished logs
/// the operation as abandoned (e.g. the caller's future was cancelled).
pub struct OperationSpan {
    span: Span,
    start: Instant,
    operation: &'static str,
    trace_id: String,
    finished: bool,
}

impl OperationSpan {
    pub fn new(operation: &'static str, requester: &str, workload: Option<&str>) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::INFO,
            "operation",
            trace_id = %trace_id,
            operation,
            requester,
            workload = workload.unwrap_or(""),
            result = tracing::field::Empty,
            stage = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        );
        {
            let _entered = span.enter();
            debug!(operation, "operation started");
        }
        Self {
            span,
            start: Instant::now(),
            operation,
            trace_id,
            finished: false,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The span, for instrumenting the operation's future
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record the outcome and duration
    pub fn finish<T>(mut self, result: &Result<T, OrchestratorError>) {
        self.finished = true;
        let elapsed_ms = self.start.elapsed().as_millis();
        self.span.record("elapsed_ms", elapsed_ms as u64);
        let _entered = self.span.enter();
        match result {
            Ok(_) => {
                self.span.record("result", "ok");
                if elapsed_ms > SLOW_OPERATION_MS {
                    warn!(operation = self.operation, elapsed_ms = elapsed_ms as u64, slow = true, "slow operation");
                } else {
                    info!(operation = self.operation, elapsed_ms = elapsed_ms as u64, "operation completed");
                }
            }
            Err(e) => {
                self.span.record("result", e.kind());
                self.span.record("stage", e.stage().as_str());
                info!(
                    operation = self.operation,
                    elapsed_ms = elapsed_ms as u64,
                    kind = e.kind(),
                    stage = %e.stage(),
                    error = %e,
                    "operation failed"
                );
            }
        }
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        if !self.finished {
            let _entered = self.span.enter();
            warn!(
                operation = self.operation,
                elapsed_ms = self.start.elapsed().as_millis() as u64,
                "operation abandoned before completion"
            );
        }
    }
}

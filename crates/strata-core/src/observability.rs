//! Observability infrastructure for Strata.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors so every component logs the
//! same fields for the same operations.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `strata_store=debug`)
///
/// # Example
///
/// ```rust
/// use strata_core::observability::{LogFormat, init_logging};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for document-store operations with standard fields.
///
/// # Example
///
/// ```rust
/// use strata_core::observability::store_span;
///
/// let span = store_span("upsert", "blueprint", "project=01HQ3X");
/// let _guard = span.enter();
/// // ... do store operation
/// ```
#[must_use]
pub fn store_span(operation: &str, kind: &str, partition: &str) -> Span {
    tracing::info_span!(
        "document_store",
        op = operation,
        kind = kind,
        partition = partition,
    )
}

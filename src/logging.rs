//! Structured logging for weft
//!
//! Log lines carry structured fields so a run can be followed from scan to
//! cache write:
//!
//! - `resource`: Resource name or alias
//! - `run_id`: Run id of the step being logged
//! - `operation`: Registry or cache operation ("scan", "save", "load", ...)
//! - `status`: Step outcome ("done", "failed", "cached")
//!
//! Logs go to stderr; stdout carries command output only.

use std::{fmt as std_fmt, io};
use tracing_subscriber::fmt::{self, format::Writer, time::FormatTime};
use tracing_subscriber::{prelude::*, EnvFilter};

/// UTC timestamps with millisecond precision, matching run ids and cache entries
struct UtcMillis;

impl FormatTime for UtcMillis {
    fn format_time(&self, w: &mut Writer<'_>) -> std_fmt::Result {
        write!(w, "{}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, for terminals
    Pretty,
    /// Uncolored single line (CI)
    Compact,
    /// JSON lines
    Json,
}

impl LogFormat {
    /// Read `WEFT_LOG_FORMAT`, falling back to compact under `CI`
    pub fn from_env() -> Self {
        Self::parse(
            std::env::var("WEFT_LOG_FORMAT").ok().as_deref(),
            std::env::var("CI").is_ok(),
        )
    }

    fn parse(value: Option<&str>, in_ci: bool) -> Self {
        match value.unwrap_or_default().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if in_ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Install the global subscriber; `RUST_LOG` filters (default `info`)
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_timer(UtcMillis)
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .init(),
        format => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_timer(UtcMillis)
                    .with_target(false)
                    .with_ansi(format == LogFormat::Pretty)
                    .with_writer(io::stderr),
            )
            .init(),
    }
}

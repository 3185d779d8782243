//! Structured logging for the solver.
//!
//! Operators pick the output format with `SOLVER_LOG_FORMAT`
//! (`json`/`pretty`); deployments that only set `RUST_ENV=production`
//! get JSON. The default filter runs the solver crates at debug and
//! everything else at info; `RUST_LOG` overrides it entirely.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Baseline level for third-party crates.
const DEFAULT_LEVEL: &str = "info";

/// Workspace crates raised to debug by the default filter.
const SOLVER_TARGETS: [&str; 10] = [
    "solver_bot",
    "solver_chain",
    "solver_core",
    "solver_hedger",
    "solver_persistence",
    "solver_quoter",
    "solver_relay",
    "solver_risk",
    "solver_telemetry",
    "solver_venue",
];

/// Log record output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    Json,
    /// Human-readable output for development.
    Pretty,
}

impl LogFormat {
    /// Resolve the format from the environment.
    ///
    /// `SOLVER_LOG_FORMAT` wins; otherwise `RUST_ENV=production`
    /// implies JSON and anything else is pretty.
    pub fn from_env() -> Self {
        match std::env::var("SOLVER_LOG_FORMAT").as_deref() {
            Ok("json") => Self::Json,
            Ok("pretty") => Self::Pretty,
            _ => match std::env::var("RUST_ENV").as_deref() {
                Ok("production") => Self::Json,
                _ => Self::Pretty,
            },
        }
    }
}

/// Info everywhere, debug for the solver's own crates.
fn default_filter() -> EnvFilter {
    SOLVER_TARGETS
        .iter()
        .filter_map(|target| format!("{target}=debug").parse::<Directive>().ok())
        .fold(EnvFilter::new(DEFAULT_LEVEL), |filter, directive| {
            filter.add_directive(directive)
        })
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already set, so call it once from `main`.
pub fn init_logging(format: LogFormat) -> TelemetryResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().compact().with_target(true).with_thread_names(true))
            .try_init(),
    };

    installed.map_err(|e| TelemetryError::Init(e.to_string()))
}

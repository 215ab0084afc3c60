mod incidents;

pub use incidents::{Incident, IncidentFilter, IncidentLayer, IncidentLog};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "taskbot_bridge" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Record WARN and ERROR events in the incident database.
    pub persist_incidents: bool,
    pub incident_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            persist_incidents: true,
            incident_db_path: dirs_fallback().join("taskbot-logs.db"),
        }
    }
}

impl TelemetryConfig {
    /// Build a config from a textual level such as `"debug"`. Unknown levels
    /// fall back to INFO.
    pub fn with_level_str(level: &str) -> Self {
        Self {
            log_level: level.parse().unwrap_or(Level::INFO),
            ..Default::default()
        }
    }
}

/// Keeps the incident log reachable after the subscriber is installed.
pub struct TelemetryGuard {
    incidents: Option<Arc<IncidentLog>>,
}

impl TelemetryGuard {
    /// `None` when persistence is disabled or the database failed to open.
    pub fn incidents(&self) -> Option<&IncidentLog> {
        self.incidents.as_deref()
    }
}

/// Build the filter directive string from config.
fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    // JSON formatting layer for stdout
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let incidents = if config.persist_incidents {
        match IncidentLog::open(&config.incident_db_path) {
            Ok(log) => Some(Arc::new(log)),
            Err(e) => {
                // Subscriber is not installed yet.
                eprintln!(
                    "taskbot-telemetry: incident log {} unavailable: {e}",
                    config.incident_db_path.display()
                );
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(incidents.clone().map(IncidentLayer::new))
        .init();

    TelemetryGuard { incidents }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".taskbot")
}

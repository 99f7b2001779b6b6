use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `DISPATCH_EXPRESS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub personalization: PersonalizationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Cadence of the tick that starts due scheduled campaigns.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Per-candidate stagger applied during a scheduling pass to avoid
    /// bursts of simultaneously visible jobs.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Jobs processed concurrently. The pacing state is only safe to
    /// update without extra locking at 1.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonalizationConfig {
    /// Master switch for AI variations; rendering always happens.
    #[serde(default = "default_ai_enabled")]
    pub ai_enabled: bool,
    #[serde(default = "default_ai_timeout_ms")]
    pub ai_timeout_ms: u64,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_stagger_ms() -> u64 {
    250
}
fn default_concurrency() -> usize {
    1
}
fn default_gateway_timeout_ms() -> u64 {
    15_000
}
fn default_ai_enabled() -> bool {
    true
}
fn default_ai_timeout_ms() -> u64 {
    8_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            stagger_ms: default_stagger_ms(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_gateway_timeout_ms(),
        }
    }
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        Self {
            ai_enabled: default_ai_enabled(),
            ai_timeout_ms: default_ai_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            scheduler: SchedulerConfig::default(),
            worker: WorkerConfig::default(),
            gateway: GatewayConfig::default(),
            personalization: PersonalizationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("DISPATCH_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `FUNNEL_EXPRESS__` and serde-level defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<KeywordRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Outbound chat gateway (Evolution-compatible API) connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Named sending endpoints ("instances"), in configured failover order.
    #[serde(default = "default_instances")]
    pub instances: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_media_fetch_timeout_ms")]
    pub media_fetch_timeout_ms: u64,
}

/// Orchestration and delivery tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Pause between a funnel trigger and delivery of step 0.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Bound on waiting for a contact's processing lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_max_attempts_per_endpoint")]
    pub max_attempts_per_endpoint: u32,
    /// Backoff between retries on the same endpoint.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Duration of the typing indicator shown before content steps that
    /// request one.
    #[serde(default = "default_typing_indicator_secs")]
    pub typing_indicator_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

/// A keyword phrase that starts a funnel when matched (case-insensitive
/// substring) against an inbound message.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordRule {
    pub phrase: String,
    pub funnel_id: String,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    3000
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_gateway_base_url() -> String {
    "https://evo.flowzap.fun".to_string()
}
fn default_instances() -> Vec<String> {
    vec!["RM01".to_string()]
}
fn default_request_timeout_ms() -> u64 {
    15_000
}
fn default_media_fetch_timeout_ms() -> u64 {
    30_000
}
fn default_initial_delay_secs() -> u64 {
    60
}
fn default_lock_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts_per_endpoint() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    2_000
}
fn default_typing_indicator_secs() -> u64 {
    3
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_snapshot_interval_secs() -> u64 {
    30
}

fn default_keywords() -> Vec<KeywordRule> {
    [
        ("oi gaby quero te ajudar", "FRASE_CHAVE_1"),
        ("oi gaby não consigo te ajudar", "FRASE_CHAVE_2"),
        ("oi gaby boa noite", "FRASE_CHAVE_3"),
        ("oi gaby td bem", "FRASE_CHAVE_4"),
    ]
    .into_iter()
    .map(|(phrase, funnel_id)| KeywordRule {
        phrase: phrase.to_string(),
        funnel_id: funnel_id.to_string(),
    })
    .collect()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            api_key: String::new(),
            instances: default_instances(),
            request_timeout_ms: default_request_timeout_ms(),
            media_fetch_timeout_ms: default_media_fetch_timeout_ms(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            max_attempts_per_endpoint: default_max_attempts_per_endpoint(),
            retry_backoff_ms: default_retry_backoff_ms(),
            typing_indicator_secs: default_typing_indicator_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            gateway: GatewayConfig::default(),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
            keywords: default_keywords(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("FUNNEL_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.engine.initial_delay_secs, 60);
        assert_eq!(config.engine.max_attempts_per_endpoint, 3);
        assert_eq!(config.engine.retry_backoff_ms, 2_000);
        assert_eq!(config.storage.snapshot_interval_secs, 30);
        assert_eq!(config.gateway.instances, vec!["RM01".to_string()]);
        assert_eq!(config.keywords.len(), 4);
    }

    #[test]
    fn test_default_keywords_map_to_reserved_funnels() {
        for rule in AppConfig::default().keywords {
            assert!(rule.funnel_id.starts_with("FRASE_CHAVE_"));
        }
    }
}

use serde::Deserialize;

/// Root application configuration. Loaded from an optional
/// `config/receipt-rewards` file, then environment variables with the prefix
/// `RECEIPT_REWARDS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fraud: FraudConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Reward validity used when a reward type does not declare its own.
    #[serde(default = "default_validity_days")]
    pub default_validity_days: u32,
    #[serde(default = "default_fallback_code_prefix")]
    pub fallback_code_prefix: String,
    #[serde(default = "default_fallback_code_length")]
    pub fallback_code_length: usize,
    /// Upper bound on voucher CAS retries when racing other claimers.
    #[serde(default = "default_max_claim_attempts")]
    pub max_claim_attempts: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FraudConfig {
    #[serde(default = "default_fraud_enabled")]
    pub enabled: bool,
    /// Adds the receipt total to the fingerprint. Narrows detection.
    #[serde(default)]
    pub include_amount_in_fingerprint: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_validity_days() -> u32 {
    30
}
fn default_fallback_code_prefix() -> String {
    "RW".to_string()
}
fn default_fallback_code_length() -> usize {
    8
}
fn default_max_claim_attempts() -> usize {
    16
}
fn default_fraud_enabled() -> bool {
    true
}
fn default_notification_timeout_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_validity_days: default_validity_days(),
            fallback_code_prefix: default_fallback_code_prefix(),
            fallback_code_length: default_fallback_code_length(),
            max_claim_attempts: default_max_claim_attempts(),
        }
    }
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            enabled: default_fraud_enabled(),
            include_amount_in_fingerprint: false,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_notification_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            engine: EngineConfig::default(),
            fraud: FraudConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config/receipt-rewards")
    }

    /// `file` is a path without extension; any format the `config` crate
    /// recognises is picked up. Environment variables win over the file.
    pub fn load_from(file: &str) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("RECEIPT_REWARDS")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

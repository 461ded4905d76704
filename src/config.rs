use serde::{Deserialize, Serialize};
use std::fs;

use rust_decimal::Decimal;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub escrow: EscrowConfig,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    /// PostgreSQL connection URL; omitted means the in-memory store.
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Staff chat webhook for dispute/resolution notifications.
    #[serde(default)]
    pub staff_webhook_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EscrowConfig {
    /// Default fee rate in percent applied when a request omits one.
    pub fee_percent: Decimal,
    /// "buyer", "seller" or "split".
    pub fee_bearer: String,
    pub dispute_window_hours: i64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            fee_percent: Decimal::new(5, 0),
            fee_bearer: "seller".to_string(),
            dispute_window_hours: 72,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FundingConfig {
    /// Absolute tolerance between the intent amount and the paid amount.
    pub amount_tolerance: Decimal,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: Decimal::new(5, 1),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RiskConfig {
    /// Funded-to-completed turnarounds faster than this raise an alert.
    pub min_turnaround_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_turnaround_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

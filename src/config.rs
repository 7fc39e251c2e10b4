use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub default_currency: String,
    pub min_donation_amount: Decimal,
    pub max_donation_amount: Decimal,
    /// PENDING donations older than this are eligible for the sweep.
    pub stale_pending_secs: u64,
    /// 0 disables the background sweep; reconciliation stays on-demand.
    pub sweep_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT"))?,
            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "KES".to_string()),
            min_donation_amount: decimal_var("MIN_DONATION_AMOUNT", "2")?,
            max_donation_amount: decimal_var("MAX_DONATION_AMOUNT", "1000000")?,
            stale_pending_secs: u64_var("STALE_PENDING_SECS", "3600")?,
            sweep_interval_secs: u64_var("SWEEP_INTERVAL_SECS", "0")?,
        })
    }
}

fn decimal_var(key: &'static str, default: &str) -> Result<Decimal, ConfigError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).map_err(|_| ConfigError::Invalid(key))
}

fn u64_var(key: &'static str, default: &str) -> Result<u64, ConfigError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|_| ConfigError::Invalid(key))
}

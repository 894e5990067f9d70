use crate::domain::{CostBasisMethod, CurrencyCode};
use crate::engine::{PriceServiceSettings, ReplayPolicy};
use crate::orchestration::PortfolioDefaults;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub price_api_url: String,
    pub price_api_key: Option<String>,
    pub default_currency: CurrencyCode,
    pub cost_basis_method: CostBasisMethod,
    pub replay_policy: ReplayPolicy,
    pub current_price_ttl: Duration,
    pub price_fallback_days: u32,
    pub price_fetch_timeout: Duration,
    pub price_history_start: NaiveDate,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let price_api_url = env_map
            .get("PRICE_API_URL")
            .cloned()
            .unwrap_or_else(|| "https://min-api.cryptocompare.com".to_string());

        let price_api_key = env_map
            .get("PRICE_API_KEY")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let default_currency = match env_map.get("DEFAULT_CURRENCY").map(|s| s.trim()) {
            None => CurrencyCode::new("USD"),
            Some(code) if !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric()) => {
                CurrencyCode::new(code)
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "DEFAULT_CURRENCY".to_string(),
                    format!("must be an alphanumeric currency code, got {:?}", other),
                ))
            }
        };

        let cost_basis_method = CostBasisMethod::from_str(
            env_map
                .get("COST_BASIS_METHOD")
                .map(|s| s.as_str())
                .unwrap_or("average"),
        )
        .map_err(|e| ConfigError::InvalidValue("COST_BASIS_METHOD".to_string(), e))?;

        let replay_policy = ReplayPolicy::from_str(
            env_map
                .get("REPLAY_POLICY")
                .map(|s| s.as_str())
                .unwrap_or("halt"),
        )
        .map_err(|e| ConfigError::InvalidValue("REPLAY_POLICY".to_string(), e))?;

        let current_price_ttl =
            Duration::from_secs(parse_number(&env_map, "CURRENT_PRICE_TTL_SECS", 60)?);
        let price_fallback_days = u32::try_from(parse_number(&env_map, "PRICE_FALLBACK_DAYS", 7)?)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "PRICE_FALLBACK_DAYS".to_string(),
                    "must be a valid u32".to_string(),
                )
            })?;
        let price_fetch_timeout =
            Duration::from_secs(parse_number(&env_map, "PRICE_FETCH_TIMEOUT_SECS", 30)?);
        if price_fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PRICE_FETCH_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let price_history_start = NaiveDate::parse_from_str(
            env_map
                .get("PRICE_HISTORY_START")
                .map(|s| s.as_str())
                .unwrap_or("2010-07-17"),
            "%Y-%m-%d",
        )
        .map_err(|_| {
            ConfigError::InvalidValue(
                "PRICE_HISTORY_START".to_string(),
                "must be a YYYY-MM-DD date".to_string(),
            )
        })?;

        Ok(Config {
            port,
            database_path,
            price_api_url,
            price_api_key,
            default_currency,
            cost_basis_method,
            replay_policy,
            current_price_ttl,
            price_fallback_days,
            price_fetch_timeout,
            price_history_start,
        })
    }

    /// Currency and cost-basis method applied to newly created portfolios.
    pub fn portfolio_defaults(&self) -> PortfolioDefaults {
        PortfolioDefaults {
            default_currency: self.default_currency.clone(),
            cost_basis_method: self.cost_basis_method,
        }
    }

    pub fn price_settings(&self) -> PriceServiceSettings {
        PriceServiceSettings {
            history_start: self.price_history_start,
            fallback_days: self.price_fallback_days,
            current_price_ttl: self.current_price_ttl,
            fetch_timeout: self.price_fetch_timeout,
        }
    }
}

fn parse_number(
    env_map: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(s) => s.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a valid u64".to_string())
        }),
    }
}

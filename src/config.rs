//! Runtime configuration.
//!
//! Layered as defaults, then an optional `futuresbot.toml`, then `FUTURESBOT__*`
//! environment variables. Credentials and endpoints are also picked up from
//! their conventional variable names (`OPENAI_API_KEY`, `BINANCE_API_KEY`, ...).

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::Environment as TradeEnvironment;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub market: MarketSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub brokerage: BrokerageSettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub signals: SignalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Unset means the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub base_url: String,
    pub candle_limit: usize,
    pub prompt_window: usize,
    pub timeout_secs: u64,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            candle_limit: 70,
            prompt_window: 35,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
    pub allowed_models: Vec<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            default_model: "gpt-3.5-turbo".to_string(),
            allowed_models: [
                "gpt-3.5-turbo",
                "gpt-4",
                "gpt-4-turbo",
                "gpt-4o",
                "gpt-4o-mini",
                "gpt-4.1",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            max_tokens: 1024,
            timeout_secs: 30,
        }
    }
}

impl LlmSettings {
    /// Requested model if whitelisted, otherwise the default.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested {
            Some(m) if self.allowed_models.iter().any(|a| a == m) => m.to_string(),
            _ => self.default_model.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Endpoint and credentials for one exchange environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerageEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
}

impl BrokerageEndpoint {
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.api_key, &self.secret_key),
            (Some(k), Some(s)) if !k.is_empty() && !s.is_empty()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerageSettings {
    pub live: BrokerageEndpoint,
    pub testnet: BrokerageEndpoint,
    pub timeout_secs: u64,
}

impl Default for BrokerageSettings {
    fn default() -> Self {
        Self {
            live: BrokerageEndpoint {
                base_url: "https://fapi.binance.com".to_string(),
                ..Default::default()
            },
            testnet: BrokerageEndpoint {
                base_url: "https://testnet.binancefuture.com".to_string(),
                ..Default::default()
            },
            timeout_secs: 10,
        }
    }
}

impl BrokerageSettings {
    pub fn endpoint(&self, env: TradeEnvironment) -> &BrokerageEndpoint {
        match env {
            TradeEnvironment::Live => &self.live,
            TradeEnvironment::Testnet => &self.testnet,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub risk_fraction: f64,
    pub default_leverage: u32,
    pub quote_asset: String,
    pub mock_success_rate: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_fraction: 0.2,
            default_leverage: 20,
            quote_asset: "USDT".to_string(),
            mock_success_rate: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub default_timeframe: String,
    pub list_limit: usize,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            default_timeframe: "1h".to_string(),
            list_limit: 50,
        }
    }
}

impl Settings {
    /// Load `.env`, an optional config file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        builder = match path {
            Some(p) => builder.add_source(File::from(p).required(true)),
            None => builder.add_source(File::with_name("futuresbot").required(false)),
        };
        let config = builder
            .add_source(
                Environment::with_prefix("FUTURESBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_conventional_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Fill unset values from the well-known variable names.
    pub fn apply_conventional_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.database.url.is_none() {
            self.database.url = non_empty("DATABASE_URL");
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = non_empty("OPENAI_API_KEY");
        }
        if let Some(url) = non_empty("BINANCE_MAINNET_URL") {
            self.market.base_url = url.clone();
            self.brokerage.live.base_url = url;
        }
        if let Some(url) = non_empty("BINANCE_TESTNET_URL") {
            self.brokerage.testnet.base_url = url;
        }
        if self.brokerage.live.api_key.is_none() {
            self.brokerage.live.api_key = non_empty("BINANCE_API_KEY");
        }
        if self.brokerage.live.secret_key.is_none() {
            self.brokerage.live.secret_key = non_empty("BINANCE_SECRET_KEY");
        }
        if self.brokerage.testnet.api_key.is_none() {
            self.brokerage.testnet.api_key = non_empty("BINANCE_TESTNET_API_KEY");
        }
        if self.brokerage.testnet.secret_key.is_none() {
            self.brokerage.testnet.secret_key = non_empty("BINANCE_TESTNET_SECRET_KEY");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.market.candle_limit, 70);
        assert_eq!(s.market.prompt_window, 35);
        assert_eq!(s.risk.risk_fraction, 0.2);
        assert_eq!(s.risk.default_leverage, 20);
        assert_eq!(s.llm.default_model, "gpt-3.5-turbo");
        assert_eq!(s.signals.default_timeframe, "1h");
        assert!(!s.brokerage.live.has_credentials());
    }

    #[test]
    fn test_resolve_model_whitelist() {
        let llm = LlmSettings::default();
        assert_eq!(llm.resolve_model(Some("gpt-4o")), "gpt-4o");
        assert_eq!(llm.resolve_model(Some("davinci")), "gpt-3.5-turbo");
        assert_eq!(llm.resolve_model(None), "gpt-3.5-turbo");
    }

    #[test]
    fn test_conventional_env_fills_credentials() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("BINANCE_TESTNET_API_KEY", "tk"),
            ("BINANCE_TESTNET_SECRET_KEY", "ts"),
            ("BINANCE_TESTNET_URL", "http://localhost:9999"),
            ("BINANCE_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        let mut s = Settings::default();
        s.apply_conventional_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(s.llm.api_key.as_deref(), Some("sk-test"));
        assert!(s.brokerage.testnet.has_credentials());
        assert_eq!(s.brokerage.testnet.base_url, "http://localhost:9999");
        assert!(s.brokerage.live.api_key.is_none());
        assert_eq!(
            s.brokerage.endpoint(TradeEnvironment::Testnet).api_key.as_deref(),
            Some("tk")
        );
    }
}

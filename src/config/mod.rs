use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::engine::BacktestConfig;
use crate::regime::RegimeThresholds;
use crate::risk::RiskConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Full application configuration. Every section has working defaults, so a
/// config file only needs to override what differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backtest: BacktestConfig,
    pub risk: RiskConfig,
    pub regime: RegimeThresholds,
    pub report_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backtest: BacktestConfig::default(),
            risk: RiskConfig::default(),
            regime: RegimeThresholds::default(),
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&raw)?;
        config.validate().map_err(ConfigError::Invalid)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Collect every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.backtest.initial_capital <= rust_decimal::Decimal::ZERO {
            errors.push("backtest.initial_capital must be positive".to_string());
        }
        if self.backtest.fee_rate < rust_decimal::Decimal::ZERO
            || self.backtest.fee_rate >= rust_decimal::Decimal::ONE
        {
            errors.push("backtest.fee_rate must be in [0, 1)".to_string());
        }
        if self.backtest.slippage_rate < rust_decimal::Decimal::ZERO
            || self.backtest.slippage_rate >= rust_decimal::Decimal::ONE
        {
            errors.push("backtest.slippage_rate must be in [0, 1)".to_string());
        }
        if self.backtest.base_trade_pct <= 0.0 || self.backtest.base_trade_pct > 100.0 {
            errors.push("backtest.base_trade_pct must be in (0, 100]".to_string());
        }

        if !(0.0..100.0).contains(&self.risk.min_eur_reserve_pct) {
            errors.push("risk.min_eur_reserve_pct must be in [0, 100)".to_string());
        }
        if self.risk.max_trade_pct <= 0.0 || self.risk.max_trade_pct > 100.0 {
            errors.push("risk.max_trade_pct must be in (0, 100]".to_string());
        }
        if self.risk.min_trade_eur <= rust_decimal::Decimal::ZERO {
            errors.push("risk.min_trade_eur must be positive".to_string());
        }
        if self.risk.max_trades_per_day == 0 {
            errors.push("risk.max_trades_per_day must be at least 1".to_string());
        }
        if self.risk.min_trade_spacing_secs < 0 {
            errors.push("risk.min_trade_spacing_secs must not be negative".to_string());
        }
        if self.risk.rebalance.min_eur_pct >= self.risk.rebalance.max_asset_pct {
            errors.push(
                "risk.rebalance.min_eur_pct must be below risk.rebalance.max_asset_pct".to_string(),
            );
        }

        let r = &self.regime;
        for (name, value) in [
            ("regime.trend_24h_pct", r.trend_24h_pct),
            ("regime.trend_5d_pct", r.trend_5d_pct),
            ("regime.volatile_width_pct", r.volatile_width_pct),
            ("regime.range_24h_pct", r.range_24h_pct),
            ("regime.range_width_pct", r.range_width_pct),
            ("regime.extreme_width_pct", r.extreme_width_pct),
            ("regime.default_width_pct", r.default_width_pct),
        ] {
            if value <= 0.0 || !value.is_finite() {
                errors.push(format!("{} must be positive and finite", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

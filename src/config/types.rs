//! Configuration types loaded from YAML

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path of the persistent state snapshot
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Strategy module configuration
    pub strategy: StrategyConfig,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/state.json")
}

/// Moving-average-crossover strategy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Module identifier (e.g., "ma_cross")
    pub id: String,
    /// Pairs the strategy evaluates (e.g., "BTC-USD")
    pub pairs: Vec<String>,
    /// Fast moving-average window (ticks)
    pub fast_ma: usize,
    /// Slow moving-average window (ticks)
    pub slow_ma: usize,
    /// Ticks below this volume are ignored
    #[serde(default)]
    pub min_volume: f64,
    /// Minimum signal strength to act on a buy crossover
    pub entry_threshold: f64,
    /// Minimum signal strength to act on a sell crossover
    pub exit_threshold: f64,
    /// Fraction of account value risked per order
    pub risk_per_trade: f64,
    /// Seconds a published signal stays readable in the state store
    #[serde(default = "default_signal_ttl_secs")]
    pub signal_ttl_secs: u64,
}

fn default_signal_ttl_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        self.strategy.validate()
    }
}

impl StrategyConfig {
    /// Validate strategy configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::Config("Strategy id cannot be empty".to_string()));
        }

        if self.pairs.is_empty() {
            return Err(AppError::Config(format!(
                "Strategy '{}': at least one pair is required",
                self.id
            )));
        }

        if self.fast_ma == 0 || self.slow_ma == 0 {
            return Err(AppError::Config(format!(
                "Strategy '{}': moving-average windows must be >= 1",
                self.id
            )));
        }

        // Rule: fast window must be shorter than slow window
        if self.fast_ma >= self.slow_ma {
            return Err(AppError::Config(format!(
                "Strategy '{}': fast_ma ({}) must be < slow_ma ({})",
                self.id, self.fast_ma, self.slow_ma
            )));
        }

        if self.min_volume < 0.0 {
            return Err(AppError::Config(format!(
                "Strategy '{}': min_volume must be >= 0, got {}",
                self.id, self.min_volume
            )));
        }

        if self.entry_threshold <= 0.0 || self.exit_threshold <= 0.0 {
            return Err(AppError::Config(format!(
                "Strategy '{}': entry/exit thresholds must be > 0",
                self.id
            )));
        }

        // Rule: risk per trade is a fraction of account value
        if self.risk_per_trade <= 0.0 || self.risk_per_trade >= 1.0 {
            return Err(AppError::Config(format!(
                "Strategy '{}': risk_per_trade must be in (0, 1), got {}",
                self.id, self.risk_per_trade
            )));
        }

        Ok(())
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::GoodType;

// ============================================================================
// Market
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Remaining amounts at or below this count as exhausted
    pub amount_epsilon: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            amount_epsilon: 1e-9,
        }
    }
}

impl MarketConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.amount_epsilon <= 0.0 || config.amount_epsilon.is_nan() {
            return Err(ConfigError::NotPositive {
                field: "amount_epsilon",
                value: config.amount_epsilon,
            });
        }
        Ok(config)
    }
}

// ============================================================================
// Statistical Office - price observation and the price index basket
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalOfficeConfig {
    /// Days of snapshots kept for averaging
    pub logged_periods: usize,
    pub snapshots_per_day: usize,
    /// Basket weights of the price index, must sum to 1.0
    pub price_index_weights: HashMap<GoodType, f64>,
}

impl Default for StatisticalOfficeConfig {
    fn default() -> Self {
        // Labour hours stay out of the basket: wages react to production, not to credit.
        let price_index_weights = HashMap::from([
            (GoodType::MegaCalorie, 0.4),
            (GoodType::Kilowatt, 0.2),
            (GoodType::Car, 0.2),
            (GoodType::RealEstate, 0.2),
        ]);
        Self {
            logged_periods: 3,
            snapshots_per_day: 4,
            price_index_weights,
        }
    }
}

impl StatisticalOfficeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum: f64 = self.price_index_weights.values().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(ConfigError::WeightSum(sum));
        }
        if self.logged_periods == 0 {
            return Err(ConfigError::NotPositive {
                field: "logged_periods",
                value: 0.0,
            });
        }
        if self.snapshots_per_day == 0 {
            return Err(ConfigError::NotPositive {
                field: "snapshots_per_day",
                value: 0.0,
            });
        }
        Ok(())
    }

    pub fn weight(&self, good: GoodType) -> f64 {
        self.price_index_weights.get(&good).copied().unwrap_or(0.0)
    }

    /// Number of snapshot slots kept per good type
    pub fn buffer_len(&self) -> usize {
        self.logged_periods * self.snapshots_per_day
    }
}

// ============================================================================
// Central Bank - key interest rate rule
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralBankConfig {
    pub target_price_index: f64,
    /// Yearly inflation target, e.g. 0.02
    pub inflation_target: f64,
    pub base_key_interest_rate: f64,
    pub allow_negative_key_interest_rate: bool,
}

impl Default for CentralBankConfig {
    fn default() -> Self {
        Self {
            target_price_index: 10.0,
            inflation_target: 0.02,
            base_key_interest_rate: 0.03,
            allow_negative_key_interest_rate: false,
        }
    }
}

impl CentralBankConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.target_price_index <= 0.0 || config.target_price_index.is_nan() {
            return Err(ConfigError::NotPositive {
                field: "target_price_index",
                value: config.target_price_index,
            });
        }
        Ok(config)
    }
}

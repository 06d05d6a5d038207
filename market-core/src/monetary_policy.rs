//! Key interest rate rule of the central bank.
//!
//! The price index target grows with the inflation target over simulated time.
//! The rate moves away from the base rate by a tenth of the relative deviation of
//! the observed price index from that target.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::config::CentralBankConfig;

/// Position in simulated time, counted from the start of the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Tsify)]
#[tsify(from_wasm_abi)]
pub struct SimulationDate {
    /// Whole years since the start
    pub year_offset: u32,
    /// 1-based
    pub month_in_year: u32,
    /// 1-based
    pub day_in_month: u32,
}

impl SimulationDate {
    pub fn new(year_offset: u32, month_in_year: u32, day_in_month: u32) -> Self {
        Self {
            year_offset,
            month_in_year,
            day_in_month,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyInterestRatePolicy {
    pub config: CentralBankConfig,
}

impl KeyInterestRatePolicy {
    pub fn new(config: CentralBankConfig) -> Self {
        Self { config }
    }

    fn monthly_inflation(&self) -> f64 {
        (1.0 + self.config.inflation_target).powf(1.0 / 12.0) - 1.0
    }

    /// Price index the central bank aims for on `date`
    pub fn target_price_index(&self, date: SimulationDate) -> f64 {
        let yearly = self.config.inflation_target;
        let monthly = self.monthly_inflation();
        let months = date.month_in_year.saturating_sub(1) as i32;

        let year_factor = (1.0 + yearly).powi(date.year_offset as i32);
        let month_factor = (1.0 + monthly).powi(months) - 1.0;
        let day_factor = monthly / 30.0 * date.day_in_month as f64;

        self.config.target_price_index * (year_factor + month_factor + day_factor)
    }

    /// Rate for the coming period given the observed `price_index`.
    ///
    /// An undefined index keeps `previous`. Without negative rates the result is
    /// floored at zero.
    pub fn effective_key_interest_rate(
        &self,
        price_index: f64,
        date: SimulationDate,
        previous: f64,
    ) -> f64 {
        let target = self.target_price_index(date);
        let deviation = (price_index - target) / price_index;
        let mut rate = self.config.base_key_interest_rate + deviation / 10.0;

        if !rate.is_finite() {
            rate = previous;
        } else if !self.config.allow_negative_key_interest_rate {
            rate = rate.max(0.0);
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "key_interest_rate",
            price_index = price_index,
            target_price_index = target,
            key_interest_rate = rate,
        );

        rate
    }
}

//! Statistical office: observes spot prices and publishes a price index.
//!
//! Snapshots are taken several times per day since the book changes over a day.
//! Averages weight recent snapshots higher; the index is a weighted basket of
//! those averages.

use std::collections::{HashMap, VecDeque};

use crate::config::StatisticalOfficeConfig;
use crate::market::MarketService;
use crate::types::{Currency, GoodType, Price};

#[derive(Debug, Clone)]
pub struct StatisticalOffice {
    pub currency: Currency,
    pub config: StatisticalOfficeConfig,
    /// Newest first, at most `config.buffer_len()` entries per good
    snapshots: HashMap<GoodType, VecDeque<Price>>,
    average_prices: HashMap<GoodType, Price>,
    price_index: f64,
}

impl StatisticalOffice {
    pub fn new(currency: Currency, config: StatisticalOfficeConfig) -> Self {
        let len = config.buffer_len();
        let snapshots = GoodType::all()
            .map(|good| (good, VecDeque::with_capacity(len)))
            .collect();
        let average_prices = GoodType::all().map(|good| (good, f64::NAN)).collect();
        Self {
            currency,
            config,
            snapshots,
            average_prices,
            price_index: f64::NAN,
        }
    }

    /// Record the current spot price of every good type. Goods without a market keep
    /// their older snapshots.
    pub fn take_snapshot(&mut self, market: &MarketService) {
        for (good, price) in market.get_prices(self.currency) {
            self.record(good, price);
        }
    }

    /// Record one observed price, ignoring `NaN` and infinite values
    pub fn record(&mut self, good: GoodType, price: Price) {
        if !price.is_finite() {
            return;
        }
        let len = self.config.buffer_len();
        let buffer = self.snapshots.entry(good).or_default();
        buffer.push_front(price);
        buffer.truncate(len);

        #[cfg(feature = "instrument")]
        {
            let label = format!("{good:?}");
            tracing::info!(
                target: "price_snapshot",
                currency = self.currency.iso4217_code(),
                good = label.as_str(),
                price = price,
            );
        }
    }

    /// Age-weighted mean of each good's snapshots: slot `i` (0 = newest) weighs
    /// `buffer_len - i`. Zero prices do not count. A good never observed averages `NaN`.
    pub fn recalculate_average_prices(&mut self) {
        let len = self.config.buffer_len();
        for (good, buffer) in &self.snapshots {
            let mut weighted_sum = 0.0;
            let mut total_weight = 0.0;
            for (i, price) in buffer.iter().enumerate() {
                if *price == 0.0 || !price.is_finite() {
                    continue;
                }
                let weight = (len - i) as f64;
                weighted_sum += price * weight;
                total_weight += weight;
            }
            self.average_prices
                .insert(*good, weighted_sum / total_weight);
        }
    }

    /// Weighted sum of average prices over the basket. Goods without an average are
    /// skipped; `NaN` if none has one.
    pub fn recalculate_price_index(&mut self) {
        let mut index = f64::NAN;
        for (good, weight) in &self.config.price_index_weights {
            let contribution = weight * self.average_marginal_price(*good);
            if !contribution.is_finite() {
                continue;
            }
            index = if index.is_nan() {
                contribution
            } else {
                index + contribution
            };
        }
        self.price_index = index;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "price_index",
            currency = self.currency.iso4217_code(),
            price_index = index,
        );
    }

    pub fn price_index(&self) -> f64 {
        self.price_index
    }

    pub fn average_marginal_price(&self, good: GoodType) -> Price {
        self.average_prices.get(&good).copied().unwrap_or(f64::NAN)
    }

    pub fn snapshots(&self, good: GoodType) -> impl Iterator<Item = &Price> {
        self.snapshots.get(&good).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office() -> StatisticalOffice {
        let config = StatisticalOfficeConfig {
            logged_periods: 1,
            snapshots_per_day: 3,
            price_index_weights: HashMap::from([
                (GoodType::MegaCalorie, 0.5),
                (GoodType::Kilowatt, 0.5),
            ]),
        };
        StatisticalOffice::new(Currency::Euro, config)
    }

    #[test]
    fn test_newer_snapshots_weigh_more() {
        let mut office = office();
        office.record(GoodType::MegaCalorie, 1.0);
        office.record(GoodType::MegaCalorie, 4.0);
        office.recalculate_average_prices();

        // 4.0 * 3 + 1.0 * 2 over weights 5
        let avg = office.average_marginal_price(GoodType::MegaCalorie);
        assert!((avg - 14.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_buffer_drops_oldest() {
        let mut office = office();
        for price in [1.0, 2.0, 3.0, 4.0] {
            office.record(GoodType::Kilowatt, price);
        }
        let kept: Vec<f64> = office.snapshots(GoodType::Kilowatt).copied().collect();
        assert_eq!(kept, vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_missing_prices_are_skipped() {
        let mut office = office();
        office.record(GoodType::Kilowatt, f64::NAN);
        office.record(GoodType::Kilowatt, f64::INFINITY);
        assert_eq!(office.snapshots(GoodType::Kilowatt).count(), 0);

        office.recalculate_average_prices();
        office.recalculate_price_index();
        assert!(office.average_marginal_price(GoodType::Kilowatt).is_nan());
        assert!(office.price_index().is_nan());
    }

    #[test]
    fn test_price_index_uses_available_goods() {
        let mut office = office();
        office.record(GoodType::MegaCalorie, 2.0);
        office.recalculate_average_prices();
        office.recalculate_price_index();
        assert!((office.price_index() - 1.0).abs() < 1e-12);

        office.record(GoodType::Kilowatt, 6.0);
        office.recalculate_average_prices();
        office.recalculate_price_index();
        assert!((office.price_index() - 4.0).abs() < 1e-12);
    }
}

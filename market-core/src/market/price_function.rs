//! Price functions derived from an order book snapshot.
//!
//! Buying `x` units cheapest-first costs a piecewise linear, continuous amount.
//! Dividing by `x` gives the average price: on the interval of offer `i`,
//! `price(x) = p_i + (C(a_{i-1}) - p_i * a_{i-1}) / x`, a hyperbola that meets its
//! neighbours at every boundary.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use super::offer::OfferArena;
use super::order_book::OrderBook;
use crate::types::{Amount, Price};

/// Boundaries closer than this are the same boundary.
const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// One interval of the analytical average-price function.
///
/// For `x` in `(interval_left_boundary, interval_right_boundary]`,
/// `price(x) = coefficient_x_power_0 + coefficient_x_power_minus_1 / x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct PriceFunctionConfig {
    pub interval_left_boundary: f64,
    pub interval_right_boundary: f64,
    pub coefficient_x_power_0: f64,
    pub coefficient_x_power_minus_1: f64,
}

impl PriceFunctionConfig {
    pub fn price_at(&self, x: Amount) -> Price {
        self.coefficient_x_power_0 + self.coefficient_x_power_minus_1 / x
    }
}

/// Amount available at one price, in book order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceStep {
    pub price: Price,
    pub amount: Amount,
}

/// Immutable snapshot of a book's offers as price steps.
///
/// Queries never touch the book, so they cannot mutate it and repeat identically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketPriceFunction {
    steps: Vec<PriceStep>,
    total_amount: Amount,
}

impl MarketPriceFunction {
    pub fn from_book(book: &OrderBook, offers: &OfferArena) -> Self {
        Self::from_sorted_steps(
            book.iter(offers)
                .map(|(_, o)| PriceStep {
                    price: o.price_per_unit,
                    amount: o.remaining_amount,
                })
                .collect(),
        )
    }

    /// Build from `(amount, price)` pairs in any order. Equal prices keep their relative order.
    pub fn from_offers(offers: &[(Amount, Price)]) -> Self {
        let mut steps: Vec<PriceStep> = offers
            .iter()
            .map(|&(amount, price)| PriceStep { price, amount })
            .collect();
        steps.sort_by(|a, b| a.price.total_cmp(&b.price));
        Self::from_sorted_steps(steps)
    }

    fn from_sorted_steps(steps: Vec<PriceStep>) -> Self {
        let total_amount = steps.iter().map(|s| s.amount).sum();
        Self {
            steps,
            total_amount,
        }
    }

    pub fn steps(&self) -> &[PriceStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    fn out_of_range(&self, amount: Amount) -> bool {
        self.steps.is_empty()
            || amount.is_nan()
            || amount < 0.0
            || amount > self.total_amount + BOUNDARY_TOLERANCE * self.total_amount.max(1.0)
    }

    /// Price of the single cheapest offer, `NaN` without offers
    pub fn spot_price(&self) -> Price {
        self.steps.first().map_or(f64::NAN, |s| s.price)
    }

    /// Money needed to buy `amount` units cheapest-first, `NaN` beyond market depth
    pub fn total_cost(&self, amount: Amount) -> f64 {
        if self.out_of_range(amount) {
            return f64::NAN;
        }
        let mut bought = 0.0;
        let mut cost = 0.0;
        for step in &self.steps {
            if bought >= amount {
                break;
            }
            let take = step.amount.min(amount - bought);
            cost += take * step.price;
            bought += take;
        }
        cost
    }

    /// Average price per unit when buying `amount` units cheapest-first.
    ///
    /// At zero this is the spot price (the limit of the average from the right).
    pub fn get_price(&self, amount: Amount) -> Price {
        if self.out_of_range(amount) {
            return f64::NAN;
        }
        if amount == 0.0 {
            return self.spot_price();
        }
        self.total_cost(amount) / amount
    }

    /// Price of the unit bought at cumulative level `amount`.
    ///
    /// Left-continuous: on `(a_{i-1}, a_i]` this is `p_i`, so at a boundary the
    /// offer just exhausted still sets the price. At zero this is the spot price,
    /// the price of the first unit.
    pub fn get_marginal_price(&self, amount: Amount) -> Price {
        if self.out_of_range(amount) {
            return f64::NAN;
        }
        let mut boundary = 0.0;
        for step in &self.steps {
            boundary += step.amount;
            if amount <= boundary + BOUNDARY_TOLERANCE * boundary.max(1.0) {
                return step.price;
            }
        }
        // Within tolerance past the last boundary
        self.steps.last().map_or(f64::NAN, |s| s.price)
    }

    /// Analytical intervals of the average-price function for the part of the book
    /// affordable with `max_budget` (`NaN` = unbounded). The last interval is cut
    /// at the budget if the budget runs out inside it.
    pub fn get_analytical_price_function_parameters(
        &self,
        max_budget: f64,
    ) -> Vec<PriceFunctionConfig> {
        let budget = if max_budget.is_nan() {
            f64::INFINITY
        } else {
            max_budget
        };

        let mut configs = Vec::with_capacity(self.steps.len());
        let mut left = 0.0;
        let mut cost_at_left = 0.0;

        for step in &self.steps {
            let budget_left = budget - cost_at_left;
            if step.price > 0.0 && budget_left <= 0.0 {
                break;
            }
            let affordable = if step.price > 0.0 {
                budget_left / step.price
            } else {
                f64::INFINITY
            };
            let width = step.amount.min(affordable);
            if width <= BOUNDARY_TOLERANCE {
                break;
            }

            configs.push(PriceFunctionConfig {
                interval_left_boundary: left,
                interval_right_boundary: left + width,
                coefficient_x_power_0: step.price,
                coefficient_x_power_minus_1: cost_at_left - step.price * left,
            });

            if width < step.amount {
                break;
            }
            left += step.amount;
            cost_at_left += step.amount * step.price;
        }

        configs
    }
}

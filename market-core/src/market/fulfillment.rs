//! Cheapest-first selection of offers for one purchase request.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use super::offer::OfferArena;
use super::order_book::OrderBook;
use crate::types::{AgentId, Amount, OfferId, Price};

/// Limits of one purchase. `NaN` leaves a limit unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct PurchaseLimits {
    pub max_amount: Amount,
    /// Budget for the whole purchase
    pub max_total_price: f64,
    /// Price ceiling; offers above it are never touched
    pub max_price_per_unit: Price,
}

impl Default for PurchaseLimits {
    fn default() -> Self {
        Self {
            max_amount: f64::NAN,
            max_total_price: f64::NAN,
            max_price_per_unit: f64::NAN,
        }
    }
}

impl PurchaseLimits {
    pub fn new(max_amount: Amount, max_total_price: f64, max_price_per_unit: Price) -> Self {
        Self {
            max_amount,
            max_total_price,
            max_price_per_unit,
        }
    }

    /// Buy up to `amount` units with no budget or price limit
    pub fn amount(amount: Amount) -> Self {
        Self {
            max_amount: amount,
            ..Self::default()
        }
    }

    /// Spend up to `budget` with no amount or price limit
    pub fn budget(budget: f64) -> Self {
        Self {
            max_total_price: budget,
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.max_total_price = budget;
        self
    }

    pub fn with_price_ceiling(mut self, ceiling: Price) -> Self {
        self.max_price_per_unit = ceiling;
        self
    }
}

fn bound(limit: f64) -> f64 {
    if limit.is_nan() { f64::INFINITY } else { limit }
}

/// The part of one offer drawn by a purchase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub offer: OfferId,
    pub seller: AgentId,
    pub amount: Amount,
    pub price_per_unit: Price,
}

impl Fill {
    pub fn cost(&self) -> f64 {
        self.amount * self.price_per_unit
    }
}

/// Offers selected for one purchase, cheapest first, with the amount drawn from each
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentSet {
    pub fills: Vec<Fill>,
}

impl FulfillmentSet {
    pub fn len(&self) -> usize {
        self.fills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fill> {
        self.fills.iter()
    }

    pub fn total_amount(&self) -> Amount {
        self.fills.iter().map(|f| f.amount).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.fills.iter().map(Fill::cost).sum()
    }

    /// Amount drawn from one offer, zero if it was not selected
    pub fn amount_for(&self, offer: OfferId) -> Amount {
        self.fills
            .iter()
            .filter(|f| f.offer == offer)
            .map(|f| f.amount)
            .sum()
    }
}

/// Walk the book cheapest-first, taking offers until the amount is reached, the
/// budget is spent, or the next offer is above the price ceiling. The last offer
/// taken may be drawn partially. Discrete commodities are only drawn in whole units.
///
/// Reads the book without mutating it; the same book and limits give the same set.
pub fn find_best_fulfillment_set(
    book: &OrderBook,
    offers: &OfferArena,
    limits: &PurchaseLimits,
    epsilon: Amount,
) -> FulfillmentSet {
    let max_amount = bound(limits.max_amount);
    let budget = bound(limits.max_total_price);
    let ceiling = bound(limits.max_price_per_unit);
    let discrete = book.tradeable.commodity.is_discrete();

    let mut set = FulfillmentSet::default();
    let mut bought = 0.0;
    let mut spent = 0.0;

    for (id, offer) in book.iter(offers) {
        if offer.price_per_unit > ceiling {
            break;
        }
        let amount_left = max_amount - bought;
        let budget_left = budget - spent;
        if amount_left <= epsilon {
            break;
        }
        // Free offers fit any budget, even a spent one
        if offer.price_per_unit > 0.0 && budget_left <= epsilon {
            break;
        }

        let affordable = if offer.price_per_unit > 0.0 {
            budget_left / offer.price_per_unit
        } else {
            f64::INFINITY
        };
        let mut take = offer.remaining_amount.min(amount_left).min(affordable);
        if discrete {
            take = (take + epsilon).floor().min(offer.remaining_amount);
        }
        if take <= epsilon {
            break;
        }

        set.fills.push(Fill {
            offer: id,
            seller: offer.owner,
            amount: take,
            price_per_unit: offer.price_per_unit,
        });
        bought += take;
        spent += take * offer.price_per_unit;

        // Drawn partially: a limit bound inside this offer
        if take < offer.remaining_amount {
            break;
        }
    }

    set
}

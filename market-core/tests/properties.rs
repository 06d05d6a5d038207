//! Property tests over seeded random order books
//!
//! These check the contracts of the price functions and of the fulfillment
//! selection for any book, not just hand-picked scenarios.

use market_core::{
    AgentId, Currency, GoodType, InMemoryBank, MarketPriceFunction, MarketService, PurchaseLimits,
};
use rand::{Rng, SeedableRng};

const GOOD: GoodType = GoodType::Wheat;
const SEEDS: std::ops::Range<u64> = 0..50;
const TOLERANCE: f64 = 1e-9;

// === TEST FIXTURES ===

/// Random book of strictly positive offers, placed in random order
fn random_market(seed: u64) -> (MarketService, Vec<(f64, f64)>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut bank = InMemoryBank::new();
    let mut market = MarketService::new();

    let offer_count = rng.random_range(1..12);
    let mut offers = Vec::with_capacity(offer_count);
    for i in 0..offer_count {
        let owner = AgentId::new(i as u64);
        let account = bank.open_account(owner, Currency::Euro, true);
        let amount: f64 = rng.random_range(0.5..50.0);
        let price: f64 = rng.random_range(0.1..20.0);
        market
            .place_selling_offer(&bank, GOOD, owner, account, amount, price)
            .unwrap();
        offers.push((amount, price));
    }
    (market, offers)
}

fn sorted_by_price(offers: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sorted = offers.to_vec();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));
    sorted
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

// === PRICE FUNCTION ===

#[test]
fn test_boundary_price_is_weighted_average_of_consumed_offers() {
    for seed in SEEDS {
        let (market, offers) = random_market(seed);
        let function = market.get_market_price_function(Currency::Euro, GOOD);

        let mut amount = 0.0;
        let mut cost = 0.0;
        for (offer_amount, price) in sorted_by_price(&offers) {
            amount += offer_amount;
            cost += offer_amount * price;
            assert!(
                close(function.get_price(amount), cost / amount),
                "seed {seed}: price at boundary {amount}"
            );
        }
        assert!(function.get_price(amount * 1.01 + 1.0).is_nan());
    }
}

#[test]
fn test_analytical_intervals_are_continuous_and_increasing() {
    for seed in SEEDS {
        let (market, offers) = random_market(seed);
        let function = market.get_market_price_function(Currency::Euro, GOOD);
        let configs = function.get_analytical_price_function_parameters(f64::NAN);
        assert_eq!(configs.len(), offers.len(), "seed {seed}");

        for pair in configs.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            assert!(close(left.interval_right_boundary, right.interval_left_boundary));
            let boundary = right.interval_left_boundary;
            assert!(
                close(left.price_at(boundary), right.price_at(boundary)),
                "seed {seed}: jump at {boundary}"
            );
        }

        for config in configs.iter().filter(|c| c.interval_left_boundary > 0.0) {
            let a = config.interval_left_boundary;
            let b = config.interval_right_boundary;
            let mid = (a + b) / 2.0;
            assert!(config.price_at(a) < config.price_at(mid), "seed {seed}");
            assert!(config.price_at(mid) < config.price_at(b), "seed {seed}");
            assert!(close(config.price_at(mid), function.get_price(mid)));
        }
    }
}

#[test]
fn test_budget_cut_spends_exactly_the_budget() {
    for seed in SEEDS {
        let (market, _) = random_market(seed);
        let function = market.get_market_price_function(Currency::Euro, GOOD);
        let budget = function.total_cost(function.total_amount()) / 2.0;

        let configs = function.get_analytical_price_function_parameters(budget);
        let last = configs.last().unwrap();
        let x = last.interval_right_boundary;
        assert!(close(last.price_at(x) * x, budget), "seed {seed}");
    }
}

#[test]
fn test_marginal_price_is_left_continuous_step() {
    for seed in SEEDS {
        let (market, offers) = random_market(seed);
        let function = market.get_market_price_function(Currency::Euro, GOOD);

        let mut boundary = 0.0;
        for (amount, price) in sorted_by_price(&offers) {
            let inside = boundary + amount / 2.0;
            boundary += amount;
            assert_eq!(function.get_marginal_price(inside), price, "seed {seed}");
            assert_eq!(function.get_marginal_price(boundary), price, "seed {seed}");
        }
        assert!(function.get_marginal_price(boundary + 1.0).is_nan());
    }
}

#[test]
fn test_order_of_placement_does_not_matter() {
    for seed in SEEDS {
        let (market, offers) = random_market(seed);
        let from_book = market.get_market_price_function(Currency::Euro, GOOD);

        let mut reversed = offers.clone();
        reversed.reverse();
        let from_list = MarketPriceFunction::from_offers(&reversed);

        for x in [0.0, 1.0, from_book.total_amount() / 3.0, from_book.total_amount()] {
            assert!(close(from_book.get_price(x), from_list.get_price(x)));
        }
    }
}

// === FULFILLMENT ===

#[test]
fn test_fulfillment_respects_limits() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for seed in SEEDS {
        let (market, _) = random_market(seed);
        let function = market.get_market_price_function(Currency::Euro, GOOD);

        let limits = PurchaseLimits::new(
            rng.random_range(0.0..200.0),
            rng.random_range(0.0..1_000.0),
            rng.random_range(0.0..25.0),
        );
        let set = market.find_best_fulfillment_set(Currency::Euro, GOOD, &limits);

        assert!(set.total_amount() <= limits.max_amount + TOLERANCE);
        assert!(set.total_cost() <= limits.max_total_price + 1e-6);
        assert!(set.iter().all(|f| f.price_per_unit <= limits.max_price_per_unit));
        assert!(
            set.fills
                .windows(2)
                .all(|w| w[0].price_per_unit <= w[1].price_per_unit),
            "seed {seed}: not cheapest first"
        );
        // Cheapest-first costs exactly what the price function says
        assert!(close(set.total_cost(), function.total_cost(set.total_amount())));
    }
}

#[test]
fn test_unbounded_fulfillment_takes_min_of_request_and_depth() {
    for seed in SEEDS {
        let (market, _) = random_market(seed);
        let depth = market.total_amount(Currency::Euro, GOOD);

        for wanted in [depth / 2.0, depth, depth * 2.0] {
            let set = market.find_best_fulfillment_set(
                Currency::Euro,
                GOOD,
                &PurchaseLimits::amount(wanted),
            );
            assert!(close(set.total_amount(), wanted.min(depth)), "seed {seed}");
        }
    }
}

#[test]
fn test_queries_are_idempotent() {
    for seed in SEEDS {
        let (market, _) = random_market(seed);
        let limits = PurchaseLimits::budget(100.0);

        let first = market.find_best_fulfillment_set(Currency::Euro, GOOD, &limits);
        let function = market.get_market_price_function(Currency::Euro, GOOD);
        let second = market.find_best_fulfillment_set(Currency::Euro, GOOD, &limits);

        assert_eq!(first, second);
        assert_eq!(function, market.get_market_price_function(Currency::Euro, GOOD));
    }
}

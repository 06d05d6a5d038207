//! Market and settlement errors

use thiserror::Error;

use crate::types::{AgentId, Amount, BankAccountId, Currency, OfferId, Price, PropertyId};

/// Failures raised by the bank and property collaborators while moving one leg of a trade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    #[error("Unknown bank account: {0:?}")]
    UnknownAccount(BankAccountId),

    #[error("Unknown property: {0:?}")]
    UnknownProperty(PropertyId),

    /// Withdrawal would overdraw an account that does not permit overdraft
    #[error("Insufficient funds on {account:?}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: BankAccountId,
        balance: f64,
        requested: f64,
    },

    #[error("{owner} holds {available} units, {requested} requested")]
    InsufficientGoods {
        owner: AgentId,
        available: Amount,
        requested: Amount,
    },

    #[error("Property {property:?} is not owned by {agent}")]
    NotOwner { property: PropertyId, agent: AgentId },

    #[error("Cannot move {0} of money or goods")]
    InvalidAmount(f64),
}

/// Market engine errors.
///
/// Price queries never fail: a missing market is reported as `NaN`. Everything
/// here is an invariant violation or a failed settlement.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("Invalid offer amount: {0}")]
    InvalidAmount(Amount),

    #[error("Invalid price per unit: {0}")]
    InvalidPrice(Price),

    #[error("Unknown bank account: {0:?}")]
    UnknownAccount(BankAccountId),

    #[error("Offer not found: {0:?}")]
    OfferNotFound(OfferId),

    #[error("Unknown property: {0:?}")]
    UnknownProperty(PropertyId),

    #[error("Account {account:?} is owned by {actual}, not {expected}")]
    OwnerMismatch {
        account: BankAccountId,
        expected: AgentId,
        actual: AgentId,
    },

    #[error("Property {property:?} is not owned by {agent}")]
    PropertyNotOwned { property: PropertyId, agent: AgentId },

    /// A discrete unit can stand in the book only once
    #[error("Property {property:?} is already on sale as offer {offer:?}")]
    PropertyAlreadyOffered { property: PropertyId, offer: OfferId },

    #[error("Currency mismatch: expected {expected}, account holds {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    #[error("Currency commodity {0} requires a foreign currency account")]
    MissingForeignAccount(Currency),

    #[error("Discrete commodities are placed per unit, use place_property_offer")]
    DiscreteCommodity,

    /// Consuming more than an offer has left
    #[error("Offer {offer:?} has {remaining} remaining, cannot consume {requested}")]
    Overconsumption {
        offer: OfferId,
        remaining: Amount,
        requested: Amount,
    },

    /// Settlement of one offer failed. Offers settled earlier in the same purchase stay settled.
    #[error("Settlement of offer {offer:?} failed after {settled_amount} units were bought: {source}")]
    Settlement {
        offer: OfferId,
        settled_amount: Amount,
        #[source]
        source: SettlementError,
    },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Price index weights must sum to 1.0, got {0}")]
    WeightSum(f64),

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
}

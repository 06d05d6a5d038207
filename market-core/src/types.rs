use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;
use tsify_next::Tsify;

// ============================================================================
// IDs - Using slotmap for generational indices
// ============================================================================

new_key_type! {
    pub struct OfferId;
    pub struct BankAccountId;
    pub struct PropertyId;
}

/// Agents live in an external registry; the market only needs a stable number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl AgentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Trait for converting ids to u64 for the WASM boundary and for log fields
pub trait KeyToU64 {
    fn to_u64(self) -> u64;
}

impl KeyToU64 for OfferId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

impl KeyToU64 for BankAccountId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

impl KeyToU64 for PropertyId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

impl KeyToU64 for AgentId {
    fn to_u64(self) -> u64 {
        self.0
    }
}

pub type Price = f64;
pub type Amount = f64;

// ============================================================================
// Currencies
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Currency {
    Euro,
    UsDollar,
    Yen,
}

impl Currency {
    pub fn iso4217_code(&self) -> &'static str {
        match self {
            Currency::Euro => "EUR",
            Currency::UsDollar => "USD",
            Currency::Yen => "JPY",
        }
    }

    pub fn all() -> impl Iterator<Item = Currency> {
        [Currency::Euro, Currency::UsDollar, Currency::Yen].into_iter()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.iso4217_code())
    }
}

// ============================================================================
// Goods - Divisible, fungible commodities
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum GoodType {
    LabourHour,
    MegaCalorie,
    Kilowatt,
    Wheat,
    Coal,
    Iron,
    Car,
    RealEstate,
}

impl GoodType {
    /// Returns an iterator over all good types
    pub fn all() -> impl Iterator<Item = GoodType> {
        [
            GoodType::LabourHour,
            GoodType::MegaCalorie,
            GoodType::Kilowatt,
            GoodType::Wheat,
            GoodType::Coal,
            GoodType::Iron,
            GoodType::Car,
            GoodType::RealEstate,
        ]
        .into_iter()
    }
}

// ============================================================================
// Properties - Discrete, individually owned units
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum PropertyClass {
    Share,
    Bond,
}

// ============================================================================
// Commodity & Tradeable - The partition key of the market
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Commodity {
    Good(GoodType),
    Property(PropertyClass),
    Currency(Currency),
}

impl Commodity {
    /// Discrete commodities only change hands in whole units.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Commodity::Property(_))
    }

    /// Short label used in log fields.
    pub fn label(&self) -> String {
        match self {
            Commodity::Good(good) => format!("{good:?}"),
            Commodity::Property(class) => format!("{class:?}"),
            Commodity::Currency(currency) => currency.iso4217_code().to_string(),
        }
    }
}

impl From<GoodType> for Commodity {
    fn from(good: GoodType) -> Self {
        Commodity::Good(good)
    }
}

impl From<PropertyClass> for Commodity {
    fn from(class: PropertyClass) -> Self {
        Commodity::Property(class)
    }
}

impl From<Currency> for Commodity {
    fn from(currency: Currency) -> Self {
        Commodity::Currency(currency)
    }
}

/// A (market currency, commodity) pair. Each tradeable owns exactly one order book.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Tradeable {
    pub currency: Currency,
    pub commodity: Commodity,
}

impl Tradeable {
    pub fn new(currency: Currency, commodity: impl Into<Commodity>) -> Self {
        Self {
            currency,
            commodity: commodity.into(),
        }
    }
}

impl fmt::Display for Tradeable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.commodity.label(), self.currency)
    }
}

//! Collaborator seams for settlement.
//!
//! The market never owns money or goods. It moves them through these two traits,
//! one call per matched offer. `InMemoryBank` and `PropertyRegister` are reference
//! implementations for tests and the wasm facade.

pub mod bank;
pub mod property;

pub use bank::*;
pub use property::*;

use crate::error::SettlementError;
use crate::types::{AgentId, Amount, BankAccountId, Currency, GoodType, PropertyClass, PropertyId};

// === BANK ACCOUNTS ===

pub trait BankAccounts {
    fn currency(&self, account: BankAccountId) -> Option<Currency>;
    fn owner(&self, account: BankAccountId) -> Option<AgentId>;
    fn balance(&self, account: BankAccountId) -> Option<f64>;

    fn withdraw(&mut self, account: BankAccountId, amount: f64) -> Result<(), SettlementError>;
    fn deposit(&mut self, account: BankAccountId, amount: f64) -> Result<(), SettlementError>;

    /// Move money between two accounts. Nothing moves if the withdrawal fails.
    fn transfer(
        &mut self,
        from: BankAccountId,
        to: BankAccountId,
        amount: f64,
    ) -> Result<(), SettlementError> {
        if self.currency(to).is_none() {
            return Err(SettlementError::UnknownAccount(to));
        }
        self.withdraw(from, amount)?;
        self.deposit(to, amount)
    }
}

// === PROPERTY REGISTRY ===

pub trait PropertyRegistry {
    /// Divisible good balance of an agent
    fn balance(&self, owner: AgentId, good: GoodType) -> Amount;

    fn transfer_goods(
        &mut self,
        from: AgentId,
        to: AgentId,
        good: GoodType,
        amount: Amount,
    ) -> Result<(), SettlementError>;

    fn property_class(&self, property: PropertyId) -> Option<PropertyClass>;
    fn property_owner(&self, property: PropertyId) -> Option<AgentId>;

    fn transfer_property(
        &mut self,
        property: PropertyId,
        from: AgentId,
        to: AgentId,
    ) -> Result<(), SettlementError>;

    fn properties(&self, owner: AgentId, class: PropertyClass) -> Vec<PropertyId>;
}

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use super::BankAccounts;
use crate::error::SettlementError;
use crate::types::{AgentId, BankAccountId, Currency};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub owner: AgentId,
    pub currency: Currency,
    pub balance: f64,
    /// Credit accounts may go negative; money is created on the way down.
    pub overdraft_permitted: bool,
}

/// Arena of bank accounts across all banks and currencies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryBank {
    pub accounts: SlotMap<BankAccountId, BankAccount>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_account(
        &mut self,
        owner: AgentId,
        currency: Currency,
        overdraft_permitted: bool,
    ) -> BankAccountId {
        self.accounts.insert(BankAccount {
            owner,
            currency,
            balance: 0.0,
            overdraft_permitted,
        })
    }

    pub fn get(&self, account: BankAccountId) -> Option<&BankAccount> {
        self.accounts.get(account)
    }

    /// Sum of balances in one currency. Transfers never change it.
    pub fn money_supply(&self, currency: Currency) -> f64 {
        self.accounts
            .values()
            .filter(|a| a.currency == currency)
            .map(|a| a.balance)
            .sum()
    }
}

impl BankAccounts for InMemoryBank {
    fn currency(&self, account: BankAccountId) -> Option<Currency> {
        self.accounts.get(account).map(|a| a.currency)
    }

    fn owner(&self, account: BankAccountId) -> Option<AgentId> {
        self.accounts.get(account).map(|a| a.owner)
    }

    fn balance(&self, account: BankAccountId) -> Option<f64> {
        self.accounts.get(account).map(|a| a.balance)
    }

    fn withdraw(&mut self, account: BankAccountId, amount: f64) -> Result<(), SettlementError> {
        if amount < 0.0 || !amount.is_finite() {
            return Err(SettlementError::InvalidAmount(amount));
        }
        let acc = self
            .accounts
            .get_mut(account)
            .ok_or(SettlementError::UnknownAccount(account))?;
        if !acc.overdraft_permitted && acc.balance < amount {
            return Err(SettlementError::InsufficientFunds {
                account,
                balance: acc.balance,
                requested: amount,
            });
        }
        acc.balance -= amount;
        Ok(())
    }

    fn deposit(&mut self, account: BankAccountId, amount: f64) -> Result<(), SettlementError> {
        if amount < 0.0 || !amount.is_finite() {
            return Err(SettlementError::InvalidAmount(amount));
        }
        let acc = self
            .accounts
            .get_mut(account)
            .ok_or(SettlementError::UnknownAccount(account))?;
        acc.balance += amount;
        Ok(())
    }
}

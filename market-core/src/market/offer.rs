use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::types::{AgentId, Amount, BankAccountId, Commodity, OfferId, Price, PropertyId, Tradeable};

/// One agent's standing offer to sell a quantity of a tradeable at a fixed unit price.
///
/// Identity fields never change after placement; only `remaining_amount` shrinks
/// as buyers consume the offer. An offer at zero is never kept in a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellingOffer {
    pub owner: AgentId,
    pub tradeable: Tradeable,
    /// Receives the money leg, denominated in the market currency
    pub settlement_account: BankAccountId,
    pub price_per_unit: Price,
    pub remaining_amount: Amount,
    /// Assigned by the order book at insertion; ties between equal prices go to the lower one
    pub sequence: u64,
    /// The unit on sale for property offers (amount is then exactly 1)
    pub property: Option<PropertyId>,
    /// Holds the commodity currency for currency offers
    pub commodity_account: Option<BankAccountId>,
}

impl SellingOffer {
    pub fn new(
        owner: AgentId,
        tradeable: Tradeable,
        settlement_account: BankAccountId,
        amount: Amount,
        price_per_unit: Price,
    ) -> Self {
        Self {
            owner,
            tradeable,
            settlement_account,
            price_per_unit,
            remaining_amount: amount,
            sequence: 0,
            property: None,
            commodity_account: None,
        }
    }

    pub fn commodity(&self) -> Commodity {
        self.tradeable.commodity
    }
}

/// Arena holding every live offer of a market. Books and agents refer to offers by handle.
pub type OfferArena = SlotMap<OfferId, SellingOffer>;

//! Per-tradeable book of selling offers in price-time priority.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use super::offer::{OfferArena, SellingOffer};
use crate::error::MarketError;
use crate::types::{AgentId, Amount, OfferId, Price, Tradeable};

/// Sort key of an offer: price ascending, then insertion order.
#[derive(Debug, Clone, Copy)]
pub struct QueuePosition {
    pub price: Price,
    pub sequence: u64,
}

impl PartialEq for QueuePosition {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuePosition {}

impl PartialOrd for QueuePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuePosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.price
            .total_cmp(&other.price)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// The selling side of one tradeable.
///
/// Offer data lives in the shared [`OfferArena`]; the book only indexes handles.
/// Iterating borrows the book, so a match in progress cannot observe inserts.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub tradeable: Tradeable,
    queue: BTreeMap<QueuePosition, OfferId>,
    positions: HashMap<OfferId, QueuePosition>,
    next_sequence: u64,
}

impl OrderBook {
    pub fn new(tradeable: Tradeable) -> Self {
        Self {
            tradeable,
            queue: BTreeMap::new(),
            positions: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, id: OfferId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Insert an offer with a fresh sequence number. It is visible to queries immediately.
    pub fn add(&mut self, offers: &mut OfferArena, mut offer: SellingOffer) -> OfferId {
        debug_assert_eq!(offer.tradeable, self.tradeable);
        offer.sequence = self.next_sequence;
        self.next_sequence += 1;

        let position = QueuePosition {
            price: offer.price_per_unit,
            sequence: offer.sequence,
        };
        let id = offers.insert(offer);
        self.queue.insert(position, id);
        self.positions.insert(id, position);
        id
    }

    /// Withdraw a single offer, returning it
    pub fn remove(&mut self, offers: &mut OfferArena, id: OfferId) -> Option<SellingOffer> {
        let position = self.positions.remove(&id)?;
        self.queue.remove(&position);
        offers.remove(id)
    }

    /// Withdraw every offer of `owner` in this book
    pub fn remove_all(&mut self, offers: &mut OfferArena, owner: AgentId) -> Vec<SellingOffer> {
        let owned: Vec<OfferId> = self
            .queue
            .values()
            .copied()
            .filter(|id| offers.get(*id).is_some_and(|o| o.owner == owner))
            .collect();

        owned
            .into_iter()
            .filter_map(|id| self.remove(offers, id))
            .collect()
    }

    /// Take `amount` off an offer. Reaching zero (within `epsilon`) removes it.
    ///
    /// Returns the amount left on the offer.
    pub fn consume(
        &mut self,
        offers: &mut OfferArena,
        id: OfferId,
        amount: Amount,
        epsilon: Amount,
    ) -> Result<Amount, MarketError> {
        if !self.contains(id) {
            return Err(MarketError::OfferNotFound(id));
        }
        if amount < 0.0 || !amount.is_finite() {
            return Err(MarketError::InvalidAmount(amount));
        }
        let offer = offers.get_mut(id).ok_or(MarketError::OfferNotFound(id))?;
        if amount > offer.remaining_amount + epsilon {
            return Err(MarketError::Overconsumption {
                offer: id,
                remaining: offer.remaining_amount,
                requested: amount,
            });
        }

        let left = offer.remaining_amount - amount;
        if left <= epsilon {
            self.remove(offers, id);
            Ok(0.0)
        } else {
            offer.remaining_amount = left;
            Ok(left)
        }
    }

    /// Live offers cheapest first, equal prices in insertion order
    pub fn iter<'a>(
        &'a self,
        offers: &'a OfferArena,
    ) -> impl Iterator<Item = (OfferId, &'a SellingOffer)> + 'a {
        self.queue
            .values()
            .filter_map(move |id| offers.get(*id).map(|offer| (*id, offer)))
    }

    pub fn cheapest<'a>(&self, offers: &'a OfferArena) -> Option<&'a SellingOffer> {
        self.queue.values().find_map(|id| offers.get(*id))
    }

    /// Market depth: everything purchasable in this book
    pub fn total_amount(&self, offers: &OfferArena) -> Amount {
        self.iter(offers).map(|(_, o)| o.remaining_amount).sum()
    }

    pub fn offers_of(&self, offers: &OfferArena, owner: AgentId) -> Vec<OfferId> {
        self.iter(offers)
            .filter(|(_, o)| o.owner == owner)
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BankAccountId, Currency, GoodType};

    fn book_with(offers: &mut OfferArena, entries: &[(u64, f64, f64)]) -> (OrderBook, Vec<OfferId>) {
        let tradeable = Tradeable::new(Currency::Euro, GoodType::Wheat);
        let mut book = OrderBook::new(tradeable);
        let ids = entries
            .iter()
            .map(|&(owner, amount, price)| {
                let offer = SellingOffer::new(
                    AgentId::new(owner),
                    tradeable,
                    BankAccountId::default(),
                    amount,
                    price,
                );
                book.add(offers, offer)
            })
            .collect();
        (book, ids)
    }

    #[test]
    fn test_iterates_cheapest_first_then_fifo() {
        let mut offers = OfferArena::with_key();
        let (book, ids) = book_with(
            &mut offers,
            &[(1, 10.0, 5.0), (2, 10.0, 4.0), (3, 5.0, 5.0), (4, 1.0, 0.0)],
        );

        let order: Vec<OfferId> = book.iter(&offers).map(|(id, _)| id).collect();
        assert_eq!(order, vec![ids[3], ids[1], ids[0], ids[2]]);
        assert_eq!(book.cheapest(&offers).map(|o| o.price_per_unit), Some(0.0));
        assert_eq!(book.total_amount(&offers), 26.0);
    }

    #[test]
    fn test_consume_removes_exhausted_offer() {
        let mut offers = OfferArena::with_key();
        let (mut book, ids) = book_with(&mut offers, &[(1, 10.0, 3.0)]);

        let left = book.consume(&mut offers, ids[0], 4.0, 1e-9).unwrap();
        assert_eq!(left, 6.0);
        assert_eq!(offers[ids[0]].remaining_amount, 6.0);

        let left = book.consume(&mut offers, ids[0], 6.0, 1e-9).unwrap();
        assert_eq!(left, 0.0);
        assert!(book.is_empty());
        assert!(!offers.contains_key(ids[0]));
    }

    #[test]
    fn test_overconsumption_leaves_offer_untouched() {
        let mut offers = OfferArena::with_key();
        let (mut book, ids) = book_with(&mut offers, &[(1, 2.0, 3.0)]);

        let err = book.consume(&mut offers, ids[0], 2.5, 1e-9).unwrap_err();
        assert!(matches!(err, MarketError::Overconsumption { .. }));
        assert_eq!(offers[ids[0]].remaining_amount, 2.0);
        assert_eq!(book.len(), 1);

        let err = book.consume(&mut offers, ids[0], -1.0, 1e-9).unwrap_err();
        assert!(matches!(err, MarketError::InvalidAmount(_)));
    }

    #[test]
    fn test_remove_all_only_touches_owner() {
        let mut offers = OfferArena::with_key();
        let (mut book, ids) = book_with(&mut offers, &[(1, 1.0, 1.0), (2, 1.0, 2.0), (1, 1.0, 3.0)]);

        let removed = book.remove_all(&mut offers, AgentId::new(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(book.len(), 1);
        assert_eq!(book.offers_of(&offers, AgentId::new(2)), vec![ids[1]]);
        assert_eq!(offers.len(), 1);
    }
}

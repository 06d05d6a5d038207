use std::collections::BTreeMap;

use super::fulfillment::{Fill, FulfillmentSet, PurchaseLimits, find_best_fulfillment_set};
use super::offer::{OfferArena, SellingOffer};
use super::order_book::OrderBook;
use super::price_function::MarketPriceFunction;
use crate::config::MarketConfig;
use crate::error::{MarketError, SettlementError};
use crate::ledger::{BankAccounts, PropertyRegistry};
#[cfg(feature = "instrument")]
use crate::types::KeyToU64;
use crate::types::{
    AgentId, Amount, BankAccountId, Commodity, Currency, GoodType, OfferId, Price, PropertyId,
    Tradeable,
};

// ============================================================================
// Purchase receipt
// ============================================================================

/// What one `buy` call actually settled
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurchaseReceipt {
    pub tradeable: Option<Tradeable>,
    pub settled: FulfillmentSet,
}

impl PurchaseReceipt {
    pub fn amount(&self) -> Amount {
        self.settled.total_amount()
    }

    pub fn cost(&self) -> f64 {
        self.settled.total_cost()
    }

    /// Average price paid, `NaN` if nothing was bought
    pub fn average_price(&self) -> Price {
        self.cost() / self.amount()
    }
}

/// Buyer side of a purchase
#[derive(Debug, Clone, Copy)]
struct Buyer {
    agent: AgentId,
    account: BankAccountId,
    foreign_account: Option<BankAccountId>,
}

// ============================================================================
// Market service - owns every order book
// ============================================================================

/// The market of one simulation: all order books keyed by tradeable, plus the
/// offer arena they index into.
///
/// Construct one and hand it to agents by reference. Books are created on the
/// first offer of a tradeable and stay registered when they run empty.
#[derive(Debug, Clone, Default)]
pub struct MarketService {
    pub config: MarketConfig,
    offers: OfferArena,
    books: BTreeMap<Tradeable, OrderBook>,
}

impl MarketService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MarketConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    // === Offer placement ===

    /// Place an offer to sell `amount` of a divisible good (or, with
    /// [`Self::place_currency_offer`], a currency) at a fixed unit price.
    ///
    /// The market currency is the currency of `settlement_account`.
    pub fn place_selling_offer<B: BankAccounts>(
        &mut self,
        bank: &B,
        commodity: impl Into<Commodity>,
        owner: AgentId,
        settlement_account: BankAccountId,
        amount: Amount,
        price_per_unit: Price,
    ) -> Result<OfferId, MarketError> {
        let commodity = commodity.into();
        match commodity {
            Commodity::Property(_) => Err(MarketError::DiscreteCommodity),
            Commodity::Currency(currency) => Err(MarketError::MissingForeignAccount(currency)),
            Commodity::Good(_) => {
                let offer = self.new_offer(
                    bank,
                    commodity,
                    owner,
                    settlement_account,
                    amount,
                    price_per_unit,
                )?;
                Ok(self.insert(offer))
            }
        }
    }

    /// Offer `amount` units of `commodity_currency` held on `foreign_account`,
    /// priced in the currency of `settlement_account`.
    #[allow(clippy::too_many_arguments)]
    pub fn place_currency_offer<B: BankAccounts>(
        &mut self,
        bank: &B,
        commodity_currency: Currency,
        owner: AgentId,
        settlement_account: BankAccountId,
        amount: Amount,
        price_per_unit: Price,
        foreign_account: BankAccountId,
    ) -> Result<OfferId, MarketError> {
        check_account(bank, foreign_account, owner, commodity_currency)?;
        let mut offer = self.new_offer(
            bank,
            Commodity::Currency(commodity_currency),
            owner,
            settlement_account,
            amount,
            price_per_unit,
        )?;
        offer.commodity_account = Some(foreign_account);
        Ok(self.insert(offer))
    }

    /// Offer one discrete property unit. The class is looked up in the registry.
    pub fn place_property_offer<B: BankAccounts, P: PropertyRegistry>(
        &mut self,
        bank: &B,
        registry: &P,
        property: PropertyId,
        owner: AgentId,
        settlement_account: BankAccountId,
        price_per_unit: Price,
    ) -> Result<OfferId, MarketError> {
        let class = registry
            .property_class(property)
            .ok_or(MarketError::UnknownProperty(property))?;
        if registry.property_owner(property) != Some(owner) {
            return Err(MarketError::PropertyNotOwned {
                property,
                agent: owner,
            });
        }
        if let Some((offer, _)) = self
            .offers
            .iter()
            .find(|(_, o)| o.property == Some(property))
        {
            return Err(MarketError::PropertyAlreadyOffered { property, offer });
        }
        let mut offer = self.new_offer(
            bank,
            Commodity::Property(class),
            owner,
            settlement_account,
            1.0,
            price_per_unit,
        )?;
        offer.property = Some(property);
        Ok(self.insert(offer))
    }

    fn new_offer<B: BankAccounts>(
        &self,
        bank: &B,
        commodity: Commodity,
        owner: AgentId,
        settlement_account: BankAccountId,
        amount: Amount,
        price_per_unit: Price,
    ) -> Result<SellingOffer, MarketError> {
        if !(amount > 0.0 && amount.is_finite()) {
            return Err(MarketError::InvalidAmount(amount));
        }
        if !(price_per_unit >= 0.0 && price_per_unit.is_finite()) {
            return Err(MarketError::InvalidPrice(price_per_unit));
        }
        let currency = bank
            .currency(settlement_account)
            .ok_or(MarketError::UnknownAccount(settlement_account))?;
        check_account(bank, settlement_account, owner, currency)?;

        Ok(SellingOffer::new(
            owner,
            Tradeable::new(currency, commodity),
            settlement_account,
            amount,
            price_per_unit,
        ))
    }

    fn insert(&mut self, offer: SellingOffer) -> OfferId {
        let tradeable = offer.tradeable;
        let book = self
            .books
            .entry(tradeable)
            .or_insert_with(|| OrderBook::new(tradeable));

        #[cfg(feature = "instrument")]
        let (owner, amount, price, label) = (
            offer.owner,
            offer.remaining_amount,
            offer.price_per_unit,
            tradeable.commodity.label(),
        );

        let id = book.add(&mut self.offers, offer);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "offer_placed",
            offer_id = id.to_u64(),
            owner = owner.to_u64(),
            currency = tradeable.currency.iso4217_code(),
            commodity = label.as_str(),
            amount = amount,
            price = price,
        );

        id
    }

    // === Withdrawal ===

    /// Withdraw one offer by handle
    pub fn remove_selling_offer(&mut self, id: OfferId) -> Result<SellingOffer, MarketError> {
        let tradeable = self
            .offers
            .get(id)
            .map(|o| o.tradeable)
            .ok_or(MarketError::OfferNotFound(id))?;
        self.books
            .get_mut(&tradeable)
            .and_then(|book| book.remove(&mut self.offers, id))
            .ok_or(MarketError::OfferNotFound(id))
    }

    /// Withdraw every offer of `owner` in every market. Returns how many were withdrawn.
    pub fn remove_all_selling_offers(&mut self, owner: AgentId) -> usize {
        let mut removed = 0;
        for book in self.books.values_mut() {
            removed += book.remove_all(&mut self.offers, owner).len();
        }
        log_withdrawal(owner, None, removed);
        removed
    }

    /// Withdraw the offers of `owner` for one tradeable only
    pub fn remove_all_selling_offers_for(
        &mut self,
        owner: AgentId,
        currency: Currency,
        commodity: impl Into<Commodity>,
    ) -> usize {
        let tradeable = Tradeable::new(currency, commodity);
        let removed = self
            .books
            .get_mut(&tradeable)
            .map_or(0, |book| book.remove_all(&mut self.offers, owner).len());
        log_withdrawal(owner, Some(tradeable), removed);
        removed
    }

    // === Lookups ===

    pub fn offer(&self, id: OfferId) -> Option<&SellingOffer> {
        self.offers.get(id)
    }

    /// Handles of every live offer of `owner`, book by book
    pub fn offers_of(&self, owner: AgentId) -> Vec<OfferId> {
        self.books
            .values()
            .flat_map(|book| book.offers_of(&self.offers, owner))
            .collect()
    }

    pub fn book(&self, tradeable: &Tradeable) -> Option<&OrderBook> {
        self.books.get(tradeable)
    }

    /// Every tradeable that ever had an offer
    pub fn tradeables(&self) -> impl Iterator<Item = &Tradeable> {
        self.books.keys()
    }

    pub fn offer_count(&self) -> usize {
        self.offers.len()
    }

    /// Everything purchasable for a tradeable
    pub fn total_amount(&self, currency: Currency, commodity: impl Into<Commodity>) -> Amount {
        self.books
            .get(&Tradeable::new(currency, commodity))
            .map_or(0.0, |book| book.total_amount(&self.offers))
    }

    // === Prices ===

    /// Spot price: the cheapest live offer, `NaN` if there is none
    pub fn get_price(&self, currency: Currency, commodity: impl Into<Commodity>) -> Price {
        self.books
            .get(&Tradeable::new(currency, commodity))
            .and_then(|book| book.cheapest(&self.offers))
            .map_or(f64::NAN, |o| o.price_per_unit)
    }

    /// Average price per unit of buying `amount` units cheapest-first
    pub fn get_average_price(
        &self,
        currency: Currency,
        commodity: impl Into<Commodity>,
        amount: Amount,
    ) -> Price {
        self.get_market_price_function(currency, commodity)
            .get_price(amount)
    }

    pub fn get_marginal_price(
        &self,
        currency: Currency,
        commodity: impl Into<Commodity>,
        amount: Amount,
    ) -> Price {
        self.get_market_price_function(currency, commodity)
            .get_marginal_price(amount)
    }

    /// Snapshot of a book as price functions. An unknown tradeable gives an empty function.
    pub fn get_market_price_function(
        &self,
        currency: Currency,
        commodity: impl Into<Commodity>,
    ) -> MarketPriceFunction {
        self.books
            .get(&Tradeable::new(currency, commodity))
            .map(|book| MarketPriceFunction::from_book(book, &self.offers))
            .unwrap_or_default()
    }

    /// Spot prices of every good type in one currency
    pub fn get_prices(&self, currency: Currency) -> BTreeMap<GoodType, Price> {
        GoodType::all()
            .map(|good| (good, self.get_price(currency, good)))
            .collect()
    }

    // === Matching & settlement ===

    pub fn find_best_fulfillment_set(
        &self,
        currency: Currency,
        commodity: impl Into<Commodity>,
        limits: &PurchaseLimits,
    ) -> FulfillmentSet {
        self.books
            .get(&Tradeable::new(currency, commodity))
            .map(|book| {
                find_best_fulfillment_set(book, &self.offers, limits, self.config.amount_epsilon)
            })
            .unwrap_or_default()
    }

    /// Buy a divisible good or property in the currency of `buyer_account`.
    ///
    /// Fills what the book supplies within `limits`; a shortfall is not an error.
    pub fn buy<B: BankAccounts, P: PropertyRegistry>(
        &mut self,
        bank: &mut B,
        registry: &mut P,
        commodity: impl Into<Commodity>,
        limits: &PurchaseLimits,
        buyer: AgentId,
        buyer_account: BankAccountId,
    ) -> Result<PurchaseReceipt, MarketError> {
        let commodity = commodity.into();
        if let Commodity::Currency(currency) = commodity {
            return Err(MarketError::MissingForeignAccount(currency));
        }
        let buyer = Buyer {
            agent: buyer,
            account: buyer_account,
            foreign_account: None,
        };
        self.execute_purchase(bank, registry, commodity, limits, buyer)
    }

    /// Buy `commodity_currency` into `buyer_foreign_account`, paying from `buyer_account`.
    #[allow(clippy::too_many_arguments)]
    pub fn buy_currency<B: BankAccounts, P: PropertyRegistry>(
        &mut self,
        bank: &mut B,
        registry: &mut P,
        commodity_currency: Currency,
        limits: &PurchaseLimits,
        buyer: AgentId,
        buyer_account: BankAccountId,
        buyer_foreign_account: BankAccountId,
    ) -> Result<PurchaseReceipt, MarketError> {
        check_account(bank, buyer_foreign_account, buyer, commodity_currency)?;
        let buyer = Buyer {
            agent: buyer,
            account: buyer_account,
            foreign_account: Some(buyer_foreign_account),
        };
        self.execute_purchase(
            bank,
            registry,
            Commodity::Currency(commodity_currency),
            limits,
            buyer,
        )
    }

    fn execute_purchase<B: BankAccounts, P: PropertyRegistry>(
        &mut self,
        bank: &mut B,
        registry: &mut P,
        commodity: Commodity,
        limits: &PurchaseLimits,
        buyer: Buyer,
    ) -> Result<PurchaseReceipt, MarketError> {
        let currency = bank
            .currency(buyer.account)
            .ok_or(MarketError::UnknownAccount(buyer.account))?;
        check_account(bank, buyer.account, buyer.agent, currency)?;

        let tradeable = Tradeable::new(currency, commodity);
        let selection = self.find_best_fulfillment_set(currency, commodity, limits);

        let mut receipt = PurchaseReceipt {
            tradeable: Some(tradeable),
            settled: FulfillmentSet::default(),
        };

        #[cfg(feature = "instrument")]
        let label = commodity.label();

        for fill in selection.fills {
            if let Err(source) = self.settle_fill(bank, registry, &fill, buyer) {
                #[cfg(feature = "instrument")]
                tracing::info!(
                    target: "settlement_failed",
                    offer_id = fill.offer.to_u64(),
                    buyer = buyer.agent.to_u64(),
                    amount = fill.amount,
                    error = %source,
                );
                return Err(MarketError::Settlement {
                    offer: fill.offer,
                    settled_amount: receipt.amount(),
                    source,
                });
            }

            let book = self
                .books
                .get_mut(&tradeable)
                .ok_or(MarketError::OfferNotFound(fill.offer))?;
            book.consume(
                &mut self.offers,
                fill.offer,
                fill.amount,
                self.config.amount_epsilon,
            )?;

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "fill",
                offer_id = fill.offer.to_u64(),
                seller = fill.seller.to_u64(),
                buyer = buyer.agent.to_u64(),
                currency = currency.iso4217_code(),
                commodity = label.as_str(),
                amount = fill.amount,
                price = fill.price_per_unit,
                cost = fill.cost(),
            );

            receipt.settled.fills.push(fill);
        }

        Ok(receipt)
    }

    /// Move both legs of one fill. Either both move or neither does.
    fn settle_fill<B: BankAccounts, P: PropertyRegistry>(
        &self,
        bank: &mut B,
        registry: &mut P,
        fill: &Fill,
        buyer: Buyer,
    ) -> Result<(), SettlementError> {
        let offer = self
            .offers
            .get(fill.offer)
            .ok_or(SettlementError::InvalidAmount(fill.amount))?;
        let cost = fill.cost();

        bank.transfer(buyer.account, offer.settlement_account, cost)?;

        let commodity_leg = match offer.commodity() {
            Commodity::Good(good) => {
                registry.transfer_goods(offer.owner, buyer.agent, good, fill.amount)
            }
            Commodity::Property(_) => match offer.property {
                Some(property) => registry.transfer_property(property, offer.owner, buyer.agent),
                None => Err(SettlementError::InvalidAmount(fill.amount)),
            },
            Commodity::Currency(_) => match (offer.commodity_account, buyer.foreign_account) {
                (Some(from), Some(to)) => bank.transfer(from, to, fill.amount),
                _ => Err(SettlementError::InvalidAmount(fill.amount)),
            },
        };

        if let Err(err) = commodity_leg {
            // Hand the money back so this offer settles all-or-nothing
            bank.transfer(offer.settlement_account, buyer.account, cost)?;
            return Err(err);
        }
        Ok(())
    }
}

/// Account must exist, belong to `owner`, and hold `currency`
fn check_account<B: BankAccounts>(
    bank: &B,
    account: BankAccountId,
    owner: AgentId,
    currency: Currency,
) -> Result<(), MarketError> {
    let actual_owner = bank
        .owner(account)
        .ok_or(MarketError::UnknownAccount(account))?;
    if actual_owner != owner {
        return Err(MarketError::OwnerMismatch {
            account,
            expected: owner,
            actual: actual_owner,
        });
    }
    let actual_currency = bank
        .currency(account)
        .ok_or(MarketError::UnknownAccount(account))?;
    if actual_currency != currency {
        return Err(MarketError::CurrencyMismatch {
            expected: currency,
            actual: actual_currency,
        });
    }
    Ok(())
}

#[cfg(feature = "instrument")]
fn log_withdrawal(owner: AgentId, tradeable: Option<Tradeable>, removed: usize) {
    if removed > 0 {
        let scope = tradeable.map_or_else(|| "all".to_string(), |t| t.to_string());
        tracing::info!(
            target: "offers_withdrawn",
            owner = owner.to_u64(),
            scope = scope.as_str(),
            count = removed as u64,
        );
    }
}

#[cfg(not(feature = "instrument"))]
fn log_withdrawal(_owner: AgentId, _tradeable: Option<Tradeable>, _removed: usize) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryBank, PropertyRegister};
    use crate::types::PropertyClass;

    struct Fixture {
        market: MarketService,
        bank: InMemoryBank,
        register: PropertyRegister,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                market: MarketService::new(),
                bank: InMemoryBank::new(),
                register: PropertyRegister::new(),
            }
        }

        fn seller(&mut self, id: u64, good: GoodType, stock: f64) -> (AgentId, BankAccountId) {
            let agent = AgentId::new(id);
            let account = self.bank.open_account(agent, Currency::Euro, true);
            self.register.increment(agent, good, stock);
            (agent, account)
        }
    }

    #[test]
    fn test_rejects_invalid_offers() {
        let mut f = Fixture::new();
        let (agent, account) = f.seller(1, GoodType::Wheat, 10.0);
        let other = AgentId::new(99);

        let err = f
            .market
            .place_selling_offer(&f.bank, GoodType::Wheat, agent, account, 0.0, 1.0)
            .unwrap_err();
        assert_eq!(err, MarketError::InvalidAmount(0.0));

        let err = f
            .market
            .place_selling_offer(&f.bank, GoodType::Wheat, agent, account, 1.0, -1.0)
            .unwrap_err();
        assert_eq!(err, MarketError::InvalidPrice(-1.0));

        let err = f
            .market
            .place_selling_offer(&f.bank, GoodType::Wheat, other, account, 1.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, MarketError::OwnerMismatch { .. }));

        let err = f
            .market
            .place_selling_offer(&f.bank, PropertyClass::Share, agent, account, 1.0, 1.0)
            .unwrap_err();
        assert_eq!(err, MarketError::DiscreteCommodity);

        assert_eq!(f.market.offer_count(), 0);
        assert_eq!(f.market.tradeables().count(), 0);
    }

    #[test]
    fn test_remove_single_offer() {
        let mut f = Fixture::new();
        let (agent, account) = f.seller(1, GoodType::Coal, 10.0);
        let cheap = f
            .market
            .place_selling_offer(&f.bank, GoodType::Coal, agent, account, 5.0, 1.0)
            .unwrap();
        f.market
            .place_selling_offer(&f.bank, GoodType::Coal, agent, account, 5.0, 2.0)
            .unwrap();

        let removed = f.market.remove_selling_offer(cheap).unwrap();
        assert_eq!(removed.price_per_unit, 1.0);
        assert_eq!(f.market.get_price(Currency::Euro, GoodType::Coal), 2.0);
        assert_eq!(
            f.market.remove_selling_offer(cheap),
            Err(MarketError::OfferNotFound(cheap))
        );
        assert_eq!(f.market.offers_of(agent).len(), 1);
    }

    #[test]
    fn test_failed_goods_leg_refunds_buyer() {
        let mut f = Fixture::new();
        // Seller offers more than it holds
        let (seller, seller_account) = f.seller(1, GoodType::Iron, 2.0);
        let offer = f
            .market
            .place_selling_offer(&f.bank, GoodType::Iron, seller, seller_account, 10.0, 3.0)
            .unwrap();

        let buyer = AgentId::new(2);
        let buyer_account = f.bank.open_account(buyer, Currency::Euro, true);

        let err = f
            .market
            .buy(
                &mut f.bank,
                &mut f.register,
                GoodType::Iron,
                &PurchaseLimits::amount(5.0),
                buyer,
                buyer_account,
            )
            .unwrap_err();

        let MarketError::Settlement {
            settled_amount,
            source,
            ..
        } = err
        else {
            panic!("expected settlement failure, got {err:?}");
        };
        assert_eq!(settled_amount, 0.0);
        assert!(matches!(source, SettlementError::InsufficientGoods { .. }));
        assert_eq!(f.bank.balance(buyer_account), Some(0.0));
        assert_eq!(f.bank.balance(seller_account), Some(0.0));
        assert_eq!(f.market.offer(offer).map(|o| o.remaining_amount), Some(10.0));
    }

    #[test]
    fn test_property_is_offered_once() {
        let mut f = Fixture::new();
        let company = AgentId::new(1);
        let company_account = f.bank.open_account(company, Currency::Euro, true);
        let share = f.register.issue(company, PropertyClass::Share);

        let first = f
            .market
            .place_property_offer(&f.bank, &f.register, share, company, company_account, 10.0)
            .unwrap();
        let err = f
            .market
            .place_property_offer(&f.bank, &f.register, share, company, company_account, 9.0)
            .unwrap_err();
        assert_eq!(
            err,
            MarketError::PropertyAlreadyOffered {
                property: share,
                offer: first,
            }
        );
        assert_eq!(f.market.offer_count(), 1);

        let buyer = AgentId::new(2);
        let buyer_account = f.bank.open_account(buyer, Currency::Euro, true);
        let receipt = f
            .market
            .buy(
                &mut f.bank,
                &mut f.register,
                PropertyClass::Share,
                &PurchaseLimits::amount(2.0),
                buyer,
                buyer_account,
            )
            .unwrap();
        assert_eq!(receipt.amount(), 1.0);
        assert_eq!(f.register.property_owner(share), Some(buyer));
        assert_eq!(f.market.offer_count(), 0);

        // Withdrawn or sold, the unit can be listed again by its new owner
        f.market
            .place_property_offer(&f.bank, &f.register, share, buyer, buyer_account, 12.0)
            .unwrap();
    }

    #[test]
    fn test_buyer_currency_must_match_market() {
        let mut f = Fixture::new();
        let (seller, seller_account) = f.seller(1, GoodType::Wheat, 10.0);
        f.market
            .place_selling_offer(&f.bank, GoodType::Wheat, seller, seller_account, 10.0, 1.0)
            .unwrap();

        let buyer = AgentId::new(2);
        let dollars = f.bank.open_account(buyer, Currency::UsDollar, true);
        let receipt = f
            .market
            .buy(
                &mut f.bank,
                &mut f.register,
                GoodType::Wheat,
                &PurchaseLimits::amount(1.0),
                buyer,
                dollars,
            )
            .unwrap();

        // The dollar market for wheat is empty
        assert_eq!(receipt.amount(), 0.0);
        assert!(receipt.average_price().is_nan());
        assert_eq!(f.market.total_amount(Currency::Euro, GoodType::Wheat), 10.0);
    }
}

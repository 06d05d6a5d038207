use serde::{Deserialize, Serialize};
use slotmap::KeyData;
use tsify_next::Tsify;
use wasm_bindgen::prelude::*;

mod config;
mod error;
mod ledger;
mod market;
mod monetary_policy;
mod statistics;
mod types;

pub use config::*;
pub use error::*;
pub use ledger::*;
pub use market::*;
pub use monetary_policy::*;
pub use statistics::*;
pub use types::*;

// ============================================================================
// WASM API - Market simulation
// ============================================================================

/// A market together with in-memory bank accounts, goods holdings and the
/// central bank's price statistics for one home currency.
#[wasm_bindgen]
pub struct MarketSimulation {
    market: MarketService,
    bank: InMemoryBank,
    registry: PropertyRegister,
    statistical_office: StatisticalOffice,
    policy: KeyInterestRatePolicy,
    key_interest_rate: f64,
}

#[wasm_bindgen]
impl MarketSimulation {
    #[wasm_bindgen(constructor)]
    pub fn new(home_currency: Currency) -> Self {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        Self::with_configs(
            home_currency,
            MarketConfig::default(),
            StatisticalOfficeConfig::default(),
            CentralBankConfig::default(),
        )
    }

    /// Build from JSON configs; missing fields take their defaults
    #[wasm_bindgen]
    pub fn from_json_configs(
        home_currency: Currency,
        market_json: &str,
        statistics_json: &str,
        central_bank_json: &str,
    ) -> Result<MarketSimulation, JsError> {
        console_error_panic_hook::set_once();

        Ok(Self::with_configs(
            home_currency,
            MarketConfig::from_json(market_json)?,
            StatisticalOfficeConfig::from_json(statistics_json)?,
            CentralBankConfig::from_json(central_bank_json)?,
        ))
    }

    // === Accounts & holdings ===

    #[wasm_bindgen]
    pub fn open_account(&mut self, agent: u64, currency: Currency, overdraft_permitted: bool) -> u64 {
        self.bank
            .open_account(AgentId::new(agent), currency, overdraft_permitted)
            .to_u64()
    }

    #[wasm_bindgen]
    pub fn deposit(&mut self, account: u64, amount: f64) -> Result<(), JsError> {
        self.bank.deposit(account_id(account), amount)?;
        Ok(())
    }

    /// Balance of an account, `NaN` if unknown
    #[wasm_bindgen]
    pub fn account_balance(&self, account: u64) -> f64 {
        BankAccounts::balance(&self.bank, account_id(account)).unwrap_or(f64::NAN)
    }

    #[wasm_bindgen]
    pub fn credit_goods(&mut self, agent: u64, good: GoodType, amount: f64) {
        self.registry.increment(AgentId::new(agent), good, amount);
    }

    #[wasm_bindgen]
    pub fn goods_balance(&self, agent: u64, good: GoodType) -> f64 {
        PropertyRegistry::balance(&self.registry, AgentId::new(agent), good)
    }

    #[wasm_bindgen]
    pub fn issue_property(&mut self, issuer: u64, class: PropertyClass) -> u64 {
        self.registry.issue(AgentId::new(issuer), class).to_u64()
    }

    /// Owner of a property unit, `undefined` if unknown
    #[wasm_bindgen]
    pub fn property_owner(&self, property: u64) -> Option<u64> {
        self.registry
            .property_owner(property_id(property))
            .map(|owner| owner.to_u64())
    }

    // === Offers ===

    #[wasm_bindgen]
    pub fn place_selling_offer(
        &mut self,
        agent: u64,
        account: u64,
        good: GoodType,
        amount: f64,
        price_per_unit: f64,
    ) -> Result<u64, JsError> {
        let id = self.market.place_selling_offer(
            &self.bank,
            good,
            AgentId::new(agent),
            account_id(account),
            amount,
            price_per_unit,
        )?;
        Ok(id.to_u64())
    }

    #[wasm_bindgen]
    pub fn place_currency_offer(
        &mut self,
        agent: u64,
        account: u64,
        currency: Currency,
        amount: f64,
        price_per_unit: f64,
        foreign_account: u64,
    ) -> Result<u64, JsError> {
        let id = self.market.place_currency_offer(
            &self.bank,
            currency,
            AgentId::new(agent),
            account_id(account),
            amount,
            price_per_unit,
            account_id(foreign_account),
        )?;
        Ok(id.to_u64())
    }

    #[wasm_bindgen]
    pub fn place_property_offer(
        &mut self,
        agent: u64,
        account: u64,
        property: u64,
        price_per_unit: f64,
    ) -> Result<u64, JsError> {
        let id = self.market.place_property_offer(
            &self.bank,
            &self.registry,
            property_id(property),
            AgentId::new(agent),
            account_id(account),
            price_per_unit,
        )?;
        Ok(id.to_u64())
    }

    /// Returns false if the offer was already gone
    #[wasm_bindgen]
    pub fn remove_selling_offer(&mut self, offer: u64) -> bool {
        let id = OfferId::from(KeyData::from_ffi(offer));
        self.market.remove_selling_offer(id).is_ok()
    }

    #[wasm_bindgen]
    pub fn remove_all_selling_offers(&mut self, agent: u64) -> u32 {
        self.market.remove_all_selling_offers(AgentId::new(agent)) as u32
    }

    // === Prices ===

    #[wasm_bindgen]
    pub fn get_price(&self, currency: Currency, commodity: Commodity) -> f64 {
        self.market.get_price(currency, commodity)
    }

    #[wasm_bindgen]
    pub fn get_average_price(&self, currency: Currency, commodity: Commodity, amount: f64) -> f64 {
        self.market.get_average_price(currency, commodity, amount)
    }

    #[wasm_bindgen]
    pub fn get_marginal_price(&self, currency: Currency, commodity: Commodity, amount: f64) -> f64 {
        self.market.get_marginal_price(currency, commodity, amount)
    }

    #[wasm_bindgen]
    pub fn get_price_function(
        &self,
        currency: Currency,
        commodity: Commodity,
        max_budget: f64,
    ) -> PriceFunctionSnapshot {
        let function = self.market.get_market_price_function(currency, commodity);
        PriceFunctionSnapshot {
            spot_price: function.spot_price(),
            depth: function.total_amount(),
            intervals: function.get_analytical_price_function_parameters(max_budget),
        }
    }

    /// Average price sampled at `samples` evenly spaced amounts up to `max_amount`,
    /// for charting
    #[wasm_bindgen]
    pub fn get_price_curve(
        &self,
        currency: Currency,
        commodity: Commodity,
        max_amount: f64,
        samples: u32,
    ) -> js_sys::Float64Array {
        let function = self.market.get_market_price_function(currency, commodity);
        let curve = sample_curve(&function, max_amount, samples);
        js_sys::Float64Array::from(curve.as_slice())
    }

    #[wasm_bindgen]
    pub fn get_market_snapshot(&self) -> MarketSnapshot {
        let books = self
            .market
            .tradeables()
            .filter_map(|tradeable| self.market.book(tradeable))
            .map(|book| {
                let function = self
                    .market
                    .get_market_price_function(book.tradeable.currency, book.tradeable.commodity);
                BookSnapshot {
                    tradeable: book.tradeable,
                    offers: book.len() as u32,
                    depth: function.total_amount(),
                    spot_price: function.spot_price(),
                }
            })
            .collect();
        MarketSnapshot {
            books,
            price_index: self.statistical_office.price_index(),
            key_interest_rate: self.key_interest_rate,
        }
    }

    // === Buying ===

    /// Offers a purchase would draw from, without settling anything
    #[wasm_bindgen]
    pub fn find_best_fulfillment_set(
        &self,
        currency: Currency,
        commodity: Commodity,
        limits: PurchaseLimits,
    ) -> Result<JsValue, JsError> {
        let set = self
            .market
            .find_best_fulfillment_set(currency, commodity, &limits);
        Ok(serde_wasm_bindgen::to_value(&set)?)
    }

    /// Buy a good or property with the currency of `account`
    #[wasm_bindgen]
    pub fn buy(
        &mut self,
        agent: u64,
        account: u64,
        commodity: Commodity,
        limits: PurchaseLimits,
    ) -> Result<PurchaseSnapshot, JsError> {
        let receipt = self.market.buy(
            &mut self.bank,
            &mut self.registry,
            commodity,
            &limits,
            AgentId::new(agent),
            account_id(account),
        )?;
        Ok(PurchaseSnapshot::from(&receipt))
    }

    #[wasm_bindgen]
    pub fn buy_currency(
        &mut self,
        agent: u64,
        account: u64,
        currency: Currency,
        limits: PurchaseLimits,
        foreign_account: u64,
    ) -> Result<PurchaseSnapshot, JsError> {
        let receipt = self.market.buy_currency(
            &mut self.bank,
            &mut self.registry,
            currency,
            &limits,
            AgentId::new(agent),
            account_id(account),
            account_id(foreign_account),
        )?;
        Ok(PurchaseSnapshot::from(&receipt))
    }

    // === Central bank ===

    /// Record the current spot prices of the home currency markets
    #[wasm_bindgen]
    pub fn take_price_snapshot(&mut self) {
        self.statistical_office.take_snapshot(&self.market);
    }

    /// Close a simulated day: refresh the price index and set the key interest rate.
    /// Returns the new rate.
    #[wasm_bindgen]
    pub fn close_day(&mut self, date: SimulationDate) -> f64 {
        self.statistical_office.recalculate_average_prices();
        self.statistical_office.recalculate_price_index();
        self.key_interest_rate = self.policy.effective_key_interest_rate(
            self.statistical_office.price_index(),
            date,
            self.key_interest_rate,
        );
        self.key_interest_rate
    }

    #[wasm_bindgen]
    pub fn price_index(&self) -> f64 {
        self.statistical_office.price_index()
    }

    #[wasm_bindgen]
    pub fn key_interest_rate(&self) -> f64 {
        self.key_interest_rate
    }
}

impl MarketSimulation {
    pub fn with_configs(
        home_currency: Currency,
        market: MarketConfig,
        statistics: StatisticalOfficeConfig,
        central_bank: CentralBankConfig,
    ) -> Self {
        Self {
            market: MarketService::with_config(market),
            bank: InMemoryBank::new(),
            registry: PropertyRegister::new(),
            statistical_office: StatisticalOffice::new(home_currency, statistics),
            policy: KeyInterestRatePolicy::new(central_bank),
            key_interest_rate: central_bank.base_key_interest_rate,
        }
    }

    pub fn market(&self) -> &MarketService {
        &self.market
    }

    pub fn bank(&self) -> &InMemoryBank {
        &self.bank
    }

    pub fn registry(&self) -> &PropertyRegister {
        &self.registry
    }
}

fn account_id(id: u64) -> BankAccountId {
    BankAccountId::from(KeyData::from_ffi(id))
}

fn property_id(id: u64) -> PropertyId {
    PropertyId::from(KeyData::from_ffi(id))
}

fn sample_curve(function: &MarketPriceFunction, max_amount: f64, samples: u32) -> Vec<f64> {
    if samples == 0 {
        return Vec::new();
    }
    let step = max_amount / samples as f64;
    (1..=samples)
        .map(|i| function.get_price(step * i as f64))
        .collect()
}

// ============================================================================
// Snapshots for rendering
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct MarketSnapshot {
    pub books: Vec<BookSnapshot>,
    pub price_index: f64,
    pub key_interest_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct BookSnapshot {
    pub tradeable: Tradeable,
    pub offers: u32,
    pub depth: f64,
    pub spot_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct PriceFunctionSnapshot {
    pub spot_price: f64,
    pub depth: f64,
    pub intervals: Vec<PriceFunctionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct PurchaseSnapshot {
    pub amount: f64,
    pub cost: f64,
    pub average_price: f64,
    pub offers_filled: u32,
}

impl From<&PurchaseReceipt> for PurchaseSnapshot {
    fn from(receipt: &PurchaseReceipt) -> Self {
        Self {
            amount: receipt.amount(),
            cost: receipt.cost(),
            average_price: receipt.average_price(),
            offers_filled: receipt.settled.len() as u32,
        }
    }
}

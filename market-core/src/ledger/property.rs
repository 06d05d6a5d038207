use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use super::PropertyRegistry;
use crate::error::SettlementError;
use crate::types::{AgentId, Amount, GoodType, PropertyClass, PropertyId};

/// A discrete property unit (one share, one bond).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub class: PropertyClass,
    pub owner: AgentId,
    /// The agent that emitted it, e.g. the joint stock company behind a share
    pub issuer: AgentId,
}

/// Holdings of an agent in divisible goods
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub items: HashMap<GoodType, Amount>,
}

impl Inventory {
    pub fn add(&mut self, good: GoodType, amount: Amount) {
        *self.items.entry(good).or_insert(0.0) += amount;
    }

    pub fn get(&self, good: GoodType) -> Amount {
        self.items.get(&good).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyRegister {
    pub inventories: HashMap<AgentId, Inventory>,
    pub properties: SlotMap<PropertyId, Property>,
}

impl PropertyRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit freshly produced (or endowed) goods to an agent
    pub fn increment(&mut self, owner: AgentId, good: GoodType, amount: Amount) {
        self.inventories.entry(owner).or_default().add(good, amount);
    }

    /// Issue a new property unit owned by its issuer
    pub fn issue(&mut self, issuer: AgentId, class: PropertyClass) -> PropertyId {
        self.properties.insert(Property {
            class,
            owner: issuer,
            issuer,
        })
    }

    /// Total holdings of a good across all agents
    pub fn total(&self, good: GoodType) -> Amount {
        self.inventories.values().map(|inv| inv.get(good)).sum()
    }
}

impl PropertyRegistry for PropertyRegister {
    fn balance(&self, owner: AgentId, good: GoodType) -> Amount {
        self.inventories
            .get(&owner)
            .map(|inv| inv.get(good))
            .unwrap_or(0.0)
    }

    fn transfer_goods(
        &mut self,
        from: AgentId,
        to: AgentId,
        good: GoodType,
        amount: Amount,
    ) -> Result<(), SettlementError> {
        if amount < 0.0 || !amount.is_finite() {
            return Err(SettlementError::InvalidAmount(amount));
        }
        let available = self.balance(from, good);
        if available < amount {
            return Err(SettlementError::InsufficientGoods {
                owner: from,
                available,
                requested: amount,
            });
        }
        self.inventories.entry(from).or_default().add(good, -amount);
        self.inventories.entry(to).or_default().add(good, amount);
        Ok(())
    }

    fn property_class(&self, property: PropertyId) -> Option<PropertyClass> {
        self.properties.get(property).map(|p| p.class)
    }

    fn property_owner(&self, property: PropertyId) -> Option<AgentId> {
        self.properties.get(property).map(|p| p.owner)
    }

    fn transfer_property(
        &mut self,
        property: PropertyId,
        from: AgentId,
        to: AgentId,
    ) -> Result<(), SettlementError> {
        let prop = self
            .properties
            .get_mut(property)
            .ok_or(SettlementError::UnknownProperty(property))?;
        if prop.owner != from {
            return Err(SettlementError::NotOwner {
                property,
                agent: from,
            });
        }
        prop.owner = to;
        Ok(())
    }

    fn properties(&self, owner: AgentId, class: PropertyClass) -> Vec<PropertyId> {
        self.properties
            .iter()
            .filter(|(_, p)| p.owner == owner && p.class == class)
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goods_transfer_conserves_total() {
        let mut register = PropertyRegister::new();
        let (a, b) = (AgentId::new(1), AgentId::new(2));
        register.increment(a, GoodType::Wheat, 10.0);

        register.transfer_goods(a, b, GoodType::Wheat, 4.0).unwrap();
        assert_eq!(register.balance(a, GoodType::Wheat), 6.0);
        assert_eq!(register.balance(b, GoodType::Wheat), 4.0);
        assert_eq!(register.total(GoodType::Wheat), 10.0);

        let err = register
            .transfer_goods(b, a, GoodType::Wheat, 5.0)
            .unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientGoods { .. }));
    }

    #[test]
    fn test_property_ownership() {
        let mut register = PropertyRegister::new();
        let (company, household) = (AgentId::new(1), AgentId::new(2));
        let share = register.issue(company, PropertyClass::Share);
        register.issue(company, PropertyClass::Bond);

        assert_eq!(register.properties(company, PropertyClass::Share), vec![share]);
        assert!(register.transfer_property(share, household, company).is_err());

        register.transfer_property(share, company, household).unwrap();
        assert_eq!(register.property_owner(share), Some(household));
        assert!(register.properties(company, PropertyClass::Share).is_empty());
        assert_eq!(register.properties(company, PropertyClass::Bond).len(), 1);
    }
}

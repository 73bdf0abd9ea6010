use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Catalog key of the per-tree donation add-on.
pub const DONATION_TREE_KEY: &str = "donation-tree";

/// Fixed unit price of one donated tree.
pub const DONATION_TREE_UNIT_MINOR: i64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Price {
    Free,
    Minor(i64),
}

impl Price {
    /// Amount to charge; `None` when nothing is owed.
    pub fn chargeable(self) -> Option<i64> {
        match self {
            Price::Free => None,
            Price::Minor(amount) if amount > 0 => Some(amount),
            Price::Minor(_) => None,
        }
    }
}

/// Point-in-time view of the catalog. A key that is absent has no
/// configured price.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot(pub HashMap<String, Price>);

impl PriceSnapshot {
    pub fn get(&self, key: &str) -> Option<Price> {
        self.0.get(key).copied()
    }

    pub fn insert(&mut self, key: impl Into<String>, price: Price) {
        self.0.insert(key.into(), price);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

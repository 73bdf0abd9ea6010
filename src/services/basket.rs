//! Checkout basket construction. Pure: no I/O, prices come in as a snapshot.

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::{
    KindDescriptor, PayableOption, PriceSnapshot, DONATION_TREE_KEY, DONATION_TREE_UNIT_MINOR,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub key: String,
    pub name: String,
    pub description: String,
    pub unit_amount: i64,
    pub quantity: i64,
}

impl LineItem {
    pub fn total(&self) -> i64 {
        self.unit_amount * self.quantity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basket {
    pub items: Vec<LineItem>,
}

impl Basket {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total(&self) -> i64 {
        self.items.iter().map(LineItem::total).sum()
    }
}

/// Builds the ordered basket for a contribution. An empty basket means the
/// contribution publishes for free.
pub fn build_basket(
    descriptor: &dyn KindDescriptor,
    option: Option<&PayableOption>,
    donation_count: i32,
    prices: &PriceSnapshot,
) -> Result<Basket, ServiceError> {
    let mut items = Vec::new();

    match option {
        Some(option) => {
            let key = option.key();
            let price = prices.get(&key).ok_or_else(|| {
                ServiceError::InvalidPriceConfiguration(format!("no price configured for {}", key))
            })?;
            match price.chargeable() {
                Some(amount) => {
                    let (name, description) = descriptor.line_item();
                    items.push(LineItem {
                        key,
                        name: name.to_string(),
                        description: description.to_string(),
                        unit_amount: amount,
                        quantity: 1,
                    });
                }
                None if descriptor.option_required() => {
                    return Err(ServiceError::InvalidPriceConfiguration(format!(
                        "{} must carry a positive price, found {:?}",
                        key, price
                    )));
                }
                None => {}
            }
        }
        None if descriptor.option_required() => {
            return Err(ServiceError::InvalidInput(format!(
                "a {} requires a payable option",
                descriptor.kind()
            )));
        }
        None => {}
    }

    if donation_count < 0 {
        return Err(ServiceError::InvalidInput(
            "donation count cannot be negative".to_string(),
        ));
    }
    if donation_count > 0 {
        if !descriptor.allows_donation_trees() {
            return Err(ServiceError::InvalidInput(format!(
                "a {} cannot carry tree donations",
                descriptor.kind()
            )));
        }
        items.push(LineItem {
            key: DONATION_TREE_KEY.to_string(),
            name: "Memorial Tree Donation".to_string(),
            description: "Donation to plant trees in memory of your loved one".to_string(),
            unit_amount: DONATION_TREE_UNIT_MINOR,
            quantity: i64::from(donation_count),
        });
    }

    Ok(Basket { items })
}

/// Seeded catalog with every option at its default price.
pub fn default_snapshot() -> PriceSnapshot {
    let mut snapshot = PriceSnapshot::default();
    for option in PayableOption::all() {
        snapshot.insert(option.key(), option.default_price());
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::contribution::ContributionKind;
    use crate::models::{descriptor, Decoration, Price, Tribute, Wreath};
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn option_and_trees_sum() {
        let option = PayableOption::Decoration(Decoration::GoldenReverie);
        let mut prices = PriceSnapshot::default();
        prices.insert(option.key(), Price::Minor(500));

        let basket =
            build_basket(descriptor(ContributionKind::Memory), Some(&option), 3, &prices).unwrap();
        assert_eq!(basket.items.len(), 2);
        assert_eq!(basket.items[0].name, "Memory Decoration");
        assert_eq!(basket.items[1].quantity, 3);
        assert_eq!(basket.total(), 800);
    }

    #[test]
    fn nothing_selected_is_free() {
        let basket = build_basket(
            descriptor(ContributionKind::Condolence),
            None,
            0,
            &PriceSnapshot::default(),
        )
        .unwrap();
        assert!(basket.is_empty());
        assert_eq!(basket.total(), 0);
    }

    #[test]
    fn free_sentinel_produces_no_line() {
        let option = PayableOption::Tribute(Tribute::Default);
        let basket = build_basket(
            descriptor(ContributionKind::Memory),
            Some(&option),
            0,
            &default_snapshot(),
        )
        .unwrap();
        assert!(basket.is_empty());
    }

    #[test]
    fn unconfigured_price_is_an_error() {
        let option = PayableOption::Decoration(Decoration::IvoryWhisper);
        assert_matches!(
            build_basket(
                descriptor(ContributionKind::Condolence),
                Some(&option),
                0,
                &PriceSnapshot::default()
            ),
            Err(ServiceError::InvalidPriceConfiguration(_))
        );
    }

    #[test]
    fn free_wreath_is_an_error() {
        let option = PayableOption::Wreath(Wreath::Silver);
        let mut prices = PriceSnapshot::default();
        prices.insert(option.key(), Price::Free);
        assert_matches!(
            build_basket(descriptor(ContributionKind::Donation), Some(&option), 0, &prices),
            Err(ServiceError::InvalidPriceConfiguration(_))
        );
    }

    #[test]
    fn wreath_is_priced_directly() {
        let option = PayableOption::Wreath(Wreath::Gold);
        let basket = build_basket(
            descriptor(ContributionKind::Donation),
            Some(&option),
            0,
            &default_snapshot(),
        )
        .unwrap();
        assert_eq!(basket.total(), 10_000);
        assert_eq!(basket.items[0].name, "Memorial Donation");
    }

    #[test]
    fn donation_rejects_trees() {
        let option = PayableOption::Wreath(Wreath::Gold);
        assert_matches!(
            build_basket(
                descriptor(ContributionKind::Donation),
                Some(&option),
                2,
                &default_snapshot()
            ),
            Err(ServiceError::InvalidInput(_))
        );
    }

    proptest! {
        #[test]
        fn total_is_sum_of_lines(price in 1i64..100_000, trees in 0i32..1_000) {
            let option = PayableOption::Decoration(Decoration::SolariaBloom);
            let mut prices = PriceSnapshot::default();
            prices.insert(option.key(), Price::Minor(price));
            let basket = build_basket(
                descriptor(ContributionKind::Memory),
                Some(&option),
                trees,
                &prices,
            ).unwrap();
            let expected = price + i64::from(trees) * DONATION_TREE_UNIT_MINOR;
            prop_assert_eq!(basket.total(), expected);
            prop_assert_eq!(basket.items.len(), if trees > 0 { 2 } else { 1 });
        }
    }
}

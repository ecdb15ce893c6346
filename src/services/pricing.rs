//! Pricing resolver for the checkout pipeline.
//!
//! Pure and deterministic: the same computation backs the client cart
//! preview and the authoritative server-side checkout, so it must be free of
//! network and storage access. When a stale client catalog disagrees with the
//! server, the server quote wins.

use crate::entities::course;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Which price a line item was charged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PricingTier {
    Standard,
    Loyalty,
}

impl PricingTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingTier::Standard => "Standard",
            PricingTier::Loyalty => "Loyalty",
        }
    }
}

/// One priced line of a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedItem {
    pub course_id: String,
    pub title: String,
    pub unit_price: Decimal,
    pub tier: PricingTier,
}

/// A fully priced order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub items: Vec<PricedItem>,
    pub total: Decimal,
}

/// Resolves the charge price for a single course. The loyalty price applies
/// only when the purchaser is loyal and the discount is set, positive, and
/// strictly below the list price; anything else falls back to list price.
pub fn resolve_unit_price(course: &course::Model, is_loyal: bool) -> (Decimal, PricingTier) {
    if is_loyal {
        if let Some(discounted) = course.discounted_price {
            if discounted > Decimal::ZERO && discounted < course.price {
                return (discounted, PricingTier::Loyalty);
            }
        }
    }
    (course.price, PricingTier::Standard)
}

/// Prices every course in the order and sums the total.
pub fn resolve_quote(courses: &[course::Model], is_loyal: bool) -> Quote {
    let items: Vec<PricedItem> = courses
        .iter()
        .map(|course| {
            let (unit_price, tier) = resolve_unit_price(course, is_loyal);
            PricedItem {
                course_id: course.id.clone(),
                title: course.title.clone(),
                unit_price,
                tier,
            }
        })
        .collect();

    let total = items.iter().map(|item| item.unit_price).sum();

    Quote { items, total }
}

/// Converts a major-unit amount to minor units (cents), rounding midpoints
/// away from zero the way the processor expects. `None` when the amount does
/// not fit an `i64`.
pub fn to_minor_units(amount: &Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn course(id: &str, price: Decimal, discounted: Option<Decimal>) -> course::Model {
        course::Model {
            id: id.to_string(),
            title: format!("Course {}", id),
            description: String::new(),
            image: None,
            price,
            discounted_price: discounted,
            lessons: serde_json::json!([]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn new_purchaser_always_pays_list_price() {
        let c = course("c1", dec!(20), Some(dec!(10)));
        let (price, tier) = resolve_unit_price(&c, false);
        assert_eq!(price, dec!(20));
        assert_eq!(tier, PricingTier::Standard);
    }

    #[test]
    fn loyal_purchaser_gets_discount_when_below_list() {
        let c = course("c1", dec!(20), Some(dec!(10)));
        let (price, tier) = resolve_unit_price(&c, true);
        assert_eq!(price, dec!(10));
        assert_eq!(tier, PricingTier::Loyalty);
    }

    #[test]
    fn discount_at_or_above_list_price_is_ignored() {
        let equal = course("c1", dec!(20), Some(dec!(20)));
        assert_eq!(resolve_unit_price(&equal, true).0, dec!(20));

        let above = course("c2", dec!(20), Some(dec!(25)));
        assert_eq!(resolve_unit_price(&above, true).0, dec!(20));
    }

    #[test]
    fn zero_or_absent_discount_is_disabled() {
        let zero = course("c1", dec!(20), Some(dec!(0)));
        assert_eq!(resolve_unit_price(&zero, true).0, dec!(20));

        let absent = course("c2", dec!(20), None);
        assert_eq!(resolve_unit_price(&absent, true).0, dec!(20));
    }

    #[test]
    fn quote_sums_unit_prices() {
        let courses = vec![
            course("c1", dec!(30.00), None),
            course("c2", dec!(45.00), Some(dec!(40.00))),
        ];

        let standard = resolve_quote(&courses, false);
        assert_eq!(standard.total, dec!(75.00));
        assert!(standard
            .items
            .iter()
            .all(|i| i.tier == PricingTier::Standard));

        let loyal = resolve_quote(&courses, true);
        assert_eq!(loyal.total, dec!(70.00));
        assert_eq!(loyal.items[1].tier, PricingTier::Loyalty);
    }

    #[test]
    fn minor_units_round_midpoints_away_from_zero() {
        assert_eq!(to_minor_units(&dec!(30.00)), Some(3000));
        assert_eq!(to_minor_units(&dec!(19.995)), Some(2000));
        assert_eq!(to_minor_units(&dec!(19.994)), Some(1999));
    }

    proptest! {
        /// The resolved price never exceeds the list price and never goes
        /// below a valid discount.
        #[test]
        fn resolved_price_is_bounded(
            price_cents in 0i64..10_000_00,
            discount_cents in proptest::option::of(0i64..10_000_00),
            is_loyal: bool,
        ) {
            let price = Decimal::new(price_cents, 2);
            let discounted = discount_cents.map(|c| Decimal::new(c, 2));
            let c = course("p", price, discounted);

            let (resolved, _) = resolve_unit_price(&c, is_loyal);
            prop_assert!(resolved <= price);
            if let Some(d) = discounted {
                if d > Decimal::ZERO && d < price {
                    prop_assert!(resolved >= d.min(price));
                }
            }
            if !is_loyal {
                prop_assert_eq!(resolved, price);
            }
        }

        #[test]
        fn quote_total_equals_item_sum(
            prices in proptest::collection::vec(0i64..1_000_00, 0..8),
            is_loyal: bool,
        ) {
            let courses: Vec<course::Model> = prices
                .iter()
                .enumerate()
                .map(|(i, cents)| course(&format!("c{}", i), Decimal::new(*cents, 2), None))
                .collect();

            let quote = resolve_quote(&courses, is_loyal);
            let sum: Decimal = quote.items.iter().map(|i| i.unit_price).sum();
            prop_assert_eq!(quote.total, sum);
        }
    }
}

//! Per-dealer shipment arithmetic.
//!
//! A shipment of `no_bags` 50 kg bags travelling `distance_km` is billed either
//! per tonne (MT) or per tonne-kilometre (MTK), at the rate of its slab.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{validation, BillingResult};

/// 50 kg bags.
pub const BAG_WEIGHT_TONNES: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub mt: Decimal,
    pub mtk: Decimal,
    pub amount: Decimal,
}

impl Shipment {
    /// Zero-distance lines billed on the MTK basis come out at zero.
    pub fn is_zero_amount(&self) -> bool {
        self.amount.is_zero()
    }
}

pub fn compute_shipment(no_bags: u32, distance_km: Decimal, rate: Decimal, is_mtk: bool) -> Shipment {
    let mt = Decimal::from(no_bags) * BAG_WEIGHT_TONNES;
    let mtk = mt * distance_km;
    let amount = rate * if is_mtk { mtk } else { mt };
    Shipment { mt, mtk, amount }
}

/// Bag counts come from free-text form fields.
pub fn parse_bags(input: &str) -> BillingResult<u32> {
    let s = input.trim();
    if s.is_empty() {
        return Err(validation("number of bags is required"));
    }
    s.parse::<u32>()
        .map_err(|_| validation(format!("number of bags must be a non-negative whole number, got {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn mtk_basis() {
        let s = compute_shipment(20, d("5"), d("100"), true);
        assert_eq!(s.mt, d("1.00"));
        assert_eq!(s.mtk, d("5.00"));
        assert_eq!(s.amount, d("500.00"));

        let s = compute_shipment(10, d("5"), d("100"), true);
        assert_eq!(s.mt, d("0.50"));
        assert_eq!(s.mtk, d("2.50"));
        assert_eq!(s.amount, d("250.00"));
    }

    #[test]
    fn mt_basis_ignores_distance() {
        let s = compute_shipment(30, d("47.5"), d("210.40"), false);
        assert_eq!(s.mt, d("1.5"));
        assert_eq!(s.mtk, d("71.25"));
        assert_eq!(s.amount, d("315.60"));
    }

    #[test]
    fn mt_is_exact_for_every_bag_count() {
        for bags in [0u32, 1, 3, 7, 19, 333, 1001, 99_999] {
            let s = compute_shipment(bags, d("1"), d("1"), false);
            assert_eq!(s.mt * Decimal::from(20), Decimal::from(bags));
        }
    }

    #[test]
    fn zero_distance_garage_line() {
        let s = compute_shipment(40, Decimal::ZERO, d("100"), true);
        assert_eq!(s.mt, d("2"));
        assert!(s.mtk.is_zero());
        assert!(s.is_zero_amount());
    }

    #[test]
    fn bag_input_validation() {
        assert_eq!(parse_bags(" 25 ").unwrap(), 25);
        assert!(parse_bags("").is_err());
        assert!(parse_bags("-3").is_err());
        assert!(parse_bags("2.5").is_err());
        assert!(parse_bags("ten").is_err());
    }
}

//! Roll-ups of dealer lines: per range, per destination entry, and the slab
//! regrouping used by main bills.
//!
//! Totals are always recomputed from the full set of lines; nothing here is
//! updated incrementally.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calculator::Shipment;
use crate::money::{format_fixed, format_km};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_bags: u64,
    pub total_mt: Decimal,
    pub total_mtk: Decimal,
    pub total_amount: Decimal,
}

/// Totals of one range section.
pub type RangeTotals = Totals;
/// Totals of one destination entry: the sum of its range totals.
pub type EntryTotals = Totals;
/// Totals across every slab of a main bill.
pub type GrandTotal = Totals;

impl Totals {
    pub fn add_line(&mut self, no_bags: u32, shipment: &Shipment) {
        self.total_bags += u64::from(no_bags);
        self.total_mt += shipment.mt;
        self.total_mtk += shipment.mtk;
        self.total_amount += shipment.amount;
    }

    pub fn merge(&mut self, other: &Totals) {
        self.total_bags += other.total_bags;
        self.total_mt += other.total_mt;
        self.total_mtk += other.total_mtk;
        self.total_amount += other.total_amount;
    }

    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (u32, Shipment)>,
    {
        let mut t = Totals::default();
        for (bags, s) in rows {
            t.add_line(bags, &s);
        }
        t
    }

    pub fn sum<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = &'a Totals>,
    {
        let mut t = Totals::default();
        for p in parts {
            t.merge(p);
        }
        t
    }
}

/// Slab identity on a main bill. Two range entries that point at different slab
/// rows but share bracket, rate and basis land in the same section.
///
/// Field order gives the section order: `from_km`, `to_km`, then `rate`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlabKey {
    pub from_km: Decimal,
    pub to_km: Decimal,
    pub rate: Decimal,
    pub is_mtk: bool,
}

impl SlabKey {
    pub fn label(&self) -> String {
        format!(
            "{}-{} km @ Rs.{} per {}",
            format_km(self.from_km),
            format_km(self.to_km),
            format_fixed(self.rate),
            if self.is_mtk { "MTK" } else { "MT" }
        )
    }
}

/// One saved dealer row, flattened with the context a main bill needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillLine {
    pub entry_id: i64,
    pub entry_bill_number: String,
    pub destination_id: i64,
    pub destination_name: String,
    pub slab: SlabKey,
    pub dealer_id: i64,
    pub dealer_code: String,
    pub dealer_name: String,
    pub despatched_to: String,
    pub km: Decimal,
    pub no_bags: u32,
    pub mt: Decimal,
    pub mtk: Decimal,
    pub amount: Decimal,
    pub mda_number: String,
    pub date: String,
}

impl BillLine {
    fn shipment(&self) -> Shipment {
        Shipment {
            mt: self.mt,
            mtk: self.mtk,
            amount: self.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationGroup {
    pub destination_id: i64,
    pub destination_name: String,
    pub lines: Vec<BillLine>,
    pub subtotal: Totals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlabSection {
    pub slab: SlabKey,
    pub destinations: Vec<DestinationGroup>,
    pub subtotal: Totals,
}

pub fn group_by_slab(lines: Vec<BillLine>) -> Vec<SlabSection> {
    let mut slabs: BTreeMap<SlabKey, BTreeMap<(String, i64), Vec<BillLine>>> = BTreeMap::new();
    for line in lines {
        slabs
            .entry(line.slab.clone())
            .or_default()
            .entry((line.destination_name.clone(), line.destination_id))
            .or_default()
            .push(line);
    }

    slabs
        .into_iter()
        .map(|(slab, by_dest)| {
            let destinations: Vec<DestinationGroup> = by_dest
                .into_iter()
                .map(|((destination_name, destination_id), mut lines)| {
                    lines.sort_by(|a, b| {
                        a.dealer_name
                            .cmp(&b.dealer_name)
                            .then_with(|| a.dealer_code.cmp(&b.dealer_code))
                            .then(a.entry_id.cmp(&b.entry_id))
                    });
                    let subtotal = Totals::from_rows(lines.iter().map(|l| (l.no_bags, l.shipment())));
                    DestinationGroup {
                        destination_id,
                        destination_name,
                        lines,
                        subtotal,
                    }
                })
                .collect();
            let subtotal = Totals::sum(destinations.iter().map(|d| &d.subtotal));
            SlabSection {
                slab,
                destinations,
                subtotal,
            }
        })
        .collect()
}

pub fn grand_total(sections: &[SlabSection]) -> GrandTotal {
    Totals::sum(sections.iter().map(|s| &s.subtotal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::compute_shipment;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn slab(from: &str, to: &str, rate: &str) -> SlabKey {
        SlabKey {
            from_km: d(from),
            to_km: d(to),
            rate: d(rate),
            is_mtk: true,
        }
    }

    fn line(entry_id: i64, dest: (i64, &str), key: &SlabKey, dealer: &str, km: &str, bags: u32) -> BillLine {
        let s = compute_shipment(bags, d(km), key.rate, key.is_mtk);
        BillLine {
            entry_id,
            entry_bill_number: format!("B{entry_id}"),
            destination_id: dest.0,
            destination_name: dest.1.to_string(),
            slab: key.clone(),
            dealer_id: 0,
            dealer_code: dealer.to_uppercase(),
            dealer_name: dealer.to_string(),
            despatched_to: String::new(),
            km: d(km),
            no_bags: bags,
            mt: s.mt,
            mtk: s.mtk,
            amount: s.amount,
            mda_number: String::new(),
            date: "2024-04-01".to_string(),
        }
    }

    #[test]
    fn range_totals_sum_every_row() {
        let rows = vec![
            (20, compute_shipment(20, d("5"), d("100"), true)),
            (10, compute_shipment(10, d("5"), d("100"), true)),
        ];
        let t = RangeTotals::from_rows(rows);
        assert_eq!(t.total_bags, 30);
        assert_eq!(t.total_mt, d("1.50"));
        assert_eq!(t.total_mtk, d("7.50"));
        assert_eq!(t.total_amount, d("750.00"));
        assert_eq!(RangeTotals::from_rows(Vec::new()), Totals::default());
    }

    #[test]
    fn equal_slabs_merge_across_destinations() {
        let near = slab("0", "10", "100");
        // Same bracket and rate written with a different scale.
        let near_again = slab("0.0", "10.00", "100.00");
        let far = slab("11", "20", "80");

        let lines = vec![
            line(2, (2, "Vadakara"), &near_again, "zeta", "4", 10),
            line(1, (1, "Kannur"), &far, "beta", "15", 20),
            line(1, (1, "Kannur"), &near, "gamma", "5", 20),
            line(1, (1, "Kannur"), &near, "alpha", "5", 10),
        ];
        let sections = group_by_slab(lines);
        assert_eq!(sections.len(), 2);

        let first = &sections[0];
        assert_eq!(first.slab, near);
        assert_eq!(
            first.destinations.iter().map(|g| g.destination_name.as_str()).collect::<Vec<_>>(),
            vec!["Kannur", "Vadakara"]
        );
        assert_eq!(
            first.destinations[0].lines.iter().map(|l| l.dealer_name.as_str()).collect::<Vec<_>>(),
            vec!["alpha", "gamma"]
        );
        assert_eq!(first.destinations[0].subtotal.total_amount, d("750"));
        assert_eq!(first.destinations[1].subtotal.total_amount, d("200"));
        assert_eq!(first.subtotal.total_bags, 40);
        assert_eq!(first.subtotal.total_amount, d("950"));

        let grand = grand_total(&sections);
        assert_eq!(grand.total_bags, 60);
        assert_eq!(grand.total_amount, d("950") + d("1200"));
        assert_eq!(
            grand.total_amount,
            sections.iter().map(|s| s.subtotal.total_amount).sum::<Decimal>()
        );
    }

    #[test]
    fn basis_separates_sections() {
        let mtk = slab("0", "10", "100");
        let mt = SlabKey { is_mtk: false, ..mtk.clone() };
        let sections = group_by_slab(vec![
            line(1, (1, "Kannur"), &mtk, "a", "5", 10),
            line(1, (1, "Kannur"), &mt, "b", "5", 10),
        ]);
        assert_eq!(sections.len(), 2);
    }
}

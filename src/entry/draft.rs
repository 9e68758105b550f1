//! In-memory destination entry, edited freely before a save.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;
use uuid::Uuid;

use crate::aggregation::{EntryTotals, RangeTotals, Totals};
use crate::calculator::{compute_shipment, Shipment};
use crate::dealers::Dealer;
use crate::error::{validation, BillingResult, RowIssue};
use crate::money::format_km;
use crate::rates::RateSlab;

/// Identity of a range or dealer row for the lifetime of a session. Assigned on
/// creation and never derived from the row's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(Uuid);

impl RowKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RowKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryHeader {
    pub destination_id: Option<i64>,
    #[serde(default)]
    pub letter_note: String,
    pub bill_number: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    #[serde(default)]
    pub to_address: String,
}

/// Free-text columns of a dealer row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerRowDetails {
    #[serde(default)]
    pub despatched_to: String,
    #[serde(default)]
    pub mda_number: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerRow {
    pub key: RowKey,
    pub dealer_id: i64,
    pub dealer_code: String,
    pub dealer_name: String,
    /// Distance at the time the row was added.
    pub km: Decimal,
    pub no_bags: u32,
    #[serde(flatten)]
    pub details: DealerRowDetails,
}

impl DealerRow {
    pub fn shipment(&self, rate: Decimal, is_mtk: bool) -> Shipment {
        compute_shipment(self.no_bags, self.km, rate, is_mtk)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeDraft {
    pub key: RowKey,
    pub rate_range_id: i64,
    pub from_km: Decimal,
    pub to_km: Decimal,
    /// Rate and basis snapshot; later slab edits do not reach saved entries.
    pub rate: Decimal,
    pub is_mtk: bool,
    pub rows: Vec<DealerRow>,
}

impl RangeDraft {
    pub fn from_slab(slab: &RateSlab) -> Self {
        Self {
            key: RowKey::new(),
            rate_range_id: slab.id,
            from_km: slab.from_km,
            to_km: slab.to_km,
            rate: slab.rate,
            is_mtk: slab.is_mtk,
            rows: Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{} km", format_km(self.from_km), format_km(self.to_km))
    }

    pub fn add_dealer(&mut self, dealer: &Dealer, no_bags: u32, details: DealerRowDetails) -> BillingResult<RowKey> {
        let km = match dealer.distance_km {
            Some(km) if self.from_km <= km && km <= self.to_km => km,
            _ => {
                return Err(RowIssue::DealerOutsideSlab {
                    dealer_code: dealer.code.clone(),
                    slab: self.label(),
                }
                .into())
            }
        };
        if self.rows.iter().any(|r| r.dealer_id == dealer.id) {
            return Err(RowIssue::DuplicateDealer {
                dealer_code: dealer.code.clone(),
            }
            .into());
        }

        let mut details = details;
        if details.despatched_to.trim().is_empty() {
            details.despatched_to = dealer.despatch_label();
        }
        let row = DealerRow {
            key: RowKey::new(),
            dealer_id: dealer.id,
            dealer_code: dealer.code.clone(),
            dealer_name: dealer.name.clone(),
            km,
            no_bags,
            details,
        };
        let key = row.key;
        self.rows.push(row);
        Ok(key)
    }

    pub fn row(&self, key: RowKey) -> Option<&DealerRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    pub fn update_dealer_row(&mut self, key: RowKey, no_bags: u32, details: DealerRowDetails) -> BillingResult<()> {
        let row = self
            .rows
            .iter_mut()
            .find(|r| r.key == key)
            .ok_or(RowIssue::UnknownRow)?;
        row.no_bags = no_bags;
        row.details = details;
        Ok(())
    }

    /// Removal only touches memory; the stored row goes away on the next save.
    pub fn remove_dealer_row(&mut self, key: RowKey) -> BillingResult<DealerRow> {
        let idx = self
            .rows
            .iter()
            .position(|r| r.key == key)
            .ok_or(RowIssue::UnknownRow)?;
        Ok(self.rows.remove(idx))
    }

    pub fn shipments(&self) -> impl Iterator<Item = (&DealerRow, Shipment)> + '_ {
        self.rows.iter().map(move |r| (r, r.shipment(self.rate, self.is_mtk)))
    }

    pub fn totals(&self) -> RangeTotals {
        RangeTotals::from_rows(self.shipments().map(|(r, s)| (r.no_bags, s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDraft {
    pub header: EntryHeader,
    pub ranges: Vec<RangeDraft>,
}

impl EntryDraft {
    pub fn new(header: EntryHeader) -> Self {
        Self {
            header,
            ranges: Vec::new(),
        }
    }

    pub fn add_range(&mut self, slab: &RateSlab) -> BillingResult<RowKey> {
        if self.ranges.iter().any(|r| r.rate_range_id == slab.id) {
            return Err(RowIssue::DuplicateRange { slab: slab.label() }.into());
        }
        let range = RangeDraft::from_slab(slab);
        let key = range.key;
        self.ranges.push(range);
        Ok(key)
    }

    /// Drops the range and its rows from the draft; storage follows on save.
    pub fn remove_range(&mut self, key: RowKey) -> BillingResult<RangeDraft> {
        let idx = self
            .ranges
            .iter()
            .position(|r| r.key == key)
            .ok_or(RowIssue::UnknownRow)?;
        Ok(self.ranges.remove(idx))
    }

    pub fn range(&self, key: RowKey) -> Option<&RangeDraft> {
        self.ranges.iter().find(|r| r.key == key)
    }

    pub fn range_mut(&mut self, key: RowKey) -> BillingResult<&mut RangeDraft> {
        self.ranges
            .iter_mut()
            .find(|r| r.key == key)
            .ok_or_else(|| RowIssue::UnknownRow.into())
    }

    pub fn totals(&self) -> EntryTotals {
        let parts: Vec<Totals> = self.ranges.iter().map(RangeDraft::totals).collect();
        Totals::sum(parts.iter())
    }

    pub fn validate(&self) -> BillingResult<()> {
        let h = &self.header;
        if h.destination_id.is_none() {
            return Err(validation("destination is required"));
        }
        if h.bill_number.trim().is_empty() {
            return Err(validation("bill number is required"));
        }
        parse_iso_date(&h.date)?;
        if self.ranges.is_empty() {
            return Err(validation("add at least one range before saving"));
        }
        Ok(())
    }
}

pub(crate) fn parse_iso_date(input: &str) -> BillingResult<Date> {
    let fmt = format_description!("[year]-[month]-[day]");
    Date::parse(input.trim(), &fmt)
        .map_err(|_| validation(format!("date must be YYYY-MM-DD, got {:?}", input.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BillingError;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn slab(id: i64) -> RateSlab {
        RateSlab {
            id,
            from_km: d("0"),
            to_km: d("10"),
            rate: d("100"),
            is_mtk: true,
        }
    }

    fn dealer(id: i64, km: Option<&str>) -> Dealer {
        Dealer {
            id,
            code: format!("D{id}"),
            name: format!("Dealer {id}"),
            place: "Calicut".to_string(),
            pincode: String::new(),
            mobile: String::new(),
            distance_km: km.map(d),
            destination_id: None,
            is_active: true,
            garage_destination_id: None,
        }
    }

    fn header() -> EntryHeader {
        EntryHeader {
            destination_id: Some(1),
            bill_number: "K-01".to_string(),
            date: "2024-04-01".to_string(),
            ..EntryHeader::default()
        }
    }

    #[test]
    fn totals_follow_every_mutation() {
        let mut draft = EntryDraft::new(header());
        let rk = draft.add_range(&slab(1)).unwrap();
        let range = draft.range_mut(rk).unwrap();
        let a = range.add_dealer(&dealer(1, Some("5")), 20, DealerRowDetails::default()).unwrap();
        range.add_dealer(&dealer(2, Some("5")), 10, DealerRowDetails::default()).unwrap();

        let t = draft.totals();
        assert_eq!(t.total_bags, 30);
        assert_eq!(t.total_mt, d("1.50"));
        assert_eq!(t.total_mtk, d("7.50"));
        assert_eq!(t.total_amount, d("750.00"));

        let range = draft.range_mut(rk).unwrap();
        range.update_dealer_row(a, 40, DealerRowDetails::default()).unwrap();
        assert_eq!(range.totals().total_amount, d("1250"));
        range.remove_dealer_row(a).unwrap();
        assert_eq!(range.totals().total_amount, d("250"));
        assert_eq!(range.rows[0].details.despatched_to, "Dealer 2, Calicut");
    }

    #[test]
    fn row_level_rejections() {
        let mut draft = EntryDraft::new(header());
        let rk = draft.add_range(&slab(1)).unwrap();
        assert!(matches!(
            draft.add_range(&slab(1)),
            Err(BillingError::Row(RowIssue::DuplicateRange { .. }))
        ));

        let range = draft.range_mut(rk).unwrap();
        range.add_dealer(&dealer(1, Some("10")), 5, DealerRowDetails::default()).unwrap();
        assert!(matches!(
            range.add_dealer(&dealer(1, Some("10")), 5, DealerRowDetails::default()),
            Err(BillingError::Row(RowIssue::DuplicateDealer { .. }))
        ));
        assert!(matches!(
            range.add_dealer(&dealer(2, Some("10.01")), 5, DealerRowDetails::default()),
            Err(BillingError::Row(RowIssue::DealerOutsideSlab { .. }))
        ));
        assert!(matches!(
            range.add_dealer(&dealer(3, None), 5, DealerRowDetails::default()),
            Err(BillingError::Row(RowIssue::DealerOutsideSlab { .. }))
        ));
        assert!(matches!(
            range.remove_dealer_row(RowKey::new()),
            Err(BillingError::Row(RowIssue::UnknownRow))
        ));
    }

    #[test]
    fn validation_rules() {
        let mut draft = EntryDraft::new(header());
        assert!(matches!(draft.validate(), Err(BillingError::Validation(_))));
        draft.add_range(&slab(1)).unwrap();
        assert!(draft.validate().is_ok());

        draft.header.date = "01/04/2024".to_string();
        assert!(draft.validate().is_err());
        draft.header.date = "2024-02-30".to_string();
        assert!(draft.validate().is_err());
        draft.header.date = "2024-02-29".to_string();
        assert!(draft.validate().is_ok());

        draft.header.bill_number = " ".to_string();
        assert!(draft.validate().is_err());
        draft.header.bill_number = "K-01".to_string();
        draft.header.destination_id = None;
        assert!(draft.validate().is_err());
    }

    #[test]
    fn keys_are_unique() {
        let mut draft = EntryDraft::new(header());
        let a = draft.add_range(&slab(1)).unwrap();
        let b = draft.add_range(&slab(2)).unwrap();
        assert_ne!(a, b);
        draft.remove_range(a).unwrap();
        assert!(draft.range(a).is_none());
        assert!(draft.range(b).is_some());
    }
}

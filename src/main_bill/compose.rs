use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::aggregation::{grand_total, group_by_slab, BillLine, GrandTotal, SlabKey, SlabSection};
use crate::destinations::display_name;
use crate::entry::parse_iso_date;
use crate::error::{validation, BillingError, BillingResult};
use crate::money::{decimal_column, format_money};
use crate::words::amount_in_words;

pub const DEFAULT_PRODUCT: &str = "FACTOMFOS";

fn default_product() -> String {
    DEFAULT_PRODUCT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainBillHeader {
    pub bill_number: String,
    #[serde(default)]
    pub letter_note: String,
    #[serde(default)]
    pub to_address: String,
    /// `YYYY-MM-DD`.
    pub date_of_clearing: String,
    #[serde(default)]
    pub fact_gst_number: String,
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default)]
    pub hsn_sac_code: String,
    #[serde(default)]
    pub year: String,
}

impl Default for MainBillHeader {
    fn default() -> Self {
        Self {
            bill_number: String::new(),
            letter_note: String::new(),
            to_address: String::new(),
            date_of_clearing: today_iso(),
            fact_gst_number: String::new(),
            product: default_product(),
            hsn_sac_code: String::new(),
            year: String::new(),
        }
    }
}

fn today_iso() -> String {
    let today = OffsetDateTime::now_utc().date();
    format!("{:04}-{:02}-{:02}", today.year(), today.month() as u8, today.day())
}

impl MainBillHeader {
    pub fn validate(&self) -> BillingResult<()> {
        if self.bill_number.trim().is_empty() {
            return Err(validation("main bill number is required"));
        }
        if self.date_of_clearing.trim().is_empty() {
            return Err(validation("date of clearing is required"));
        }
        parse_iso_date(&self.date_of_clearing)?;
        Ok(())
    }

    pub(crate) fn normalized(&self) -> Self {
        let product = self.product.trim();
        Self {
            bill_number: self.bill_number.trim().to_string(),
            date_of_clearing: self.date_of_clearing.trim().to_string(),
            product: if product.is_empty() {
                default_product()
            } else {
                product.to_string()
            },
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainBillPreview {
    pub header: MainBillHeader,
    pub entry_ids: Vec<i64>,
    /// Bill numbers of the folded destination entries, in selection order.
    pub entry_bill_numbers: Vec<String>,
    pub sections: Vec<SlabSection>,
    pub grand_total: GrandTotal,
    pub amount_in_words: String,
}

impl MainBillPreview {
    pub fn claim_line(&self) -> String {
        format!(
            "We are claiming for Rs. {} ({}) for Clearing & Transportation Bill of Fertilizer.",
            format_money(self.grand_total.total_amount),
            self.amount_in_words
        )
    }
}

/// Selection order is kept; repeated ids count once.
pub(crate) fn dedup_ids(entry_ids: &[i64]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(entry_ids.len());
    for id in entry_ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

pub(crate) fn load_bill_lines(conn: &Connection, entry_id: i64) -> BillingResult<(String, Vec<BillLine>)> {
    let bill_number: String = conn
        .query_row(
            "SELECT bill_number FROM destination_entry WHERE id = ?1",
            params![entry_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| BillingError::NotFound(format!("destination entry {entry_id}")))?;

    let mut stmt = conn.prepare(
        "SELECT de.destination_id, d.name, d.place, rr.from_km, rr.to_km, re.rate, re.is_mtk, \
                dl.dealer_id, dr.code, dr.name, dl.despatched_to, dl.km, dl.no_bags, dl.mt, dl.mtk, dl.amount, \
                dl.mda_number, dl.date \
         FROM dealer_entry dl \
         JOIN range_entry re ON re.id = dl.range_entry_id \
         JOIN rate_range rr ON rr.id = re.rate_range_id \
         JOIN destination_entry de ON de.id = re.destination_entry_id \
         JOIN destination d ON d.id = de.destination_id \
         JOIN dealer dr ON dr.id = dl.dealer_id \
         WHERE de.id = ?1 ORDER BY re.id, dl.id",
    )?;
    let lines = stmt
        .query_map(params![entry_id], |r| {
            let name: String = r.get(1)?;
            let place: String = r.get(2)?;
            Ok(BillLine {
                entry_id,
                entry_bill_number: bill_number.clone(),
                destination_id: r.get(0)?,
                destination_name: display_name(&name, &place),
                slab: SlabKey {
                    from_km: decimal_column(r, 3)?,
                    to_km: decimal_column(r, 4)?,
                    rate: decimal_column(r, 5)?,
                    is_mtk: r.get::<_, i64>(6)? != 0,
                },
                dealer_id: r.get(7)?,
                dealer_code: r.get(8)?,
                dealer_name: r.get(9)?,
                despatched_to: r.get(10)?,
                km: decimal_column(r, 11)?,
                no_bags: r.get(12)?,
                mt: decimal_column(r, 13)?,
                mtk: decimal_column(r, 14)?,
                amount: decimal_column(r, 15)?,
                mda_number: r.get(16)?,
                date: r.get(17)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((bill_number, lines))
}

/// Builds the consolidated bill from the live dealer rows of `entry_ids`.
/// Nothing is written.
pub fn compose_main_bill(
    conn: &Connection,
    header: &MainBillHeader,
    entry_ids: &[i64],
) -> BillingResult<MainBillPreview> {
    header.validate()?;
    let entry_ids = dedup_ids(entry_ids);
    if entry_ids.is_empty() {
        return Err(validation("select at least one destination entry"));
    }

    let mut lines = Vec::new();
    let mut entry_bill_numbers = Vec::with_capacity(entry_ids.len());
    for &id in &entry_ids {
        let (bill_number, mut entry_lines) = load_bill_lines(conn, id)?;
        entry_bill_numbers.push(bill_number);
        lines.append(&mut entry_lines);
    }
    debug!(entries = entry_ids.len(), lines = lines.len(), "composing main bill");

    let sections = group_by_slab(lines);
    let grand_total = grand_total(&sections);
    Ok(MainBillPreview {
        header: header.normalized(),
        entry_ids,
        entry_bill_numbers,
        sections,
        amount_in_words: amount_in_words(grand_total.total_amount),
        grand_total,
    })
}

use std::collections::HashMap;

use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::with_transaction;
use crate::destinations::display_name;
use crate::error::{BillingError, BillingResult};
use crate::money::decimal_column;
use crate::rates::RateSlab;

use super::draft::parse_iso_date;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySearch {
    pub destination_id: Option<i64>,
    pub date: Option<String>,
    pub dealer_name: Option<String>,
}

/// One dealer row of a saved entry, flattened for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryLine {
    pub entry_id: i64,
    pub bill_number: String,
    pub date: String,
    pub destination: String,
    pub slab: String,
    pub dealer_code: String,
    pub dealer_name: String,
    pub no_bags: u32,
    pub mt: Decimal,
    pub km: Decimal,
    pub rate: Decimal,
    pub mtk: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub id: i64,
    pub bill_number: String,
    pub date: String,
    pub destination_id: i64,
    pub destination: String,
    pub main_bill_id: Option<i64>,
    pub total_bags: u64,
    pub total_amount: Decimal,
}

pub fn search_entries(conn: &Connection, search: &EntrySearch) -> BillingResult<Vec<EntryLine>> {
    let mut sql = String::from(
        "SELECT de.id, de.bill_number, de.date, d.name, d.place, rr.from_km, rr.to_km, re.rate, re.is_mtk, \
                dr.code, dr.name, dl.no_bags, dl.mt, dl.km, dl.rate, dl.mtk, dl.amount \
         FROM dealer_entry dl \
         JOIN range_entry re ON re.id = dl.range_entry_id \
         JOIN rate_range rr ON rr.id = re.rate_range_id \
         JOIN destination_entry de ON de.id = re.destination_entry_id \
         JOIN destination d ON d.id = de.destination_id \
         JOIN dealer dr ON dr.id = dl.dealer_id \
         WHERE 1=1",
    );
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(dest) = search.destination_id {
        sql.push_str(" AND de.destination_id = ?");
        args.push(Box::new(dest));
    }
    if let Some(date) = search.date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        parse_iso_date(date)?;
        sql.push_str(" AND de.date = ?");
        args.push(Box::new(date.to_string()));
    }
    if let Some(q) = search.dealer_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        sql.push_str(" AND dr.name LIKE ?");
        args.push(Box::new(format!("%{q}%")));
    }
    sql.push_str(" ORDER BY de.date DESC, de.id DESC, re.id, dl.id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |r| {
            let name: String = r.get(3)?;
            let place: String = r.get(4)?;
            let slab = RateSlab {
                id: 0,
                from_km: decimal_column(r, 5)?,
                to_km: decimal_column(r, 6)?,
                rate: decimal_column(r, 7)?,
                is_mtk: r.get::<_, i64>(8)? != 0,
            };
            Ok(EntryLine {
                entry_id: r.get(0)?,
                bill_number: r.get(1)?,
                date: r.get(2)?,
                destination: display_name(&name, &place),
                slab: slab.label(),
                dealer_code: r.get(9)?,
                dealer_name: r.get(10)?,
                no_bags: r.get(11)?,
                mt: decimal_column(r, 12)?,
                km: decimal_column(r, 13)?,
                rate: decimal_column(r, 14)?,
                mtk: decimal_column(r, 15)?,
                amount: decimal_column(r, 16)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn list_entries(conn: &Connection, unbilled_only: bool) -> BillingResult<Vec<EntrySummary>> {
    let mut sql = String::from(
        "SELECT de.id, de.bill_number, de.date, de.destination_id, d.name, d.place, de.main_bill_id \
         FROM destination_entry de JOIN destination d ON d.id = de.destination_id",
    );
    if unbilled_only {
        sql.push_str(" WHERE de.main_bill_id IS NULL");
    }
    sql.push_str(" ORDER BY de.date DESC, de.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let mut entries = stmt
        .query_map([], |r| {
            let name: String = r.get(4)?;
            let place: String = r.get(5)?;
            Ok(EntrySummary {
                id: r.get(0)?,
                bill_number: r.get(1)?,
                date: r.get(2)?,
                destination_id: r.get(3)?,
                destination: display_name(&name, &place),
                main_bill_id: r.get(6)?,
                total_bags: 0,
                total_amount: Decimal::ZERO,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // Stored as decimal text, so sum here rather than with SQL SUM().
    let mut totals: HashMap<i64, (u64, Decimal)> = HashMap::new();
    let mut stmt = conn.prepare("SELECT destination_entry_id, total_bags, total_amount FROM range_entry")?;
    let rows = stmt.query_map([], |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, decimal_column(r, 2)?))
    })?;
    for row in rows {
        let (entry_id, bags, amount) = row?;
        let t = totals.entry(entry_id).or_default();
        t.0 += bags.max(0) as u64;
        t.1 += amount;
    }
    for e in &mut entries {
        if let Some((bags, amount)) = totals.get(&e.id) {
            e.total_bags = *bags;
            e.total_amount = *amount;
        }
    }
    Ok(entries)
}

pub fn list_all_entries(conn: &Connection) -> BillingResult<Vec<EntrySummary>> {
    list_entries(conn, false)
}

/// Entries not yet part of a main bill, newest first.
pub fn list_unbilled_entries(conn: &Connection) -> BillingResult<Vec<EntrySummary>> {
    list_entries(conn, true)
}

pub fn delete_entry(conn: &mut Connection, entry_id: i64) -> BillingResult<()> {
    with_transaction(conn, "entry_delete", |tx| {
        let main_bill_id: Option<Option<i64>> = tx
            .query_row(
                "SELECT main_bill_id FROM destination_entry WHERE id = ?1",
                params![entry_id],
                |r| r.get(0),
            )
            .optional()?;
        match main_bill_id {
            None => Err(BillingError::NotFound(format!("destination entry {entry_id}"))),
            Some(Some(bill)) => Err(BillingError::Conflict(format!(
                "entry {entry_id} belongs to main bill {bill}; remove it from the bill first"
            ))),
            Some(None) => {
                tx.execute("DELETE FROM destination_entry WHERE id = ?1", params![entry_id])?;
                Ok(())
            }
        }
    })?;
    info!(entry_id, "destination entry deleted");
    Ok(())
}

use std::collections::HashMap;

use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::with_transaction;
use crate::error::{validation, BillingError, BillingResult};
use crate::money::decimal_column;

use super::compose::{compose_main_bill, dedup_ids, MainBillHeader, MainBillPreview};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainBill {
    pub id: i64,
    #[serde(flatten)]
    pub header: MainBillHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainBillSummary {
    pub id: i64,
    pub bill_number: String,
    pub date_of_clearing: String,
    pub entry_count: usize,
    pub total_amount: Decimal,
}

const SELECT_COLUMNS: &str = "SELECT id, bill_number, letter_note, to_address, date_of_clearing, fact_gst_number, product, hsn_sac_code, year FROM main_bill";

fn map_main_bill(r: &Row<'_>) -> rusqlite::Result<MainBill> {
    Ok(MainBill {
        id: r.get(0)?,
        header: MainBillHeader {
            bill_number: r.get(1)?,
            letter_note: r.get(2)?,
            to_address: r.get(3)?,
            date_of_clearing: r.get(4)?,
            fact_gst_number: r.get(5)?,
            product: r.get(6)?,
            hsn_sac_code: r.get(7)?,
            year: r.get(8)?,
        },
    })
}

pub fn get_main_bill_by_number(conn: &Connection, bill_number: &str) -> BillingResult<Option<MainBill>> {
    Ok(conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE bill_number = ?1"),
            params![bill_number.trim()],
            map_main_bill,
        )
        .optional()?)
}

fn require_main_bill(conn: &Connection, bill_number: &str) -> BillingResult<MainBill> {
    get_main_bill_by_number(conn, bill_number)?
        .ok_or_else(|| BillingError::NotFound(format!("main bill {}", bill_number.trim())))
}

/// Linked entries in link order, read from the join table.
pub fn main_bill_entry_ids(conn: &Connection, main_bill_id: i64) -> BillingResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT destination_entry_id FROM main_bill_entries WHERE main_bill_id = ?1 ORDER BY id",
    )?;
    let ids = stmt
        .query_map(params![main_bill_id], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn unlink_entries(tx: &Transaction<'_>, main_bill_id: i64) -> BillingResult<usize> {
    tx.execute(
        "UPDATE destination_entry SET main_bill_id = NULL WHERE main_bill_id = ?1",
        params![main_bill_id],
    )?;
    Ok(tx.execute(
        "DELETE FROM main_bill_entries WHERE main_bill_id = ?1",
        params![main_bill_id],
    )?)
}

/// Persists the header and links the selected entries, all in one transaction.
///
/// An existing `bill_number` is only replaced when `overwrite` is set; otherwise
/// the caller gets [`BillingError::BillNumberExists`] and should ask the user.
pub fn save_main_bill(
    conn: &mut Connection,
    header: &MainBillHeader,
    entry_ids: &[i64],
    overwrite: bool,
) -> BillingResult<MainBill> {
    header.validate()?;
    let header = header.normalized();
    let entry_ids = dedup_ids(entry_ids);
    if entry_ids.is_empty() {
        return Err(validation("select at least one destination entry"));
    }

    let id = with_transaction(conn, "main_bill_save", |tx| {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM main_bill WHERE bill_number = ?1",
                params![header.bill_number],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() && !overwrite {
            return Err(BillingError::BillNumberExists(header.bill_number.clone()));
        }

        for &entry_id in &entry_ids {
            let linked: Option<Option<i64>> = tx
                .query_row(
                    "SELECT main_bill_id FROM destination_entry WHERE id = ?1",
                    params![entry_id],
                    |r| r.get(0),
                )
                .optional()?;
            match linked {
                None => return Err(BillingError::NotFound(format!("destination entry {entry_id}"))),
                Some(Some(other)) if Some(other) != existing => {
                    return Err(BillingError::Conflict(format!(
                        "entry {entry_id} already belongs to another main bill"
                    )))
                }
                Some(_) => {}
            }
        }

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE main_bill SET letter_note = ?2, to_address = ?3, date_of_clearing = ?4, fact_gst_number = ?5, \
                     product = ?6, hsn_sac_code = ?7, year = ?8 WHERE id = ?1",
                    params![
                        id,
                        header.letter_note,
                        header.to_address,
                        header.date_of_clearing,
                        header.fact_gst_number,
                        header.product,
                        header.hsn_sac_code,
                        header.year
                    ],
                )?;
                let cleared = unlink_entries(tx, id)?;
                debug!(main_bill_id = id, cleared, "previous links cleared");
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO main_bill (bill_number, letter_note, to_address, date_of_clearing, fact_gst_number, product, hsn_sac_code, year) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        header.bill_number,
                        header.letter_note,
                        header.to_address,
                        header.date_of_clearing,
                        header.fact_gst_number,
                        header.product,
                        header.hsn_sac_code,
                        header.year
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        for &entry_id in &entry_ids {
            tx.execute(
                "INSERT INTO main_bill_entries (main_bill_id, destination_entry_id) VALUES (?1, ?2)",
                params![id, entry_id],
            )?;
            tx.execute(
                "UPDATE destination_entry SET main_bill_id = ?1 WHERE id = ?2",
                params![id, entry_id],
            )?;
        }
        Ok(id)
    })?;

    info!(main_bill_id = id, bill_number = %header.bill_number, entries = entry_ids.len(), overwrite, "main bill saved");
    Ok(MainBill { id, header })
}

/// Bills ordered by date of clearing, newest first. `search` matches the bill number.
pub fn list_main_bills(conn: &Connection, search: Option<&str>) -> BillingResult<Vec<MainBillSummary>> {
    let pattern = format!("%{}%", search.map(str::trim).unwrap_or(""));
    let mut stmt = conn.prepare(
        "SELECT id, bill_number, date_of_clearing FROM main_bill WHERE bill_number LIKE ?1 \
         ORDER BY date_of_clearing DESC, id DESC",
    )?;
    let mut bills = stmt
        .query_map(params![pattern], |r| {
            Ok(MainBillSummary {
                id: r.get(0)?,
                bill_number: r.get(1)?,
                date_of_clearing: r.get(2)?,
                entry_count: 0,
                total_amount: Decimal::ZERO,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts: HashMap<i64, usize> = HashMap::new();
    let mut stmt = conn.prepare("SELECT main_bill_id FROM main_bill_entries")?;
    for bill_id in stmt.query_map([], |r| r.get::<_, i64>(0))? {
        *counts.entry(bill_id?).or_default() += 1;
    }

    let mut amounts: HashMap<i64, Decimal> = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT mbe.main_bill_id, dl.amount FROM main_bill_entries mbe \
         JOIN range_entry re ON re.destination_entry_id = mbe.destination_entry_id \
         JOIN dealer_entry dl ON dl.range_entry_id = re.id",
    )?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, i64>(0)?, decimal_column(r, 1)?)))?;
    for row in rows {
        let (bill_id, amount) = row?;
        *amounts.entry(bill_id).or_default() += amount;
    }

    for b in &mut bills {
        b.entry_count = counts.get(&b.id).copied().unwrap_or(0);
        b.total_amount = amounts.get(&b.id).copied().unwrap_or_default();
    }
    Ok(bills)
}

/// Removes the bill; its entries become selectable again.
pub fn delete_main_bill(conn: &mut Connection, bill_number: &str) -> BillingResult<()> {
    let bill = require_main_bill(conn, bill_number)?;
    with_transaction(conn, "main_bill_delete", |tx| {
        unlink_entries(tx, bill.id)?;
        tx.execute("DELETE FROM main_bill WHERE id = ?1", params![bill.id])?;
        Ok(())
    })?;
    info!(main_bill_id = bill.id, bill_number = %bill.header.bill_number, "main bill deleted");
    Ok(())
}

/// Read-only rebuild of a saved bill from its linked entries' current rows.
pub fn open_main_bill(conn: &Connection, bill_number: &str) -> BillingResult<MainBillPreview> {
    let bill = require_main_bill(conn, bill_number)?;
    let entry_ids = main_bill_entry_ids(conn, bill.id)?;
    if entry_ids.is_empty() {
        return Err(validation(format!("main bill {} has no linked entries", bill.header.bill_number)));
    }
    compose_main_bill(conn, &bill.header, &entry_ids)
}

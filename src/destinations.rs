//! Destinations (dealer networks) and garages.
//!
//! A garage is a destination that is itself a delivery point. While a
//! destination is flagged as a garage it owns one synthetic dealer row
//! (`GARAGE-<id>`, distance 0) so shipments to it can be billed like any
//! other dealer. Clearing the flag deactivates that dealer rather than deleting
//! it, because saved entries may still reference it.

use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::with_transaction;
use crate::dealers::{map_dealer, Dealer};
use crate::error::{is_constraint_violation, validation, BillingError, BillingResult};
use crate::money::to_sql_text;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: i64,
    pub name: String,
    pub place: String,
    pub description: String,
    pub is_garage: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDestination {
    pub name: String,
    #[serde(default)]
    pub place: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_garage: bool,
}

impl Destination {
    /// `Name (Place)` as printed on bills; the place is omitted when blank.
    pub fn display_name(&self) -> String {
        display_name(&self.name, &self.place)
    }
}

pub(crate) fn display_name(name: &str, place: &str) -> String {
    if place.trim().is_empty() {
        name.to_string()
    } else {
        format!("{} ({})", name, place.trim())
    }
}

pub fn garage_dealer_code(destination_id: i64) -> String {
    format!("GARAGE-{destination_id}")
}

const SELECT_COLUMNS: &str = "SELECT id, name, place, description, is_garage FROM destination";

fn map_destination(r: &Row<'_>) -> rusqlite::Result<Destination> {
    Ok(Destination {
        id: r.get(0)?,
        name: r.get(1)?,
        place: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
        description: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
        is_garage: r.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
    })
}

pub fn get_destination(conn: &Connection, id: i64) -> BillingResult<Option<Destination>> {
    Ok(conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], map_destination)
        .optional()?)
}

fn require_destination(conn: &Connection, id: i64) -> BillingResult<Destination> {
    get_destination(conn, id)?.ok_or_else(|| BillingError::NotFound(format!("destination {id}")))
}

pub fn find_destination_by_name_or_place(conn: &Connection, key: &str) -> BillingResult<Option<Destination>> {
    Ok(conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE name = ?1 OR place = ?1 ORDER BY id LIMIT 1"),
            params![key.trim()],
            map_destination,
        )
        .optional()?)
}

pub fn list_destinations(conn: &Connection) -> BillingResult<Vec<Destination>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY name, id"))?;
    let rows = stmt
        .query_map([], map_destination)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_destination(conn: &mut Connection, input: NewDestination) -> BillingResult<Destination> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(validation("destination name is required"));
    }
    let dest = with_transaction(conn, "create_destination", |tx| {
        tx.execute(
            "INSERT INTO destination (name, place, description, is_garage) VALUES (?1, ?2, ?3, 0)",
            params![name, input.place.trim(), input.description.trim()],
        )?;
        let id = tx.last_insert_rowid();
        if input.is_garage {
            apply_garage(tx, id, true)?;
        }
        require_destination(tx, id)
    })?;
    info!(id = dest.id, name = %dest.name, garage = dest.is_garage, "destination created");
    Ok(dest)
}

pub fn update_destination(conn: &mut Connection, id: i64, input: NewDestination) -> BillingResult<Destination> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(validation("destination name is required"));
    }
    with_transaction(conn, "update_destination", |tx| {
        require_destination(tx, id)?;
        tx.execute(
            "UPDATE destination SET name = ?2, place = ?3, description = ?4 WHERE id = ?1",
            params![id, name, input.place.trim(), input.description.trim()],
        )?;
        apply_garage(tx, id, input.is_garage)?;
        require_destination(tx, id)
    })
}

/// Refused with a conflict while saved entries reference the destination; the
/// garage dealer is left as it was in that case.
pub fn delete_destination(conn: &mut Connection, id: i64) -> BillingResult<()> {
    with_transaction(conn, "delete_destination", |tx| {
        require_destination(tx, id)?;
        if let Some(garage) = garage_dealer(tx, id)? {
            crate::dealers::set_dealer_active(tx, garage.id, false)?;
        }
        match tx.execute("DELETE FROM destination WHERE id = ?1", params![id]) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(BillingError::Conflict(format!(
                "destination {id} has saved entries"
            ))),
            Err(e) => Err(e.into()),
        }
    })
}

pub fn garage_dealer(conn: &Connection, destination_id: i64) -> BillingResult<Option<Dealer>> {
    Ok(conn
        .query_row(
            "SELECT id, code, name, place, pincode, mobile, distance, destination_id, is_active, garage_destination_id \
             FROM dealer WHERE garage_destination_id = ?1 OR code = ?2 ORDER BY id LIMIT 1",
            params![destination_id, garage_dealer_code(destination_id)],
            map_dealer,
        )
        .optional()?)
}

/// Applies the garage transition for a destination. Idempotent.
pub fn set_garage(conn: &mut Connection, destination_id: i64, is_garage: bool) -> BillingResult<()> {
    with_transaction(conn, "set_garage", |tx| apply_garage(tx, destination_id, is_garage))
}

fn apply_garage(conn: &Connection, destination_id: i64, is_garage: bool) -> BillingResult<()> {
    let dest = require_destination(conn, destination_id)?;
    conn.execute(
        "UPDATE destination SET is_garage = ?2 WHERE id = ?1",
        params![destination_id, is_garage as i32],
    )?;

    let existing = garage_dealer(conn, destination_id)?;
    match (is_garage, existing) {
        (true, Some(dealer)) => {
            conn.execute(
                "UPDATE dealer SET is_active = 1, name = ?2, place = ?3, garage_destination_id = ?4 WHERE id = ?1",
                params![dealer.id, dest.name, dest.place, destination_id],
            )?;
            info!(destination_id, dealer_id = dealer.id, "garage dealer reactivated");
        }
        (true, None) => {
            conn.execute(
                "INSERT INTO dealer (code, name, place, distance, destination_id, is_active, garage_destination_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?5)",
                params![
                    garage_dealer_code(destination_id),
                    dest.name,
                    dest.place,
                    to_sql_text(Decimal::ZERO),
                    destination_id
                ],
            )?;
            info!(destination_id, dealer_id = conn.last_insert_rowid(), "garage dealer created");
        }
        (false, Some(dealer)) if dealer.is_active => {
            crate::dealers::set_dealer_active(conn, dealer.id, false)?;
            info!(destination_id, dealer_id = dealer.id, "garage dealer deactivated");
        }
        (false, _) => {}
    }
    Ok(())
}

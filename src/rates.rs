//! Rate table: distance slabs with a flat rate and a billing basis.

use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{is_constraint_violation, validation, BillingError, BillingResult};
use crate::money::{decimal_column, format_fixed, format_km, to_sql_text};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSlab {
    pub id: i64,
    pub from_km: Decimal,
    pub to_km: Decimal,
    pub rate: Decimal,
    pub is_mtk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRateSlab {
    pub from_km: Decimal,
    pub to_km: Decimal,
    pub rate: Decimal,
    #[serde(default = "default_is_mtk")]
    pub is_mtk: bool,
}

fn default_is_mtk() -> bool {
    true
}

impl RateSlab {
    /// Closed bracket, matching how dealers are offered for a slab.
    pub fn contains(&self, km: Decimal) -> bool {
        self.from_km <= km && km <= self.to_km
    }

    pub fn overlaps(&self, from_km: Decimal, to_km: Decimal) -> bool {
        self.from_km <= to_km && from_km <= self.to_km
    }

    pub fn basis(&self) -> &'static str {
        if self.is_mtk {
            "MTK"
        } else {
            "MT"
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{}-{} km @ Rs.{} ({})",
            format_km(self.from_km),
            format_km(self.to_km),
            format_fixed(self.rate),
            self.basis()
        )
    }
}

impl NewRateSlab {
    fn validate(&self) -> BillingResult<()> {
        if self.from_km.is_sign_negative() || self.to_km.is_sign_negative() {
            return Err(validation("slab distances must be non-negative"));
        }
        if self.from_km > self.to_km {
            return Err(validation(format!(
                "slab start ({}) must not exceed its end ({})",
                format_km(self.from_km),
                format_km(self.to_km)
            )));
        }
        if self.rate.is_sign_negative() {
            return Err(validation("rate must be non-negative"));
        }
        Ok(())
    }
}

const SELECT_COLUMNS: &str = "SELECT id, from_km, to_km, rate, is_mtk FROM rate_range";

fn map_slab(r: &Row<'_>) -> rusqlite::Result<RateSlab> {
    Ok(RateSlab {
        id: r.get(0)?,
        from_km: decimal_column(r, 1)?,
        to_km: decimal_column(r, 2)?,
        rate: decimal_column(r, 3)?,
        is_mtk: r.get::<_, i64>(4)? != 0,
    })
}

/// Ordered by start of bracket, then id: the deterministic tie-break for lookups.
pub fn list_rates(conn: &Connection) -> BillingResult<Vec<RateSlab>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
    let mut slabs = stmt
        .query_map([], map_slab)?
        .collect::<Result<Vec<_>, _>>()?;
    slabs.sort_by(|a, b| a.from_km.cmp(&b.from_km).then(a.id.cmp(&b.id)));
    Ok(slabs)
}

pub fn get_rate(conn: &Connection, id: i64) -> BillingResult<Option<RateSlab>> {
    Ok(conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], map_slab)
        .optional()?)
}

fn require_rate(conn: &Connection, id: i64) -> BillingResult<RateSlab> {
    get_rate(conn, id)?.ok_or_else(|| BillingError::NotFound(format!("rate slab {id}")))
}

fn ensure_no_overlap(conn: &Connection, input: &NewRateSlab, ignore_id: Option<i64>) -> BillingResult<()> {
    let clash = list_rates(conn)?
        .into_iter()
        .filter(|s| Some(s.id) != ignore_id)
        .find(|s| s.overlaps(input.from_km, input.to_km));
    match clash {
        Some(s) => Err(validation(format!(
            "slab {}-{} km overlaps existing slab {}",
            format_km(input.from_km),
            format_km(input.to_km),
            s.label()
        ))),
        None => Ok(()),
    }
}

pub fn create_rate(conn: &Connection, input: NewRateSlab) -> BillingResult<RateSlab> {
    input.validate()?;
    ensure_no_overlap(conn, &input, None)?;
    conn.execute(
        "INSERT INTO rate_range (from_km, to_km, rate, is_mtk) VALUES (?1, ?2, ?3, ?4)",
        params![
            to_sql_text(input.from_km),
            to_sql_text(input.to_km),
            to_sql_text(input.rate),
            input.is_mtk as i32
        ],
    )?;
    let slab = require_rate(conn, conn.last_insert_rowid())?;
    info!(id = slab.id, slab = %slab.label(), "rate slab created");
    Ok(slab)
}

/// Saved range entries keep their own rate snapshot, so editing a slab only
/// affects entries created afterwards.
pub fn update_rate(conn: &Connection, id: i64, input: NewRateSlab) -> BillingResult<RateSlab> {
    input.validate()?;
    require_rate(conn, id)?;
    ensure_no_overlap(conn, &input, Some(id))?;
    conn.execute(
        "UPDATE rate_range SET from_km = ?2, to_km = ?3, rate = ?4, is_mtk = ?5 WHERE id = ?1",
        params![
            id,
            to_sql_text(input.from_km),
            to_sql_text(input.to_km),
            to_sql_text(input.rate),
            input.is_mtk as i32
        ],
    )?;
    require_rate(conn, id)
}

pub fn delete_rate(conn: &Connection, id: i64) -> BillingResult<()> {
    require_rate(conn, id)?;
    match conn.execute("DELETE FROM rate_range WHERE id = ?1", params![id]) {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(BillingError::Conflict(format!(
            "rate slab {id} is used by saved entries"
        ))),
        Err(e) => Err(e.into()),
    }
}

pub fn find_slab_for_distance(conn: &Connection, km: Decimal) -> BillingResult<Option<RateSlab>> {
    Ok(list_rates(conn)?.into_iter().find(|s| s.contains(km)))
}

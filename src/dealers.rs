use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{is_constraint_violation, validation, BillingError, BillingResult};
use crate::money::{format_km, optional_decimal_column, to_sql_text};
use crate::rates::RateSlab;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dealer {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub place: String,
    pub pincode: String,
    pub mobile: String,
    /// `None` when an import could not read the distance.
    pub distance_km: Option<Decimal>,
    /// Always set by `create_dealer`; legacy rows may still carry `None`.
    pub destination_id: Option<i64>,
    pub is_active: bool,
    /// Set on the synthetic dealer that stands for a garage destination.
    pub garage_destination_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDealer {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub place: String,
    #[serde(default)]
    pub pincode: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub distance_km: Option<Decimal>,
    #[serde(default)]
    pub destination_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct DealerFilter {
    pub destination_id: Option<i64>,
    pub active_only: bool,
    pub name_contains: Option<String>,
}

impl Dealer {
    pub fn label(&self) -> String {
        match self.distance_km {
            Some(km) => format!("{} - {} ({}km)", self.code, self.name, format_km(km)),
            None => format!("{} - {} (no distance)", self.code, self.name),
        }
    }

    /// Default "despatched to" text for a dealer row.
    pub fn despatch_label(&self) -> String {
        if self.place.trim().is_empty() {
            self.name.clone()
        } else {
            format!("{}, {}", self.name, self.place)
        }
    }
}

impl NewDealer {
    fn normalized(self) -> BillingResult<Self> {
        let code = self.code.trim().to_string();
        let name = self.name.trim().to_string();
        if code.is_empty() || name.is_empty() {
            return Err(validation("dealer code and name are required"));
        }
        if self.destination_id.is_none() {
            return Err(validation(format!("dealer {code} needs a destination")));
        }
        if let Some(km) = self.distance_km {
            if km.is_sign_negative() {
                return Err(validation(format!("distance must be non-negative, got {km}")));
            }
        }
        Ok(Self {
            code,
            name,
            place: self.place.trim().to_string(),
            pincode: self.pincode.trim().to_string(),
            mobile: self.mobile.trim().to_string(),
            ..self
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, code, name, place, pincode, mobile, distance, destination_id, is_active, garage_destination_id FROM dealer";

pub(crate) fn map_dealer(r: &Row<'_>) -> rusqlite::Result<Dealer> {
    Ok(Dealer {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        place: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
        pincode: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
        mobile: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
        distance_km: optional_decimal_column(r, 6)?,
        destination_id: r.get(7)?,
        is_active: r.get::<_, i64>(8)? != 0,
        garage_destination_id: r.get(9)?,
    })
}

fn map_write_err(code: &str, e: rusqlite::Error) -> BillingError {
    if is_constraint_violation(&e) {
        BillingError::Conflict(format!("dealer code {code} already exists or destination is unknown"))
    } else {
        e.into()
    }
}

pub fn get_dealer(conn: &Connection, id: i64) -> BillingResult<Option<Dealer>> {
    Ok(conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], map_dealer)
        .optional()?)
}

pub fn get_dealer_by_code(conn: &Connection, code: &str) -> BillingResult<Option<Dealer>> {
    Ok(conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE code = ?1"),
            params![code.trim()],
            map_dealer,
        )
        .optional()?)
}

pub(crate) fn require_dealer(conn: &Connection, id: i64) -> BillingResult<Dealer> {
    get_dealer(conn, id)?.ok_or_else(|| BillingError::NotFound(format!("dealer {id}")))
}

pub fn list_dealers(conn: &Connection, filter: &DealerFilter) -> BillingResult<Vec<Dealer>> {
    let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(dest) = filter.destination_id {
        sql.push_str(" AND destination_id = ?");
        args.push(Box::new(dest));
    }
    if filter.active_only {
        sql.push_str(" AND is_active = 1");
    }
    if let Some(q) = filter.name_contains.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        sql.push_str(" AND name LIKE ?");
        args.push(Box::new(format!("%{q}%")));
    }
    sql.push_str(" ORDER BY name, code");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), map_dealer)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active dealers whose distance falls inside the slab bracket, the set offered
/// when adding rows to a range.
pub fn dealers_in_slab(conn: &Connection, slab: &RateSlab) -> BillingResult<Vec<Dealer>> {
    let filter = DealerFilter {
        active_only: true,
        ..DealerFilter::default()
    };
    Ok(list_dealers(conn, &filter)?
        .into_iter()
        .filter(|d| d.distance_km.is_some_and(|km| slab.contains(km)))
        .collect())
}

pub fn create_dealer(conn: &Connection, input: NewDealer) -> BillingResult<Dealer> {
    let input = input.normalized()?;
    conn.execute(
        "INSERT INTO dealer (code, name, place, pincode, mobile, distance, destination_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            input.code,
            input.name,
            input.place,
            input.pincode,
            input.mobile,
            input.distance_km.map(to_sql_text),
            input.destination_id
        ],
    )
    .map_err(|e| map_write_err(&input.code, e))?;
    let dealer = require_dealer(conn, conn.last_insert_rowid())?;
    info!(id = dealer.id, code = %dealer.code, "dealer created");
    Ok(dealer)
}

/// Saved dealer rows keep the distance they were billed at; changing it here
/// only affects rows added afterwards.
pub fn update_dealer(conn: &Connection, id: i64, input: NewDealer) -> BillingResult<Dealer> {
    let input = input.normalized()?;
    require_dealer(conn, id)?;
    conn.execute(
        "UPDATE dealer SET code = ?2, name = ?3, place = ?4, pincode = ?5, mobile = ?6, distance = ?7, destination_id = ?8 WHERE id = ?1",
        params![
            id,
            input.code,
            input.name,
            input.place,
            input.pincode,
            input.mobile,
            input.distance_km.map(to_sql_text),
            input.destination_id
        ],
    )
    .map_err(|e| map_write_err(&input.code, e))?;
    require_dealer(conn, id)
}

pub fn set_dealer_active(conn: &Connection, id: i64, active: bool) -> BillingResult<()> {
    conn.execute(
        "UPDATE dealer SET is_active = ?2 WHERE id = ?1",
        params![id, active as i32],
    )?;
    Ok(())
}

pub fn delete_dealer(conn: &Connection, id: i64) -> BillingResult<()> {
    require_dealer(conn, id)?;
    match conn.execute("DELETE FROM dealer WHERE id = ?1", params![id]) {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(BillingError::Conflict(format!(
            "dealer {id} is referenced by saved entries"
        ))),
        Err(e) => Err(e.into()),
    }
}

//! Dealer list import: one sheet per destination, one dealer per row.
//!
//! Only the transform lives here. Sheets arrive already read into cells, so
//! any tabular source (the CLI reads JSON) can feed it.

use std::str::FromStr;

use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::db::{app_meta_get, app_meta_set, with_transaction};
use crate::error::BillingResult;
use crate::money::to_sql_text;

/// Placeholder sheet that spreadsheet tools add by default.
const SKIPPED_SHEET: &str = "Sheet1";
const META_LAST_IMPORT: &str = "dealers.last_import";

/// Column order: code, name, place, pincode, mobile, distance. Missing trailing
/// cells read as blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealerSheet {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub sheets_read: usize,
    pub destinations_created: usize,
    pub dealers_inserted: usize,
    /// Rows whose code was already registered; left as they were.
    pub dealers_existing: usize,
    pub warnings: Vec<String>,
}

fn cell_text(row: &[Value], idx: usize) -> String {
    match row.get(idx) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => match n.as_f64() {
            // Spreadsheet readers hand back codes and pincodes as floats.
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

enum Distance {
    Missing,
    Value(Decimal),
    Malformed(String),
}

fn cell_distance(row: &[Value], idx: usize) -> Distance {
    let raw = match row.get(idx) {
        None | Some(Value::Null) => return Distance::Missing,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => return Distance::Missing,
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    };
    match Decimal::from_str(&raw).or_else(|_| Decimal::from_scientific(&raw)) {
        Ok(d) if !d.is_sign_negative() => Distance::Value(d.normalize()),
        _ => Distance::Malformed(raw),
    }
}

fn destination_for_sheet(tx: &Transaction<'_>, sheet: &str, report: &mut ImportReport) -> BillingResult<i64> {
    let found: Option<i64> = tx
        .query_row(
            "SELECT id FROM destination WHERE name = ?1 OR place = ?1 ORDER BY id LIMIT 1",
            params![sheet],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = found {
        return Ok(id);
    }
    tx.execute(
        "INSERT INTO destination (name, place) VALUES (?1, ?1)",
        params![sheet],
    )?;
    report.destinations_created += 1;
    Ok(tx.last_insert_rowid())
}

pub fn import_dealer_sheets(conn: &mut Connection, sheets: &[DealerSheet]) -> BillingResult<ImportReport> {
    let report = with_transaction(conn, "dealer_import", |tx| {
        let mut report = ImportReport::default();
        for sheet in sheets {
            let sheet_name = sheet.name.trim();
            if sheet_name.is_empty() || sheet_name == SKIPPED_SHEET {
                continue;
            }
            report.sheets_read += 1;
            let destination_id = destination_for_sheet(tx, sheet_name, &mut report)?;

            for (idx, row) in sheet.rows.iter().enumerate() {
                let row_no = idx + 1;
                let code = cell_text(row, 0);
                let name = cell_text(row, 1);
                if code.is_empty() || name.is_empty() {
                    if row.iter().any(|c| !c.is_null() && c.as_str().map_or(true, |s| !s.trim().is_empty())) {
                        report
                            .warnings
                            .push(format!("{sheet_name} row {row_no}: missing dealer code or name, skipped"));
                    }
                    continue;
                }

                let distance = match cell_distance(row, 5) {
                    Distance::Value(d) => Some(d),
                    Distance::Missing => {
                        report
                            .warnings
                            .push(format!("{sheet_name} row {row_no}: dealer {code} has no distance"));
                        None
                    }
                    Distance::Malformed(raw) => {
                        report.warnings.push(format!(
                            "{sheet_name} row {row_no}: dealer {code} has invalid distance {raw:?}, left empty"
                        ));
                        None
                    }
                };

                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO dealer (code, name, place, pincode, mobile, distance, destination_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        code,
                        name,
                        cell_text(row, 2),
                        cell_text(row, 3),
                        cell_text(row, 4),
                        distance.map(to_sql_text),
                        destination_id
                    ],
                )?;
                if inserted == 1 {
                    report.dealers_inserted += 1;
                } else {
                    report.dealers_existing += 1;
                }
            }
        }

        let stamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        app_meta_set(tx, META_LAST_IMPORT, &stamp)?;
        Ok(report)
    })?;

    for w in &report.warnings {
        warn!("{w}");
    }
    info!(
        sheets = report.sheets_read,
        destinations_created = report.destinations_created,
        inserted = report.dealers_inserted,
        existing = report.dealers_existing,
        warnings = report.warnings.len(),
        "dealer import finished"
    );
    Ok(report)
}

/// RFC 3339 timestamp of the last completed import.
pub fn last_import_at(conn: &Connection) -> BillingResult<Option<String>> {
    Ok(app_meta_get(conn, META_LAST_IMPORT)?)
}

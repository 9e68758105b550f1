//! Decimal helpers for quantities and money.
//!
//! All figures are `Decimal` in memory and canonical decimal TEXT in SQLite.
//! Rounding to two places happens only when a value is presented.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use rusqlite::types::{Type, ValueRef};
use rusqlite::Row;

const DECIMAL_PLACES: u32 = 2;

pub fn parse_decimal(field: &str, input: &str) -> Result<Decimal, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err(format!("{field} is required"));
    }
    Decimal::from_str(s).map_err(|_| format!("{field} must be a number, got {s:?}"))
}

/// Stored representation. `normalize` keeps the text short without changing the value.
pub fn to_sql_text(v: Decimal) -> String {
    v.normalize().to_string()
}

pub fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    optional_decimal_column(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "decimal".to_string(),
        Type::Null,
    ))
}

/// Accepts TEXT (current schema) as well as INTEGER/REAL written by older databases.
pub fn optional_decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let conversion = |e: rust_decimal::Error, ty: Type| {
        rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
    };
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(Decimal::from(i))),
        ValueRef::Real(f) => Decimal::try_from(f)
            .map(|d| Some(d.normalize()))
            .map_err(|e| conversion(e, Type::Real)),
        ValueRef::Text(bytes) => {
            let s = String::from_utf8_lossy(bytes);
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            Decimal::from_str(s)
                .map(Some)
                .map_err(|e| conversion(e, Type::Text))
        }
        ValueRef::Blob(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            Type::Blob,
        )),
    }
}

pub fn round2(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Plain two-place figure, e.g. `1234.5` -> `1234.50`.
pub fn format_fixed(v: Decimal) -> String {
    format!("{:.2}", round2(v))
}

/// Money with thousands separators, e.g. `1234567.891` -> `1,234,567.89`.
pub fn format_money(v: Decimal) -> String {
    let s = format_fixed(v);
    let (sign, s) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.as_str()),
    };
    let mut parts = s.splitn(2, '.');
    let int_part = parts.next().unwrap_or("0");
    let dec_part = parts.next().unwrap_or("00");

    let mut out = String::new();
    let chars: Vec<char> = int_part.chars().collect();
    let mut cnt = 0;
    for i in (0..chars.len()).rev() {
        if cnt == 3 {
            out.push(',');
            cnt = 0;
        }
        out.push(chars[i]);
        cnt += 1;
    }
    let int_with_sep: String = out.chars().rev().collect();
    format!("{}{}.{}", sign, int_with_sep, dec_part)
}

/// Kilometres and slab bounds: drop a trailing `.0`, keep real fractions.
pub fn format_km(v: Decimal) -> String {
    v.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn money_formatting_groups_thousands() {
        assert_eq!(format_money(d("1234567.891")), "1,234,567.89");
        assert_eq!(format_money(d("750")), "750.00");
        assert_eq!(format_money(d("0.005")), "0.01");
        assert_eq!(format_money(d("-1000")), "-1,000.00");
    }

    #[test]
    fn text_storage_preserves_value() {
        let v = d("2.50");
        assert_eq!(to_sql_text(v), "2.5");
        assert_eq!(d(&to_sql_text(v)), v);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_decimal("distance", "abc").is_err());
        assert!(parse_decimal("distance", " ").is_err());
        assert_eq!(parse_decimal("distance", " 12.5 ").unwrap(), d("12.5"));
    }

    #[test]
    fn km_formatting_trims_zeros() {
        assert_eq!(format_km(d("10.0")), "10");
        assert_eq!(format_km(d("12.50")), "12.5");
    }
}

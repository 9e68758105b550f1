//! Last-used form values, kept as one small JSON object per form.
//!
//! Purely a convenience for pre-filling forms: a missing or unreadable file
//! reads as empty, and nothing in billing depends on it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{validation, BillingResult};
use crate::main_bill::{MainBillHeader, DEFAULT_PRODUCT};

pub type FormValues = BTreeMap<String, String>;

pub const MAIN_BILL_FORM: &str = "main_bill";

#[derive(Debug, Clone)]
pub struct FormCache {
    dir: PathBuf,
}

impl FormCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, form: &str) -> PathBuf {
        self.dir.join(format!("{form}_cache.json"))
    }

    pub fn load(&self, form: &str) -> FormValues {
        let path = self.path_for(form);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(_) => return FormValues::new(),
        };
        match serde_json::from_str::<FormValues>(&text) {
            Ok(values) => values,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable form cache");
                FormValues::new()
            }
        }
    }

    pub fn save(&self, form: &str, values: &FormValues) -> BillingResult<()> {
        if form.trim().is_empty() || form.contains(['/', '\\']) {
            return Err(validation(format!("invalid form name {form:?}")));
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(form);
        let text = serde_json::to_string_pretty(values)?;
        write_atomic(&path, text.as_bytes())?;
        debug!(path = %path.display(), keys = values.len(), "form cache saved");
        Ok(())
    }

    pub fn load_main_bill_header(&self) -> MainBillHeader {
        header_from_values(&self.load(MAIN_BILL_FORM))
    }

    pub fn save_main_bill_header(&self, header: &MainBillHeader) -> BillingResult<()> {
        self.save(MAIN_BILL_FORM, &header_to_values(header))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

pub fn header_to_values(h: &MainBillHeader) -> FormValues {
    [
        ("bill_number", &h.bill_number),
        ("letter_note", &h.letter_note),
        ("to_address", &h.to_address),
        ("date_of_clearing", &h.date_of_clearing),
        ("fact_gst_number", &h.fact_gst_number),
        ("product", &h.product),
        ("hsn_sac_code", &h.hsn_sac_code),
        ("year", &h.year),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.clone()))
    .collect()
}

/// Missing keys fall back to the blank form; product falls back to the default.
pub fn header_from_values(values: &FormValues) -> MainBillHeader {
    let get = |k: &str| values.get(k).cloned();
    let blank = MainBillHeader::default();
    MainBillHeader {
        bill_number: get("bill_number").unwrap_or(blank.bill_number),
        letter_note: get("letter_note").unwrap_or(blank.letter_note),
        to_address: get("to_address").unwrap_or(blank.to_address),
        date_of_clearing: get("date_of_clearing")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(blank.date_of_clearing),
        fact_gst_number: get("fact_gst_number").unwrap_or(blank.fact_gst_number),
        product: get("product")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PRODUCT.to_string()),
        hsn_sac_code: get("hsn_sac_code").unwrap_or(blank.hsn_sac_code),
        year: get("year").unwrap_or(blank.year),
    }
}

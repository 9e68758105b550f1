//! Billing engine for a clearing & transport contractor.
//!
//! Reference data (rate slabs, destinations, dealers) feeds per-dealer shipment
//! figures; these roll up into destination entries, and saved entries roll up
//! again into main bills with a PDF invoice.

pub mod aggregation;
pub mod calculator;
pub mod config;
pub mod db;
pub mod dealers;
pub mod destinations;
pub mod entry;
pub mod error;
pub mod form_cache;
pub mod import;
pub mod logging;
pub mod main_bill;
pub mod money;
pub mod rates;
pub mod words;

pub use config::{AppConfig, Letterhead};
pub use db::Db;
pub use error::{BillingError, BillingResult, RowIssue};

//! Main bills: consolidation of saved destination entries into one invoice.

mod compose;
mod pdf;
mod store;

pub use compose::{compose_main_bill, MainBillHeader, MainBillPreview, DEFAULT_PRODUCT};
pub use pdf::render_main_bill_pdf;
pub use store::{
    delete_main_bill, get_main_bill_by_number, list_main_bills, main_bill_entry_ids, open_main_bill, save_main_bill,
    MainBill, MainBillSummary,
};

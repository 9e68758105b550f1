//! Destination entries: the editable draft, the save session and read-side queries.

mod draft;
mod query;
mod session;

pub use draft::{DealerRow, DealerRowDetails, EntryDraft, EntryHeader, RangeDraft, RowKey};
pub use query::{
    delete_entry, list_all_entries, list_unbilled_entries, search_entries, EntryLine, EntrySearch, EntrySummary,
};
pub use session::{EntrySession, SessionMode};

pub(crate) use draft::parse_iso_date;

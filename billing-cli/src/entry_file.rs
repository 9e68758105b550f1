//! JSON shape of a destination entry as typed in by the operator, and how it is
//! laid over a session.
//!
//! Editing matches ranges by slab and rows by dealer, so unchanged rows keep
//! their key (and with it their stored id) across saves.

use anyhow::Context;
use freight_billing::dealers::get_dealer_by_code;
use freight_billing::entry::{DealerRowDetails, EntryHeader, EntrySession, RowKey};
use freight_billing::rates::get_rate;
use freight_billing::Db;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFile {
  pub header: EntryHeader,
  #[serde(default)]
  pub ranges: Vec<RangeFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeFile {
  pub slab_id: i64,
  #[serde(default)]
  pub dealers: Vec<DealerFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerFile {
  pub code: String,
  pub bags: u32,
  #[serde(flatten)]
  pub details: DealerRowDetails,
}

pub fn apply(session: &mut EntrySession, db: &Db, file: EntryFile) -> anyhow::Result<()> {
  let conn = db.conn();
  let draft = session.draft_mut();
  draft.header = file.header;

  let wanted: Vec<i64> = file.ranges.iter().map(|r| r.slab_id).collect();
  let dropped: Vec<RowKey> = draft
    .ranges
    .iter()
    .filter(|r| !wanted.contains(&r.rate_range_id))
    .map(|r| r.key)
    .collect();
  for key in dropped {
    draft.remove_range(key)?;
  }

  for range_file in file.ranges {
    let existing = draft
      .ranges
      .iter()
      .find(|r| r.rate_range_id == range_file.slab_id)
      .map(|r| r.key);
    let range_key = match existing {
      Some(key) => key,
      None => {
        let slab = get_rate(conn, range_file.slab_id)?
          .with_context(|| format!("rate slab {} not found", range_file.slab_id))?;
        draft.add_range(&slab)?
      }
    };
    let range = draft.range_mut(range_key)?;

    let mut wanted_dealers = Vec::with_capacity(range_file.dealers.len());
    for dealer_file in range_file.dealers {
      let dealer = get_dealer_by_code(conn, &dealer_file.code)?
        .with_context(|| format!("dealer {} not found", dealer_file.code))?;
      wanted_dealers.push(dealer.id);

      let row_key = range.rows.iter().find(|r| r.dealer_id == dealer.id).map(|r| r.key);
      match row_key {
        Some(key) => range.update_dealer_row(key, dealer_file.bags, dealer_file.details)?,
        None => {
          range.add_dealer(&dealer, dealer_file.bags, dealer_file.details)?;
        }
      }
    }

    let stale: Vec<RowKey> = range
      .rows
      .iter()
      .filter(|r| !wanted_dealers.contains(&r.dealer_id))
      .map(|r| r.key)
      .collect();
    for key in stale {
      range.remove_dealer_row(key)?;
    }
  }
  Ok(())
}

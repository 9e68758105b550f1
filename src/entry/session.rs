//! Create/edit state machine that keeps a stored destination entry in step with
//! its in-memory draft.
//!
//! Every save is one diff-and-commit: rows whose key is known are updated, new
//! keys are inserted, and stored rows whose key left the draft are deleted.
//! The key-to-id tables are only replaced once the transaction has committed,
//! so a failed save leaves the session exactly as it was.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info, warn};

use crate::db::with_transaction;
use crate::error::{BillingError, BillingResult};
use crate::money::{decimal_column, to_sql_text};

use super::draft::{DealerRow, DealerRowDetails, EntryDraft, EntryHeader, RangeDraft, RowKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Create,
    Edit { entry_id: i64 },
}

#[derive(Debug, Clone)]
pub struct EntrySession {
    mode: SessionMode,
    draft: EntryDraft,
    range_entry_ids: HashMap<RowKey, i64>,
    dealer_entry_ids: HashMap<RowKey, i64>,
}

struct SavedIds {
    entry_id: i64,
    ranges: HashMap<RowKey, i64>,
    dealers: HashMap<RowKey, i64>,
}

impl EntrySession {
    pub fn new(draft: EntryDraft) -> Self {
        Self {
            mode: SessionMode::Create,
            draft,
            range_entry_ids: HashMap::new(),
            dealer_entry_ids: HashMap::new(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn entry_id(&self) -> Option<i64> {
        match self.mode {
            SessionMode::Create => None,
            SessionMode::Edit { entry_id } => Some(entry_id),
        }
    }

    pub fn draft(&self) -> &EntryDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut EntryDraft {
        &mut self.draft
    }

    pub fn range_entry_ids(&self) -> &HashMap<RowKey, i64> {
        &self.range_entry_ids
    }

    pub fn dealer_entry_ids(&self) -> &HashMap<RowKey, i64> {
        &self.dealer_entry_ids
    }

    /// Rebuilds the draft from storage, ranges and rows in insertion order.
    pub fn load_existing_entry(conn: &Connection, entry_id: i64) -> BillingResult<Self> {
        let header = conn
            .query_row(
                "SELECT destination_id, letter_note, bill_number, date, to_address FROM destination_entry WHERE id = ?1",
                params![entry_id],
                |r| {
                    Ok(EntryHeader {
                        destination_id: r.get(0)?,
                        letter_note: r.get(1)?,
                        bill_number: r.get(2)?,
                        date: r.get(3)?,
                        to_address: r.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| BillingError::NotFound(format!("destination entry {entry_id}")))?;

        let mut range_entry_ids = HashMap::new();
        let mut dealer_entry_ids = HashMap::new();

        let mut range_stmt = conn.prepare(
            "SELECT re.id, re.rate_range_id, rr.from_km, rr.to_km, re.rate, re.is_mtk \
             FROM range_entry re JOIN rate_range rr ON rr.id = re.rate_range_id \
             WHERE re.destination_entry_id = ?1 ORDER BY re.id",
        )?;
        let stored_ranges = range_stmt
            .query_map(params![entry_id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    RangeDraft {
                        key: RowKey::new(),
                        rate_range_id: r.get(1)?,
                        from_km: decimal_column(r, 2)?,
                        to_km: decimal_column(r, 3)?,
                        rate: decimal_column(r, 4)?,
                        is_mtk: r.get::<_, i64>(5)? != 0,
                        rows: Vec::new(),
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut row_stmt = conn.prepare(
            "SELECT de.id, de.dealer_id, d.code, d.name, de.km, de.no_bags, \
                    de.despatched_to, de.mda_number, de.date, de.description, de.remarks \
             FROM dealer_entry de JOIN dealer d ON d.id = de.dealer_id \
             WHERE de.range_entry_id = ?1 ORDER BY de.id",
        )?;

        let mut ranges = Vec::with_capacity(stored_ranges.len());
        for (range_id, mut range) in stored_ranges {
            let rows = row_stmt
                .query_map(params![range_id], |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        DealerRow {
                            key: RowKey::new(),
                            dealer_id: r.get(1)?,
                            dealer_code: r.get(2)?,
                            dealer_name: r.get(3)?,
                            km: decimal_column(r, 4)?,
                            no_bags: r.get(5)?,
                            details: DealerRowDetails {
                                despatched_to: r.get(6)?,
                                mda_number: r.get(7)?,
                                date: r.get(8)?,
                                description: r.get(9)?,
                                remarks: r.get(10)?,
                            },
                        },
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (dealer_entry_id, row) in rows {
                dealer_entry_ids.insert(row.key, dealer_entry_id);
                range.rows.push(row);
            }
            range_entry_ids.insert(range.key, range_id);
            ranges.push(range);
        }

        debug!(entry_id, ranges = ranges.len(), rows = dealer_entry_ids.len(), "entry loaded");
        Ok(Self {
            mode: SessionMode::Edit { entry_id },
            draft: EntryDraft { header, ranges },
            range_entry_ids,
            dealer_entry_ids,
        })
    }

    /// Persists the draft. Returns the destination entry id.
    pub fn save(&mut self, conn: &mut Connection) -> BillingResult<i64> {
        self.draft.validate()?;
        for range in &self.draft.ranges {
            for (row, shipment) in range.shipments() {
                if shipment.is_zero_amount() {
                    warn!(
                        dealer = %row.dealer_code,
                        km = %row.km,
                        bags = row.no_bags,
                        "dealer row computes to a zero amount"
                    );
                }
            }
        }

        let mode = self.mode;
        let saved = with_transaction(conn, "entry_save", |tx| match mode {
            SessionMode::Create => insert_entry(tx, &self.draft),
            SessionMode::Edit { entry_id } => update_entry(
                tx,
                entry_id,
                &self.draft,
                &self.range_entry_ids,
                &self.dealer_entry_ids,
            ),
        })?;

        self.mode = SessionMode::Edit {
            entry_id: saved.entry_id,
        };
        self.range_entry_ids = saved.ranges;
        self.dealer_entry_ids = saved.dealers;

        let totals = self.draft.totals();
        info!(
            entry_id = saved.entry_id,
            bill_number = %self.draft.header.bill_number,
            ranges = self.range_entry_ids.len(),
            rows = self.dealer_entry_ids.len(),
            amount = %totals.total_amount,
            "destination entry saved"
        );
        Ok(saved.entry_id)
    }
}

fn insert_entry(tx: &Transaction<'_>, draft: &EntryDraft) -> BillingResult<SavedIds> {
    let h = &draft.header;
    tx.execute(
        "INSERT INTO destination_entry (destination_id, letter_note, bill_number, date, to_address) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![h.destination_id, h.letter_note, h.bill_number.trim(), h.date.trim(), h.to_address],
    )?;
    let entry_id = tx.last_insert_rowid();

    let mut saved = SavedIds {
        entry_id,
        ranges: HashMap::new(),
        dealers: HashMap::new(),
    };
    for range in &draft.ranges {
        let range_id = insert_range(tx, entry_id, range)?;
        saved.ranges.insert(range.key, range_id);
        for row in &range.rows {
            let row_id = insert_row(tx, range_id, range, row)?;
            saved.dealers.insert(row.key, row_id);
        }
    }
    Ok(saved)
}

fn update_entry(
    tx: &Transaction<'_>,
    entry_id: i64,
    draft: &EntryDraft,
    known_ranges: &HashMap<RowKey, i64>,
    known_rows: &HashMap<RowKey, i64>,
) -> BillingResult<SavedIds> {
    let h = &draft.header;
    let main_bill_id: Option<Option<i64>> = tx
        .query_row(
            "SELECT main_bill_id FROM destination_entry WHERE id = ?1",
            params![entry_id],
            |r| r.get(0),
        )
        .optional()?;
    match main_bill_id {
        None => return Err(BillingError::NotFound(format!("destination entry {entry_id}"))),
        Some(Some(bill)) => {
            warn!(entry_id, main_bill_id = bill, "editing an entry already included in a main bill")
        }
        Some(None) => {}
    }

    tx.execute(
        "UPDATE destination_entry SET destination_id = ?2, letter_note = ?3, bill_number = ?4, date = ?5, to_address = ?6 WHERE id = ?1",
        params![entry_id, h.destination_id, h.letter_note, h.bill_number.trim(), h.date.trim(), h.to_address],
    )?;

    let mut saved = SavedIds {
        entry_id,
        ranges: HashMap::new(),
        dealers: HashMap::new(),
    };

    for range in &draft.ranges {
        let range_id = match known_ranges.get(&range.key) {
            Some(&id) if update_range(tx, entry_id, id, range)? => {
                debug!(range_entry_id = id, "range updated");
                id
            }
            _ => {
                let id = insert_range(tx, entry_id, range)?;
                debug!(range_entry_id = id, "range inserted");
                id
            }
        };
        saved.ranges.insert(range.key, range_id);

        let mut touched = HashSet::new();
        for row in &range.rows {
            let row_id = match known_rows.get(&row.key) {
                Some(&id) if update_row(tx, range_id, id, range, row)? => id,
                _ => insert_row(tx, range_id, range, row)?,
            };
            touched.insert(row_id);
            saved.dealers.insert(row.key, row_id);
        }

        let stale = ids_where(tx, "SELECT id FROM dealer_entry WHERE range_entry_id = ?1", range_id)?
            .into_iter()
            .filter(|id| !touched.contains(id));
        for id in stale {
            tx.execute("DELETE FROM dealer_entry WHERE id = ?1", params![id])?;
            debug!(dealer_entry_id = id, "dealer row deleted");
        }
    }

    let kept: HashSet<i64> = saved.ranges.values().copied().collect();
    let removed = ids_where(tx, "SELECT id FROM range_entry WHERE destination_entry_id = ?1", entry_id)?
        .into_iter()
        .filter(|id| !kept.contains(id));
    for id in removed {
        // Dealer rows cascade.
        tx.execute("DELETE FROM range_entry WHERE id = ?1", params![id])?;
        debug!(range_entry_id = id, "range deleted");
    }

    Ok(saved)
}

fn ids_where(tx: &Transaction<'_>, sql: &str, parent_id: i64) -> BillingResult<Vec<i64>> {
    let mut stmt = tx.prepare(sql)?;
    let ids = stmt
        .query_map(params![parent_id], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn insert_range(tx: &Transaction<'_>, entry_id: i64, range: &RangeDraft) -> BillingResult<i64> {
    let t = range.totals();
    tx.execute(
        "INSERT INTO range_entry (destination_entry_id, rate_range_id, rate, is_mtk, total_bags, total_mt, total_mtk, total_amount) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry_id,
            range.rate_range_id,
            to_sql_text(range.rate),
            range.is_mtk as i32,
            t.total_bags as i64,
            to_sql_text(t.total_mt),
            to_sql_text(t.total_mtk),
            to_sql_text(t.total_amount)
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// False when the stored range no longer belongs to this entry.
fn update_range(tx: &Transaction<'_>, entry_id: i64, id: i64, range: &RangeDraft) -> BillingResult<bool> {
    let t = range.totals();
    let changed = tx.execute(
        "UPDATE range_entry SET rate_range_id = ?3, rate = ?4, is_mtk = ?5, total_bags = ?6, total_mt = ?7, total_mtk = ?8, total_amount = ?9 \
         WHERE id = ?1 AND destination_entry_id = ?2",
        params![
            id,
            entry_id,
            range.rate_range_id,
            to_sql_text(range.rate),
            range.is_mtk as i32,
            t.total_bags as i64,
            to_sql_text(t.total_mt),
            to_sql_text(t.total_mtk),
            to_sql_text(t.total_amount)
        ],
    )?;
    Ok(changed == 1)
}

fn insert_row(tx: &Transaction<'_>, range_id: i64, range: &RangeDraft, row: &DealerRow) -> BillingResult<i64> {
    let s = row.shipment(range.rate, range.is_mtk);
    let d = &row.details;
    tx.execute(
        "INSERT INTO dealer_entry (range_entry_id, dealer_id, despatched_to, km, no_bags, rate, mt, mtk, amount, mda_number, date, description, remarks) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            range_id,
            row.dealer_id,
            d.despatched_to,
            to_sql_text(row.km),
            row.no_bags,
            to_sql_text(range.rate),
            to_sql_text(s.mt),
            to_sql_text(s.mtk),
            to_sql_text(s.amount),
            d.mda_number,
            d.date,
            d.description,
            d.remarks
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn update_row(
    tx: &Transaction<'_>,
    range_id: i64,
    id: i64,
    range: &RangeDraft,
    row: &DealerRow,
) -> BillingResult<bool> {
    let s = row.shipment(range.rate, range.is_mtk);
    let d = &row.details;
    let changed = tx.execute(
        "UPDATE dealer_entry SET dealer_id = ?3, despatched_to = ?4, km = ?5, no_bags = ?6, rate = ?7, mt = ?8, mtk = ?9, amount = ?10, \
         mda_number = ?11, date = ?12, description = ?13, remarks = ?14 \
         WHERE id = ?1 AND range_entry_id = ?2",
        params![
            id,
            range_id,
            row.dealer_id,
            d.despatched_to,
            to_sql_text(row.km),
            row.no_bags,
            to_sql_text(range.rate),
            to_sql_text(s.mt),
            to_sql_text(s.mtk),
            to_sql_text(s.amount),
            d.mda_number,
            d.date,
            d.description,
            d.remarks
        ],
    )?;
    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dealers::{create_dealer, NewDealer};
    use crate::db::Db;
    use crate::destinations::{create_destination, NewDestination};
    use crate::rates::{create_rate, NewRateSlab};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct Fixture {
        db: Db,
        draft: EntryDraft,
        dealers: Vec<crate::dealers::Dealer>,
    }

    fn fixture() -> Fixture {
        let mut db = Db::open_in_memory().unwrap();
        let dest = create_destination(
            db.conn_mut(),
            NewDestination {
                name: "Kannur".to_string(),
                ..NewDestination::default()
            },
        )
        .unwrap();
        let slab = create_rate(
            db.conn(),
            NewRateSlab {
                from_km: d("0"),
                to_km: d("10"),
                rate: d("100"),
                is_mtk: true,
            },
        )
        .unwrap();
        let dealers = (1..=3)
            .map(|i| {
                create_dealer(
                    db.conn(),
                    NewDealer {
                        code: format!("D{i}"),
                        name: format!("Dealer {i}"),
                        distance_km: Some(d("5")),
                        destination_id: Some(dest.id),
                        ..NewDealer::default()
                    },
                )
                .unwrap()
            })
            .collect::<Vec<_>>();

        let mut draft = EntryDraft::new(EntryHeader {
            destination_id: Some(dest.id),
            bill_number: "K-01".to_string(),
            date: "2024-04-01".to_string(),
            ..EntryHeader::default()
        });
        let rk = draft.add_range(&slab).unwrap();
        let range = draft.range_mut(rk).unwrap();
        range.add_dealer(&dealers[0], 20, DealerRowDetails::default()).unwrap();
        range.add_dealer(&dealers[1], 10, DealerRowDetails::default()).unwrap();
        Fixture { db, draft, dealers }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn create_then_edit_keeps_ids() {
        let Fixture { mut db, draft, .. } = fixture();
        let mut session = EntrySession::new(draft);
        assert_eq!(session.mode(), SessionMode::Create);

        let id = session.save(db.conn_mut()).unwrap();
        assert_eq!(session.mode(), SessionMode::Edit { entry_id: id });
        let ranges = session.range_entry_ids().clone();
        let rows = session.dealer_entry_ids().clone();
        assert_eq!(ranges.len(), 1);
        assert_eq!(rows.len(), 2);

        session.save(db.conn_mut()).unwrap();
        assert_eq!(session.range_entry_ids(), &ranges);
        assert_eq!(session.dealer_entry_ids(), &rows);
        assert_eq!(count(db.conn(), "dealer_entry"), 2);

        let total: String = db
            .conn()
            .query_row("SELECT total_amount FROM range_entry", [], |r| r.get(0))
            .unwrap();
        assert_eq!(d(&total), d("750"));
    }

    #[test]
    fn removed_rows_are_deleted_on_save() {
        let Fixture { mut db, draft, dealers } = fixture();
        let mut session = EntrySession::new(draft);
        session.save(db.conn_mut()).unwrap();

        let rk = session.draft().ranges[0].key;
        let first = session.draft().ranges[0].rows[0].key;
        let range = session.draft_mut().range_mut(rk).unwrap();
        range.remove_dealer_row(first).unwrap();
        range.add_dealer(&dealers[2], 4, DealerRowDetails::default()).unwrap();
        session.save(db.conn_mut()).unwrap();

        assert_eq!(count(db.conn(), "dealer_entry"), 2);
        assert!(!session.dealer_entry_ids().contains_key(&first));
        let bags: i64 = db
            .conn()
            .query_row("SELECT total_bags FROM range_entry", [], |r| r.get(0))
            .unwrap();
        assert_eq!(bags, 14);
    }

    #[test]
    fn failed_save_leaves_session_untouched() {
        let Fixture { mut db, draft, .. } = fixture();
        let mut session = EntrySession::new(draft);
        // Unknown destination trips the foreign key inside the transaction.
        session.draft_mut().header.destination_id = Some(999);
        assert!(matches!(session.save(db.conn_mut()), Err(BillingError::Database(_))));
        assert_eq!(session.mode(), SessionMode::Create);
        assert!(session.range_entry_ids().is_empty());
        assert_eq!(count(db.conn(), "destination_entry"), 0);
        assert_eq!(count(db.conn(), "range_entry"), 0);
    }

    #[test]
    fn failed_edit_save_keeps_stored_rows_and_tables() {
        let Fixture { mut db, draft, .. } = fixture();
        let mut session = EntrySession::new(draft);
        let id = session.save(db.conn_mut()).unwrap();
        let ranges = session.range_entry_ids().clone();
        let rows = session.dealer_entry_ids().clone();

        let rk = session.draft().ranges[0].key;
        let first = session.draft().ranges[0].rows[0].key;
        session
            .draft_mut()
            .range_mut(rk)
            .unwrap()
            .update_dealer_row(first, 35, DealerRowDetails::default())
            .unwrap();
        session.draft_mut().header.destination_id = Some(999);
        assert!(matches!(session.save(db.conn_mut()), Err(BillingError::Database(_))));

        assert_eq!(session.mode(), SessionMode::Edit { entry_id: id });
        assert_eq!(session.range_entry_ids(), &ranges);
        assert_eq!(session.dealer_entry_ids(), &rows);
        let bags: i64 = db
            .conn()
            .query_row(
                "SELECT no_bags FROM dealer_entry WHERE id = ?1",
                [rows[&first]],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(bags, 20);
        let total: i64 = db
            .conn()
            .query_row("SELECT total_bags FROM range_entry", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 30);
    }
}

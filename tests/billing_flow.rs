use std::str::FromStr;

use freight_billing::dealers::{create_dealer, Dealer, NewDealer};
use freight_billing::destinations::{create_destination, Destination, NewDestination};
use freight_billing::entry::{
    delete_entry, list_unbilled_entries, search_entries, DealerRowDetails, EntryDraft, EntryHeader, EntrySearch,
    EntrySession, SessionMode,
};
use freight_billing::main_bill::{
    compose_main_bill, delete_main_bill, get_main_bill_by_number, list_main_bills, main_bill_entry_ids,
    open_main_bill, render_main_bill_pdf, save_main_bill, MainBillHeader,
};
use freight_billing::rates::{create_rate, update_rate, NewRateSlab, RateSlab};
use freight_billing::{BillingError, Db, Letterhead};
use rust_decimal::Decimal;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

struct World {
    db: Db,
    kannur: Destination,
    vadakara: Destination,
    near: RateSlab,
    far: RateSlab,
    dealers: Vec<Dealer>,
}

fn world() -> World {
    let mut db = Db::open_in_memory().unwrap();
    let kannur = create_destination(
        db.conn_mut(),
        NewDestination {
            name: "Kannur".to_string(),
            place: "Thana".to_string(),
            ..NewDestination::default()
        },
    )
    .unwrap();
    let vadakara = create_destination(
        db.conn_mut(),
        NewDestination {
            name: "Vadakara".to_string(),
            ..NewDestination::default()
        },
    )
    .unwrap();
    let conn = db.conn();
    let near = create_rate(
        conn,
        NewRateSlab {
            from_km: d("0"),
            to_km: d("10"),
            rate: d("100"),
            is_mtk: true,
        },
    )
    .unwrap();
    let far = create_rate(
        conn,
        NewRateSlab {
            from_km: d("11"),
            to_km: d("20"),
            rate: d("80"),
            is_mtk: false,
        },
    )
    .unwrap();

    let specs = [
        ("A1", "Alpha Agro", "5", kannur.id),
        ("B1", "Beta Traders", "5", kannur.id),
        ("C1", "Chalil Stores", "15", kannur.id),
        ("V1", "Vadakara Agencies", "8", vadakara.id),
    ];
    let dealers = specs
        .iter()
        .map(|(code, name, km, dest)| {
            create_dealer(
                conn,
                NewDealer {
                    code: code.to_string(),
                    name: name.to_string(),
                    place: "Calicut".to_string(),
                    distance_km: Some(d(km)),
                    destination_id: Some(*dest),
                    ..NewDealer::default()
                },
            )
            .unwrap()
        })
        .collect();

    World {
        db,
        kannur,
        vadakara,
        near,
        far,
        dealers,
    }
}

fn header(dest: &Destination, bill: &str, date: &str) -> EntryHeader {
    EntryHeader {
        destination_id: Some(dest.id),
        letter_note: "Ref. RO/2024".to_string(),
        bill_number: bill.to_string(),
        date: date.to_string(),
        to_address: "The Manager".to_string(),
    }
}

/// Kannur entry: near slab with A1 x 20 and B1 x 10, far slab with C1 x 40.
fn kannur_entry(w: &World) -> EntryDraft {
    let mut draft = EntryDraft::new(header(&w.kannur, "K-01", "2024-04-01"));
    let near = draft.add_range(&w.near).unwrap();
    let r = draft.range_mut(near).unwrap();
    r.add_dealer(&w.dealers[0], 20, DealerRowDetails::default()).unwrap();
    r.add_dealer(&w.dealers[1], 10, DealerRowDetails::default()).unwrap();
    let far = draft.add_range(&w.far).unwrap();
    draft
        .range_mut(far)
        .unwrap()
        .add_dealer(
            &w.dealers[2],
            40,
            DealerRowDetails {
                mda_number: "MDA-9".to_string(),
                ..DealerRowDetails::default()
            },
        )
        .unwrap();
    draft
}

fn count(db: &Db, table: &str) -> i64 {
    db.conn()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

fn stored_row_ids(db: &Db) -> Vec<(i64, i64, String)> {
    let mut stmt = db
        .conn()
        .prepare("SELECT id, no_bags, amount FROM dealer_entry ORDER BY id")
        .unwrap();
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    rows
}

fn bill_header(number: &str) -> MainBillHeader {
    MainBillHeader {
        bill_number: number.to_string(),
        date_of_clearing: "2024-04-30".to_string(),
        ..MainBillHeader::default()
    }
}

#[test]
fn reload_reproduces_saved_entry() {
    let mut w = world();
    let draft = kannur_entry(&w);
    let mut session = EntrySession::new(draft.clone());
    let id = session.save(w.db.conn_mut()).unwrap();

    let loaded = EntrySession::load_existing_entry(w.db.conn(), id).unwrap();
    assert_eq!(loaded.mode(), SessionMode::Edit { entry_id: id });
    assert_eq!(loaded.draft().header, draft.header);
    assert_eq!(loaded.draft().totals(), draft.totals());

    let near = &loaded.draft().ranges[0];
    assert_eq!(near.rate_range_id, w.near.id);
    assert_eq!(
        near.rows.iter().map(|r| (r.dealer_id, r.no_bags)).collect::<Vec<_>>(),
        vec![(w.dealers[0].id, 20), (w.dealers[1].id, 10)]
    );
    let t = near.totals();
    assert_eq!(t.total_bags, 30);
    assert_eq!(t.total_mt, d("1.50"));
    assert_eq!(t.total_mtk, d("7.50"));
    assert_eq!(t.total_amount, d("750.00"));

    // MT basis: 40 bags = 2 MT at 80.
    assert_eq!(loaded.draft().ranges[1].totals().total_amount, d("160"));
    assert_eq!(loaded.draft().ranges[1].rows[0].details.mda_number, "MDA-9");
    assert_eq!(loaded.range_entry_ids().len(), 2);
    assert_eq!(loaded.dealer_entry_ids().len(), 3);
}

#[test]
fn resaving_a_loaded_entry_changes_nothing() {
    let mut w = world();
    let id = EntrySession::new(kannur_entry(&w)).save(w.db.conn_mut()).unwrap();

    let ids_before = stored_row_ids(&w.db);

    let mut session = EntrySession::load_existing_entry(w.db.conn(), id).unwrap();
    let range_ids = session.range_entry_ids().clone();
    let row_ids = session.dealer_entry_ids().clone();
    session.save(w.db.conn_mut()).unwrap();
    session.save(w.db.conn_mut()).unwrap();

    assert_eq!(session.range_entry_ids(), &range_ids);
    assert_eq!(session.dealer_entry_ids(), &row_ids);
    assert_eq!(stored_row_ids(&w.db), ids_before);
}

#[test]
fn removing_a_range_deletes_it_on_save() {
    let mut w = world();
    let mut session = EntrySession::new(kannur_entry(&w));
    session.save(w.db.conn_mut()).unwrap();
    assert_eq!(count(&w.db, "range_entry"), 2);

    let far_key = session.draft().ranges[1].key;
    let far_row = session.draft().ranges[1].rows[0].key;
    session.draft_mut().remove_range(far_key).unwrap();
    // Nothing touches storage until save.
    assert_eq!(count(&w.db, "range_entry"), 2);

    session.save(w.db.conn_mut()).unwrap();
    assert_eq!(count(&w.db, "range_entry"), 1);
    assert_eq!(count(&w.db, "dealer_entry"), 2);
    assert!(!session.range_entry_ids().contains_key(&far_key));
    assert!(!session.dealer_entry_ids().contains_key(&far_row));
}

#[test]
fn rate_changes_do_not_reach_saved_entries() {
    let mut w = world();
    let id = EntrySession::new(kannur_entry(&w)).save(w.db.conn_mut()).unwrap();
    update_rate(
        w.db.conn(),
        w.near.id,
        NewRateSlab {
            from_km: d("0"),
            to_km: d("10"),
            rate: d("120"),
            is_mtk: false,
        },
    )
    .unwrap();

    let loaded = EntrySession::load_existing_entry(w.db.conn(), id).unwrap();
    assert_eq!(loaded.draft().ranges[0].rate, d("100"));
    assert!(loaded.draft().ranges[0].is_mtk);
    assert_eq!(loaded.draft().ranges[0].totals().total_amount, d("750"));
}

#[test]
fn main_bill_merges_slabs_across_entries() {
    let mut w = world();
    let first = EntrySession::new(kannur_entry(&w)).save(w.db.conn_mut()).unwrap();

    let mut draft = EntryDraft::new(header(&w.vadakara, "V-01", "2024-04-02"));
    let rk = draft.add_range(&w.near).unwrap();
    draft
        .range_mut(rk)
        .unwrap()
        .add_dealer(&w.dealers[3], 10, DealerRowDetails::default())
        .unwrap();
    let second = EntrySession::new(draft).save(w.db.conn_mut()).unwrap();

    let preview = compose_main_bill(w.db.conn(), &bill_header("MB-1"), &[first, second]).unwrap();
    assert_eq!(preview.sections.len(), 2);

    let near = &preview.sections[0];
    assert_eq!(near.slab.rate, d("100"));
    assert_eq!(
        near.destinations.iter().map(|g| g.destination_name.as_str()).collect::<Vec<_>>(),
        vec!["Kannur (Thana)", "Vadakara"]
    );
    // 0.5 MT x 8 km x 100
    assert_eq!(near.destinations[1].subtotal.total_amount, d("400"));
    assert_eq!(near.subtotal.total_amount, d("1150"));

    assert_eq!(preview.grand_total.total_bags, 80);
    assert_eq!(preview.grand_total.total_amount, d("1310"));
    assert_eq!(
        preview.grand_total.total_amount,
        preview.sections.iter().map(|s| s.subtotal.total_amount).sum::<Decimal>()
    );
    assert_eq!(preview.amount_in_words, "Rupees One Thousand Three Hundred Ten Only");
    assert!(preview
        .claim_line()
        .starts_with("We are claiming for Rs. 1,310.00 (Rupees One Thousand Three Hundred Ten Only)"));
    assert_eq!(preview.header.product, "FACTOMFOS");
}

#[test]
fn main_bill_overwrite_needs_confirmation() {
    let mut w = world();
    let first = EntrySession::new(kannur_entry(&w)).save(w.db.conn_mut()).unwrap();
    let mut draft = EntryDraft::new(header(&w.vadakara, "V-01", "2024-04-02"));
    let rk = draft.add_range(&w.near).unwrap();
    draft
        .range_mut(rk)
        .unwrap()
        .add_dealer(&w.dealers[3], 10, DealerRowDetails::default())
        .unwrap();
    let second = EntrySession::new(draft).save(w.db.conn_mut()).unwrap();

    let bill = save_main_bill(w.db.conn_mut(), &bill_header("MB-1"), &[first], false).unwrap();
    assert_eq!(main_bill_entry_ids(w.db.conn(), bill.id).unwrap(), vec![first]);
    assert_eq!(
        list_unbilled_entries(w.db.conn()).unwrap().iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![second]
    );

    let err = save_main_bill(w.db.conn_mut(), &bill_header("MB-1"), &[second], false).unwrap_err();
    assert!(matches!(err, BillingError::BillNumberExists(ref n) if n == "MB-1"));
    // Nothing changed.
    assert_eq!(main_bill_entry_ids(w.db.conn(), bill.id).unwrap(), vec![first]);

    let mut h = bill_header("MB-1");
    h.year = "2024-25".to_string();
    let again = save_main_bill(w.db.conn_mut(), &h, &[second], true).unwrap();
    assert_eq!(again.id, bill.id);
    assert_eq!(main_bill_entry_ids(w.db.conn(), bill.id).unwrap(), vec![second]);
    assert_eq!(
        list_unbilled_entries(w.db.conn()).unwrap().iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![first]
    );
    let stored = get_main_bill_by_number(w.db.conn(), "MB-1").unwrap().unwrap();
    assert_eq!(stored.header.year, "2024-25");

    let flag: Option<i64> = w
        .db
        .conn()
        .query_row("SELECT main_bill_id FROM destination_entry WHERE id = ?1", [first], |r| r.get(0))
        .unwrap();
    assert_eq!(flag, None);
}

#[test]
fn billed_entries_are_protected_until_the_bill_goes() {
    let mut w = world();
    let id = EntrySession::new(kannur_entry(&w)).save(w.db.conn_mut()).unwrap();
    save_main_bill(w.db.conn_mut(), &bill_header("MB-2"), &[id], false).unwrap();

    let other = save_main_bill(w.db.conn_mut(), &bill_header("MB-3"), &[id], false).unwrap_err();
    assert!(matches!(other, BillingError::Conflict(_)));
    assert!(get_main_bill_by_number(w.db.conn(), "MB-3").unwrap().is_none());

    assert!(matches!(delete_entry(w.db.conn_mut(), id), Err(BillingError::Conflict(_))));

    let bills = list_main_bills(w.db.conn(), None).unwrap();
    assert_eq!(bills.len(), 1);
    assert_eq!(bills[0].entry_count, 1);
    assert_eq!(bills[0].total_amount, d("910"));

    delete_main_bill(w.db.conn_mut(), "MB-2").unwrap();
    assert_eq!(count(&w.db, "main_bill_entries"), 0);
    delete_entry(w.db.conn_mut(), id).unwrap();
    assert_eq!(count(&w.db, "destination_entry"), 0);
    assert_eq!(count(&w.db, "range_entry"), 0);
    assert_eq!(count(&w.db, "dealer_entry"), 0);
}

#[test]
fn editing_a_billed_entry_flows_into_the_bill() {
    let mut w = world();
    let id = EntrySession::new(kannur_entry(&w)).save(w.db.conn_mut()).unwrap();
    save_main_bill(w.db.conn_mut(), &bill_header("MB-4"), &[id], false).unwrap();
    assert_eq!(open_main_bill(w.db.conn(), "MB-4").unwrap().grand_total.total_amount, d("910"));

    let mut session = EntrySession::load_existing_entry(w.db.conn(), id).unwrap();
    let rk = session.draft().ranges[0].key;
    let row = session.draft().ranges[0].rows[1].key;
    session
        .draft_mut()
        .range_mut(rk)
        .unwrap()
        .update_dealer_row(row, 30, DealerRowDetails::default())
        .unwrap();
    session.save(w.db.conn_mut()).unwrap();

    // B1 went from 10 to 30 bags: +1 MT x 5 km x 100.
    assert_eq!(open_main_bill(w.db.conn(), "MB-4").unwrap().grand_total.total_amount, d("1410"));
}

#[test]
fn search_filters_by_dealer_and_date() {
    let mut w = world();
    EntrySession::new(kannur_entry(&w)).save(w.db.conn_mut()).unwrap();

    let by_dealer = search_entries(
        w.db.conn(),
        &EntrySearch {
            dealer_name: Some("beta".to_string()),
            ..EntrySearch::default()
        },
    )
    .unwrap();
    assert_eq!(by_dealer.len(), 1);
    assert_eq!(by_dealer[0].dealer_code, "B1");
    assert_eq!(by_dealer[0].amount, d("250"));

    let none = search_entries(
        w.db.conn(),
        &EntrySearch {
            date: Some("2024-05-01".to_string()),
            ..EntrySearch::default()
        },
    )
    .unwrap();
    assert!(none.is_empty());

    let bad = search_entries(
        w.db.conn(),
        &EntrySearch {
            date: Some("May 1".to_string()),
            ..EntrySearch::default()
        },
    );
    assert!(matches!(bad, Err(BillingError::Validation(_))));
}

#[test]
fn invoice_renders_to_pdf() {
    let mut w = world();
    let id = EntrySession::new(kannur_entry(&w)).save(w.db.conn_mut()).unwrap();
    let preview = compose_main_bill(w.db.conn(), &bill_header("MB-5"), &[id]).unwrap();
    let bytes = render_main_bill_pdf(&preview, &Letterhead::default()).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[test]
fn compose_rejects_empty_or_unknown_selection() {
    let w = world();
    assert!(matches!(
        compose_main_bill(w.db.conn(), &bill_header("MB-6"), &[]),
        Err(BillingError::Validation(_))
    ));
    assert!(matches!(
        compose_main_bill(w.db.conn(), &bill_header("MB-6"), &[42]),
        Err(BillingError::NotFound(_))
    ));
}

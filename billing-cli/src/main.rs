use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use freight_billing::dealers::{self, DealerFilter, NewDealer};
use freight_billing::destinations::{self, NewDestination};
use freight_billing::entry::{self, EntryDraft, EntrySearch, EntrySession};
use freight_billing::form_cache::FormCache;
use freight_billing::import::{import_dealer_sheets, DealerSheet};
use freight_billing::logging::init_logging;
use freight_billing::main_bill::{self, MainBillHeader, MainBillPreview};
use freight_billing::money::{format_fixed, format_km, format_money};
use freight_billing::rates::{self, NewRateSlab};
use freight_billing::{AppConfig, BillingError, Db};
use rust_decimal::Decimal;
use tracing::info;

mod entry_file;

#[derive(Parser, Debug)]
#[command(name = "billing-cli", about = "Clearing & transport billing")]
struct Cli {
  /// Config file; defaults to freight-billing.json next to the working dir or binary.
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Database file; overrides the config.
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Print results as JSON.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  #[command(subcommand)]
  Rate(RateCmd),
  #[command(subcommand)]
  Dealer(DealerCmd),
  #[command(subcommand)]
  Destination(DestinationCmd),
  /// Import dealer sheets from a JSON document: `[{"name": "...", "rows": [[...]]}]`.
  Import {
    #[arg(long)]
    file: PathBuf,
  },
  #[command(subcommand)]
  Entry(EntryCmd),
  #[command(subcommand)]
  MainBill(MainBillCmd),
}

#[derive(Subcommand, Debug)]
enum RateCmd {
  List,
  Add {
    #[arg(long)]
    from: Decimal,
    #[arg(long)]
    to: Decimal,
    #[arg(long)]
    rate: Decimal,
    /// Bill per tonne instead of per tonne-km.
    #[arg(long)]
    mt: bool,
  },
  Update {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    from: Decimal,
    #[arg(long)]
    to: Decimal,
    #[arg(long)]
    rate: Decimal,
    #[arg(long)]
    mt: bool,
  },
  Delete {
    #[arg(long)]
    id: i64,
  },
}

#[derive(clap::Args, Debug)]
struct DealerFields {
  #[arg(long)]
  code: String,
  #[arg(long)]
  name: String,
  #[arg(long, default_value = "")]
  place: String,
  #[arg(long, default_value = "")]
  pincode: String,
  #[arg(long, default_value = "")]
  mobile: String,
  #[arg(long)]
  distance: Option<Decimal>,
  #[arg(long)]
  destination: i64,
}

impl From<DealerFields> for NewDealer {
  fn from(f: DealerFields) -> Self {
    NewDealer {
      code: f.code,
      name: f.name,
      place: f.place,
      pincode: f.pincode,
      mobile: f.mobile,
      distance_km: f.distance,
      destination_id: Some(f.destination),
    }
  }
}

#[derive(Subcommand, Debug)]
enum DealerCmd {
  List {
    #[arg(long)]
    destination: Option<i64>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    active: bool,
  },
  /// Dealers eligible for a slab.
  Eligible {
    #[arg(long)]
    slab: i64,
  },
  Add(DealerFields),
  Update {
    #[arg(long)]
    id: i64,
    #[command(flatten)]
    fields: DealerFields,
  },
  Delete {
    #[arg(long)]
    id: i64,
  },
}

#[derive(clap::Args, Debug)]
struct DestinationFields {
  #[arg(long)]
  name: String,
  #[arg(long, default_value = "")]
  place: String,
  #[arg(long, default_value = "")]
  description: String,
  #[arg(long)]
  garage: bool,
}

impl From<DestinationFields> for NewDestination {
  fn from(f: DestinationFields) -> Self {
    NewDestination {
      name: f.name,
      place: f.place,
      description: f.description,
      is_garage: f.garage,
    }
  }
}

#[derive(Subcommand, Debug)]
enum DestinationCmd {
  List,
  Add(DestinationFields),
  Update {
    #[arg(long)]
    id: i64,
    #[command(flatten)]
    fields: DestinationFields,
  },
  /// Turn the garage flag on or off.
  Garage {
    #[arg(long)]
    id: i64,
    #[arg(long, action = clap::ArgAction::Set)]
    enabled: bool,
  },
  Delete {
    #[arg(long)]
    id: i64,
  },
}

#[derive(Subcommand, Debug)]
enum EntryCmd {
  /// Save an entry from JSON; with --id the stored entry is edited in place.
  Save {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    id: Option<i64>,
  },
  Show {
    #[arg(long)]
    id: i64,
  },
  List {
    #[arg(long)]
    unbilled: bool,
  },
  Search {
    #[arg(long)]
    destination: Option<i64>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    dealer: Option<String>,
  },
  Delete {
    #[arg(long)]
    id: i64,
  },
}

/// Header flags; anything left out comes from the last-used values.
#[derive(clap::Args, Debug)]
struct HeaderArgs {
  #[arg(long)]
  number: Option<String>,
  #[arg(long)]
  date: Option<String>,
  #[arg(long)]
  to_address: Option<String>,
  #[arg(long)]
  letter_note: Option<String>,
  #[arg(long)]
  gst: Option<String>,
  #[arg(long)]
  product: Option<String>,
  #[arg(long)]
  hsn: Option<String>,
  #[arg(long)]
  year: Option<String>,
}

impl HeaderArgs {
  fn over(self, mut h: MainBillHeader) -> MainBillHeader {
    let fields = [
      (self.number, &mut h.bill_number),
      (self.date, &mut h.date_of_clearing),
      (self.to_address, &mut h.to_address),
      (self.letter_note, &mut h.letter_note),
      (self.gst, &mut h.fact_gst_number),
      (self.product, &mut h.product),
      (self.hsn, &mut h.hsn_sac_code),
      (self.year, &mut h.year),
    ];
    for (value, slot) in fields {
      if let Some(v) = value {
        *slot = v;
      }
    }
    h
  }
}

#[derive(Subcommand, Debug)]
enum MainBillCmd {
  Preview {
    #[arg(long, value_delimiter = ',', required = true)]
    entries: Vec<i64>,
    #[command(flatten)]
    header: HeaderArgs,
  },
  Save {
    #[arg(long, value_delimiter = ',', required = true)]
    entries: Vec<i64>,
    #[command(flatten)]
    header: HeaderArgs,
    /// Replace an existing bill with the same number.
    #[arg(long)]
    overwrite: bool,
  },
  Open {
    #[arg(long)]
    number: String,
  },
  /// Render a saved bill to PDF.
  Export {
    #[arg(long)]
    number: String,
    #[arg(long)]
    out: Option<PathBuf>,
  },
  List {
    #[arg(long)]
    search: Option<String>,
  },
  Delete {
    #[arg(long)]
    number: String,
  },
}

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  let mut cfg = AppConfig::load(cli.config.as_deref()).context("failed to load config")?;
  if let Some(db) = &cli.db {
    cfg.database_path = Some(db.clone());
  }
  init_logging(&cfg.log_level);

  let db_path = cfg.resolve_db_path();
  let mut db = Db::open(&db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
  info!(path = %db_path.display(), "database opened");

  match cli.command {
    Command::Rate(cmd) => rate_cmd(&db, cmd, cli.json)?,
    Command::Dealer(cmd) => dealer_cmd(&db, cmd, cli.json)?,
    Command::Destination(cmd) => destination_cmd(&mut db, cmd, cli.json)?,
    Command::Import { file } => {
      let sheets: Vec<DealerSheet> = read_json(&file)?;
      let report = import_dealer_sheets(db.conn_mut(), &sheets)?;
      if cli.json {
        print_json(&report)?;
      } else {
        println!(
          "Imported {} dealers from {} sheets ({} new destinations, {} already registered)",
          report.dealers_inserted, report.sheets_read, report.destinations_created, report.dealers_existing
        );
        if !report.warnings.is_empty() {
          println!("Warnings:");
          for w in &report.warnings {
            println!("  {w}");
          }
        }
      }
    }
    Command::Entry(cmd) => entry_cmd(&mut db, cmd, cli.json)?,
    Command::MainBill(cmd) => main_bill_cmd(&mut db, &cfg, cmd, cli.json)?,
  }

  Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
  let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
  serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn rate_cmd(db: &Db, cmd: RateCmd, json: bool) -> anyhow::Result<()> {
  let conn = db.conn();
  match cmd {
    RateCmd::List => {
      let slabs = rates::list_rates(conn)?;
      if json {
        return print_json(&slabs);
      }
      for s in slabs {
        println!("{:>4}  {}", s.id, s.label());
      }
    }
    RateCmd::Add { from, to, rate, mt } => {
      let s = rates::create_rate(conn, NewRateSlab { from_km: from, to_km: to, rate, is_mtk: !mt })?;
      println!("Created slab {}: {}", s.id, s.label());
    }
    RateCmd::Update { id, from, to, rate, mt } => {
      let s = rates::update_rate(conn, id, NewRateSlab { from_km: from, to_km: to, rate, is_mtk: !mt })?;
      println!("Updated slab {}: {}", s.id, s.label());
    }
    RateCmd::Delete { id } => {
      rates::delete_rate(conn, id)?;
      println!("Deleted slab {id}");
    }
  }
  Ok(())
}

fn print_dealers(list: &[dealers::Dealer], json: bool) -> anyhow::Result<()> {
  if json {
    return print_json(&list);
  }
  for d in list {
    let flag = if d.is_active { "" } else { "  (inactive)" };
    println!("{:>4}  {}{}", d.id, d.label(), flag);
  }
  Ok(())
}

fn dealer_cmd(db: &Db, cmd: DealerCmd, json: bool) -> anyhow::Result<()> {
  let conn = db.conn();
  match cmd {
    DealerCmd::List { destination, name, active } => {
      let filter = DealerFilter {
        destination_id: destination,
        active_only: active,
        name_contains: name,
      };
      print_dealers(&dealers::list_dealers(conn, &filter)?, json)?;
    }
    DealerCmd::Eligible { slab } => {
      let slab = rates::get_rate(conn, slab)?.with_context(|| format!("rate slab {slab} not found"))?;
      print_dealers(&dealers::dealers_in_slab(conn, &slab)?, json)?;
    }
    DealerCmd::Add(fields) => {
      let d = dealers::create_dealer(conn, fields.into())?;
      println!("Created dealer {}: {}", d.id, d.label());
    }
    DealerCmd::Update { id, fields } => {
      let d = dealers::update_dealer(conn, id, fields.into())?;
      println!("Updated dealer {}: {}", d.id, d.label());
    }
    DealerCmd::Delete { id } => {
      dealers::delete_dealer(conn, id)?;
      println!("Deleted dealer {id}");
    }
  }
  Ok(())
}

fn destination_cmd(db: &mut Db, cmd: DestinationCmd, json: bool) -> anyhow::Result<()> {
  match cmd {
    DestinationCmd::List => {
      let list = destinations::list_destinations(db.conn())?;
      if json {
        return print_json(&list);
      }
      for d in list {
        let garage = if d.is_garage { "  [garage]" } else { "" };
        println!("{:>4}  {}{}", d.id, d.display_name(), garage);
      }
    }
    DestinationCmd::Add(fields) => {
      let d = destinations::create_destination(db.conn_mut(), fields.into())?;
      println!("Created destination {}: {}", d.id, d.display_name());
    }
    DestinationCmd::Update { id, fields } => {
      let d = destinations::update_destination(db.conn_mut(), id, fields.into())?;
      println!("Updated destination {}: {}", d.id, d.display_name());
    }
    DestinationCmd::Garage { id, enabled } => {
      destinations::set_garage(db.conn_mut(), id, enabled)?;
      match destinations::garage_dealer(db.conn(), id)? {
        Some(d) if d.is_active => println!("Destination {id} is a garage (dealer {})", d.code),
        _ => println!("Destination {id} is no longer a garage"),
      }
    }
    DestinationCmd::Delete { id } => {
      destinations::delete_destination(db.conn_mut(), id)?;
      println!("Deleted destination {id}");
    }
  }
  Ok(())
}

fn entry_cmd(db: &mut Db, cmd: EntryCmd, json: bool) -> anyhow::Result<()> {
  match cmd {
    EntryCmd::Save { file, id } => {
      let input: entry_file::EntryFile = read_json(&file)?;
      let mut session = match id {
        Some(id) => EntrySession::load_existing_entry(db.conn(), id)?,
        None => EntrySession::new(EntryDraft::default()),
      };
      entry_file::apply(&mut session, db, input)?;
      let totals = session.draft().totals();
      let id = session.save(db.conn_mut())?;
      println!(
        "Saved entry {id}: {} bags, {} MT, {} MTK, Rs. {}",
        totals.total_bags,
        format_fixed(totals.total_mt),
        format_fixed(totals.total_mtk),
        format_money(totals.total_amount)
      );
    }
    EntryCmd::Show { id } => {
      let session = EntrySession::load_existing_entry(db.conn(), id)?;
      let draft = session.draft();
      if json {
        return print_json(draft);
      }
      let h = &draft.header;
      println!("Entry {id}  bill {}  date {}", h.bill_number, h.date);
      for range in &draft.ranges {
        println!("  {} @ Rs.{} ({})", range.label(), format_fixed(range.rate), if range.is_mtk { "MTK" } else { "MT" });
        for (row, s) in range.shipments() {
          println!(
            "    {:<10} {:<28} {:>5} bags {:>7} km {:>8} MT {:>10} MTK {:>12}",
            row.dealer_code,
            row.dealer_name,
            row.no_bags,
            format_km(row.km),
            format_fixed(s.mt),
            format_fixed(s.mtk),
            format_money(s.amount)
          );
        }
        let t = range.totals();
        println!("    total {} bags, Rs. {}", t.total_bags, format_money(t.total_amount));
      }
      let t = draft.totals();
      println!("  Entry total: {} bags, Rs. {}", t.total_bags, format_money(t.total_amount));
    }
    EntryCmd::List { unbilled } => {
      let list = if unbilled {
        entry::list_unbilled_entries(db.conn())?
      } else {
        entry::list_all_entries(db.conn())?
      };
      if json {
        return print_json(&list);
      }
      for e in list {
        let billed = e.main_bill_id.map(|id| format!("  [main bill {id}]")).unwrap_or_default();
        println!(
          "{:>4}  {}  {:<12} {:<24} {:>6} bags  Rs. {}{}",
          e.id,
          e.date,
          e.bill_number,
          e.destination,
          e.total_bags,
          format_money(e.total_amount),
          billed
        );
      }
    }
    EntryCmd::Search { destination, date, dealer } => {
      let search = EntrySearch {
        destination_id: destination,
        date,
        dealer_name: dealer,
      };
      let lines = entry::search_entries(db.conn(), &search)?;
      if json {
        return print_json(&lines);
      }
      for l in lines {
        println!(
          "{:>4}  {}  {:<20} {:<24} {:<24} {:>5} {:>8} {:>12}",
          l.entry_id,
          l.date,
          l.destination,
          l.slab,
          l.dealer_name,
          l.no_bags,
          format_fixed(l.mtk),
          format_money(l.amount)
        );
      }
    }
    EntryCmd::Delete { id } => {
      entry::delete_entry(db.conn_mut(), id)?;
      println!("Deleted entry {id}");
    }
  }
  Ok(())
}

fn print_preview(p: &MainBillPreview, json: bool) -> anyhow::Result<()> {
  if json {
    return print_json(p);
  }
  println!("Main bill {}  ({})", p.header.bill_number, p.header.date_of_clearing);
  for section in &p.sections {
    println!("{}", section.slab.label());
    for group in &section.destinations {
      println!("  {}", group.destination_name);
      for l in &group.lines {
        println!(
          "    {:<28} {:>5} {:>8} {:>7} {:>10} {:>12}",
          l.dealer_name,
          l.no_bags,
          format_fixed(l.mt),
          format_km(l.km),
          format_fixed(l.mtk),
          format_money(l.amount)
        );
      }
      println!("    subtotal {:>20} Rs. {}", group.subtotal.total_bags, format_money(group.subtotal.total_amount));
    }
    println!("  slab total {:>18} Rs. {}", section.subtotal.total_bags, format_money(section.subtotal.total_amount));
  }
  let g = &p.grand_total;
  println!(
    "GRAND TOTAL: {} bags, {} MT, {} MTK, Rs. {}",
    g.total_bags,
    format_fixed(g.total_mt),
    format_fixed(g.total_mtk),
    format_money(g.total_amount)
  );
  println!("{}", p.claim_line());
  Ok(())
}

fn main_bill_cmd(db: &mut Db, cfg: &AppConfig, cmd: MainBillCmd, json: bool) -> anyhow::Result<()> {
  let cache = FormCache::new(cfg.resolve_cache_dir());
  match cmd {
    MainBillCmd::Preview { entries, header } => {
      let header = header.over(cache.load_main_bill_header());
      let preview = main_bill::compose_main_bill(db.conn(), &header, &entries)?;
      print_preview(&preview, json)?;
    }
    MainBillCmd::Save { entries, header, overwrite } => {
      let header = header.over(cache.load_main_bill_header());
      match main_bill::save_main_bill(db.conn_mut(), &header, &entries, overwrite) {
        Ok(bill) => {
          cache.save_main_bill_header(&bill.header)?;
          println!("Saved main bill {} ({} entries)", bill.header.bill_number, entries.len());
        }
        Err(BillingError::BillNumberExists(number)) => {
          anyhow::bail!("main bill {number} already exists; rerun with --overwrite to replace it");
        }
        Err(e) => return Err(e.into()),
      }
    }
    MainBillCmd::Open { number } => {
      let preview = main_bill::open_main_bill(db.conn(), &number)?;
      print_preview(&preview, json)?;
    }
    MainBillCmd::Export { number, out } => {
      let preview = main_bill::open_main_bill(db.conn(), &number)?;
      let bytes = main_bill::render_main_bill_pdf(&preview, &cfg.letterhead)?;
      let path = match out {
        Some(p) => p,
        None => {
          let safe: String = number
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
          cfg.resolve_output_dir().join(format!("main_bill_{safe}.pdf"))
        }
      };
      if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
      }
      fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
      println!("Wrote {}", path.display());
    }
    MainBillCmd::List { search } => {
      let bills = main_bill::list_main_bills(db.conn(), search.as_deref())?;
      if json {
        return print_json(&bills);
      }
      for b in bills {
        println!(
          "{:<14} {}  {:>3} entries  Rs. {}",
          b.bill_number,
          b.date_of_clearing,
          b.entry_count,
          format_money(b.total_amount)
        );
      }
    }
    MainBillCmd::Delete { number } => {
      main_bill::delete_main_bill(db.conn_mut(), &number)?;
      println!("Deleted main bill {number}");
    }
  }
  Ok(())
}

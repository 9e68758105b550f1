use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{BillingError, BillingResult};

const SCHEMA_VERSION: i64 = 4;

/// Owner of the single SQLite connection. Components borrow the connection
/// (`&Connection` for reads, `&mut Connection` for transactional writes).
pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> BillingResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        configure_sqlite(&conn)?;
        Self::prepare(conn)
    }

    pub fn open_in_memory() -> BillingResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> BillingResult<Self> {
        init_schema(&conn)?;
        apply_migrations(&conn)?;
        info!(version = SCHEMA_VERSION, "database ready");
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Runs `f` inside an IMMEDIATE transaction. Commits on `Ok`; any `Err` drops the
/// transaction, which rolls it back.
pub fn with_transaction<T, F>(conn: &mut Connection, op_name: &'static str, f: F) -> BillingResult<T>
where
    F: FnOnce(&Transaction<'_>) -> BillingResult<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    match f(&tx) {
        Ok(v) => {
            tx.commit()?;
            debug!(op = op_name, "transaction committed");
            Ok(v)
        }
        Err(e) => {
            debug!(op = op_name, error = %e, "transaction rolled back");
            Err(e)
        }
    }
}

fn configure_sqlite(conn: &Connection) -> Result<(), rusqlite::Error> {
    // Apply PRAGMAs on init (outside any transaction).
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS app_meta (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rate_range (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_km TEXT NOT NULL,
            to_km TEXT NOT NULL,
            rate TEXT NOT NULL,
            is_mtk INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS destination (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            place TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            is_garage INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS dealer (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            place TEXT NOT NULL DEFAULT '',
            pincode TEXT NOT NULL DEFAULT '',
            mobile TEXT NOT NULL DEFAULT '',
            distance TEXT,
            destination_id INTEGER REFERENCES destination(id) ON DELETE SET NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            garage_destination_id INTEGER
        );

        CREATE TABLE IF NOT EXISTS main_bill (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bill_number TEXT NOT NULL UNIQUE,
            letter_note TEXT NOT NULL DEFAULT '',
            to_address TEXT NOT NULL DEFAULT '',
            date_of_clearing TEXT NOT NULL,
            fact_gst_number TEXT NOT NULL DEFAULT '',
            product TEXT NOT NULL DEFAULT 'FACTOMFOS',
            hsn_sac_code TEXT NOT NULL DEFAULT '',
            year TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS destination_entry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            destination_id INTEGER NOT NULL REFERENCES destination(id),
            letter_note TEXT NOT NULL DEFAULT '',
            bill_number TEXT NOT NULL,
            date TEXT NOT NULL,
            to_address TEXT NOT NULL DEFAULT '',
            main_bill_id INTEGER REFERENCES main_bill(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS range_entry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            destination_entry_id INTEGER NOT NULL REFERENCES destination_entry(id) ON DELETE CASCADE,
            rate_range_id INTEGER NOT NULL REFERENCES rate_range(id),
            rate TEXT NOT NULL,
            is_mtk INTEGER NOT NULL DEFAULT 1,
            total_bags INTEGER NOT NULL DEFAULT 0,
            total_mt TEXT NOT NULL DEFAULT '0',
            total_mtk TEXT NOT NULL DEFAULT '0',
            total_amount TEXT NOT NULL DEFAULT '0'
        );

        CREATE TABLE IF NOT EXISTS dealer_entry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            range_entry_id INTEGER NOT NULL REFERENCES range_entry(id) ON DELETE CASCADE,
            dealer_id INTEGER NOT NULL REFERENCES dealer(id),
            despatched_to TEXT NOT NULL DEFAULT '',
            km TEXT NOT NULL,
            no_bags INTEGER NOT NULL,
            rate TEXT NOT NULL,
            mt TEXT NOT NULL,
            mtk TEXT NOT NULL,
            amount TEXT NOT NULL,
            mda_number TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            remarks TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS main_bill_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            main_bill_id INTEGER NOT NULL REFERENCES main_bill(id) ON DELETE CASCADE,
            destination_entry_id INTEGER NOT NULL REFERENCES destination_entry(id) ON DELETE CASCADE,
            UNIQUE (main_bill_id, destination_entry_id)
        );

        CREATE INDEX IF NOT EXISTS idx_range_entry_destination_entry ON range_entry(destination_entry_id);
        CREATE INDEX IF NOT EXISTS idx_dealer_entry_range_entry ON dealer_entry(range_entry_id);
        CREATE INDEX IF NOT EXISTS idx_main_bill_entries_bill ON main_bill_entries(main_bill_id);
        "#,
    )?;
    Ok(())
}

pub fn app_meta_get(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_meta WHERE key = ?1",
        params![key],
        |r| r.get(0),
    )
    .optional()
}

pub fn app_meta_set(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO app_meta(key, value) VALUES(?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|n| n == column))
}

fn apply_migrations(conn: &Connection) -> Result<(), BillingError> {
    let mut v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    // v=0 is either a fresh DB (init_schema created the latest tables) or a database
    // written before versioning, which may lack the later dealer/range columns.
    if v == 0 {
        v = 1;
    }

    if v < 2 && !has_column(conn, "dealer", "destination_id")? {
        conn.execute_batch(
            "ALTER TABLE dealer ADD COLUMN destination_id INTEGER REFERENCES destination(id);",
        )?;
    }

    if v < 3 {
        if !has_column(conn, "dealer", "is_active")? {
            conn.execute_batch("ALTER TABLE dealer ADD COLUMN is_active INTEGER NOT NULL DEFAULT 1;")?;
        }
        if !has_column(conn, "dealer", "garage_destination_id")? {
            conn.execute_batch("ALTER TABLE dealer ADD COLUMN garage_destination_id INTEGER;")?;
        }
        if !has_column(conn, "destination_entry", "main_bill_id")? {
            conn.execute_batch(
                "ALTER TABLE destination_entry ADD COLUMN main_bill_id INTEGER REFERENCES main_bill(id);",
            )?;
        }
    }

    if v < 4 {
        if !has_column(conn, "range_entry", "rate")? {
            conn.execute_batch(
                "ALTER TABLE range_entry ADD COLUMN rate TEXT NOT NULL DEFAULT '0';\n\
                 UPDATE range_entry SET rate = COALESCE(\n\
                     (SELECT rate FROM rate_range WHERE rate_range.id = range_entry.rate_range_id), '0');",
            )?;
        }
        if !has_column(conn, "range_entry", "is_mtk")? {
            conn.execute_batch(
                "ALTER TABLE range_entry ADD COLUMN is_mtk INTEGER NOT NULL DEFAULT 1;\n\
                 UPDATE range_entry SET is_mtk = COALESCE(\n\
                     (SELECT is_mtk FROM rate_range WHERE rate_range.id = range_entry.rate_range_id), 1);",
            )?;
        }
    }

    // Indexes on columns that legacy databases only gain through the steps above.
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_dealer_destination ON dealer(destination_id);\n\
         CREATE INDEX IF NOT EXISTS idx_destination_entry_main_bill ON destination_entry(main_bill_id);",
    )?;

    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    Ok(())
}

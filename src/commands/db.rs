use crate::analysis::recency::{format_timestamp, parse_timestamp};
use crate::commands::ledger::VisitLedger;
use crate::error::Result;
use crate::models::visit::{LedgerEntry, VisitEvent};
use chrono_tz::Tz;
use log::warn;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const DB_SCHEMA_VERSION: i64 = 2;

/// Where the visit ledger lives between runs.
pub trait LedgerStore {
    /// A store that does not exist yet loads as an empty ledger.
    fn load(&self) -> Result<VisitLedger>;
    fn save(&self, ledger: &VisitLedger) -> Result<()>;
}

/// Load the ledger, starting empty when the store is unreadable.
pub fn load_or_empty(store: &dyn LedgerStore) -> VisitLedger {
    match store.load() {
        Ok(ledger) => ledger,
        Err(e) => {
            warn!("Could not load visit ledger, starting empty: {e}");
            VisitLedger::new()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    last_visit: BTreeMap<String, Option<String>>,
    #[serde(default)]
    visit_history: BTreeMap<String, Vec<StoredVisit>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredVisit {
    date: String,
    fill_level: Option<f64>,
    #[serde(default)]
    expected_fill: f64,
}

/// `optimizer_state.json`-style document keyed by box id.
pub struct JsonLedgerStore {
    path: PathBuf,
    tz: Tz,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self { path: path.into(), tz }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load(&self) -> Result<VisitLedger> {
        if !self.path.exists() {
            return Ok(VisitLedger::new());
        }

        let raw = fs::read_to_string(&self.path)?;
        let file: LedgerFile = serde_json::from_str(&raw)?;
        Ok(ledger_from_file(file, self.tz))
    }

    fn save(&self, ledger: &VisitLedger) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&ledger_to_file(ledger))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

fn ledger_to_file(ledger: &VisitLedger) -> LedgerFile {
    let mut file = LedgerFile::default();
    for (box_id, entry) in ledger.iter() {
        if let Some(last) = &entry.last_visit {
            file.last_visit.insert(box_id.to_string(), Some(format_timestamp(last)));
        }
        if !entry.history.is_empty() {
            file.visit_history.insert(
                box_id.to_string(),
                entry
                    .history
                    .iter()
                    .map(|event| StoredVisit {
                        date: format_timestamp(&event.date),
                        fill_level: event.fill_level,
                        expected_fill: event.expected_fill,
                    })
                    .collect(),
            );
        }
    }
    file
}

fn ledger_from_file(file: LedgerFile, tz: Tz) -> VisitLedger {
    let mut entries: BTreeMap<u32, LedgerEntry> = BTreeMap::new();

    for (key, raw) in file.last_visit {
        let Some(box_id) = parse_box_key(&key) else {
            continue;
        };
        let last_visit = raw.as_deref().and_then(|raw| {
            let parsed = parse_timestamp(raw, tz);
            if parsed.is_none() {
                warn!("Skipping unreadable last visit '{raw}' for box #{box_id}");
            }
            parsed
        });
        entries.entry(box_id).or_default().last_visit = last_visit;
    }

    for (key, visits) in file.visit_history {
        let Some(box_id) = parse_box_key(&key) else {
            continue;
        };
        let history = visits
            .into_iter()
            .filter_map(|visit| match parse_timestamp(&visit.date, tz) {
                Some(date) => Some(VisitEvent {
                    date,
                    fill_level: visit.fill_level,
                    expected_fill: visit.expected_fill,
                }),
                None => {
                    warn!("Skipping visit with unreadable date '{}' for box #{box_id}", visit.date);
                    None
                }
            })
            .collect();
        entries.entry(box_id).or_default().history = history;
    }

    VisitLedger::from_entries(entries)
}

fn parse_box_key(key: &str) -> Option<u32> {
    let parsed = key.trim().parse::<u32>().ok();
    if parsed.is_none() {
        warn!("Skipping ledger entry with invalid box id '{key}'");
    }
    parsed
}

/// SQLite-backed ledger, schema versioned through `PRAGMA user_version`.
pub struct SqliteLedgerStore {
    path: PathBuf,
    tz: Tz,
}

impl SqliteLedgerStore {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self { path: path.into(), tz }
    }

    fn connection(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        initialize_schema(&conn)?;
        Ok(conn)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn load(&self) -> Result<VisitLedger> {
        if !self.path.exists() {
            return Ok(VisitLedger::new());
        }

        let conn = self.connection()?;
        let mut entries: BTreeMap<u32, LedgerEntry> = BTreeMap::new();

        let mut stmt = conn.prepare("SELECT box_id, visited_at FROM last_visits")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (box_id, raw) = row?;
            match parse_timestamp(&raw, self.tz) {
                Some(ts) => entries.entry(box_id).or_default().last_visit = Some(ts),
                None => warn!("Skipping unreadable last visit '{raw}' for box #{box_id}"),
            }
        }

        let mut stmt = conn.prepare(
            "SELECT box_id, visited_at, fill_level, expected_fill FROM visit_events
             ORDER BY box_id ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;
        for row in rows {
            let (box_id, raw, fill_level, expected_fill) = row?;
            match parse_timestamp(&raw, self.tz) {
                Some(date) => entries.entry(box_id).or_default().history.push(VisitEvent {
                    date,
                    fill_level,
                    expected_fill,
                }),
                None => warn!("Skipping visit with unreadable date '{raw}' for box #{box_id}"),
            }
        }

        Ok(VisitLedger::from_entries(entries))
    }

    /// Replaces the stored ledger in one transaction.
    fn save(&self, ledger: &VisitLedger) -> Result<()> {
        let conn = self.connection()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM last_visits", [])?;
        tx.execute("DELETE FROM visit_events", [])?;

        for (box_id, entry) in ledger.iter() {
            if let Some(last) = &entry.last_visit {
                tx.execute(
                    "INSERT INTO last_visits (box_id, visited_at) VALUES (?1, ?2)",
                    params![box_id, format_timestamp(last)],
                )?;
            }
            for event in &entry.history {
                tx.execute(
                    "INSERT INTO visit_events (box_id, visited_at, fill_level, expected_fill)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        box_id,
                        format_timestamp(&event.date),
                        event.fill_level,
                        event.expected_fill
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        warn!("Ledger database schema v{version} is newer than v{DB_SCHEMA_VERSION}");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS last_visits (
            box_id INTEGER PRIMARY KEY,
            visited_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS visit_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            box_id INTEGER NOT NULL,
            visited_at TEXT NOT NULL,
            fill_level REAL,
            expected_fill REAL NOT NULL DEFAULT 0
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_visit_events_box ON visit_events(box_id, id);",
    )
}

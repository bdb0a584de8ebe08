use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::roster::RosterMember;

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Persisted time-bank balance for one collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBankEntry {
    pub id: String,
    pub collaborator_id: String,
    pub date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub balance_hours: f64,
    pub created_at: DateTime<Utc>,
}

/// Stored entry joined with its collaborator's name (listing / export)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBankEntryView {
    pub id: String,
    pub collaborator_id: String,
    pub collaborator_name: String,
    pub date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub balance_hours: f64,
}

/// Positive balance that expires inside the alert window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringEntry {
    pub collaborator_id: String,
    pub collaborator_name: String,
    pub balance_hours: f64,
    pub expiration_date: NaiveDate,
    pub days_left: i64,
}

/// One successful reconciliation, written in the same transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: String,
    pub coordinator_id: String,
    pub report_sha256: String,
    pub parsed_count: usize,
    pub saved_count: usize,
    pub imported_at: DateTime<Utc>,
}

impl ImportRecord {
    pub fn new(coordinator_id: &str, report_sha256: &str, parsed_count: usize, saved_count: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            coordinator_id: coordinator_id.to_string(),
            report_sha256: report_sha256.to_string(),
            parsed_count,
            saved_count,
            imported_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    name: String,
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    // Writers queue behind each other's IMMEDIATE transactions
    conn.busy_timeout(BUSY_TIMEOUT)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory"
    let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Roster (owned by the coordinator-facing CRUD layer)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS collaborators (
            id TEXT PRIMARY KEY,
            coordinator_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Time-bank snapshot
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS timebank_entries (
            id TEXT PRIMARY KEY,
            collaborator_id TEXT NOT NULL REFERENCES collaborators(id) ON DELETE CASCADE,
            date TEXT NOT NULL,
            expiration_date TEXT NOT NULL,
            balance_hours REAL NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Import audit trail
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS timebank_imports (
            id TEXT PRIMARY KEY,
            coordinator_id TEXT NOT NULL,
            report_sha256 TEXT NOT NULL,
            parsed_count INTEGER NOT NULL,
            saved_count INTEGER NOT NULL,
            imported_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_collaborators_coordinator ON collaborators(coordinator_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timebank_collaborator ON timebank_entries(collaborator_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timebank_expiration ON timebank_entries(expiration_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_imports_coordinator ON timebank_imports(coordinator_id, imported_at)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROSTER
// ============================================================================

pub fn insert_collaborator(conn: &Connection, coordinator_id: &str, name: &str) -> Result<RosterMember> {
    let member = RosterMember::new(uuid::Uuid::new_v4().to_string(), name.trim());

    conn.execute(
        "INSERT INTO collaborators (id, coordinator_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![member.id, coordinator_id, member.name, Utc::now()],
    )
    .with_context(|| format!("Failed to insert collaborator {:?}", name))?;

    Ok(member)
}

/// Coordinator's roster in insertion order (the order matching relies on)
pub fn list_roster(conn: &Connection, coordinator_id: &str) -> Result<Vec<RosterMember>> {
    let mut stmt = conn.prepare(
        "SELECT id, name FROM collaborators
         WHERE coordinator_id = ?1
         ORDER BY rowid",
    )?;

    let roster = stmt
        .query_map(params![coordinator_id], |row| {
            Ok(RosterMember {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(roster)
}

/// Read collaborator names from a CSV with a `name` column
pub fn load_roster_csv(csv_path: &Path) -> Result<Vec<String>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open roster CSV: {}", csv_path.display()))?;

    let mut names = Vec::new();
    for (idx, result) in rdr.deserialize().enumerate() {
        let row: RosterRow =
            result.with_context(|| format!("Failed to parse roster CSV line {}", idx + 2))?;
        let name = row.name.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }

    Ok(names)
}

/// Add names to the roster, skipping ones already present (case-insensitive)
pub fn import_roster(conn: &Connection, coordinator_id: &str, names: &[String]) -> Result<usize> {
    let mut known: Vec<String> = list_roster(conn, coordinator_id)?
        .into_iter()
        .map(|m| m.name.to_lowercase())
        .collect();

    let mut inserted = 0;
    for name in names {
        let key = name.trim().to_lowercase();
        if key.is_empty() || known.contains(&key) {
            continue;
        }
        insert_collaborator(conn, coordinator_id, name)?;
        known.push(key);
        inserted += 1;
    }

    tracing::info!(coordinator_id, inserted, skipped = names.len() - inserted, "roster imported");

    Ok(inserted)
}

// ============================================================================
// TIME-BANK READS
// ============================================================================

/// All stored entries for the coordinator's roster, soonest expiration first
pub fn list_entries(conn: &Connection, coordinator_id: &str) -> Result<Vec<TimeBankEntryView>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.collaborator_id, c.name, e.date, e.expiration_date, e.balance_hours
         FROM timebank_entries e
         JOIN collaborators c ON c.id = e.collaborator_id
         WHERE c.coordinator_id = ?1
         ORDER BY e.expiration_date ASC, c.name ASC, e.date ASC",
    )?;

    let entries = stmt
        .query_map(params![coordinator_id], |row| {
            Ok(TimeBankEntryView {
                id: row.get(0)?,
                collaborator_id: row.get(1)?,
                collaborator_name: row.get(2)?,
                date: row.get(3)?,
                expiration_date: row.get(4)?,
                balance_hours: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Entries for one collaborator, in stored order
pub fn get_entries_for_collaborator(conn: &Connection, collaborator_id: &str) -> Result<Vec<TimeBankEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, collaborator_id, date, expiration_date, balance_hours, created_at
         FROM timebank_entries
         WHERE collaborator_id = ?1
         ORDER BY rowid",
    )?;

    let entries = stmt
        .query_map(params![collaborator_id], |row| {
            Ok(TimeBankEntry {
                id: row.get(0)?,
                collaborator_id: row.get(1)?,
                date: row.get(2)?,
                expiration_date: row.get(3)?,
                balance_hours: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Positive balances expiring within `window_days` of `today` (inclusive).
///
/// Already-expired entries are left out; so are debits, which don't lapse.
/// A window that is negative or runs past the calendar range is an error.
pub fn expiring_entries(
    conn: &Connection,
    coordinator_id: &str,
    today: NaiveDate,
    window_days: i64,
) -> Result<Vec<ExpiringEntry>> {
    if window_days < 0 {
        return Err(anyhow!("Alert window must not be negative: {} days", window_days));
    }
    let horizon = Duration::try_days(window_days)
        .and_then(|window| today.checked_add_signed(window))
        .ok_or_else(|| anyhow!("Alert window of {} days is out of range", window_days))?;

    let mut stmt = conn.prepare(
        "SELECT e.collaborator_id, c.name, e.balance_hours, e.expiration_date
         FROM timebank_entries e
         JOIN collaborators c ON c.id = e.collaborator_id
         WHERE c.coordinator_id = ?1
           AND e.balance_hours > 0
           AND e.expiration_date >= ?2
           AND e.expiration_date <= ?3
         ORDER BY e.expiration_date ASC, c.name ASC",
    )?;

    let entries = stmt
        .query_map(params![coordinator_id, today, horizon], |row| {
            let expiration_date: NaiveDate = row.get(3)?;
            Ok(ExpiringEntry {
                collaborator_id: row.get(0)?,
                collaborator_name: row.get(1)?,
                balance_hours: row.get(2)?,
                expiration_date,
                days_left: (expiration_date - today).num_days(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Count of stored entries for the coordinator's roster
pub fn count_entries(conn: &Connection, coordinator_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM timebank_entries e
         JOIN collaborators c ON c.id = e.collaborator_id
         WHERE c.coordinator_id = ?1",
        params![coordinator_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// IMPORT AUDIT
// ============================================================================

pub fn insert_import_record(conn: &Connection, record: &ImportRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO timebank_imports (
            id, coordinator_id, report_sha256, parsed_count, saved_count, imported_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.coordinator_id,
            record.report_sha256,
            record.parsed_count as i64,
            record.saved_count as i64,
            record.imported_at,
        ],
    )?;

    Ok(())
}

/// Import history for a coordinator, newest first
pub fn list_imports(conn: &Connection, coordinator_id: &str) -> Result<Vec<ImportRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, coordinator_id, report_sha256, parsed_count, saved_count, imported_at
         FROM timebank_imports
         WHERE coordinator_id = ?1
         ORDER BY imported_at DESC, rowid DESC",
    )?;

    let records = stmt
        .query_map(params![coordinator_id], |row| {
            let parsed_count: i64 = row.get(3)?;
            let saved_count: i64 = row.get(4)?;
            Ok(ImportRecord {
                id: row.get(0)?,
                coordinator_id: row.get(1)?,
                report_sha256: row.get(2)?,
                parsed_count: parsed_count as usize,
                saved_count: saved_count as usize,
                imported_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

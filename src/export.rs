// 📤 CSV export of the stored time-bank snapshot

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::io::Write;

use crate::db::TimeBankEntryView;

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Collaborator")]
    collaborator: &'a str,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Expiration_Date")]
    expiration_date: NaiveDate,
    #[serde(rename = "Balance_Hours")]
    balance_hours: String,
}

/// Write entries as CSV (header row included), returning the row count
pub fn write_entries_csv<W: Write>(writer: W, entries: &[TimeBankEntryView]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);

    for entry in entries {
        wtr.serialize(ExportRow {
            collaborator: &entry.collaborator_name,
            date: entry.date,
            expiration_date: entry.expiration_date,
            balance_hours: format!("{:.2}", entry.balance_hours),
        })
        .with_context(|| format!("Failed to write export row for entry {}", entry.id))?;
    }

    // serialize() only emits the header with the first row
    if entries.is_empty() {
        wtr.write_record(["Collaborator", "Date", "Expiration_Date", "Balance_Hours"])?;
    }

    wtr.flush().context("Failed to flush CSV export")?;
    Ok(entries.len())
}

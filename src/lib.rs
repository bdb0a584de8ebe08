// Time-bank Ingest - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod extract;
pub mod ingest;
pub mod parser;
pub mod reconciliation;
pub mod roster;

// Re-export commonly used types
pub use config::{Config, ConfigError, EmptyReportPolicy};
pub use db::{
    TimeBankEntry, TimeBankEntryView, ExpiringEntry, ImportRecord,
    open_database, setup_database, insert_collaborator, list_roster,
    load_roster_csv, import_roster, list_entries, get_entries_for_collaborator,
    expiring_entries, count_entries, list_imports,
};
pub use error::IngestError;
pub use export::write_entries_csv;
pub use extract::{PlainTextExtractor, ReportExtractor, TextExtractor};
#[cfg(feature = "pdf")]
pub use extract::PdfTextExtractor;
pub use ingest::{fingerprint, ImportOptions, ImportOutcome, PreparedReport, TimeBankImporter};
pub use parser::{
    classify_line, parse_hours_token, parse_report,
    EntryFields, MalformedReason, ParsedEntry, ParsedReport, ReportLine,
};
pub use reconciliation::{SnapshotReplacement, TimeBankStore};
pub use roster::{match_collaborator, match_entries, MatchedEntry, RosterMatch, RosterMember};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the tracing subscriber used by both binaries.
///
/// The filter comes from `TIMEBANK_LOG` (e.g. `timebank_ingest=debug`),
/// falling back to `default_level`.
pub fn init_tracing(default_level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TIMEBANK_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use timebank_ingest::{
    expiring_entries, import_roster, list_entries, list_roster, load_roster_csv, open_database,
    write_entries_csv, Config, ImportOptions, TimeBankImporter,
};

#[derive(Debug, Parser)]
#[command(name = "timebank-ingest", version, about = "Import time-bank reports into a coordinator's roster")]
struct Cli {
    /// Database file (overrides TIMEBANK_DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the coordinator's roster
    Roster {
        #[command(subcommand)]
        command: RosterCommand,
    },
    /// Import a time-bank report (text or PDF), replacing the stored snapshot
    Import { coordinator: String, report: PathBuf },
    /// List stored entries, soonest expiration first
    List { coordinator: String },
    /// Positive balances expiring soon
    Alerts {
        coordinator: String,
        #[arg(long)]
        within_days: Option<i64>,
    },
    /// Export stored entries as CSV
    Export {
        coordinator: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum RosterCommand {
    /// Add collaborators from a CSV with a `name` column
    Import { coordinator: String, csv: PathBuf },
    /// Show the roster in matching order
    List { coordinator: String },
}

fn main() -> Result<()> {
    timebank_ingest::init_tracing("warn")?;

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    match cli.command {
        Command::Roster { command } => run_roster(&config, command),
        Command::Import { coordinator, report } => run_import(&config, &coordinator, &report),
        Command::List { coordinator } => run_list(&config, &coordinator),
        Command::Alerts { coordinator, within_days } => {
            run_alerts(&config, &coordinator, within_days.unwrap_or(config.alert_window_days))
        }
        Command::Export { coordinator, output } => run_export(&config, &coordinator, output),
    }
}

fn run_roster(config: &Config, command: RosterCommand) -> Result<()> {
    let conn = open_database(&config.database_path)?;

    match command {
        RosterCommand::Import { coordinator, csv } => {
            let names = load_roster_csv(&csv)?;
            let inserted = import_roster(&conn, &coordinator, &names)?;
            println!("✓ Roster: {} added, {} already present", inserted, names.len() - inserted);
        }
        RosterCommand::List { coordinator } => {
            let roster = list_roster(&conn, &coordinator)?;
            for member in &roster {
                println!("{}  {}", member.id, member.name);
            }
            println!("✓ {} collaborators", roster.len());
        }
    }

    Ok(())
}

fn run_import(config: &Config, coordinator: &str, report: &Path) -> Result<()> {
    let payload = std::fs::read(report)
        .with_context(|| format!("Failed to read report: {}", report.display()))?;

    let mut conn = open_database(&config.database_path)?;
    let importer = TimeBankImporter::new(ImportOptions::from(config));
    let outcome = importer.process_report(&mut conn, coordinator, &payload)?;

    println!("📥 {}", outcome.message());
    println!("   Replaced {} previous entries", outcome.removed);
    if outcome.unmatched > 0 {
        println!(
            "   ⚠️  {} entries without a roster match: {}",
            outcome.unmatched,
            outcome.unmatched_names.join(", ")
        );
    }
    if !outcome.malformed_lines.is_empty() {
        println!("   ⚠️  Skipped malformed lines: {:?}", outcome.malformed_lines);
    }

    Ok(())
}

fn run_list(config: &Config, coordinator: &str) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let entries = list_entries(&conn, coordinator)?;

    for entry in &entries {
        println!(
            "{:<32} {}  expires {}  {:>8.2}h",
            entry.collaborator_name, entry.date, entry.expiration_date, entry.balance_hours
        );
    }
    println!("✓ {} entries", entries.len());

    Ok(())
}

fn run_alerts(config: &Config, coordinator: &str, within_days: i64) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let today = Local::now().date_naive();
    let alerts = expiring_entries(&conn, coordinator, today, within_days)?;

    for alert in &alerts {
        println!(
            "{:<32} {:>8.2}h  {} days left",
            alert.collaborator_name, alert.balance_hours, alert.days_left
        );
    }
    println!("✓ {} balances expiring within {} days", alerts.len(), within_days);

    Ok(())
}

fn run_export(config: &Config, coordinator: &str, output: Option<PathBuf>) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let entries = list_entries(&conn, coordinator)?;

    let writer: Box<dyn Write> = match &output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let rows = write_entries_csv(writer, &entries)?;

    if let Some(path) = output {
        println!("✓ Exported {} entries to {}", rows, path.display());
    }

    Ok(())
}

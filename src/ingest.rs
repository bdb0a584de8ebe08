// 📥 Time-bank import pipeline
// size guard → extract text → parse → match roster → replace snapshot

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{Config, EmptyReportPolicy};
use crate::db::ImportRecord;
use crate::error::IngestError;
use crate::extract::{ReportExtractor, TextExtractor};
use crate::parser::{parse_report, ParsedReport};
use crate::reconciliation::TimeBankStore;
use crate::roster::match_entries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    pub max_upload_bytes: usize,
    pub empty_report_policy: EmptyReportPolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
            empty_report_policy: EmptyReportPolicy::default(),
        }
    }
}

impl From<&Config> for ImportOptions {
    fn from(config: &Config) -> Self {
        ImportOptions {
            max_upload_bytes: config.max_upload_bytes,
            empty_report_policy: config.empty_report_policy,
        }
    }
}

/// What one import did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    /// Entries recognized in the report
    pub parsed: usize,
    /// Entries matched to the roster and stored
    pub saved: usize,
    /// Entries whose name matched nobody on the roster
    pub unmatched: usize,
    /// Distinct report names that matched nobody
    pub unmatched_names: Vec<String>,
    /// Entry-shaped lines skipped for bad dates or hours
    pub malformed_lines: Vec<usize>,
    /// Entry-shaped lines before any collaborator header
    pub orphan_lines: Vec<usize>,
    /// Entries from the previous snapshot that were replaced
    pub removed: usize,
    pub report_sha256: String,
}

impl ImportOutcome {
    pub fn message(&self) -> String {
        format!(
            "Processed {} entries, saved {} valid active entries.",
            self.parsed, self.saved
        )
    }
}

/// SHA-256 of the uploaded bytes, hex encoded
pub fn fingerprint(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// A parsed upload waiting to be applied to a store
#[derive(Debug, Clone)]
pub struct PreparedReport {
    pub report: ParsedReport,
    pub report_sha256: String,
}

/// TimeBankImporter - runs one upload through the whole pipeline
pub struct TimeBankImporter<E = ReportExtractor> {
    extractor: E,
    options: ImportOptions,
}

impl TimeBankImporter<ReportExtractor> {
    pub fn new(options: ImportOptions) -> Self {
        TimeBankImporter {
            extractor: ReportExtractor,
            options,
        }
    }
}

impl<E: TextExtractor> TimeBankImporter<E> {
    pub fn with_extractor(extractor: E, options: ImportOptions) -> Self {
        TimeBankImporter { extractor, options }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Process a report uploaded by `coordinator_id`.
    ///
    /// Parsing anomalies are skipped and counted in the outcome. Only
    /// rejected uploads, extraction failures and storage failures are errors;
    /// none of them leave a partially replaced snapshot behind.
    pub fn process_report<S: TimeBankStore>(
        &self,
        store: &mut S,
        coordinator_id: &str,
        payload: &[u8],
    ) -> Result<ImportOutcome, IngestError> {
        let prepared = self.prepare(payload)?;
        self.apply(store, coordinator_id, prepared)
    }

    /// Size guards, fingerprint, text extraction and parsing.
    ///
    /// Touches no storage, so callers can run it before taking a database lock.
    pub fn prepare(&self, payload: &[u8]) -> Result<PreparedReport, IngestError> {
        if payload.is_empty() {
            return Err(IngestError::EmptyUpload);
        }
        if payload.len() > self.options.max_upload_bytes {
            return Err(IngestError::UploadTooLarge {
                size: payload.len(),
                limit: self.options.max_upload_bytes,
            });
        }

        let report_sha256 = fingerprint(payload);
        let text = self.extractor.extract_text(payload)?;
        let report = parse_report(&text);

        Ok(PreparedReport { report, report_sha256 })
    }

    /// Match a prepared report against the roster and replace the snapshot
    pub fn apply<S: TimeBankStore>(
        &self,
        store: &mut S,
        coordinator_id: &str,
        prepared: PreparedReport,
    ) -> Result<ImportOutcome, IngestError> {
        let PreparedReport { report, report_sha256 } = prepared;
        let parsed = report.len();

        if report.is_empty() {
            match self.options.empty_report_policy {
                EmptyReportPolicy::Reject => {
                    tracing::warn!(coordinator_id, %report_sha256, "rejecting report with no entries");
                    return Err(IngestError::EmptyReport);
                }
                EmptyReportPolicy::Wipe => {
                    tracing::warn!(coordinator_id, %report_sha256, "report has no entries; clearing roster time-bank");
                }
            }
        }

        let roster = store
            .roster(coordinator_id)
            .map_err(IngestError::Persistence)?;

        let matches = match_entries(&roster, report.entries);

        let mut unmatched_names: Vec<String> = Vec::new();
        for entry in &matches.unmatched {
            if !unmatched_names.contains(&entry.collaborator_name_raw) {
                unmatched_names.push(entry.collaborator_name_raw.clone());
            }
        }
        if !unmatched_names.is_empty() {
            tracing::warn!(coordinator_id, names = ?unmatched_names, "report names not found in roster");
        }

        let record = ImportRecord::new(coordinator_id, &report_sha256, parsed, matches.matched.len());

        let replacement = store
            .replace_snapshot(&roster, &matches.matched, &record)
            .map_err(|e| {
                tracing::error!(coordinator_id, error = %format!("{:#}", e), "time-bank snapshot replace failed");
                IngestError::Persistence(e)
            })?;

        let outcome = ImportOutcome {
            parsed,
            saved: replacement.inserted,
            unmatched: matches.unmatched.len(),
            unmatched_names,
            malformed_lines: report.malformed_lines,
            orphan_lines: report.orphan_lines,
            removed: replacement.removed,
            report_sha256,
        };

        tracing::info!(
            coordinator_id,
            parsed = outcome.parsed,
            saved = outcome.saved,
            unmatched = outcome.unmatched,
            removed = outcome.removed,
            "time-bank report imported"
        );

        Ok(outcome)
    }
}

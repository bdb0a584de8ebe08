// 🏗️ Time-bank report parser
// Turns the text extracted from the time-clock "banco de horas" report into
// per-collaborator balance records.
//
// Layout of the lines we care about:
//
//   207 - ANA PAULA MATTJE              <- header: id, dash, collaborator name
//   04/02/202600000:0704/07/2026        <- entry: date, filler digits, H:MM, expiration
//   16/02/202600008:00-16/07/2026       <- entry with trailing '-' (debit)
//
// Everything else on the page (titles, totals, page footers) is ignored.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// LINE PATTERNS
// ============================================================================

pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// `207 - ANA PAULA MATTJE` → name in group 1
static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+\s*-\s*(.+)$").expect("header pattern is valid")
});

/// Groups: 1 event date, 2 `H:MM`, 3 negative marker, 4 expiration date.
///
/// The digit block between the event date and the hours token is layout
/// filler; the lazy `+?` leaves the last 1-3 digits before `:` to the hours.
static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]{2}/[0-9]{2}/[0-9]{4})[0-9]+?([0-9]{1,3}:[0-9]{2})(-)? ?([0-9]{2}/[0-9]{2}/[0-9]{4})$",
    )
    .expect("entry pattern is valid")
});

// ============================================================================
// CORE TYPES
// ============================================================================

/// ParsedEntry - one balance line attributed to the header above it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEntry {
    pub collaborator_name_raw: String,
    pub event_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub balance_hours: f64,
    /// 1-based position among the report's non-empty lines
    pub line_number: usize,
}

/// Fields of a well-formed entry line, before it is tied to a collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFields {
    pub event_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub balance_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MalformedReason {
    InvalidEventDate,
    InvalidExpirationDate,
}

/// ReportLine - what a single trimmed line of the report is
#[derive(Debug, Clone, PartialEq)]
pub enum ReportLine {
    /// Collaborator section header carrying the display name
    Header(String),

    /// Balance entry with valid dates and hours
    Entry(EntryFields),

    /// Entry-shaped line whose dates or hours don't hold up
    Malformed(MalformedReason),

    /// Anything else (titles, totals, footers)
    Other,
}

/// ParsedReport - output of parse_report()
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedReport {
    pub entries: Vec<ParsedEntry>,

    /// Entry-shaped lines skipped for invalid dates or hours
    pub malformed_lines: Vec<usize>,

    /// Entry-shaped lines that appeared before any header
    pub orphan_lines: Vec<usize>,
}

impl ParsedReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Classify one trimmed line of the report.
///
/// Header is checked first, so a line never counts as both.
pub fn classify_line(line: &str) -> ReportLine {
    if let Some(caps) = HEADER_RE.captures(line) {
        return ReportLine::Header(caps[1].trim().to_string());
    }

    let caps = match ENTRY_RE.captures(line) {
        Some(caps) => caps,
        None => return ReportLine::Other,
    };

    let event_date = match NaiveDate::parse_from_str(&caps[1], DATE_FORMAT) {
        Ok(date) => date,
        Err(_) => return ReportLine::Malformed(MalformedReason::InvalidEventDate),
    };

    let expiration_date = match NaiveDate::parse_from_str(&caps[4], DATE_FORMAT) {
        Ok(date) => date,
        Err(_) => return ReportLine::Malformed(MalformedReason::InvalidExpirationDate),
    };

    // The pattern only admits digits around the colon
    let Some(magnitude) = parse_hours_token(&caps[2]) else {
        return ReportLine::Other;
    };

    let balance_hours = if caps.get(3).is_some() {
        -magnitude
    } else {
        magnitude
    };

    ReportLine::Entry(EntryFields {
        event_date,
        expiration_date,
        balance_hours,
    })
}

/// Convert an `H:MM` token to decimal hours: `8:30` → 8.5, `120:00` → 120.0
///
/// Minutes are taken as printed, so `1:75` → 2.25. Returns None for
/// non-numeric parts.
pub fn parse_hours_token(token: &str) -> Option<f64> {
    let (hours, minutes) = token.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;

    Some(hours as f64 + minutes as f64 / 60.0)
}

#[derive(Default)]
struct ScanState {
    current_name: Option<String>,
    report: ParsedReport,
}

/// Parse the full extracted text of a report.
///
/// Entries are attributed to the most recent header; entry lines seen before
/// any header are dropped. Malformed lines are skipped, never an error.
///
/// # Example
/// ```
/// use timebank_ingest::parse_report;
///
/// let report = parse_report("12 - JOAO PEREIRA\n01/03/202500012:3001/09/2025\n");
/// assert_eq!(report.entries.len(), 1);
/// assert_eq!(report.entries[0].balance_hours, 12.5);
/// ```
pub fn parse_report(text: &str) -> ParsedReport {
    let state = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .fold(ScanState::default(), |mut state, (idx, line)| {
            let line_number = idx + 1;

            match classify_line(line) {
                ReportLine::Header(name) => {
                    state.current_name = Some(name);
                }
                ReportLine::Entry(fields) => match &state.current_name {
                    Some(name) => state.report.entries.push(ParsedEntry {
                        collaborator_name_raw: name.clone(),
                        event_date: fields.event_date,
                        expiration_date: fields.expiration_date,
                        balance_hours: fields.balance_hours,
                        line_number,
                    }),
                    None => {
                        tracing::debug!(line_number, line, "skipping entry line before any header");
                        state.report.orphan_lines.push(line_number);
                    }
                },
                ReportLine::Malformed(reason) => {
                    tracing::debug!(line_number, ?reason, line, "skipping malformed entry line");
                    if state.current_name.is_some() {
                        state.report.malformed_lines.push(line_number);
                    } else {
                        state.report.orphan_lines.push(line_number);
                    }
                }
                ReportLine::Other => {}
            }

            state
        });

    state.report
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EXCERPT: &str = include_str!("../fixtures/timebank_report_excerpt.txt");

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_classify_header() {
        assert_eq!(
            classify_line("207 - ANA PAULA MATTJE"),
            ReportLine::Header("ANA PAULA MATTJE".to_string())
        );
        assert_eq!(
            classify_line("12-JOAO PEREIRA"),
            ReportLine::Header("JOAO PEREIRA".to_string())
        );
    }

    #[test]
    fn test_classify_entry_positive() {
        let line = classify_line("04/02/202600000:0704/07/2026");
        match line {
            ReportLine::Entry(fields) => {
                assert_eq!(fields.event_date, date(2026, 2, 4));
                assert_eq!(fields.expiration_date, date(2026, 7, 4));
                assert!((fields.balance_hours - 7.0 / 60.0).abs() < 1e-9);
            }
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_marker_gives_negative_balance() {
        match classify_line("16/02/202600008:00-16/07/2026") {
            ReportLine::Entry(fields) => assert_eq!(fields.balance_hours, -8.0),
            other => panic!("expected entry, got {:?}", other),
        }

        // With the space the report sometimes puts before the expiration date
        match classify_line("20/02/202600001:30- 20/08/2026") {
            ReportLine::Entry(fields) => assert_eq!(fields.balance_hours, -1.5),
            other => panic!("expected entry, got {:?}", other),
        }

        match classify_line("20/02/202600001:30 20/08/2026") {
            ReportLine::Entry(fields) => assert_eq!(fields.balance_hours, 1.5),
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_three_digit_hours() {
        match classify_line("02/02/2026000112:45 02/08/2026") {
            ReportLine::Entry(fields) => assert_eq!(fields.balance_hours, 112.75),
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_hours_token_conversion() {
        assert_eq!(parse_hours_token("8:30"), Some(8.5));
        assert_eq!(parse_hours_token("120:00"), Some(120.0));
        assert_eq!(parse_hours_token("0:00"), Some(0.0));
        assert_eq!(parse_hours_token("1:60"), Some(2.0));
        assert_eq!(parse_hours_token("1:75"), Some(2.25));
        assert_eq!(parse_hours_token("130"), None);
    }

    #[test]
    fn test_invalid_dates_are_malformed() {
        assert_eq!(
            classify_line("31/02/202600002:00 31/08/2026"),
            ReportLine::Malformed(MalformedReason::InvalidEventDate)
        );
        assert_eq!(
            classify_line("01/02/202600002:00 32/08/2026"),
            ReportLine::Malformed(MalformedReason::InvalidExpirationDate)
        );
    }

    #[test]
    fn test_minutes_past_sixty_are_kept() {
        match classify_line("01/02/202600002:75 01/08/2026") {
            ReportLine::Entry(fields) => assert_eq!(fields.balance_hours, 3.25),
            other => panic!("expected entry, got {:?}", other),
        }

        let report = parse_report("12 - JOAO PEREIRA\n01/03/202500001:7501/09/2025\n");
        assert_eq!(report.entries.len(), 1);
        assert!(report.malformed_lines.is_empty());
        assert_eq!(report.entries[0].balance_hours, 2.25);
        assert_eq!(report.entries[0].collaborator_name_raw, "JOAO PEREIRA");
    }

    #[test]
    fn test_other_lines() {
        assert_eq!(classify_line("Total do colaborador: 7:53-"), ReportLine::Other);
        assert_eq!(classify_line("Página 1 de 2"), ReportLine::Other);
        assert_eq!(classify_line("BANCO DE HORAS - SALDOS"), ReportLine::Other);
        // Hours token without the filler digit block
        assert_eq!(classify_line("01/03/20258:3001/09/2025"), ReportLine::Other);
    }

    #[test]
    fn test_entries_before_header_are_dropped() {
        let text = "01/03/202500012:3001/09/2025\n12 - JOAO PEREIRA\n02/03/202500001:0002/09/2025\n";
        let report = parse_report(text);

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].collaborator_name_raw, "JOAO PEREIRA");
        assert_eq!(report.entries[0].balance_hours, 1.0);
        assert_eq!(report.orphan_lines, vec![1]);
    }

    #[test]
    fn test_header_scopes_following_entries() {
        let text = "\
12 - JOAO PEREIRA
01/03/202500012:3001/09/2025
02/03/202500001:0002/09/2025
99 - MARIA LIMA
03/03/202500002:00-03/09/2025
";
        let report = parse_report(text);
        let names: Vec<&str> = report
            .entries
            .iter()
            .map(|e| e.collaborator_name_raw.as_str())
            .collect();

        assert_eq!(names, vec!["JOAO PEREIRA", "JOAO PEREIRA", "MARIA LIMA"]);
        assert_eq!(report.entries[2].balance_hours, -2.0);
        assert_eq!(report.entries[2].line_number, 5);
    }

    #[test]
    fn test_scenario_text() {
        let text = "12 - JOAO PEREIRA\n01/03/202500012:3001/09/2025\n99 - MARIA LIMA\n02/03/202500008:00-02/09/2025\n";
        let report = parse_report(text);

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].balance_hours, 12.5);
        assert_eq!(report.entries[0].event_date, date(2025, 3, 1));
        assert_eq!(report.entries[0].expiration_date, date(2025, 9, 1));
        assert_eq!(report.entries[1].balance_hours, -8.0);
        assert_eq!(report.entries[1].expiration_date, date(2025, 9, 2));
    }

    #[test]
    fn test_empty_and_garbled_text() {
        assert!(parse_report("").is_empty());
        assert!(parse_report("   \n\n\t\n").is_empty());
        assert!(parse_report("%PDF garbage\n\u{0}\u{1}").is_empty());
    }

    #[test]
    fn test_crlf_line_endings() {
        let report = parse_report("12 - JOAO PEREIRA\r\n01/03/202500012:3001/09/2025\r\n");
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].collaborator_name_raw, "JOAO PEREIRA");
    }

    #[test]
    fn test_golden_report_excerpt() {
        let report = parse_report(EXCERPT);

        assert_eq!(report.len(), 5, "Should parse 5 entries from the excerpt");
        assert_eq!(report.orphan_lines.len(), 1);
        assert_eq!(report.malformed_lines.len(), 1);

        let ana: Vec<&ParsedEntry> = report
            .entries
            .iter()
            .filter(|e| e.collaborator_name_raw == "ANA PAULA MATTJE")
            .collect();
        assert_eq!(ana.len(), 2);
        assert_eq!(ana[1].balance_hours, -8.0);
        assert_eq!(ana[1].expiration_date, date(2026, 7, 16));

        let bruno: Vec<f64> = report
            .entries
            .iter()
            .filter(|e| e.collaborator_name_raw == "BRUNO HENRIQUE SOUZA")
            .map(|e| e.balance_hours)
            .collect();
        assert_eq!(bruno, vec![112.75, -1.5]);

        let carla = report.entries.last().unwrap();
        assert_eq!(carla.collaborator_name_raw, "CARLA DIAS");
        assert_eq!(carla.balance_hours, 3.25);
        assert_eq!(carla.expiration_date, date(2026, 7, 10));

        println!("✅ Golden excerpt parsed: {} entries", report.len());
    }
}

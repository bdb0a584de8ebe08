// 🔍 Roster matching - resolve report names to collaborators
//
// Report names and roster names drift (middle names, suffixes, casing), so a
// roster member matches when, ignoring case and surrounding whitespace:
//   1. the names are equal, or
//   2. the roster name is contained in the report name, or
//   3. the report name is contained in the roster name.
// The roster is scanned in order and the first member that matches wins.
// Short names can therefore shadow longer ones ("Ana" before "Ana Paula");
// that tie-break is first-match on purpose, not best-match.

use crate::parser::ParsedEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub id: String,
    pub name: String,
}

impl RosterMember {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        RosterMember {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// MatchedEntry - a parsed entry resolved to a roster collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedEntry {
    pub collaborator_id: String,
    pub entry: ParsedEntry,
}

/// Result of matching a whole report against a roster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterMatch {
    pub matched: Vec<MatchedEntry>,
    pub unmatched: Vec<ParsedEntry>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn names_match(roster_name: &str, parsed_name: &str) -> bool {
    roster_name == parsed_name
        || parsed_name.contains(roster_name)
        || roster_name.contains(parsed_name)
}

/// Find the first roster member whose name matches `parsed_name`.
///
/// Blank names on either side never match (an empty string is contained in
/// every name).
pub fn match_collaborator<'a>(roster: &'a [RosterMember], parsed_name: &str) -> Option<&'a RosterMember> {
    let parsed = normalize(parsed_name);
    if parsed.is_empty() {
        return None;
    }

    roster.iter().find(|member| {
        let roster_name = normalize(&member.name);
        !roster_name.is_empty() && names_match(&roster_name, &parsed)
    })
}

/// Resolve every parsed entry against the roster, keeping source order.
pub fn match_entries(roster: &[RosterMember], entries: Vec<ParsedEntry>) -> RosterMatch {
    let mut result = RosterMatch::default();

    for entry in entries {
        match match_collaborator(roster, &entry.collaborator_name_raw) {
            Some(member) => result.matched.push(MatchedEntry {
                collaborator_id: member.id.clone(),
                entry,
            }),
            None => result.unmatched.push(entry),
        }
    }

    result
}

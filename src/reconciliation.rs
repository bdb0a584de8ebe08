// ⚖️ Snapshot reconciliation - replace a roster's time-bank entries
//
// Every upload is the new truth for the coordinator's roster: all existing
// entries for the roster are deleted and the matched entries inserted, in one
// transaction. Readers see either the old snapshot or the new one. A failure
// anywhere rolls back, leaving the old snapshot in place.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::{insert_import_record, list_roster, ImportRecord};
use crate::roster::{MatchedEntry, RosterMember};

/// Row counts of a committed replacement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReplacement {
    pub removed: usize,
    pub inserted: usize,
}

/// TimeBankStore - the persistence the import pipeline needs
///
/// `replace_snapshot` is a unit of work: it either commits completely or
/// leaves the store as it was and returns an error.
pub trait TimeBankStore {
    /// Coordinator's roster, in the order matching should scan it
    fn roster(&self, coordinator_id: &str) -> Result<Vec<RosterMember>>;

    /// Delete every entry of every collaborator in `roster`, insert
    /// `entries` and record the import.
    fn replace_snapshot(
        &mut self,
        roster: &[RosterMember],
        entries: &[MatchedEntry],
        record: &ImportRecord,
    ) -> Result<SnapshotReplacement>;
}

impl TimeBankStore for Connection {
    fn roster(&self, coordinator_id: &str) -> Result<Vec<RosterMember>> {
        list_roster(self, coordinator_id)
    }

    fn replace_snapshot(
        &mut self,
        roster: &[RosterMember],
        entries: &[MatchedEntry],
        record: &ImportRecord,
    ) -> Result<SnapshotReplacement> {
        let roster_ids: HashSet<&str> = roster.iter().map(|m| m.id.as_str()).collect();

        // Never write outside the roster being replaced
        if let Some(stray) = entries
            .iter()
            .find(|e| !roster_ids.contains(e.collaborator_id.as_str()))
        {
            bail!(
                "entry for collaborator {} is not part of the roster being replaced",
                stray.collaborator_id
            );
        }

        // IMMEDIATE takes the write lock up front, so two uploads for the
        // same roster commit one after the other, never interleaved.
        let tx = self
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin snapshot transaction")?;

        let mut removed = 0;
        {
            let mut delete = tx.prepare("DELETE FROM timebank_entries WHERE collaborator_id = ?1")?;
            for member in roster {
                removed += delete.execute(params![member.id])?;
            }
        }

        let mut inserted = 0;
        {
            let mut insert = tx.prepare(
                "INSERT INTO timebank_entries (
                    id, collaborator_id, date, expiration_date, balance_hours, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let created_at = Utc::now();

            for matched in entries {
                insert
                    .execute(params![
                        uuid::Uuid::new_v4().to_string(),
                        matched.collaborator_id,
                        matched.entry.event_date,
                        matched.entry.expiration_date,
                        matched.entry.balance_hours,
                        created_at,
                    ])
                    .with_context(|| {
                        format!(
                            "Failed to insert entry from report line {} for collaborator {}",
                            matched.entry.line_number, matched.collaborator_id
                        )
                    })?;
                inserted += 1;
            }
        }

        insert_import_record(&tx, record).context("Failed to record import")?;

        tx.commit().context("Failed to commit snapshot transaction")?;

        Ok(SnapshotReplacement { removed, inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_entries, insert_collaborator, list_entries, list_imports, setup_database};
    use crate::parser::ParsedEntry;
    use chrono::NaiveDate;

    fn matched(collaborator_id: &str, balance: f64) -> MatchedEntry {
        MatchedEntry {
            collaborator_id: collaborator_id.to_string(),
            entry: ParsedEntry {
                collaborator_name_raw: "REPORT NAME".to_string(),
                event_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                expiration_date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
                balance_hours: balance,
                line_number: 2,
            },
        }
    }

    fn setup() -> (Connection, Vec<RosterMember>) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_collaborator(&conn, "coord", "Ana").unwrap();
        insert_collaborator(&conn, "coord", "Joao").unwrap();
        let roster = conn.roster("coord").unwrap();
        (conn, roster)
    }

    #[test]
    fn test_replace_removes_entries_absent_from_new_snapshot() {
        let (mut conn, roster) = setup();
        let ana = roster[0].id.clone();
        let joao = roster[1].id.clone();

        let first = vec![matched(&ana, 4.0), matched(&joao, 2.0)];
        let result = conn
            .replace_snapshot(&roster, &first, &ImportRecord::new("coord", "a", 2, 2))
            .unwrap();
        assert_eq!(result, SnapshotReplacement { removed: 0, inserted: 2 });

        // Second report only covers Ana; Joao's old entry must go too
        let second = vec![matched(&ana, -1.5)];
        let result = conn
            .replace_snapshot(&roster, &second, &ImportRecord::new("coord", "b", 1, 1))
            .unwrap();
        assert_eq!(result, SnapshotReplacement { removed: 2, inserted: 1 });

        let entries = list_entries(&conn, "coord").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].collaborator_id, ana);
        assert_eq!(entries[0].balance_hours, -1.5);
        assert_eq!(list_imports(&conn, "coord").unwrap().len(), 2);
    }

    #[test]
    fn test_other_coordinators_are_untouched() {
        let (mut conn, roster) = setup();
        let outsider = insert_collaborator(&conn, "other", "Outsider").unwrap();
        let outsider_roster = vec![outsider.clone()];
        conn.replace_snapshot(
            &outsider_roster,
            &[matched(&outsider.id, 7.0)],
            &ImportRecord::new("other", "x", 1, 1),
        )
        .unwrap();

        conn.replace_snapshot(&roster, &[], &ImportRecord::new("coord", "y", 0, 0))
            .unwrap();

        assert_eq!(count_entries(&conn, "other").unwrap(), 1);
        assert_eq!(count_entries(&conn, "coord").unwrap(), 0);
    }

    #[test]
    fn test_entry_outside_roster_is_rejected_before_writing() {
        let (mut conn, roster) = setup();
        let ana = roster[0].id.clone();
        conn.replace_snapshot(&roster, &[matched(&ana, 4.0)], &ImportRecord::new("coord", "a", 1, 1))
            .unwrap();

        let err = conn
            .replace_snapshot(
                &roster,
                &[matched("somebody-else", 1.0)],
                &ImportRecord::new("coord", "b", 1, 1),
            )
            .unwrap_err();

        assert!(err.to_string().contains("not part of the roster"));
        assert_eq!(count_entries(&conn, "coord").unwrap(), 1);
    }

    #[test]
    fn test_failed_insert_rolls_back_to_previous_snapshot() {
        let (mut conn, roster) = setup();
        let ana = roster[0].id.clone();
        let joao = roster[1].id.clone();
        conn.replace_snapshot(
            &roster,
            &[matched(&ana, 4.0), matched(&joao, 2.0)],
            &ImportRecord::new("coord", "a", 2, 2),
        )
        .unwrap();

        // A roster member with no collaborators row: the delete succeeds,
        // then the insert trips the foreign key after the delete ran.
        let mut stale_roster = roster.clone();
        stale_roster.push(RosterMember::new("deleted-meanwhile", "Ghost"));
        let err = conn
            .replace_snapshot(
                &stale_roster,
                &[matched(&ana, 9.0), matched("deleted-meanwhile", 1.0)],
                &ImportRecord::new("coord", "b", 2, 2),
            )
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Failed to insert entry"));

        let entries = list_entries(&conn, "coord").unwrap();
        let mut balances: Vec<f64> = entries.iter().map(|e| e.balance_hours).collect();
        balances.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(balances, vec![2.0, 4.0], "previous snapshot must survive");
        assert_eq!(list_imports(&conn, "coord").unwrap().len(), 1);

        println!("✅ Rollback test passed: previous snapshot intact");
    }
}

//! Auto-quarantine rule persistence (quarantine_rules)

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::super::Database;
use crate::error::TriageResult;

/// A durable auto-quarantine rule.
///
/// The expression is validated (compiled) before a rule is ever saved, so a
/// stored expression is expected to compile on reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineRule {
    pub id: String,
    pub expression: String,
    /// Force the skip verdict for matching reports
    pub quarantine: bool,
    /// Suppress the log verdict regardless of ledger outcome
    pub suppress_logging: bool,
    /// Drop matching messages entirely; implies skip and suppressed logging
    pub throw_away: bool,
    /// Expired rules are excluded from evaluation but stay listed until deleted
    pub expires_at: Option<DateTime<Utc>>,
}

impl Database {
    pub fn save_quarantine_rule(&self, rule: &QuarantineRule) -> TriageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO quarantine_rules
                 (id, expression, quarantine, suppress_logging, throw_away, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                &rule.id,
                &rule.expression,
                rule.quarantine,
                rule.suppress_logging,
                rule.throw_away,
                rule.expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn list_quarantine_rules(&self) -> TriageResult<Vec<QuarantineRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, expression, quarantine, suppress_logging, throw_away, expires_at
             FROM quarantine_rules ORDER BY id",
        )?;

        let rules = stmt
            .query_map([], |row| Self::row_to_quarantine_rule(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rules)
    }

    pub fn get_quarantine_rule(&self, id: &str) -> TriageResult<Option<QuarantineRule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                "SELECT id, expression, quarantine, suppress_logging, throw_away, expires_at
                 FROM quarantine_rules WHERE id = ?1",
                [id],
                |row| Self::row_to_quarantine_rule(row),
            )
            .ok();
        Ok(rule)
    }

    /// Returns false when no rule with that id existed.
    pub fn delete_quarantine_rule(&self, id: &str) -> TriageResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM quarantine_rules WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    fn row_to_quarantine_rule(row: &Row) -> rusqlite::Result<QuarantineRule> {
        let expires_at: Option<String> = row.get(5)?;
        Ok(QuarantineRule {
            id: row.get(0)?,
            expression: row.get(1)?,
            quarantine: row.get(2)?,
            suppress_logging: row.get(3)?,
            throw_away: row.get(4)?,
            expires_at: expires_at
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.db");
        let db = Database::new(path.to_str().unwrap()).unwrap();
        (dir, db)
    }

    fn rule(id: &str, expression: &str) -> QuarantineRule {
        QuarantineRule {
            id: id.to_string(),
            expression: expression.to_string(),
            quarantine: true,
            suppress_logging: false,
            throw_away: false,
            expires_at: None,
        }
    }

    #[test]
    fn save_and_list_round_trip() {
        let (_dir, db) = test_db();

        db.save_quarantine_rule(&rule("a", "queue == 'q1'")).unwrap();
        db.save_quarantine_rule(&rule("b", "service contains 'case'"))
            .unwrap();

        let rules = db.list_quarantine_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "a");
        assert_eq!(rules[0].expression, "queue == 'q1'");
        assert!(rules[0].quarantine);
        assert!(!rules[0].throw_away);
    }

    #[test]
    fn expiry_survives_round_trip() {
        let (_dir, db) = test_db();

        let mut r = rule("a", "queue == 'q1'");
        let expiry = Utc::now() + chrono::Duration::hours(1);
        r.expires_at = Some(expiry);
        db.save_quarantine_rule(&r).unwrap();

        let loaded = db.get_quarantine_rule("a").unwrap().unwrap();
        let stored = loaded.expires_at.unwrap();
        assert_eq!(stored.timestamp(), expiry.timestamp());
    }

    #[test]
    fn delete_reports_whether_a_row_existed() {
        let (_dir, db) = test_db();

        db.save_quarantine_rule(&rule("a", "queue == 'q1'")).unwrap();
        assert!(db.delete_quarantine_rule("a").unwrap());
        assert!(!db.delete_quarantine_rule("a").unwrap());
        assert!(db.get_quarantine_rule("a").unwrap().is_none());
    }
}

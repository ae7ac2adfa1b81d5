//! The triage store: exception ledger, manual skip/peek state, the
//! skipped-message audit trail and the compiled auto-quarantine rule cache.
//!
//! One `TriageStore` is constructed at startup and shared behind an `Arc`;
//! all mutation goes through its methods. The ledger (stats map + hash
//! index) sits behind a single `RwLock` so create-or-increment is atomic;
//! the per-key sets and maps are dashmaps; the compiled rule list is swapped
//! wholesale so evaluations never see a partially rebuilt rule set.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::db::Database;
use crate::db::tables::quarantine_rules::QuarantineRule;
use crate::error::{TriageError, TriageResult};
use crate::models::{
    BadMessageReport, BadMessageSummary, CreateQuarantineRuleRequest, ExceptionReport,
    ExceptionStats, SkippedMessage, TriageResponse,
};
use crate::peek::PeekCoordinator;
use crate::rules::{CompiledRule, compile};

#[derive(Default)]
struct Ledger {
    /// Stats per distinct report; the report's full value is the dedup key
    seen_exceptions: HashMap<ExceptionReport, ExceptionStats>,
    /// Distinct reports per message hash, in first-seen order
    reports_by_hash: HashMap<String, Vec<ExceptionReport>>,
}

pub struct TriageStore {
    ledger: RwLock<Ledger>,
    messages_to_skip: DashSet<String>,
    skipped_messages: DashMap<String, Vec<SkippedMessage>>,
    peek: PeekCoordinator,
    rules: RwLock<Arc<Vec<CompiledRule>>>,
    db: Arc<Database>,
}

impl TriageStore {
    /// Load and compile the persisted rule set. A stored rule that no longer
    /// compiles is logged and skipped rather than failing startup.
    pub fn new(db: Arc<Database>) -> TriageResult<Self> {
        let rules = db.list_quarantine_rules()?;
        let compiled = Self::compile_rules(rules);

        Ok(Self {
            ledger: RwLock::new(Ledger::default()),
            messages_to_skip: DashSet::new(),
            skipped_messages: DashMap::new(),
            peek: PeekCoordinator::new(),
            rules: RwLock::new(Arc::new(compiled)),
            db,
        })
    }

    pub fn peek(&self) -> &PeekCoordinator {
        &self.peek
    }

    // ---- Exception ledger ----

    /// Create-or-increment the stats entry for this exact report. Returns a
    /// snapshot of the entry as it stands after this occurrence.
    pub fn record_occurrence(&self, report: &ExceptionReport) -> ExceptionStats {
        let now = Utc::now();
        let mut ledger = self.ledger.write();

        if let Some(stats) = ledger.seen_exceptions.get_mut(report) {
            stats.seen_count += 1;
            stats.last_seen = now;
            return stats.clone();
        }

        let stats = ExceptionStats::new_at(now);
        ledger
            .seen_exceptions
            .insert(report.clone(), stats.clone());
        ledger
            .reports_by_hash
            .entry(report.message_hash.clone())
            .or_default()
            .push(report.clone());
        stats
    }

    /// Decide whether this occurrence should be logged by the worker.
    /// Evaluated against the stats as they stand after `record_occurrence`
    /// for the current occurrence.
    ///
    /// `retry_threshold == 0`: log only the first-ever occurrence of this
    /// exact report. Otherwise: stay silent until the threshold occurrence,
    /// log exactly once, then go quiet for good.
    pub fn should_log(&self, report: &ExceptionReport, retry_threshold: u32) -> bool {
        let mut ledger = self.ledger.write();
        match ledger.seen_exceptions.get_mut(report) {
            // Not recorded yet, so this is a first sighting
            None => retry_threshold == 0,
            Some(stats) => {
                if retry_threshold == 0 {
                    stats.seen_count == 1
                } else if !stats.logged_at_least_once
                    && stats.seen_count >= u64::from(retry_threshold)
                {
                    stats.logged_at_least_once = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// All (report, stats) pairs for a hash, in first-seen order.
    pub fn bad_message_reports(&self, message_hash: &str) -> Vec<BadMessageReport> {
        let ledger = self.ledger.read();
        let Some(reports) = ledger.reports_by_hash.get(message_hash) else {
            return Vec::new();
        };

        reports
            .iter()
            .filter_map(|report| {
                ledger
                    .seen_exceptions
                    .get(report)
                    .map(|stats| BadMessageReport {
                        exception_report: report.clone(),
                        stats: stats.clone(),
                    })
            })
            .collect()
    }

    /// Every hash seen, or only those with at least one report reaching the
    /// minimum seen count.
    pub fn seen_hashes(&self, minimum_seen_count: Option<u64>) -> Vec<String> {
        let ledger = self.ledger.read();
        let hashes: BTreeSet<String> = match minimum_seen_count {
            None => ledger.reports_by_hash.keys().cloned().collect(),
            Some(minimum) => ledger
                .seen_exceptions
                .iter()
                .filter(|(_, stats)| stats.seen_count >= minimum)
                .map(|(report, _)| report.message_hash.clone())
                .collect(),
        };
        hashes.into_iter().collect()
    }

    /// Aggregate dashboard view: one summary per hash.
    pub fn summaries(&self, minimum_seen_count: Option<u64>) -> Vec<BadMessageSummary> {
        self.seen_hashes(minimum_seen_count)
            .into_iter()
            .filter_map(|hash| self.summarize(&hash))
            .collect()
    }

    /// Min first-seen, max last-seen, summed count and affected
    /// services/queues across every report for the hash.
    pub fn summarize(&self, message_hash: &str) -> Option<BadMessageSummary> {
        let reports = self.bad_message_reports(message_hash);
        if reports.is_empty() {
            return None;
        }

        let mut first_seen = DateTime::<Utc>::MAX_UTC;
        let mut last_seen = DateTime::<Utc>::MIN_UTC;
        let mut seen_count = 0;
        let mut affected_services = BTreeSet::new();
        let mut affected_queues = BTreeSet::new();

        for entry in &reports {
            first_seen = first_seen.min(entry.stats.first_seen);
            last_seen = last_seen.max(entry.stats.last_seen);
            seen_count += entry.stats.seen_count;
            affected_services.insert(entry.exception_report.service.clone());
            affected_queues.insert(entry.exception_report.queue.clone());
        }

        Some(BadMessageSummary {
            message_hash: message_hash.to_string(),
            first_seen,
            last_seen,
            seen_count,
            affected_services: affected_services.into_iter().collect(),
            affected_queues: affected_queues.into_iter().collect(),
            quarantined: self.is_quarantined(message_hash),
        })
    }

    /// With no cutoff: clear the ledger, the manual skip set and all peek
    /// state. The skipped-message audit trail survives a reset. With a
    /// cutoff: purge only ledger entries whose last sighting is older than
    /// now - cutoff; a hash leaves the index when its last report goes.
    pub fn reset(&self, last_seen_cutoff: Option<Duration>) {
        match last_seen_cutoff {
            None => {
                let mut ledger = self.ledger.write();
                ledger.seen_exceptions.clear();
                ledger.reports_by_hash.clear();
                drop(ledger);

                self.messages_to_skip.clear();
                self.peek.clear();
            }
            Some(cutoff) => {
                let oldest_allowed = Utc::now() - cutoff;
                let mut ledger = self.ledger.write();
                ledger
                    .seen_exceptions
                    .retain(|_, stats| stats.last_seen >= oldest_allowed);

                let seen = std::mem::take(&mut ledger.seen_exceptions);
                ledger.reports_by_hash.retain(|_, reports| {
                    reports.retain(|report| seen.contains_key(report));
                    !reports.is_empty()
                });
                ledger.seen_exceptions = seen;
            }
        }
    }

    // ---- Manual skip marks and audit trail ----

    pub fn skip_message(&self, message_hash: &str) {
        self.messages_to_skip.insert(message_hash.to_string());
    }

    pub fn is_quarantined(&self, message_hash: &str) -> bool {
        self.messages_to_skip.contains(message_hash)
    }

    pub fn store_skipped_message(&self, skipped: SkippedMessage) {
        self.skipped_messages
            .entry(skipped.message_hash.clone())
            .or_default()
            .push(skipped);
    }

    pub fn all_skipped_messages(&self) -> HashMap<String, Vec<SkippedMessage>> {
        self.skipped_messages
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn skipped_messages_for(&self, message_hash: &str) -> Vec<SkippedMessage> {
        self.skipped_messages
            .get(message_hash)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    // ---- Auto-quarantine rules ----

    fn compile_rules(rules: Vec<QuarantineRule>) -> Vec<CompiledRule> {
        rules
            .into_iter()
            .filter_map(|rule| match CompiledRule::compile(rule) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    log::warn!("Skipping stored quarantine rule that no longer compiles: {e}");
                    None
                }
            })
            .collect()
    }

    /// Evaluate every active, non-expired rule against the report and return
    /// all matches. No short-circuit: the caller combines flags across the
    /// full match list.
    pub fn find_matching_rules(&self, report: &ExceptionReport) -> Vec<QuarantineRule> {
        let rules = self.rules.read().clone();
        let now = Utc::now();

        rules
            .iter()
            .filter(|compiled| {
                compiled
                    .rule
                    .expires_at
                    .map_or(true, |expiry| expiry > now)
            })
            .filter(|compiled| compiled.predicate.matches(report))
            .map(|compiled| {
                log::warn!(
                    "Auto-quarantine rule matched: expression={:?} message_hash={} service={} queue={}",
                    compiled.predicate.source(),
                    report.message_hash,
                    report.service,
                    report.queue,
                );
                compiled.rule.clone()
            })
            .collect()
    }

    /// Compile, persist, then atomically extend the active rule list.
    /// A non-compiling expression is rejected before anything is persisted.
    pub fn add_rule(&self, request: CreateQuarantineRuleRequest) -> TriageResult<QuarantineRule> {
        let predicate = compile(&request.expression)
            .map_err(|e| TriageError::InvalidExpression(e.to_string()))?;

        let rule = QuarantineRule {
            id: Uuid::new_v4().to_string(),
            expression: request.expression,
            quarantine: request.quarantine,
            suppress_logging: request.suppress_logging,
            throw_away: request.throw_away,
            expires_at: request.expires_at,
        };
        self.db.save_quarantine_rule(&rule)?;

        let mut active = self.rules.write();
        let mut next = (**active).clone();
        next.push(CompiledRule {
            rule: rule.clone(),
            predicate,
        });
        *active = Arc::new(next);

        Ok(rule)
    }

    /// Delete the persisted rule, then recompile and swap the full list.
    pub fn delete_rule(&self, id: &str) -> TriageResult<()> {
        if !self.db.delete_quarantine_rule(id)? {
            return Err(TriageError::NotFound(format!("quarantine rule {id}")));
        }

        let remaining = self.db.list_quarantine_rules()?;
        let compiled = Self::compile_rules(remaining);
        *self.rules.write() = Arc::new(compiled);
        Ok(())
    }

    pub fn list_rules(&self) -> TriageResult<Vec<QuarantineRule>> {
        self.db.list_quarantine_rules()
    }

    // ---- Decision policy ----

    /// The verdict for one failure report: record the occurrence, evaluate
    /// the rules, and compose skip/peek/log/throw-away.
    ///
    /// A throw-away match forces the skip verdict and suppresses logging;
    /// the response flag tells the worker not to bother quarantining.
    pub fn triage(&self, report: &ExceptionReport, retry_threshold: u32) -> TriageResponse {
        self.record_occurrence(report);

        let matches = self.find_matching_rules(report);
        let mut force_skip = false;
        let mut suppress_logging = false;
        let mut throw_away = false;
        for rule in &matches {
            force_skip |= rule.quarantine;
            suppress_logging |= rule.suppress_logging;
            if rule.throw_away {
                throw_away = true;
                force_skip = true;
            }
        }

        let should_log = self.should_log(report, retry_threshold);

        TriageResponse {
            skip_it: force_skip || self.messages_to_skip.contains(&report.message_hash),
            peek_it: self.peek.is_pending(&report.message_hash),
            log_it: should_log && !suppress_logging && !throw_away,
            throw_away,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, TriageStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.db");
        let db = Arc::new(Database::new(path.to_str().unwrap()).unwrap());
        let store = TriageStore::new(db).unwrap();
        (dir, store)
    }

    fn report(hash: &str) -> ExceptionReport {
        ExceptionReport {
            message_hash: hash.to_string(),
            service: "svc".to_string(),
            queue: "q".to_string(),
            exception_class: "E".to_string(),
            exception_message: "boom".to_string(),
            exception_root_cause: String::new(),
        }
    }

    fn rule_request(expression: &str) -> CreateQuarantineRuleRequest {
        CreateQuarantineRuleRequest {
            expression: expression.to_string(),
            quarantine: false,
            suppress_logging: false,
            throw_away: false,
            expires_at: None,
        }
    }

    #[test]
    fn seen_count_tracks_identical_occurrences() {
        let (_dir, store) = test_store();
        let r = report("h1");

        assert_eq!(store.record_occurrence(&r).seen_count, 1);
        assert_eq!(store.record_occurrence(&r).seen_count, 2);
        assert_eq!(store.record_occurrence(&r).seen_count, 3);
    }

    #[test]
    fn reports_differing_only_in_message_are_distinct_entries() {
        let (_dir, store) = test_store();
        let a = report("h1");
        let mut b = report("h1");
        b.exception_message = "different".to_string();

        store.record_occurrence(&a);
        store.record_occurrence(&b);

        let entries = store.bad_message_reports("h1");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stats.seen_count, 1);
        assert_eq!(entries[1].stats.seen_count, 1);
    }

    #[test]
    fn zero_threshold_logs_only_the_first_occurrence() {
        let (_dir, store) = test_store();
        let r = report("h1");

        store.record_occurrence(&r);
        assert!(store.should_log(&r, 0));

        store.record_occurrence(&r);
        assert!(!store.should_log(&r, 0));

        store.record_occurrence(&r);
        assert!(!store.should_log(&r, 0));
    }

    #[test]
    fn threshold_three_logs_exactly_once_at_the_third_occurrence() {
        let (_dir, store) = test_store();
        let r = report("h1");

        let mut decisions = Vec::new();
        for _ in 0..5 {
            store.record_occurrence(&r);
            decisions.push(store.should_log(&r, 3));
        }
        assert_eq!(decisions, vec![false, false, true, false, false]);
    }

    #[test]
    fn triage_scenario_threshold_two() {
        let (_dir, store) = test_store();
        let r = report("h1");

        let logs: Vec<bool> = (0..3).map(|_| store.triage(&r, 2).log_it).collect();
        assert_eq!(logs, vec![false, true, false]);

        let entries = store.bad_message_reports("h1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stats.seen_count, 3);
    }

    #[test]
    fn manual_skip_forces_the_skip_verdict_independent_of_rules() {
        let (_dir, store) = test_store();
        let r = report("h1");

        assert!(!store.triage(&r, 0).skip_it);

        store.skip_message("h1");
        let verdict = store.triage(&r, 0);
        assert!(verdict.skip_it);
        assert!(!verdict.throw_away);
    }

    #[test]
    fn quarantine_rule_forces_skip_for_matching_reports_only() {
        let (_dir, store) = test_store();
        let mut request = rule_request("exceptionClass == 'E' and queue == 'q'");
        request.quarantine = true;
        store.add_rule(request).unwrap();

        assert!(store.triage(&report("h1"), 0).skip_it);

        let mut other = report("h2");
        other.queue = "other".to_string();
        assert!(!store.triage(&other, 0).skip_it);
    }

    #[test]
    fn suppress_logging_rule_silences_an_otherwise_logged_report() {
        let (_dir, store) = test_store();
        let mut request = rule_request("service == 'svc'");
        request.suppress_logging = true;
        store.add_rule(request).unwrap();

        let verdict = store.triage(&report("h1"), 0);
        assert!(!verdict.log_it);
        assert!(!verdict.skip_it);
    }

    #[test]
    fn throw_away_rule_forces_skip_and_silence_and_sets_the_flag() {
        let (_dir, store) = test_store();
        let mut request = rule_request("queue == 'q'");
        request.throw_away = true;
        store.add_rule(request).unwrap();

        let verdict = store.triage(&report("h1"), 0);
        assert!(verdict.skip_it);
        assert!(!verdict.log_it);
        assert!(verdict.throw_away);
    }

    #[test]
    fn flags_accumulate_across_all_matching_rules() {
        let (_dir, store) = test_store();

        let mut quarantining = rule_request("service == 'svc'");
        quarantining.quarantine = true;
        store.add_rule(quarantining).unwrap();

        let mut silencing = rule_request("queue == 'q'");
        silencing.suppress_logging = true;
        store.add_rule(silencing).unwrap();

        let verdict = store.triage(&report("h1"), 0);
        assert!(verdict.skip_it);
        assert!(!verdict.log_it);
        assert!(!verdict.throw_away);
    }

    #[test]
    fn expired_rules_are_excluded_from_evaluation() {
        let (_dir, store) = test_store();
        let mut request = rule_request("queue == 'q'");
        request.quarantine = true;
        request.expires_at = Some(Utc::now() - Duration::minutes(1));
        store.add_rule(request).unwrap();

        assert!(store.find_matching_rules(&report("h1")).is_empty());
        assert!(!store.triage(&report("h1"), 0).skip_it);
        // Still listed until an operator deletes it
        assert_eq!(store.list_rules().unwrap().len(), 1);
    }

    #[test]
    fn invalid_expression_is_rejected_and_not_persisted() {
        let (_dir, store) = test_store();

        let err = store.add_rule(rule_request("nonsense ===")).unwrap_err();
        assert!(matches!(err, TriageError::InvalidExpression(_)));
        assert!(store.list_rules().unwrap().is_empty());
    }

    #[test]
    fn deleting_a_rule_removes_it_from_evaluation() {
        let (_dir, store) = test_store();
        let mut request = rule_request("queue == 'q'");
        request.quarantine = true;
        let rule = store.add_rule(request).unwrap();

        assert!(store.triage(&report("h1"), 0).skip_it);

        store.delete_rule(&rule.id).unwrap();
        assert!(!store.triage(&report("h2"), 0).skip_it);

        assert!(matches!(
            store.delete_rule(&rule.id),
            Err(TriageError::NotFound(_))
        ));
    }

    #[test]
    fn summarize_aggregates_across_reports_for_a_hash() {
        let (_dir, store) = test_store();

        let a = report("h1");
        let mut b = report("h1");
        b.service = "other-svc".to_string();
        b.queue = "other-q".to_string();
        b.exception_message = "different".to_string();

        store.record_occurrence(&a);
        store.record_occurrence(&a);
        store.record_occurrence(&b);

        let summary = store.summarize("h1").unwrap();
        assert_eq!(summary.seen_count, 3);
        assert_eq!(summary.affected_services, vec!["other-svc", "svc"]);
        assert_eq!(summary.affected_queues, vec!["other-q", "q"]);
        assert!(!summary.quarantined);
        assert!(summary.first_seen <= summary.last_seen);
    }

    #[test]
    fn minimum_seen_count_filters_hashes() {
        let (_dir, store) = test_store();

        let frequent = report("h1");
        store.record_occurrence(&frequent);
        store.record_occurrence(&frequent);
        store.record_occurrence(&frequent);
        store.record_occurrence(&report("h2"));

        assert_eq!(store.seen_hashes(None), vec!["h1", "h2"]);
        assert_eq!(store.seen_hashes(Some(2)), vec!["h1"]);
    }

    #[test]
    fn full_reset_clears_ledger_marks_and_peek_state() {
        let (_dir, store) = test_store();

        store.record_occurrence(&report("h1"));
        store.skip_message("h1");
        store.peek().request_peek("h1");
        store.peek().submit_reply("h2", b"x".to_vec());
        store.store_skipped_message(SkippedMessage {
            message_hash: "h1".to_string(),
            message_payload: b"p".to_vec(),
            service: "svc".to_string(),
            queue: "q".to_string(),
            content_type: None,
            headers: Default::default(),
            routing_key: "rk".to_string(),
        });

        store.reset(None);

        assert!(store.seen_hashes(None).is_empty());
        assert!(!store.is_quarantined("h1"));
        assert!(!store.peek().is_pending("h1"));
        assert!(store.peek().get_payload("h2").is_none());
        // The audit trail survives; its durable copy is untouched anyway
        assert_eq!(store.skipped_messages_for("h1").len(), 1);
    }

    #[test]
    fn age_cutoff_reset_purges_only_stale_entries() {
        let (_dir, store) = test_store();

        store.record_occurrence(&report("old"));
        {
            // Backdate the first entry past the cutoff
            let mut ledger = store.ledger.write();
            let stats = ledger.seen_exceptions.get_mut(&report("old")).unwrap();
            stats.last_seen = Utc::now() - Duration::hours(2);
        }
        store.record_occurrence(&report("fresh"));

        store.reset(Some(Duration::hours(1)));

        assert_eq!(store.seen_hashes(None), vec!["fresh"]);
        assert!(store.bad_message_reports("old").is_empty());
        assert_eq!(store.bad_message_reports("fresh").len(), 1);
    }

    #[test]
    fn triage_reports_pending_peek() {
        let (_dir, store) = test_store();

        assert!(!store.triage(&report("h1"), 0).peek_it);
        store.peek().request_peek("h1");
        assert!(store.triage(&report("h1"), 0).peek_it);

        // A capture stops further peek requests
        store.peek().submit_reply("h1", b"x".to_vec());
        assert!(!store.triage(&report("h1"), 0).peek_it);
    }
}

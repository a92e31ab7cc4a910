//! Per-run outcome classification and counters.
//!
//! The aggregator is owned by a single task; the orchestrator routes outcomes
//! to it through a channel, so no locking is needed and partial finalization
//! after cancellation falls out naturally.

use crate::diff::{DiffKind, DifferenceEntry};
use crate::error::AdapterError;
use crate::value::{BusinessKey, DocumentValue};

/// Classification of one compared key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Match,
    Mismatch,
    SourceMissing,
    TargetMissing,
    FetchError,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Match => "match",
            OutcomeStatus::Mismatch => "mismatch",
            OutcomeStatus::SourceMissing => "source_missing",
            OutcomeStatus::TargetMissing => "target_missing",
            OutcomeStatus::FetchError => "fetch_error",
        }
    }
}

/// The result of comparing one sampled key, immutable once produced.
///
/// Matched outcomes drop their documents so retained memory stays bounded on
/// large samples; non-matching outcomes keep both sides for the mismatch log.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub key: BusinessKey,
    pub status: OutcomeStatus,
    pub differences: Vec<DifferenceEntry>,
    pub error: Option<String>,
    pub source: Option<DocumentValue>,
    pub target: Option<DocumentValue>,
}

impl DiffOutcome {
    /// Classify a diff result.
    ///
    /// A difference set consisting solely of a root-path missing entry means
    /// the document is absent on that side; anything else non-empty is a
    /// content mismatch.
    pub fn from_differences(
        key: BusinessKey,
        source: Option<DocumentValue>,
        target: Option<DocumentValue>,
        differences: Vec<DifferenceEntry>,
    ) -> Self {
        let status = if differences.is_empty() {
            OutcomeStatus::Match
        } else if differences
            .iter()
            .all(|d| d.path.is_empty() && d.kind == DiffKind::MissingInSource)
        {
            OutcomeStatus::SourceMissing
        } else if differences
            .iter()
            .all(|d| d.path.is_empty() && d.kind == DiffKind::MissingInTarget)
        {
            OutcomeStatus::TargetMissing
        } else {
            OutcomeStatus::Mismatch
        };
        let (source, target) = if status == OutcomeStatus::Match {
            (None, None)
        } else {
            (source, target)
        };
        DiffOutcome {
            key,
            status,
            differences,
            error: None,
            source,
            target,
        }
    }

    /// An outcome for a key whose fetch failed permanently.
    pub fn fetch_error(key: BusinessKey, error: AdapterError) -> Self {
        DiffOutcome {
            key,
            status: OutcomeStatus::FetchError,
            differences: Vec::new(),
            error: Some(error.detail),
            source: None,
            target: None,
        }
    }
}

/// Per-collection counters, finalized at end of run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub collection: String,
    pub source_total: u64,
    pub target_total: u64,
    pub sampled: u64,
    pub compared: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub missing_source: u64,
    pub missing_target: u64,
    pub errors: u64,
    /// False when the run was cancelled before covering every sampled key.
    pub complete: bool,
}

impl RunSummary {
    /// Whether any compared key failed to match.
    pub fn has_failures(&self) -> bool {
        self.mismatched + self.missing_source + self.missing_target + self.errors > 0
    }

    /// One-line summary for the main log.
    pub fn log_line(&self) -> String {
        format!(
            "{} | source_total={} target_total={} sampled={} compared={} matched={} \
             mismatched={} missing_source={} missing_target={} errors={} complete={}",
            self.collection,
            self.source_total,
            self.target_total,
            self.sampled,
            self.compared,
            self.matched,
            self.mismatched,
            self.missing_source,
            self.missing_target,
            self.errors,
            self.complete,
        )
    }
}

/// Consumes outcomes for one collection run and produces the summary.
///
/// Owned by exactly one task; arrival order of outcomes is irrelevant.
#[derive(Debug)]
pub struct RunAggregator {
    summary: RunSummary,
    failures: Vec<DiffOutcome>,
}

/// Final result of one collection run.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Non-matching outcomes in arrival order, for the mismatch log.
    pub failures: Vec<DiffOutcome>,
}

impl RunAggregator {
    pub fn new(collection: &str, source_total: u64, target_total: u64, sampled: u64) -> Self {
        RunAggregator {
            summary: RunSummary {
                collection: collection.to_string(),
                source_total,
                target_total,
                sampled,
                compared: 0,
                matched: 0,
                mismatched: 0,
                missing_source: 0,
                missing_target: 0,
                errors: 0,
                complete: false,
            },
            failures: Vec::new(),
        }
    }

    /// Record one outcome. Matched outcomes only bump counters; everything
    /// else is retained for reporting.
    pub fn observe(&mut self, outcome: DiffOutcome) {
        self.summary.compared += 1;
        match outcome.status {
            OutcomeStatus::Match => {
                self.summary.matched += 1;
                return;
            }
            OutcomeStatus::Mismatch => self.summary.mismatched += 1,
            OutcomeStatus::SourceMissing => self.summary.missing_source += 1,
            OutcomeStatus::TargetMissing => self.summary.missing_target += 1,
            OutcomeStatus::FetchError => self.summary.errors += 1,
        }
        self.failures.push(outcome);
    }

    /// Seal the run. Always producible, even after zero observations or a
    /// cancelled run.
    pub fn finalize(mut self, complete: bool) -> RunReport {
        self.summary.complete = complete;
        RunReport {
            summary: self.summary,
            failures: self.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::PathSegment;

    fn entry(path: Vec<PathSegment>, kind: DiffKind) -> DifferenceEntry {
        DifferenceEntry {
            path,
            kind,
            source: None,
            target: None,
        }
    }

    #[test]
    fn empty_difference_set_is_a_match() {
        let outcome =
            DiffOutcome::from_differences(BusinessKey::Int(1), None, None, Vec::new());
        assert_eq!(outcome.status, OutcomeStatus::Match);
    }

    #[test]
    fn root_missing_entries_classify_as_missing_sides() {
        let outcome = DiffOutcome::from_differences(
            BusinessKey::Int(5),
            None,
            Some(DocumentValue::Int(1)),
            vec![entry(Vec::new(), DiffKind::MissingInSource)],
        );
        assert_eq!(outcome.status, OutcomeStatus::SourceMissing);

        let outcome = DiffOutcome::from_differences(
            BusinessKey::Int(5),
            Some(DocumentValue::Int(1)),
            None,
            vec![entry(Vec::new(), DiffKind::MissingInTarget)],
        );
        assert_eq!(outcome.status, OutcomeStatus::TargetMissing);
    }

    #[test]
    fn field_level_missing_entries_are_mismatches() {
        let outcome = DiffOutcome::from_differences(
            BusinessKey::Int(5),
            Some(DocumentValue::Int(1)),
            Some(DocumentValue::Int(1)),
            vec![entry(
                vec![PathSegment::Field("name".to_string())],
                DiffKind::MissingInSource,
            )],
        );
        assert_eq!(outcome.status, OutcomeStatus::Mismatch);
    }

    #[test]
    fn matched_outcomes_drop_their_documents() {
        let outcome = DiffOutcome::from_differences(
            BusinessKey::Int(1),
            Some(DocumentValue::Int(1)),
            Some(DocumentValue::Int(1)),
            Vec::new(),
        );
        assert!(outcome.source.is_none());
        assert!(outcome.target.is_none());
    }

    #[test]
    fn counters_track_each_status() {
        let mut aggregator = RunAggregator::new("c", 100, 100, 5);
        aggregator.observe(DiffOutcome::from_differences(
            BusinessKey::Int(1),
            None,
            None,
            Vec::new(),
        ));
        aggregator.observe(DiffOutcome::from_differences(
            BusinessKey::Int(2),
            Some(DocumentValue::Int(1)),
            Some(DocumentValue::Int(2)),
            vec![entry(Vec::new(), DiffKind::ValueMismatch)],
        ));
        aggregator.observe(DiffOutcome::from_differences(
            BusinessKey::Int(3),
            None,
            Some(DocumentValue::Int(1)),
            vec![entry(Vec::new(), DiffKind::MissingInSource)],
        ));
        aggregator.observe(DiffOutcome::from_differences(
            BusinessKey::Int(4),
            Some(DocumentValue::Int(1)),
            None,
            vec![entry(Vec::new(), DiffKind::MissingInTarget)],
        ));
        aggregator.observe(DiffOutcome::fetch_error(
            BusinessKey::Int(5),
            AdapterError::permanent("boom"),
        ));

        let report = aggregator.finalize(true);
        assert_eq!(report.summary.compared, 5);
        assert_eq!(report.summary.matched, 1);
        assert_eq!(report.summary.mismatched, 1);
        assert_eq!(report.summary.missing_source, 1);
        assert_eq!(report.summary.missing_target, 1);
        assert_eq!(report.summary.errors, 1);
        assert!(report.summary.has_failures());
        assert_eq!(report.failures.len(), 4);
        assert!(report.summary.complete);
    }

    #[tokio::test]
    async fn concurrent_producers_sum_to_n() {
        // N workers feed one channel; the aggregator is the single owner on
        // the receiving side, so interleaving cannot lose or double-count.
        let n = 64;
        let (tx, mut rx) = tokio::sync::mpsc::channel::<DiffOutcome>(8);
        for i in 0..n {
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = if i % 2 == 0 {
                    DiffOutcome::from_differences(BusinessKey::Int(i), None, None, Vec::new())
                } else {
                    DiffOutcome::fetch_error(BusinessKey::Int(i), AdapterError::transient("t"))
                };
                tx.send(outcome).await.unwrap();
            });
        }
        drop(tx);

        let mut aggregator = RunAggregator::new("c", 0, 0, n as u64);
        while let Some(outcome) = rx.recv().await {
            aggregator.observe(outcome);
        }
        let report = aggregator.finalize(true);
        assert_eq!(report.summary.compared, n as u64);
        assert_eq!(
            report.summary.matched + report.summary.errors,
            report.summary.compared
        );
        assert_eq!(report.summary.matched, 32);
        assert_eq!(report.summary.errors, 32);
    }

    #[test]
    fn summary_log_line_mentions_every_counter() {
        let aggregator = RunAggregator::new("users", 10, 9, 5);
        let report = aggregator.finalize(false);
        let line = report.summary.log_line();
        assert!(line.starts_with("users | "));
        assert!(line.contains("source_total=10"));
        assert!(line.contains("compared=0"));
        assert!(line.contains("complete=false"));
        assert!(!report.summary.has_failures());
    }
}

use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::db::Store;
use crate::evaluator::JobEvaluator;
use crate::models::{JobRecord, Posting};
use crate::notifier::Notifier;
use crate::source::{EvalMode, JobSource};

/// Per-run counters, printed as the run summary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub fetched: usize,
    pub seen: usize,
    pub evaluated: usize,
    pub failed: usize,
    pub notified: usize,
    pub saved: usize,
}

/// Sequential dedup-evaluate-notify-persist pipeline. One posting is taken
/// through all phases before the next begins; collaborators are injected at
/// construction and live for one run.
pub struct Pipeline<'a> {
    store: &'a Store,
    evaluator: &'a dyn JobEvaluator,
    notifier: &'a dyn Notifier,
    min_score: f64,
    dry_run: bool,
    force: bool,
    pace: Duration,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a Store,
        evaluator: &'a dyn JobEvaluator,
        notifier: &'a dyn Notifier,
        min_score: f64,
        dry_run: bool,
        force: bool,
        pace: Duration,
    ) -> Self {
        Self {
            store,
            evaluator,
            notifier,
            min_score,
            dry_run,
            force,
            pace,
        }
    }

    pub fn run(&self, sources: &mut [Box<dyn JobSource>]) -> RunStats {
        let mut stats = RunStats::default();

        for source in sources {
            let postings = match source.fetch() {
                Ok(postings) => postings,
                Err(e) => {
                    error!(source = source.name(), error = %e, "failed to fetch postings");
                    continue;
                }
            };

            if postings.is_empty() {
                info!(source = source.name(), "no new postings");
                continue;
            }

            for posting in &postings {
                stats.fetched += 1;

                if !self.force && self.store.is_seen(&posting.id) {
                    debug!(id = %posting.id, "already processed, skipping");
                    stats.seen += 1;
                    continue;
                }

                self.process(posting, source.mode(), &mut stats);

                // Blocking pacing between items, for the scraping source's
                // and the evaluation service's rate limits.
                std::thread::sleep(self.pace);
            }
        }

        stats
    }

    fn process(&self, posting: &Posting, mode: EvalMode, stats: &mut RunStats) {
        info!(id = %posting.id, source = %posting.source, "evaluating new posting");

        let result = match self.evaluator.evaluate(posting, mode) {
            Ok(result) => result,
            Err(e) => {
                // One bad posting must not abort the batch. Nothing is
                // persisted, so it stays unseen and is retried next run.
                error!(id = %posting.id, error = %e, "evaluation failed, moving on");
                stats.failed += 1;
                return;
            }
        };
        stats.evaluated += 1;

        let mut notified = false;
        if result.score >= self.min_score {
            if self.dry_run {
                info!(id = %posting.id, score = result.score, "dry run, notification suppressed");
            } else {
                notified = self.notifier.notify(posting, &result);
                if notified {
                    stats.notified += 1;
                } else {
                    warn!(id = %posting.id, "notification failed, saving the record anyway");
                }
            }
        } else {
            info!(
                id = %posting.id,
                score = result.score,
                min_score = self.min_score,
                "score below notification threshold"
            );
        }

        // Persist regardless of the notification outcome, so the posting is
        // not re-evaluated even if the channel was down.
        let record = JobRecord::new(posting, &result, notified);
        match self.store.upsert(&record) {
            Ok(()) => {
                stats.saved += 1;
                info!(
                    title = %record.title,
                    score = record.evaluation_score,
                    decision = %record.decision,
                    "posting saved"
                );
            }
            Err(e) => {
                error!(id = %posting.id, error = %e, "failed to persist posting");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvalError;
    use crate::models::EvalResult;
    use serde_json::json;
    use std::cell::RefCell;

    struct StaticSource {
        name: String,
        mode: EvalMode,
        postings: Vec<Posting>,
        fail: bool,
    }

    impl StaticSource {
        fn board(postings: Vec<Posting>) -> Self {
            Self {
                name: "board".to_string(),
                mode: EvalMode::Standard,
                postings,
                fail: false,
            }
        }
    }

    impl JobSource for StaticSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn mode(&self) -> EvalMode {
            self.mode
        }

        fn fetch(&mut self) -> anyhow::Result<Vec<Posting>> {
            if self.fail {
                anyhow::bail!("feed unreachable");
            }
            Ok(std::mem::take(&mut self.postings))
        }
    }

    /// Scores each posting by a marker in its description; "malformed"
    /// simulates an unparseable reply.
    struct FakeEvaluator {
        calls: RefCell<Vec<String>>,
    }

    impl FakeEvaluator {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl JobEvaluator for FakeEvaluator {
        fn evaluate(&self, posting: &Posting, _mode: EvalMode) -> Result<EvalResult, EvalError> {
            self.calls.borrow_mut().push(posting.id.clone());
            if posting.description == "malformed" {
                return Err(EvalError::Malformed {
                    snippet: "no json here".to_string(),
                });
            }
            let score: f64 = posting.description.parse().unwrap();
            let decision = if score >= 70.0 { "apply" } else { "skip" };
            Ok(EvalResult::from_value(
                &json!({"score": score, "decision": decision, "confidence": 0.9}),
            ))
        }
    }

    struct RecordingNotifier {
        succeed: bool,
        notified: RefCell<Vec<String>>,
    }

    impl RecordingNotifier {
        fn new(succeed: bool) -> Self {
            Self {
                succeed,
                notified: RefCell::new(Vec::new()),
            }
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, posting: &Posting, _result: &EvalResult) -> bool {
            self.notified.borrow_mut().push(posting.id.clone());
            self.succeed
        }
    }

    fn posting(id: &str, score_marker: &str) -> Posting {
        Posting {
            id: id.to_string(),
            title: format!("Job {id}"),
            company: "Acme".to_string(),
            description: score_marker.to_string(),
            link: format!("https://example.com/{id}"),
            application_link: None,
            source: "board".to_string(),
        }
    }

    fn run_pipeline(
        store: &Store,
        evaluator: &FakeEvaluator,
        notifier: &RecordingNotifier,
        dry_run: bool,
        force: bool,
        sources: &mut [Box<dyn JobSource>],
    ) -> RunStats {
        Pipeline::new(store, evaluator, notifier, 70.0, dry_run, force, Duration::ZERO)
            .run(sources)
    }

    #[test]
    fn test_threshold_gate_is_inclusive_at_min_score() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(true);
        let mut sources: Vec<Box<dyn JobSource>> = vec![Box::new(StaticSource::board(vec![
            posting("job-low", "69.9"),
            posting("job-exact", "70"),
        ]))];

        let stats = run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        assert_eq!(*notifier.notified.borrow(), vec!["job-exact"]);
        assert_eq!(stats.notified, 1);
        assert_eq!(stats.saved, 2);
    }

    #[test]
    fn test_failed_evaluation_isolates_one_posting() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(true);
        let mut sources: Vec<Box<dyn JobSource>> = vec![Box::new(StaticSource::board(vec![
            posting("job-1", "80"),
            posting("job-2", "malformed"),
            posting("job-3", "75"),
        ]))];

        let stats = run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.saved, 2);
        assert!(store.is_seen("job-1"));
        assert!(store.is_seen("job-3"));
        // The failed posting stays unseen and will be retried next run.
        assert!(!store.is_seen("job-2"));
    }

    #[test]
    fn test_notification_failure_does_not_block_persistence() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(false);
        let mut sources: Vec<Box<dyn JobSource>> =
            vec![Box::new(StaticSource::board(vec![posting("job-1", "90")]))];

        let stats = run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        assert_eq!(*notifier.notified.borrow(), vec!["job-1"]);
        assert_eq!(stats.notified, 0);
        assert_eq!(stats.saved, 1);
        assert_eq!(store.notified_flag("job-1"), Some(false));
    }

    #[test]
    fn test_successful_notification_is_recorded() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(true);
        let mut sources: Vec<Box<dyn JobSource>> =
            vec![Box::new(StaticSource::board(vec![posting("job-1", "90")]))];

        run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        assert_eq!(store.notified_flag("job-1"), Some(true));
    }

    #[test]
    fn test_seen_posting_short_circuits() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(true);

        let mut sources: Vec<Box<dyn JobSource>> =
            vec![Box::new(StaticSource::board(vec![posting("job-1", "90")]))];
        run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        // Same posting again on a later run: no re-evaluation, no
        // re-notification.
        let mut sources: Vec<Box<dyn JobSource>> =
            vec![Box::new(StaticSource::board(vec![posting("job-1", "90")]))];
        let stats = run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        assert_eq!(stats.seen, 1);
        assert_eq!(stats.evaluated, 0);
        assert_eq!(evaluator.calls.borrow().len(), 1);
        assert_eq!(notifier.notified.borrow().len(), 1);
    }

    #[test]
    fn test_force_reevaluates_seen_posting_without_duplicating() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(true);

        let mut sources: Vec<Box<dyn JobSource>> =
            vec![Box::new(StaticSource::board(vec![posting("job-1", "90")]))];
        run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        let mut sources: Vec<Box<dyn JobSource>> =
            vec![Box::new(StaticSource::board(vec![posting("job-1", "50")]))];
        let stats = run_pipeline(&store, &evaluator, &notifier, false, true, &mut sources);

        assert_eq!(stats.evaluated, 1);
        assert_eq!(evaluator.calls.borrow().len(), 2);
        // Still a single row; the re-evaluation replaced it.
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn test_dry_run_persists_but_never_notifies() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(true);
        let mut sources: Vec<Box<dyn JobSource>> =
            vec![Box::new(StaticSource::board(vec![posting("job-1", "95")]))];

        let stats = run_pipeline(&store, &evaluator, &notifier, true, false, &mut sources);

        assert!(notifier.notified.borrow().is_empty());
        assert_eq!(stats.saved, 1);
        assert_eq!(store.notified_flag("job-1"), Some(false));
    }

    #[test]
    fn test_empty_source_is_not_an_error() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(true);
        let mut sources: Vec<Box<dyn JobSource>> =
            vec![Box::new(StaticSource::board(Vec::new()))];

        let stats = run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        assert_eq!(stats, RunStats::default());
    }

    #[test]
    fn test_fetch_failure_moves_to_next_source() {
        let store = Store::open_in_memory().unwrap();
        let evaluator = FakeEvaluator::new();
        let notifier = RecordingNotifier::new(true);

        let mut broken = StaticSource::board(vec![posting("job-1", "90")]);
        broken.fail = true;
        let mut sources: Vec<Box<dyn JobSource>> = vec![
            Box::new(broken),
            Box::new(StaticSource::board(vec![posting("job-2", "80")])),
        ];

        let stats = run_pipeline(&store, &evaluator, &notifier, false, false, &mut sources);

        assert_eq!(stats.saved, 1);
        assert!(store.is_seen("job-2"));
        assert!(!store.is_seen("job-1"));
    }
}

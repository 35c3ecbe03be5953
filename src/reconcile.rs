//! Day index reconciliation: the top-level generation pipeline.
//!
//! One run takes a target date through these stages, strictly in order:
//!
//! ```text
//! FetchIndex → AssignId → BuildChallenges → PersistDay → UpdateIndex → PublishToday
//! ```
//!
//! Every error is wrapped in the [`Stage`] it happened in, so both the log
//! line and the error report say where the attempt broke. Nothing is
//! written to storage until all four challenges are built; the day record
//! is written before the index, and the index before `today.json`.
//!
//! [`DayReconciler::run`] wraps the whole sequence in a [`RetryPolicy`].
//! Writes are idempotent per date (the id is reused on the next attempt),
//! so a retry after a partial write converges.
//!
//! `days.json` is read-modify-written without locking; only one generator
//! may run at a time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, info_span, warn, Instrument};

use crate::challenge::ChallengeBuilder;
use crate::models::{Challenges, DateIndexEntry, DayIndex, DayRecord, Difficulty};
use crate::report::ErrorReporter;
use crate::retry::{RetryError, RetryPolicy};
use crate::storage::{day_key, ObjectStore, INDEX_KEY, TODAY_KEY};
use crate::words::WordSampler;

/// Pipeline stage, attached as context to every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchIndex,
    AssignId,
    BuildChallenges,
    PersistDay,
    UpdateIndex,
    PublishToday,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FetchIndex => "fetch index",
            Stage::AssignId => "assign id",
            Stage::BuildChallenges => "build challenges",
            Stage::PersistDay => "persist day",
            Stage::UpdateIndex => "update index",
            Stage::PublishToday => "publish today",
        };
        write!(f, "stage '{}' failed", name)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub date: String,
    pub id: u64,
    /// The date was already indexed and its record was replaced.
    pub overwrite: bool,
    pub published_today: bool,
    /// Attempt the run succeeded on (1-based).
    pub attempts: u32,
}

pub struct DayReconciler {
    store: Arc<dyn ObjectStore>,
    builder: ChallengeBuilder,
    sampler: WordSampler,
    reporter: Arc<dyn ErrorReporter>,
    strict_fetch: bool,
    local_copy_dir: Option<PathBuf>,
}

impl DayReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        builder: ChallengeBuilder,
        sampler: WordSampler,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            store,
            builder,
            sampler,
            reporter,
            strict_fetch: false,
            local_copy_dir: None,
        }
    }

    /// Also write each persisted day record to `{dir}/{date}.json`.
    pub fn with_local_copy(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_copy_dir = Some(dir.into());
        self
    }

    /// Fail the attempt when an existing index cannot be read, instead of
    /// starting over from an empty one.
    pub fn with_strict_fetch(mut self, strict: bool) -> Self {
        self.strict_fetch = strict;
        self
    }

    /// Run the pipeline for `date` under `policy`.
    ///
    /// `today` is the invocation-time current date; `today.json` is only
    /// written when the two match.
    pub async fn run(
        &self,
        policy: &RetryPolicy,
        date: NaiveDate,
        today: NaiveDate,
    ) -> Result<ReconcileOutcome, RetryError> {
        let context = format!("generate {}", date.format("%Y-%m-%d"));
        let (mut outcome, attempts) = policy
            .run(self.reporter.as_ref(), &context, |attempt| {
                self.reconcile(date, today)
                    .instrument(info_span!("attempt", n = attempt))
            })
            .await?;
        outcome.attempts = attempts;

        info!(
            date = %outcome.date,
            id = outcome.id,
            overwrite = outcome.overwrite,
            published_today = outcome.published_today,
            attempts = outcome.attempts,
            "day generated"
        );
        Ok(outcome)
    }

    /// One attempt of the pipeline, without retry.
    pub async fn reconcile(&self, date: NaiveDate, today: NaiveDate) -> Result<ReconcileOutcome> {
        let date_str = date.format("%Y-%m-%d").to_string();

        let mut index = self.fetch_index().await.context(Stage::FetchIndex)?;

        let slot = index.assign(&date_str).context(Stage::AssignId)?;
        if slot.is_overwrite() {
            info!(date = %date_str, id = slot.id(), "date already indexed; overwriting");
        } else {
            info!(date = %date_str, id = slot.id(), "new date");
        }

        let challenges = self
            .build_challenges(&date_str)
            .await
            .context(Stage::BuildChallenges)?;

        let record = DayRecord {
            date: date_str.clone(),
            id: slot.id(),
            challenges,
        };
        let payload = serde_json::to_vec_pretty(&record)
            .context("serializing day record")
            .context(Stage::PersistDay)?;

        self.store
            .put_object(&day_key(&date_str), payload.clone(), "application/json")
            .await
            .context(Stage::PersistDay)?;
        if let Some(dir) = &self.local_copy_dir {
            save_local_copy(dir, &date_str, &payload)
                .await
                .context(Stage::PersistDay)?;
        }

        index.upsert(DateIndexEntry {
            date: date_str.clone(),
            id: slot.id(),
        });
        let index_payload = serde_json::to_vec_pretty(&index)
            .context("serializing index")
            .context(Stage::UpdateIndex)?;
        self.store
            .put_object(INDEX_KEY, index_payload, "application/json")
            .await
            .context(Stage::UpdateIndex)?;
        info!(entries = index.len(), "index updated");

        let published_today = date == today;
        if published_today {
            self.store
                .put_object(TODAY_KEY, payload, "application/json")
                .await
                .context(Stage::PublishToday)?;
            info!("published today.json");
        } else {
            info!(today = %today, "target date is not today; skipping today.json");
        }

        Ok(ReconcileOutcome {
            date: date_str,
            id: slot.id(),
            overwrite: slot.is_overwrite(),
            published_today,
            attempts: 1,
        })
    }

    /// Read `days.json` from the origin.
    ///
    /// A missing object is an empty index. A read or parse failure is
    /// reported and also yields an empty index, unless strict fetching is
    /// on, in which case it fails the attempt.
    pub async fn fetch_index(&self) -> Result<DayIndex> {
        let fetched = match self.store.read_origin(INDEX_KEY).await {
            Ok(Some(bytes)) => {
                serde_json::from_slice::<DayIndex>(&bytes).context("parsing days.json")
            }
            Ok(None) => {
                info!("no days.json at origin; starting a new index");
                return Ok(DayIndex::new());
            }
            Err(err) => Err(err.context("reading days.json from origin")),
        };

        match fetched {
            Ok(index) => Ok(index),
            Err(err) if self.strict_fetch => Err(err),
            Err(err) => {
                self.reporter.report(&err, "fetching days.json").await;
                warn!(error = %format!("{:#}", err), "falling back to an empty index");
                Ok(DayIndex::new())
            }
        }
    }

    async fn build_challenges(&self, date: &str) -> Result<Challenges> {
        let words = self.sampler.sample_day().context("sampling words")?;

        let mut built = Vec::with_capacity(Difficulty::ALL.len());
        for difficulty in Difficulty::ALL {
            let challenge = self
                .builder
                .build(words.get(difficulty), date)
                .instrument(info_span!("challenge", difficulty = %difficulty))
                .await
                .with_context(|| format!("building {} challenge", difficulty))?;
            built.push(challenge);
        }

        let mut built = built.into_iter();
        match (built.next(), built.next(), built.next(), built.next()) {
            (Some(easy), Some(medium), Some(hard), Some(dreaming)) => Ok(Challenges {
                easy,
                medium,
                hard,
                dreaming,
            }),
            _ => anyhow::bail!("expected one challenge per difficulty"),
        }
    }
}

async fn save_local_copy(dir: &Path, date: &str, payload: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}.json", date));
    tokio::fs::write(&path, payload)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "saved day record locally");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_fatal;
    use crate::storage::MemoryStore;
    use crate::testing::{FakeGenerator, FakeProcessor, FlakyStore, RecordingReporter};
    use crate::words::{distinct_word_count, WordPools};
    use std::time::Duration;

    struct Harness {
        _dir: tempfile::TempDir,
        store: MemoryStore,
        generator: Arc<FakeGenerator>,
        reporter: Arc<RecordingReporter>,
        reconciler: DayReconciler,
    }

    fn sampler() -> WordSampler {
        let words = |prefix: &str| (0..20).map(|i| format!("{}{}", prefix, i)).collect();
        WordSampler::new(
            WordPools {
                objects: words("object"),
                gerunds: words("gerund"),
                concepts: words("concept"),
            },
            10_000,
        )
        .unwrap()
    }

    fn harness_with(
        store: MemoryStore,
        generator: FakeGenerator,
        wrap: impl FnOnce(MemoryStore) -> Arc<dyn ObjectStore>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(generator);
        let reporter = Arc::new(RecordingReporter::default());
        let object_store = wrap(store.clone());
        let builder = ChallengeBuilder::new(
            generator.clone(),
            Arc::new(FakeProcessor::new(dir.path().join("out"))),
            object_store.clone(),
            dir.path().join("work"),
        );
        let reconciler = DayReconciler::new(object_store, builder, sampler(), reporter.clone());
        Harness {
            _dir: dir,
            store,
            generator,
            reporter,
            reconciler,
        }
    }

    fn harness(store: MemoryStore) -> Harness {
        harness_with(store, FakeGenerator::new(), |s| Arc::new(s))
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn index_of(store: &MemoryStore) -> DayIndex {
        serde_json::from_slice(&store.get(INDEX_KEY).unwrap()).unwrap()
    }

    fn seeded(index: &str) -> MemoryStore {
        MemoryStore::new("https://cdn.test").with_object(INDEX_KEY, index)
    }

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_existing_date_reuses_id() {
        let h = harness(seeded(r#"{"days":[{"date":"2024-01-01","id":5}]}"#));

        let outcome = h
            .reconciler
            .reconcile(day("2024-01-01"), day("2024-06-01"))
            .await
            .unwrap();

        assert_eq!(outcome.id, 5);
        assert!(outcome.overwrite);
        let index = index_of(&h.store);
        assert_eq!(index.len(), 1);
        assert_eq!(index.find_by_date("2024-01-01").unwrap().id, 5);
    }

    #[tokio::test]
    async fn test_new_date_gets_max_plus_one() {
        let h = harness(seeded(
            r#"{"days":[{"date":"2024-01-01","id":0},{"date":"2024-01-02","id":1},{"date":"2024-01-03","id":2}]}"#,
        ));

        let outcome = h
            .reconciler
            .reconcile(day("2024-02-02"), day("2024-06-01"))
            .await
            .unwrap();

        assert_eq!(outcome.id, 3);
        assert!(!outcome.overwrite);
        let index = index_of(&h.store);
        assert_eq!(index.len(), 4);
        assert_eq!(index.days.last().unwrap().date, "2024-02-02");
    }

    #[tokio::test]
    async fn test_missing_index_starts_at_zero() {
        let h = harness(MemoryStore::new("https://cdn.test"));

        let outcome = h
            .reconciler
            .reconcile(day("2024-01-01"), day("2024-06-01"))
            .await
            .unwrap();

        assert_eq!(outcome.id, 0);
        assert_eq!(index_of(&h.store).len(), 1);
        assert!(h.reporter.contexts().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_index_falls_back_and_reports() {
        let h = harness(seeded("<html>502 Bad Gateway</html>"));

        let outcome = h
            .reconciler
            .reconcile(day("2024-01-01"), day("2024-06-01"))
            .await
            .unwrap();

        assert_eq!(outcome.id, 0);
        assert_eq!(index_of(&h.store).len(), 1);
        assert_eq!(h.reporter.contexts(), vec!["fetching days.json".to_string()]);
    }

    #[tokio::test]
    async fn test_unfetchable_index_falls_back_to_empty() {
        let store = seeded(r#"{"days":[{"date":"2023-12-31","id":9}]}"#);
        let h = harness_with(store, FakeGenerator::new(), |s| {
            Arc::new(FlakyStore::new(s).fail_origin_reads())
        });

        let outcome = h
            .reconciler
            .reconcile(day("2024-01-01"), day("2024-06-01"))
            .await
            .unwrap();

        assert_eq!(outcome.id, 0);
        assert_eq!(index_of(&h.store).days.len(), 1);
        assert_eq!(h.reporter.contexts().len(), 1);
    }

    #[tokio::test]
    async fn test_strict_fetch_fails_the_attempt() {
        let store = seeded(r#"{"days":[{"date":"2023-12-31","id":9}]}"#);
        let mut h = harness_with(store, FakeGenerator::new(), |s| {
            Arc::new(FlakyStore::new(s).fail_origin_reads())
        });
        h.reconciler = h.reconciler.with_strict_fetch(true);

        let err = h
            .reconciler
            .reconcile(day("2024-01-01"), day("2024-06-01"))
            .await
            .unwrap_err();

        assert_eq!(err.downcast_ref::<Stage>(), Some(&Stage::FetchIndex));
        assert!(!is_fatal(&err));
        assert_eq!(h.generator.image_calls(), 0);
        // The existing index is untouched.
        assert_eq!(index_of(&h.store).find_by_date("2023-12-31").unwrap().id, 9);
    }

    #[tokio::test]
    async fn test_index_is_read_from_origin_only() {
        let store = MemoryStore::new("https://cdn.test");
        let flaky = FlakyStore::new(store.clone());
        let counters = flaky.clone();
        let h = harness_with(store, FakeGenerator::new(), |_| Arc::new(flaky));

        h.reconciler
            .reconcile(day("2024-01-01"), day("2024-01-01"))
            .await
            .unwrap();

        assert_eq!(counters.origin_reads(), 1);
        assert_eq!(counters.public_reads(), 0);
    }

    #[tokio::test]
    async fn test_today_json_only_for_current_date() {
        let h = harness(MemoryStore::new("https://cdn.test"));
        let outcome = h
            .reconciler
            .reconcile(day("2024-01-01"), day("2024-01-02"))
            .await
            .unwrap();
        assert!(!outcome.published_today);
        assert!(h.store.get(TODAY_KEY).is_none());

        let outcome = h
            .reconciler
            .reconcile(day("2024-01-02"), day("2024-01-02"))
            .await
            .unwrap();
        assert!(outcome.published_today);
        assert_eq!(
            h.store.get(TODAY_KEY).unwrap(),
            h.store.get(&day_key("2024-01-02")).unwrap()
        );
    }

    #[tokio::test]
    async fn test_day_record_contents() {
        let h = harness(MemoryStore::new("https://cdn.test"));
        h.reconciler
            .reconcile(day("2024-03-04"), day("2024-03-04"))
            .await
            .unwrap();

        let record: DayRecord =
            serde_json::from_slice(&h.store.get(&day_key("2024-03-04")).unwrap()).unwrap();
        assert_eq!(record.date, "2024-03-04");
        assert_eq!(record.id, 0);

        let words = crate::models::WordSetForDay {
            easy: record.challenges.easy.words.clone(),
            medium: record.challenges.medium.words.clone(),
            hard: record.challenges.hard.words.clone(),
            dreaming: record.challenges.dreaming.words.clone(),
        };
        assert_eq!(distinct_word_count(&words), 12);
        assert!(record
            .challenges
            .dreaming
            .jpeg_url
            .starts_with("https://cdn.test/2024-03-04/"));

        // days.json, days/2024-03-04.json, today.json and 4 × 2 images.
        assert_eq!(h.store.keys().len(), 11);
        assert_eq!(h.generator.image_calls(), 4);
    }

    #[tokio::test]
    async fn test_local_copy_matches_persisted_record() {
        let h = harness(MemoryStore::new("https://cdn.test"));
        let out = tempfile::tempdir().unwrap();
        let reconciler = h.reconciler.with_local_copy(out.path().join("days"));

        reconciler
            .reconcile(day("2024-03-04"), day("2024-06-01"))
            .await
            .unwrap();

        let local = std::fs::read(out.path().join("days/2024-03-04.json")).unwrap();
        assert_eq!(local, h.store.get(&day_key("2024-03-04")).unwrap());
    }

    #[tokio::test]
    async fn test_local_copy_failure_names_persist_stage() {
        let h = harness(MemoryStore::new("https://cdn.test"));
        let out = tempfile::tempdir().unwrap();
        let blocker = out.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let reconciler = h.reconciler.with_local_copy(&blocker);

        let err = reconciler
            .reconcile(day("2024-03-04"), day("2024-03-04"))
            .await
            .unwrap_err();

        assert_eq!(err.downcast_ref::<Stage>(), Some(&Stage::PersistDay));
        assert!(h.store.get(INDEX_KEY).is_none());
        assert!(h.store.get(TODAY_KEY).is_none());
    }

    #[tokio::test]
    async fn test_builder_failure_writes_nothing() {
        for failing_call in 1..=4 {
            let before = r#"{"days":[{"date":"2023-12-31","id":7}]}"#;
            let h = harness_with(
                seeded(before),
                FakeGenerator::new().fail_image_on_call(failing_call),
                |s| Arc::new(s),
            );

            let err = h
                .reconciler
                .reconcile(day("2024-01-01"), day("2024-01-01"))
                .await
                .unwrap_err();

            assert_eq!(err.downcast_ref::<Stage>(), Some(&Stage::BuildChallenges));
            assert!(h.store.get(&day_key("2024-01-01")).is_none());
            assert!(h.store.get(TODAY_KEY).is_none());
            assert_eq!(h.store.get(INDEX_KEY).unwrap(), before.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_index_write_failure_names_stage() {
        let h = harness_with(
            MemoryStore::new("https://cdn.test"),
            FakeGenerator::new(),
            |s| Arc::new(FlakyStore::new(s).fail_puts(INDEX_KEY, 1)),
        );

        let err = h
            .reconciler
            .reconcile(day("2024-01-01"), day("2024-01-01"))
            .await
            .unwrap_err();

        assert_eq!(err.downcast_ref::<Stage>(), Some(&Stage::UpdateIndex));
        assert!(format!("{:#}", err).starts_with("stage 'update index' failed"));
        // Day record went out first; today.json did not.
        assert!(h.store.get(&day_key("2024-01-01")).is_some());
        assert!(h.store.get(TODAY_KEY).is_none());
    }

    #[tokio::test]
    async fn test_run_retries_and_converges() {
        let h = harness_with(
            MemoryStore::new("https://cdn.test"),
            FakeGenerator::new().fail_image_on_call(2),
            |s| Arc::new(s),
        );

        let outcome = h
            .reconciler
            .run(&instant(3), day("2024-01-01"), day("2024-01-01"))
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.id, 0);
        assert_eq!(index_of(&h.store).len(), 1);
        assert_eq!(
            h.reporter.contexts(),
            vec!["generate 2024-01-01 (attempt 1/3)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_retry_after_partial_write_keeps_one_entry() {
        let h = harness_with(
            MemoryStore::new("https://cdn.test"),
            FakeGenerator::new(),
            |s| Arc::new(FlakyStore::new(s).fail_puts(TODAY_KEY, 1)),
        );

        let outcome = h
            .reconciler
            .run(&instant(3), day("2024-01-01"), day("2024-01-01"))
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert!(outcome.overwrite);
        assert_eq!(outcome.id, 0);
        assert_eq!(index_of(&h.store).len(), 1);
    }

    #[tokio::test]
    async fn test_run_exhaustion_is_an_error() {
        let store = MemoryStore::new("https://cdn.test");
        let h = harness_with(store, FakeGenerator::new(), |s| {
            Arc::new(FlakyStore::new(s).fail_puts(&day_key("2024-01-01"), 10))
        });

        let err = h
            .reconciler
            .run(&instant(3), day("2024-01-01"), day("2024-01-01"))
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.last_error().downcast_ref::<Stage>(), Some(&Stage::PersistDay));
        assert_eq!(h.reporter.contexts().len(), 3);
        assert!(h.store.get(INDEX_KEY).is_none());
    }
}

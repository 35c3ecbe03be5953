//! Command implementations: wiring config, credentials and collaborators
//! into a [`DayReconciler`], and the index inspection tool.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use tracing::info;

use crate::challenge::ChallengeBuilder;
use crate::config::{required_env, CdnCredentials, Config, Credentials};
use crate::generate::OpenAiGenerator;
use crate::imaging::WebImageProcessor;
use crate::models::{DateIndexEntry, DayIndex};
use crate::reconcile::{DayReconciler, ReconcileOutcome};
use crate::report::{reporter_from_env, ErrorReporter};
use crate::retry::RetryPolicy;
use crate::storage::{MemoryStore, ObjectStore, S3Store, INDEX_KEY};
use crate::words::WordSampler;

/// Generate the challenges for `date` (default: today, local time).
///
/// Every persisted day record is also saved to `{work_dir}/days/`. With
/// `dry_run`, uploads go to an in-memory store and that local copy is the
/// only output; the generative API is still called.
pub async fn run_generate(
    config: &Config,
    date: Option<NaiveDate>,
    dry_run: bool,
) -> Result<ReconcileOutcome> {
    let today = Local::now().date_naive();
    let date = date.unwrap_or(today);
    info!(date = %date, today = %today, dry_run, "starting generation");

    let sampler = WordSampler::from_dir(&config.words.dir, config.words.max_attempts)?;
    let reporter: Arc<dyn ErrorReporter> = Arc::from(reporter_from_env()?);

    let (api_key, store) = if dry_run {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new(config.cdn.base_url.clone()));
        (required_env("OPENAI_API_KEY")?, store)
    } else {
        let credentials = Credentials::from_env()?;
        let store: Arc<dyn ObjectStore> =
            Arc::new(S3Store::from_config(config.cdn.clone(), credentials.cdn)?);
        (credentials.openai_api_key, store)
    };

    let generator = Arc::new(OpenAiGenerator::new(
        OpenAiGenerator::http_client(&config.ai)?,
        &config.ai,
        api_key,
    ));
    let work_dir = config.images.work_dir.clone();
    let builder = ChallengeBuilder::new(
        generator.clone(),
        Arc::new(WebImageProcessor::new(
            work_dir.join("web"),
            config.images.max_dimension,
        )),
        store.clone(),
        work_dir.join("source"),
    )
    .with_text_check(generator, config.ai.max_image_attempts);

    let local_dir = work_dir.join("days");
    let reconciler = DayReconciler::new(store, builder, sampler, reporter)
        .with_strict_fetch(config.index.strict_fetch)
        .with_local_copy(&local_dir);
    let outcome = reconciler
        .run(&RetryPolicy::from(&config.retry), date, today)
        .await?;

    if dry_run {
        println!(
            "Dry run: day record written to {}",
            local_dir.join(format!("{}.json", outcome.date)).display()
        );
    }

    Ok(outcome)
}

// ============ Index inspection ============

/// Read and parse an index body; a missing object is an empty index.
pub fn parse_index(bytes: Option<Vec<u8>>) -> Result<DayIndex> {
    match bytes {
        Some(bytes) => serde_json::from_slice(&bytes).context("parsing days.json"),
        None => Ok(DayIndex::new()),
    }
}

/// Entries in `origin` that the cached copy lacks or holds with another id.
pub fn stale_entries(origin: &DayIndex, cached: &DayIndex) -> Vec<DateIndexEntry> {
    origin
        .days
        .iter()
        .filter(|entry| cached.find_by_date(&entry.date).map(|c| c.id) != Some(entry.id))
        .cloned()
        .collect()
}

/// Print the index as seen by the origin and by the edge cache.
pub async fn run_index(config: &Config) -> Result<()> {
    let store = S3Store::from_config(config.cdn.clone(), CdnCredentials::from_env()?)?;
    let report = compare_index(&store).await?;
    print!("{}", report);
    Ok(())
}

/// Build the human-readable origin/cache comparison for `store`.
pub async fn compare_index(store: &dyn ObjectStore) -> Result<String> {
    let origin = parse_index(
        store
            .read_origin(INDEX_KEY)
            .await
            .context("reading days.json from origin")?,
    )?;
    let cached = parse_index(
        store
            .read_public(INDEX_KEY)
            .await
            .context("reading days.json from the CDN")?,
    )?;

    let mut days = origin.days.clone();
    days.sort_by(|a, b| a.date.cmp(&b.date));

    let mut out = String::new();
    out.push_str(&format!(
        "origin: {} entries, cache: {} entries\n",
        origin.len(),
        cached.len()
    ));
    for entry in &days {
        out.push_str(&format!("  {}  id={}\n", entry.date, entry.id));
    }

    let stale = stale_entries(&origin, &cached);
    if stale.is_empty() {
        out.push_str("cache is up to date\n");
    } else {
        out.push_str(&format!("cache is stale ({} entries):\n", stale.len()));
        for entry in &stale {
            out.push_str(&format!("  {}  id={}\n", entry.date, entry.id));
        }
    }
    Ok(out)
}

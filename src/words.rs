//! Word pools and per-day word sampling.
//!
//! Three pools (objects, gerunds, concepts) are loaded from JSON string
//! arrays. Each difficulty draws from them according to
//! [`Difficulty::recipe`], uniformly and with replacement. The day-wide
//! draw ([`WordSampler::sample_day`]) regenerates all four tiers together
//! until no word text repeats anywhere in the day.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::fatal;
use crate::models::{Difficulty, Word, WordSetForDay, WordType};

/// Distinct words a day must contain: 4 tiers × 3 words.
pub const WORDS_PER_DAY: usize = 12;

/// The three raw word pools.
#[derive(Debug, Clone, Default)]
pub struct WordPools {
    pub objects: Vec<String>,
    pub gerunds: Vec<String>,
    pub concepts: Vec<String>,
}

impl WordPools {
    /// Load `objects.json`, `gerunds.json` and `concepts.json` from `dir`.
    ///
    /// A missing or malformed file is fatal.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            objects: load_word_list(&dir.join("objects.json"))?,
            gerunds: load_word_list(&dir.join("gerunds.json"))?,
            concepts: load_word_list(&dir.join("concepts.json"))?,
        })
    }

    pub fn pool(&self, word_type: WordType) -> &[String] {
        match word_type {
            WordType::Object => &self.objects,
            WordType::Gerund => &self.gerunds,
            WordType::Concept => &self.concepts,
        }
    }
}

/// Read a single JSON word list (an array of strings).
pub fn load_word_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| fatal(format!("cannot read word list {}: {}", path.display(), e)))?;
    let words: Vec<String> = serde_json::from_str(&content)
        .map_err(|e| fatal(format!("invalid word list {}: {}", path.display(), e)))?;
    Ok(words)
}

/// Samples word sets from validated, non-empty pools.
#[derive(Debug, Clone)]
pub struct WordSampler {
    pools: WordPools,
    max_attempts: usize,
}

impl WordSampler {
    /// Build a sampler. Entries are trimmed and blank ones dropped; every
    /// pool must keep at least one word.
    pub fn new(pools: WordPools, max_attempts: usize) -> Result<Self> {
        let pools = WordPools {
            objects: clean_pool(pools.objects),
            gerunds: clean_pool(pools.gerunds),
            concepts: clean_pool(pools.concepts),
        };
        for word_type in [WordType::Object, WordType::Gerund, WordType::Concept] {
            if pools.pool(word_type).is_empty() {
                return Err(fatal(format!("{} word pool is empty", word_type)));
            }
        }
        Ok(Self {
            pools,
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn from_dir(dir: &Path, max_attempts: usize) -> Result<Self> {
        let pools = WordPools::load(dir)
            .with_context(|| format!("loading word pools from {}", dir.display()))?;
        Self::new(pools, max_attempts)
    }

    /// Draw the words for one difficulty using the thread-local RNG.
    pub fn sample(&self, difficulty: Difficulty) -> Vec<Word> {
        self.sample_with(difficulty, &mut rand::thread_rng())
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, difficulty: Difficulty, rng: &mut R) -> Vec<Word> {
        let mut words = Vec::with_capacity(difficulty.word_count());
        for &(word_type, count) in difficulty.recipe() {
            let pool = self.pools.pool(word_type);
            for _ in 0..count {
                // Pools are validated non-empty in `new`.
                if let Some(word) = pool.choose(rng) {
                    words.push(Word::new(word.clone(), word_type));
                }
            }
        }
        words
    }

    /// Draw all four tiers until the day holds [`WORDS_PER_DAY`] distinct
    /// word texts.
    ///
    /// Gives up with a fatal error after the configured number of attempts,
    /// which only happens with pools too small to ever satisfy the rule.
    pub fn sample_day(&self) -> Result<WordSetForDay> {
        self.sample_day_with(&mut rand::thread_rng())
    }

    pub fn sample_day_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<WordSetForDay> {
        let warn_at = (self.max_attempts * 4 / 5).max(1);

        for attempt in 1..=self.max_attempts {
            let set = WordSetForDay {
                easy: self.sample_with(Difficulty::Easy, rng),
                medium: self.sample_with(Difficulty::Medium, rng),
                hard: self.sample_with(Difficulty::Hard, rng),
                dreaming: self.sample_with(Difficulty::Dreaming, rng),
            };

            if distinct_word_count(&set) >= WORDS_PER_DAY {
                debug!(attempt, "sampled unique words for day");
                return Ok(set);
            }

            if attempt == warn_at {
                warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    "still regenerating words because of duplicates; pools may be too small"
                );
            }
        }

        Err(fatal(format!(
            "could not sample {} distinct words after {} attempts",
            WORDS_PER_DAY, self.max_attempts
        )))
    }
}

fn clean_pool(words: Vec<String>) -> Vec<String> {
    words
        .into_iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Number of distinct word texts (exact, case-sensitive) across the day.
pub fn distinct_word_count(set: &WordSetForDay) -> usize {
    set.all_words()
        .map(|w| w.word.as_str())
        .collect::<HashSet<_>>()
        .len()
}

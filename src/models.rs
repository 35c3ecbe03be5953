//! Core data models used throughout daydream.
//!
//! These types are what ends up on the CDN: the per-day record under
//! `days/{date}.json` (mirrored to `today.json`) and the index of all
//! generated dates in `days.json`. Serde field names follow the JSON the
//! website reads, which is why some Rust names are renamed on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic category of a word pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordType {
    Object,
    Gerund,
    Concept,
}

impl fmt::Display for WordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WordType::Object => "object",
            WordType::Gerund => "gerund",
            WordType::Concept => "concept",
        };
        f.write_str(name)
    }
}

/// A single sampled word tagged with its pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    #[serde(rename = "type")]
    pub word_type: WordType,
}

impl Word {
    pub fn new(word: impl Into<String>, word_type: WordType) -> Self {
        Self {
            word: word.into(),
            word_type,
        }
    }
}

/// Difficulty tier. Declaration order is generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Dreaming,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Easy,
        Difficulty::Medium,
        Difficulty::Hard,
        Difficulty::Dreaming,
    ];

    /// Word composition for this tier as `(type, count)` pairs.
    ///
    /// | Tier | Objects | Gerunds | Concepts |
    /// |------|---------|---------|----------|
    /// | easy | 3 | 0 | 0 |
    /// | medium | 2 | 1 | 0 |
    /// | hard | 1 | 2 | 0 |
    /// | dreaming | 1 | 1 | 1 |
    pub fn recipe(self) -> &'static [(WordType, usize)] {
        match self {
            Difficulty::Easy => &[(WordType::Object, 3)],
            Difficulty::Medium => &[(WordType::Object, 2), (WordType::Gerund, 1)],
            Difficulty::Hard => &[(WordType::Object, 1), (WordType::Gerund, 2)],
            Difficulty::Dreaming => &[
                (WordType::Object, 1),
                (WordType::Gerund, 1),
                (WordType::Concept, 1),
            ],
        }
    }

    /// Total number of words drawn for this tier.
    pub fn word_count(self) -> usize {
        self.recipe().iter().map(|(_, n)| n).sum()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Dreaming => "dreaming",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four word lists generated together for one date.
#[derive(Debug, Clone)]
pub struct WordSetForDay {
    pub easy: Vec<Word>,
    pub medium: Vec<Word>,
    pub hard: Vec<Word>,
    pub dreaming: Vec<Word>,
}

impl WordSetForDay {
    pub fn get(&self, difficulty: Difficulty) -> &[Word] {
        match difficulty {
            Difficulty::Easy => &self.easy,
            Difficulty::Medium => &self.medium,
            Difficulty::Hard => &self.hard,
            Difficulty::Dreaming => &self.dreaming,
        }
    }

    pub fn all_words(&self) -> impl Iterator<Item = &Word> {
        self.easy
            .iter()
            .chain(self.medium.iter())
            .chain(self.hard.iter())
            .chain(self.dreaming.iter())
    }
}

/// One generated puzzle: words, prompt and the two published image URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub words: Vec<Word>,
    /// Local path of the downloaded source image (transient).
    #[serde(rename = "image_path")]
    pub source_image_path: String,
    #[serde(rename = "image_url_jpg")]
    pub jpeg_url: String,
    #[serde(rename = "image_url_webp")]
    pub webp_url: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenges {
    pub easy: Challenge,
    pub medium: Challenge,
    pub hard: Challenge,
    pub dreaming: Challenge,
}

/// Full persisted artifact for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub id: u64,
    pub challenges: Challenges,
}

/// Row in `days.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateIndexEntry {
    pub date: String,
    pub id: u64,
}

/// Which slot a date occupies in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAssignment {
    /// The date was already indexed; its id is reused.
    Overwrite(u64),
    /// The date is new; the id is one past the current maximum.
    New(u64),
}

impl SlotAssignment {
    pub fn id(self) -> u64 {
        match self {
            SlotAssignment::Overwrite(id) | SlotAssignment::New(id) => id,
        }
    }

    pub fn is_overwrite(self) -> bool {
        matches!(self, SlotAssignment::Overwrite(_))
    }
}

/// The `days.json` index: which dates exist and their stable ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayIndex {
    pub days: Vec<DateIndexEntry>,
}

impl DayIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn find_by_date(&self, date: &str) -> Option<&DateIndexEntry> {
        self.days.iter().find(|entry| entry.date == date)
    }

    pub fn max_id(&self) -> Option<u64> {
        self.days.iter().map(|entry| entry.id).max()
    }

    /// Decide the id for `date`: reuse an existing entry's id, otherwise
    /// `max + 1` (or `0` for an empty index).
    pub fn assign(&self, date: &str) -> anyhow::Result<SlotAssignment> {
        if let Some(existing) = self.find_by_date(date) {
            return Ok(SlotAssignment::Overwrite(existing.id));
        }
        let id = match self.max_id() {
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| anyhow::anyhow!("day id overflow after {}", max))?,
            None => 0,
        };
        Ok(SlotAssignment::New(id))
    }

    /// Write `entry` into the index, keyed by date.
    ///
    /// An existing entry for the date is overwritten in place; any later
    /// duplicates of that date are dropped. A new date is appended.
    pub fn upsert(&mut self, entry: DateIndexEntry) {
        match self.days.iter().position(|e| e.date == entry.date) {
            Some(pos) => {
                let date = entry.date.clone();
                self.days[pos] = entry;
                let mut index = 0;
                self.days.retain(|e| {
                    let keep = index <= pos || e.date != date;
                    index += 1;
                    keep
                });
            }
            None => self.days.push(entry),
        }
    }
}

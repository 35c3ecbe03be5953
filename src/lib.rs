//! # daydream
//!
//! Daily batch generator for an AI-illustrated word puzzle.
//!
//! Each run picks twelve distinct words across four difficulty tiers, asks
//! a text model for a dream-like scene per tier, renders it with an image
//! model, publishes web-sized JPEG and WebP variants to a CDN bucket, and
//! records the day in a public index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ WordSampler │──▶│ ChallengeBuilder │──▶│  ObjectStore  │
//! │  (pools)    │   │ prompt+image+web │   │  S3 / memory  │
//! └─────────────┘   └──────────────────┘   └───────▲───────┘
//!                            ▲                     │
//!                   ┌────────┴──────────┐          │
//!                   │   DayReconciler   │──────────┘
//!                   │ index, day, today │
//!                   └────────▲──────────┘
//!                            │ RetryPolicy + ErrorReporter
//!                       ┌────┴─────┐
//!                       │   CLI    │
//!                       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`models`] | Words, challenges, day records, the day index |
//! | [`words`] | Word pools and per-day sampling |
//! | [`generate`] | Prompt and image generation (OpenAI) |
//! | [`imaging`] | JPEG/WebP web variants |
//! | [`storage`] | S3-compatible CDN origin and in-memory store |
//! | [`challenge`] | One challenge end to end |
//! | [`reconcile`] | The day pipeline and index bookkeeping |
//! | [`retry`] | Whole-pipeline retry policy |
//! | [`report`] | Error reporting (log, Rollbar) |
//! | [`error`] | Fatal vs transient errors |
//! | [`job`] | CLI command implementations |

pub mod challenge;
pub mod config;
pub mod error;
pub mod generate;
pub mod imaging;
pub mod job;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod storage;
pub mod words;

#[cfg(test)]
mod testing;

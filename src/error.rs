//! Error taxonomy for the generation pipeline.
//!
//! Everything in the crate returns [`anyhow::Result`]. Most failures are
//! *transient*: an API call, an upload or a download went wrong and the
//! whole attempt can simply be tried again. A few are *fatal*: the word
//! pools are empty, credentials are missing, the configuration cannot work.
//! Retrying those only burns time, so they are tagged with [`FatalError`]
//! somewhere in the error chain and [`is_fatal`] looks for that tag.

use thiserror::Error;

/// Marker for configuration-class failures that must not be retried.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FatalError(pub String);

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Build an `anyhow::Error` carrying the [`FatalError`] marker.
pub fn fatal(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(FatalError::new(message))
}

/// Returns `true` when any error in the chain is a [`FatalError`].
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<FatalError>().is_some())
}

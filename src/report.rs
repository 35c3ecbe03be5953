//! Error reporting.
//!
//! Failures inside a generation run are not surfaced to anyone
//! synchronously; this is a batch job. They are logged through `tracing`
//! and, when configured, sent to Rollbar so someone gets alerted.
//!
//! The reporter is created once in `main` and passed down to the
//! reconciler as an [`ErrorReporter`] trait object.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, warn};

/// Receives failures that were handled (retried or downgraded) rather
/// than propagated.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    /// Report `err`. `context` names what was being attempted.
    ///
    /// Reporting never fails; delivery problems are only logged.
    async fn report(&self, err: &anyhow::Error, context: &str);
}

/// Logs reports at `ERROR` level and nothing else.
pub struct LogReporter;

#[async_trait]
impl ErrorReporter for LogReporter {
    async fn report(&self, err: &anyhow::Error, context: &str) {
        error!(context, error = %format!("{:#}", err), "reported failure");
    }
}

// ============ Rollbar ============

const ROLLBAR_ENDPOINT: &str = "https://api.rollbar.com/api/1/item/";

/// Sends each report to Rollbar as an item, and logs it.
pub struct RollbarReporter {
    client: reqwest::Client,
    access_token: String,
    environment: String,
    endpoint: String,
}

impl RollbarReporter {
    pub fn new(access_token: String, environment: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            access_token,
            environment,
            endpoint: ROLLBAR_ENDPOINT.to_string(),
        })
    }

    /// Item body for the Rollbar `POST /item/` API.
    fn payload(&self, err: &anyhow::Error, context: &str) -> Value {
        let causes: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
        json!({
            "data": {
                "environment": self.environment,
                "level": "error",
                "language": "rust",
                "code_version": env!("CARGO_PKG_VERSION"),
                "context": context,
                "body": {
                    "trace": {
                        "frames": [],
                        "exception": {
                            "class": "anyhow::Error",
                            "message": err.to_string(),
                            "description": format!("{:#}", err),
                        }
                    }
                },
                "custom": { "causes": causes },
            }
        })
    }
}

#[async_trait]
impl ErrorReporter for RollbarReporter {
    async fn report(&self, err: &anyhow::Error, context: &str) {
        LogReporter.report(err, context).await;

        let result = self
            .client
            .post(&self.endpoint)
            .header("X-Rollbar-Access-Token", &self.access_token)
            .json(&self.payload(err, context))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), "Rollbar rejected error report"),
            Err(e) => warn!(error = %e, "failed to send error report to Rollbar"),
        }
    }
}

/// Pick the reporter from the environment: Rollbar when
/// `ROLLBAR_ACCESS_TOKEN` is set (environment from `ROLLBAR_ENVIRONMENT`,
/// default `production`), otherwise log-only.
pub fn reporter_from_env() -> anyhow::Result<Box<dyn ErrorReporter>> {
    match std::env::var("ROLLBAR_ACCESS_TOKEN") {
        Ok(token) if !token.trim().is_empty() => {
            let environment =
                std::env::var("ROLLBAR_ENVIRONMENT").unwrap_or_else(|_| "production".to_string());
            Ok(Box::new(RollbarReporter::new(token, environment)?))
        }
        _ => Ok(Box::new(LogReporter)),
    }
}

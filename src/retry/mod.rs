//! Retry with backoff that survives process restarts.
//!
//! [`RetryExecutor::execute`] runs an operation, classifies each failure,
//! waits and tries again. Before every wait the attempt counter is written to
//! a checkpoint file; a new executor constructed over the same file picks the
//! counter up again, so a crash mid-backoff keeps counting toward the limit
//! instead of starting over.

pub mod classify;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::errors::RetryError;
use crate::util::{MAX_MESSAGE_CHARS, truncate_message};
use classify::{ClassifiedError, ErrorClassifier, FailureKind, TextClassifier, classify_error};

/// Added to every wait on top of the suggested or default delay.
pub const WAIT_BUFFER: Duration = Duration::from_secs(1);

/// Suspends the caller between attempts.
///
/// Injected so tests can observe waits without real time passing.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers every requested wait.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// Persisted attempt counter for an in-flight operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryCheckpoint {
    pub attempt: u32,
    pub operation_name: String,
    /// Written as `last_error`; `error` is accepted when reading.
    #[serde(alias = "error")]
    pub last_error: String,
    pub timestamp: DateTime<Utc>,
}

impl RetryCheckpoint {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read retry checkpoint: {}", path.display()))?;
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse retry checkpoint: {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize retry checkpoint")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write retry checkpoint: {}", path.display()))?;
        Ok(())
    }
}

pub struct RetryExecutor {
    checkpoint_file: PathBuf,
    classifier: Arc<dyn ErrorClassifier>,
    sleeper: Arc<dyn Sleeper>,
    resumed: Option<RetryCheckpoint>,
}

impl RetryExecutor {
    /// Create an executor backed by `checkpoint_file`, resuming from it if present.
    pub fn new(checkpoint_file: PathBuf) -> Self {
        let resumed = match RetryCheckpoint::load(&checkpoint_file) {
            Ok(Some(cp)) => {
                info!(
                    operation = %cp.operation_name,
                    attempt = cp.attempt,
                    "Resuming retry counter from checkpoint"
                );
                Some(cp)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Ignoring unreadable retry checkpoint");
                None
            }
        };

        Self {
            checkpoint_file,
            classifier: Arc::new(TextClassifier),
            sleeper: Arc::new(TokioSleeper),
            resumed,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn checkpoint_file(&self) -> &Path {
        &self.checkpoint_file
    }

    /// Checkpoint found at construction and not yet consumed by `execute`.
    pub fn resumed_checkpoint(&self) -> Option<&RetryCheckpoint> {
        self.resumed.as_ref()
    }

    /// Run `op` until it succeeds, fails non-retryably or `max_attempts` is reached.
    ///
    /// `op` receives the 1-based attempt number. Waits use the delay suggested
    /// by the failure when one is present, `default_wait` otherwise, plus
    /// [`WAIT_BUFFER`].
    pub async fn execute<T, F, Fut>(
        &mut self,
        operation: &str,
        max_attempts: u32,
        default_wait: Duration,
        op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_observed(operation, max_attempts, default_wait, |_, _, _| {}, op)
            .await
    }

    /// Like [`execute`](Self::execute), calling `on_retry(attempt, failure, wait)`
    /// for every failed attempt that is about to be retried.
    pub async fn execute_observed<T, F, Fut, R>(
        &mut self,
        operation: &str,
        max_attempts: u32,
        default_wait: Duration,
        mut on_retry: R,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        R: FnMut(u32, &ClassifiedError, Duration),
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = self.resume_attempt(operation);

        loop {
            attempt += 1;
            debug!(operation, attempt, max_attempts, "Starting attempt");

            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "Succeeded after retry");
                    }
                    self.clear_checkpoint();
                    return Ok(value);
                }
                Err(err) => err,
            };

            let classified = classify_error(&err, self.classifier.as_ref());
            let message = truncate_message(&classified.message, MAX_MESSAGE_CHARS);

            match classified.kind {
                FailureKind::QuotaExhausted => {
                    error!(operation, attempt, "Quota exhausted, not retrying");
                    self.clear_checkpoint();
                    return Err(RetryError::QuotaExhausted {
                        operation: operation.to_string(),
                        message,
                    });
                }
                FailureKind::Fatal => {
                    warn!(operation, attempt, error = %message, "Non-retryable failure");
                    self.clear_checkpoint();
                    return Err(RetryError::NonRetryable {
                        operation: operation.to_string(),
                        kind: classified.kind,
                        message,
                    });
                }
                FailureKind::RateLimited | FailureKind::Timeout => {}
            }

            if attempt >= max_attempts {
                warn!(operation, attempts = attempt, kind = %classified.kind, "Retry attempts exhausted");
                self.clear_checkpoint();
                return Err(RetryError::AttemptsExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    kind: classified.kind,
                    message,
                });
            }

            let wait = classified.suggested_wait.unwrap_or(default_wait) + WAIT_BUFFER;
            RetryCheckpoint {
                attempt,
                operation_name: operation.to_string(),
                last_error: message.clone(),
                timestamp: Utc::now(),
            }
            .save(&self.checkpoint_file)
            .map_err(RetryError::Checkpoint)?;

            warn!(
                operation,
                attempt,
                max_attempts,
                kind = %classified.kind,
                wait_secs = wait.as_secs_f64(),
                "Retryable failure, waiting before next attempt"
            );
            on_retry(
                attempt,
                &ClassifiedError {
                    message,
                    ..classified
                },
                wait,
            );
            self.sleeper.sleep(wait).await;
        }
    }

    /// Attempts already spent on `operation` by a previous process.
    fn resume_attempt(&mut self, operation: &str) -> u32 {
        match self.resumed.take() {
            Some(cp) if cp.operation_name == operation => cp.attempt,
            Some(cp) => {
                debug!(
                    saved = %cp.operation_name,
                    operation,
                    "Retry checkpoint belongs to another operation, starting fresh"
                );
                0
            }
            None => 0,
        }
    }

    fn clear_checkpoint(&self) {
        if self.checkpoint_file.exists()
            && let Err(e) = fs::remove_file(&self.checkpoint_file)
        {
            warn!(
                file = %self.checkpoint_file.display(),
                error = %e,
                "Failed to remove retry checkpoint"
            );
        }
    }
}

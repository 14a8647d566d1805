//! Failure classification for the retry executor.
//!
//! The retry core only looks at a [`ClassifiedError`]. Executors that know why
//! they failed return a [`WorkerFailure`] carrying the classification directly;
//! opaque errors fall back to [`TextClassifier`], which infers the kind and a
//! suggested wait from the error text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Suggested waits above this are treated as a daily quota, not a rate limit.
pub const QUOTA_WAIT_THRESHOLD: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient throttling; retried after the suggested wait.
    RateLimited,
    /// Request or gateway timeout; retried.
    Timeout,
    /// Daily ceiling reached; never retried.
    QuotaExhausted,
    /// Anything else; propagated immediately.
    Fatal,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::Timeout)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate-limit"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::QuotaExhausted => write!(f, "quota-exhausted"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Structured view of a failure, as consumed by the retry executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub kind: FailureKind,
    pub suggested_wait: Option<Duration>,
    pub message: String,
}

/// A failure raised by an executor that already knows its classification.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WorkerFailure {
    pub kind: FailureKind,
    pub suggested_wait: Option<Duration>,
    pub message: String,
}

impl WorkerFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            suggested_wait: None,
            message: message.into(),
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.suggested_wait = Some(wait);
        self
    }
}

/// Adapter turning an opaque error into a [`ClassifiedError`].
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &anyhow::Error) -> ClassifiedError;
}

/// Classify `error`, preferring a structured [`WorkerFailure`] anywhere in the
/// error chain over text inspection.
pub fn classify_error(error: &anyhow::Error, fallback: &dyn ErrorClassifier) -> ClassifiedError {
    if let Some(failure) = error
        .chain()
        .find_map(|e| e.downcast_ref::<WorkerFailure>())
    {
        return ClassifiedError {
            kind: failure.kind,
            suggested_wait: failure.suggested_wait,
            message: format!("{:#}", error),
        };
    }
    fallback.classify(error)
}

static RATE_LIMIT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|resource_exhausted|rate[ _-]?limit|too many requests").unwrap()
});

static QUOTA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)exceeded your current quota|per[ _-]?day|daily (?:limit|quota)").unwrap()
});

static TIMEOUT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)timeout|timed out|\b(?:504|408)\b").unwrap());

// Ordered: the first pattern that matches wins.
static WAIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)retry in\s+(\d+(?:\.\d+)?)\s*(ms|s)?").unwrap(),
        Regex::new(r#"(?i)"?retry_?delay"?\s*[:=]\s*"?(\d+(?:\.\d+)?)\s*(ms|s)?"#).unwrap(),
        Regex::new(r"(?i)retry[- ]after:?\s*(\d+(?:\.\d+)?)\s*(ms|s)?").unwrap(),
    ]
});

/// Regex-based classifier for errors that only carry text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextClassifier;

impl TextClassifier {
    pub fn classify_text(&self, text: &str) -> ClassifiedError {
        let suggested_wait = extract_wait(text);

        let kind = if RATE_LIMIT_REGEX.is_match(text) {
            let long_wait = suggested_wait.is_some_and(|w| w > QUOTA_WAIT_THRESHOLD);
            if QUOTA_REGEX.is_match(text) || long_wait {
                FailureKind::QuotaExhausted
            } else {
                FailureKind::RateLimited
            }
        } else if TIMEOUT_REGEX.is_match(text) {
            FailureKind::Timeout
        } else {
            FailureKind::Fatal
        };

        ClassifiedError {
            kind,
            suggested_wait,
            message: text.to_string(),
        }
    }
}

impl ErrorClassifier for TextClassifier {
    fn classify(&self, error: &anyhow::Error) -> ClassifiedError {
        self.classify_text(&format!("{:#}", error))
    }
}

/// Parse a suggested delay out of an error message.
pub fn extract_wait(text: &str) -> Option<Duration> {
    WAIT_PATTERNS.iter().find_map(|pattern| {
        let caps = pattern.captures(text)?;
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let secs = match caps.get(2).map(|m| m.as_str().to_lowercase()) {
            Some(unit) if unit == "ms" => value / 1000.0,
            _ => value,
        };
        Duration::try_from_secs_f64(secs).ok()
    })
}

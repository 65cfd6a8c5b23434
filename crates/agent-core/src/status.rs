//! Provider status normalization
//!
//! Providers report outcomes in their own vocabulary ("success", "done",
//! "stop", "failed", ...). Everything is folded into [`Outcome`]. Unknown
//! strings become [`Outcome::Error`], never [`Outcome::Ok`].

use serde::{Deserialize, Serialize};

/// Canonical outcome of one gateway call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Error,
    NeedsRetry,
}

const OK: &[&str] = &[
    "ok",
    "success",
    "succeeded",
    "done",
    "complete",
    "completed",
    "finished",
    "stop",
    "end_turn",
    "tool_calls",
    "length",
];

const ERROR: &[&str] = &[
    "error",
    "failed",
    "failure",
    "cancelled",
    "canceled",
    "content_filter",
];

const RETRY: &[&str] = &["retry", "rate_limited", "overloaded", "busy", "queued"];

/// Normalized status with the provider's original wording
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedStatus {
    pub outcome: Outcome,
    /// Raw provider string, `None` when the provider sent no status
    pub raw: Option<String>,
    /// False when `raw` was not part of the known vocabulary
    pub recognized: bool,
}

/// Map a provider status string to an [`Outcome`]
pub fn normalize_status(raw: Option<&str>) -> NormalizedStatus {
    let Some(raw) = raw else {
        return NormalizedStatus {
            outcome: Outcome::Ok,
            raw: None,
            recognized: true,
        };
    };

    let key = raw.trim().to_ascii_lowercase();
    let outcome = if OK.contains(&key.as_str()) {
        Some(Outcome::Ok)
    } else if ERROR.contains(&key.as_str()) {
        Some(Outcome::Error)
    } else if RETRY.contains(&key.as_str()) {
        Some(Outcome::NeedsRetry)
    } else {
        None
    };

    if outcome.is_none() {
        tracing::warn!(status = %raw, "Unrecognized provider status treated as error");
    }

    NormalizedStatus {
        outcome: outcome.unwrap_or(Outcome::Error),
        raw: Some(raw.to_string()),
        recognized: outcome.is_some(),
    }
}

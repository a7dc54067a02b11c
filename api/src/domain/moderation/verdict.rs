use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Operation, Sensitivity};

/// One labelled finding reported by a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Outcome of a single operation on one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Model confidence that the image should be blocked, 0.0..=1.0
    pub score: f32,
    pub flagged: bool,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Detection>,
}

/// Merged per-operation outcome for one (image, operations, sensitivity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// True when any operation flagged the image
    pub flagged: bool,
    pub results: BTreeMap<Operation, OperationResult>,
    pub sensitivity: Sensitivity,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Verdict {
    pub fn merge<I>(results: I, sensitivity: Sensitivity, created_at: DateTime<Utc>, ttl: Duration) -> Self
    where
        I: IntoIterator<Item = (Operation, OperationResult)>,
    {
        let results: BTreeMap<Operation, OperationResult> = results.into_iter().collect();
        let flagged = results.values().any(|r| r.flagged);

        Self {
            flagged,
            results,
            sensitivity,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Valid strictly before the expiry deadline
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn result(&self, operation: Operation) -> Option<&OperationResult> {
        self.results.get(&operation)
    }

    /// Highest score across operations
    pub fn max_score(&self) -> f32 {
        self.results.values().map(|r| r.score).fold(0.0, f32::max)
    }

    /// Human-readable summary: flagged operations first, then the rest
    pub fn describe(&self) -> String {
        let (mut flagged, rest): (Vec<_>, Vec<_>) =
            self.results.values().partition(|r| r.flagged);
        flagged.extend(rest);
        flagged
            .into_iter()
            .map(|r| r.summary.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

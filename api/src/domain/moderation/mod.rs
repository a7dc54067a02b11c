//! Moderation domain - operations, requests, cache keys and verdicts
//!
//! Everything in here is plain data: no I/O, no model handles. The
//! coordinator in `services::coordinator` moves these values between the
//! cache store and the model adapters.

mod request;
mod verdict;

pub use request::{CacheKey, ModerationRequest};
pub use verdict::{Detection, OperationResult, Verdict};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ModerationError;

/// A single analysis a caller can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Nudity,
    Face,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Nudity, Operation::Face];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Nudity => "nudity",
            Operation::Face => "face",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nudity" | "nsfw" => Ok(Operation::Nudity),
            "face" | "age" => Ok(Operation::Face),
            other => Err(ModerationError::BadRequest(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

/// Non-empty, ordered set of operations.
///
/// Ordering comes from `BTreeSet`, so `{face, nudity}` and `{nudity, face}`
/// are the same value and hash into the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OperationSet(BTreeSet<Operation>);

impl OperationSet {
    pub fn new<I>(operations: I) -> Result<Self, ModerationError>
    where
        I: IntoIterator<Item = Operation>,
    {
        let set: BTreeSet<Operation> = operations.into_iter().collect();
        if set.is_empty() {
            return Err(ModerationError::BadRequest(
                "at least one operation is required".to_string(),
            ));
        }
        Ok(Self(set))
    }

    pub fn single(operation: Operation) -> Self {
        Self(BTreeSet::from([operation]))
    }

    /// Parse a list of operation names, e.g. `["nudity", "face"]`
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ModerationError> {
        let ops = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<Operation>, _>>()?;
        Self::new(ops)
    }

    /// Parse a comma separated selector, e.g. `nudity,face`
    pub fn parse_csv(selector: &str) -> Result<Self, ModerationError> {
        let names: Vec<&str> = selector
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        Self::parse(&names)
    }

    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for OperationSet {
    fn default() -> Self {
        Self::single(Operation::Nudity)
    }
}

impl fmt::Display for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Operation::as_str).collect();
        f.write_str(&names.join(","))
    }
}

/// Threshold profile for a request
///
/// - `high`: profile photos and stories, strictest nudity threshold
/// - `normal`: video calls
/// - `low`: most tolerant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    High,
    #[default]
    Normal,
    Low,
}

/// Minimum estimated age accepted, identical across profiles
const MIN_AGE: f32 = 16.0;

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::High => "high",
            Sensitivity::Normal => "normal",
            Sensitivity::Low => "low",
        }
    }

    /// Probability above which an explicit class flags the image
    pub fn nudity_threshold(&self) -> f32 {
        match self {
            Sensitivity::High => 0.45,
            Sensitivity::Normal => 0.6,
            Sensitivity::Low => 0.75,
        }
    }

    pub fn min_age(&self) -> f32 {
        MIN_AGE
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sensitivity {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Sensitivity::High),
            "normal" | "" => Ok(Sensitivity::Normal),
            "low" => Ok(Sensitivity::Low),
            other => Err(ModerationError::BadRequest(format!(
                "unknown sensitivity '{}' (expected high, normal or low)",
                other
            ))),
        }
    }
}

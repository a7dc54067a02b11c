use super::vit::VitClassifier;
use super::{Frame, ModelAdapter};
use crate::domain::moderation::{Detection, Operation, OperationResult, Sensitivity};
use crate::error::ModerationError;

pub const DEFAULT_MODEL_REPO: &str = "nateraw/vit-age-classifier";

/// Open-ended brackets ("more than 70") are placed this far above their bound
const OPEN_BRACKET_SPAN: f32 = 5.0;

/// Face analysis: age estimation on top of a ViT age-bracket classifier
pub struct FaceAdapter {
    classifier: VitClassifier,
}

impl FaceAdapter {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            classifier: VitClassifier::new(repo),
        }
    }
}

/// Representative age for a bracket label like `10-19` or `more than 70`
fn bracket_midpoint(label: &str) -> Option<f32> {
    let bounds: Vec<f32> = label
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    match bounds.as_slice() {
        [lo, hi] => Some((lo + hi) / 2.0),
        [bound] => Some(bound + OPEN_BRACKET_SPAN),
        _ => None,
    }
}

/// Probability-weighted age estimate.
///
/// Flagged when the estimate is under the minimum age; the score is the
/// probability mass of brackets centred under it.
pub(crate) fn evaluate(
    probs: &[(String, f32)],
    sensitivity: Sensitivity,
) -> Result<OperationResult, ModerationError> {
    let min_age = sensitivity.min_age();
    let mut estimated_age = 0.0f32;
    let mut underage_mass = 0.0f32;
    let mut details = Vec::with_capacity(probs.len() + 1);

    for (label, p) in probs {
        let midpoint = bracket_midpoint(label).ok_or_else(|| {
            ModerationError::ModelUnavailable(format!("unrecognised age bracket '{}'", label))
        })?;
        estimated_age += midpoint * p;
        if midpoint < min_age {
            underage_mass += p;
        }
        details.push(Detection::new(format!("age {}", label), *p));
    }
    details.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let flagged = estimated_age < min_age;
    let summary = if flagged {
        format!(
            "UNDERAGE DETECTED: Estimated age {:.0} (< {:.0})",
            estimated_age, min_age
        )
    } else {
        format!("Age OK: {:.0}", estimated_age)
    };

    Ok(OperationResult {
        score: underage_mass.clamp(0.0, 1.0),
        flagged,
        summary,
        details,
    })
}

impl ModelAdapter for FaceAdapter {
    fn operation(&self) -> Operation {
        Operation::Face
    }

    fn is_loaded(&self) -> bool {
        self.classifier.is_loaded()
    }

    fn warm_up(&self) -> Result<(), ModerationError> {
        self.classifier.warm_up().map_err(|e| {
            ModerationError::ModelUnavailable(format!("{}: {:#}", self.classifier.repo(), e))
        })
    }

    fn score(&self, frame: &Frame, sensitivity: Sensitivity) -> Result<OperationResult, ModerationError> {
        let scaled = frame.scale()?;
        let probs = self.classifier.classify(&scaled).map_err(|e| {
            ModerationError::ModelUnavailable(format!("{}: {:#}", self.classifier.repo(), e))
        })?;

        let result = evaluate(&probs, sensitivity)?;
        if result.flagged {
            tracing::warn!(score = result.score, "[age_check] {}", result.summary);
        } else {
            tracing::debug!("[age_check] {}", result.summary);
        }
        Ok(result)
    }
}

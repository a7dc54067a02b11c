use super::vit::VitClassifier;
use super::{Frame, ModelAdapter};
use crate::domain::moderation::{Detection, Operation, OperationResult, Sensitivity};
use crate::error::ModerationError;

pub const DEFAULT_MODEL_REPO: &str = "LukeJacob2023/nsfw-image-detector";

// 5-class model: drawings (safe), hentai (block), neutral (safe), porn (block), sexy (block)
const BLOCKED_CLASSES: [&str; 3] = ["hentai", "porn", "sexy"];

/// Nudity classifier on top of the NSFW ViT model
pub struct NudityAdapter {
    classifier: VitClassifier,
}

impl NudityAdapter {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            classifier: VitClassifier::new(repo),
        }
    }
}

fn is_blocked(label: &str) -> bool {
    BLOCKED_CLASSES
        .iter()
        .any(|blocked| blocked.eq_ignore_ascii_case(label))
}

/// Turn class probabilities into a nudity result.
///
/// Score is the highest blocked-class probability; the image is flagged
/// when it exceeds the sensitivity threshold.
pub(crate) fn evaluate(probs: &[(String, f32)], sensitivity: Sensitivity) -> OperationResult {
    let threshold = sensitivity.nudity_threshold();

    let score = probs
        .iter()
        .filter(|(label, _)| is_blocked(label))
        .map(|(_, p)| *p)
        .fold(0.0f32, f32::max);

    let mut over_threshold: Vec<&(String, f32)> = probs
        .iter()
        .filter(|(label, p)| is_blocked(label) && *p > threshold)
        .collect();
    over_threshold.sort_by(|a, b| b.1.total_cmp(&a.1));

    let flagged = !over_threshold.is_empty();
    let summary = if flagged {
        let names: Vec<&str> = over_threshold.iter().map(|(label, _)| label.as_str()).collect();
        format!("Nudity: {}", names.join(", "))
    } else {
        format!("Content is safe (max confidence: {:.2})", score)
    };

    let mut details: Vec<Detection> = probs
        .iter()
        .map(|(label, p)| Detection::new(label.clone(), *p))
        .collect();
    details.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    OperationResult {
        score,
        flagged,
        summary,
        details,
    }
}

impl ModelAdapter for NudityAdapter {
    fn operation(&self) -> Operation {
        Operation::Nudity
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

        let result = evaluate(&probs, sensitivity);
        if result.flagged {
            tracing::warn!(score = result.score, "[nsfw] BLOCKED - {}", result.summary);
        } else {
            tracing::debug!(score = result.score, "[nsfw] SAFE");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probs(values: [f32; 5]) -> Vec<(String, f32)> {
        ["drawings", "hentai", "neutral", "porn", "sexy"]
            .into_iter()
            .map(String::from)
            .zip(values)
            .collect()
    }

    #[test]
    fn test_neutral_image_is_safe() {
        let result = evaluate(&probs([0.05, 0.01, 0.9, 0.02, 0.02]), Sensitivity::Normal);
        assert!(!result.flagged);
        assert_eq!(result.score, 0.02);
        assert_eq!(result.details[0].label, "neutral");
        assert!(result.summary.starts_with("Content is safe"));
    }

    #[test]
    fn test_threshold_follows_sensitivity() {
        let p = probs([0.0, 0.0, 0.5, 0.5, 0.0]);
        assert!(evaluate(&p, Sensitivity::High).flagged);
        assert!(!evaluate(&p, Sensitivity::Normal).flagged);
        assert!(!evaluate(&p, Sensitivity::Low).flagged);
    }

    #[test]
    fn test_flagged_summary_lists_classes_by_confidence() {
        let result = evaluate(&probs([0.0, 0.0, 0.0, 0.3, 0.7]), Sensitivity::High);
        assert!(result.flagged);
        assert_eq!(result.score, 0.7);
        assert_eq!(result.summary, "Nudity: sexy");

        let result = evaluate(&probs([0.0, 0.46, 0.0, 0.5, 0.0]), Sensitivity::High);
        assert_eq!(result.summary, "Nudity: porn, hentai");
    }
}

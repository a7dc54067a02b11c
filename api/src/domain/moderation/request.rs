use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use super::{OperationSet, Sensitivity};

/// Immutable moderation request: image bytes plus what to run on them
#[derive(Debug, Clone)]
pub struct ModerationRequest {
    image: Bytes,
    operations: OperationSet,
    sensitivity: Sensitivity,
    request_id: Option<String>,
}

impl ModerationRequest {
    pub fn new(image: impl Into<Bytes>, operations: OperationSet) -> Self {
        Self {
            image: image.into(),
            operations,
            sensitivity: Sensitivity::default(),
            request_id: None,
        }
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn image(&self) -> &Bytes {
        &self.image
    }

    pub fn operations(&self) -> &OperationSet {
        &self.operations
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn image_size_kb(&self) -> f64 {
        self.image.len() as f64 / 1024.0
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.image, &self.operations, self.sensitivity)
    }
}

/// Hex SHA-256 fingerprint of (image content, operation set, sensitivity).
///
/// The caller-supplied request id never takes part, so the same image sent
/// by two callers shares one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(image: &[u8], operations: &OperationSet, sensitivity: Sensitivity) -> Self {
        let content_digest = Sha256::digest(image);

        let mut hasher = Sha256::new();
        hasher.update(b"moderation/v1");
        hasher.update(content_digest);
        for op in operations.iter() {
            hasher.update([0u8]);
            hasher.update(op.as_str());
        }
        hasher.update([0xffu8]);
        hasher.update(sensitivity.as_str());

        Self(format!("{:x}", hasher.finalize()))
    }

    /// Accepts a previously issued key (64 lowercase hex chars)
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == 64
            && raw
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::moderation::Operation;

    fn ops(names: &[&str]) -> OperationSet {
        OperationSet::parse(names).unwrap()
    }

    #[test]
    fn test_same_image_same_operations_same_key() {
        let a = ModerationRequest::new(b"image-a".to_vec(), ops(&["nudity", "face"]))
            .with_request_id(Some("caller-1".into()));
        let b = ModerationRequest::new(b"image-a".to_vec(), ops(&["face", "nudity"]))
            .with_request_id(Some("caller-2".into()));
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key().as_str().len(), 64);
    }

    #[test]
    fn test_operation_set_is_part_of_key() {
        let both = ModerationRequest::new(b"image-a".to_vec(), ops(&["nudity", "face"]));
        let nudity = ModerationRequest::new(b"image-a".to_vec(), ops(&["nudity"]));
        assert_ne!(both.cache_key(), nudity.cache_key());
    }

    #[test]
    fn test_image_and_sensitivity_are_part_of_key() {
        let set = OperationSet::single(Operation::Nudity);
        let a = CacheKey::derive(b"image-a", &set, Sensitivity::Normal);
        let b = CacheKey::derive(b"image-b", &set, Sensitivity::Normal);
        let c = CacheKey::derive(b"image-a", &set, Sensitivity::High);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_parse_round_trips_issued_keys_only() {
        let key = CacheKey::derive(b"x", &OperationSet::default(), Sensitivity::Low);
        assert_eq!(CacheKey::parse(key.as_str()), Some(key));
        assert_eq!(CacheKey::parse("not-a-key"), None);
        assert_eq!(CacheKey::parse(&"G".repeat(64)), None);
    }

    #[test]
    fn test_blank_request_id_is_dropped() {
        let req = ModerationRequest::new(b"x".to_vec(), OperationSet::default())
            .with_request_id(Some("  ".into()));
        assert_eq!(req.request_id(), None);
    }
}

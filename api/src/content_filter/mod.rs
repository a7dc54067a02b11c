use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::moderation::{Operation, OperationResult, Sensitivity};
use crate::error::ModerationError;

/// Longest side kept after decoding
pub const MAX_FRAME_SIDE: u32 = 800;

/// Classifier input size (224x224 RGB)
pub const IMAGE_SIZE: usize = 224;

/// Decoded RGB image shared by every adapter of one computation
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Decode any supported format, drop alpha, clamp to `MAX_FRAME_SIDE`
    pub fn decode(bytes: &[u8]) -> Result<Self, ModerationError> {
        if bytes.is_empty() {
            return Err(ModerationError::InvalidImage("empty payload".to_string()));
        }

        let mut img = image::load_from_memory(bytes)
            .map_err(|e| ModerationError::InvalidImage(e.to_string()))?;

        if img.width().max(img.height()) > MAX_FRAME_SIDE {
            img = img.resize(MAX_FRAME_SIDE, MAX_FRAME_SIDE, FilterType::Lanczos3);
        }

        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self {
            rgb: rgb.into_raw(),
            width,
            height,
        })
    }

    /// Scale to model input size, returns `IMAGE_SIZE * IMAGE_SIZE * 3` bytes
    pub fn scale(&self) -> Result<Vec<u8>, ModerationError> {
        let img: ImageBuffer<Rgb<u8>, _> =
            ImageBuffer::from_raw(self.width, self.height, self.rgb.as_slice())
                .ok_or_else(|| ModerationError::InvalidImage("Invalid image dimensions".into()))?;

        let resized = image::imageops::resize(
            &img,
            IMAGE_SIZE as u32,
            IMAGE_SIZE as u32,
            FilterType::Triangle,
        );

        Ok(resized.into_raw())
    }
}

/// Pluggable detection model behind one operation.
///
/// Calls are blocking (CPU/GPU bound); the coordinator runs them on the
/// blocking pool. Loading is owned by the adapter: `warm_up` loads eagerly,
/// `score` loads on first use if warm-up failed or was skipped.
pub trait ModelAdapter: Send + Sync {
    fn operation(&self) -> Operation;

    fn is_loaded(&self) -> bool;

    fn warm_up(&self) -> Result<(), ModerationError>;

    fn score(&self, frame: &Frame, sensitivity: Sensitivity) -> Result<OperationResult, ModerationError>;
}

/// Adapters keyed by the operation they serve, fixed at startup
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Operation, Arc<dyn ModelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter; a later registration for the same operation wins
    pub fn register(mut self, adapter: Arc<dyn ModelAdapter>) -> Self {
        self.adapters.insert(adapter.operation(), adapter);
        self
    }

    pub fn get(&self, operation: Operation) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(&operation).cloned()
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn ModelAdapter>> {
        self.adapters.values()
    }
}

mod age;
mod nsfw;
mod vit;

pub use age::{DEFAULT_MODEL_REPO as DEFAULT_FACE_MODEL_REPO, FaceAdapter};
pub use nsfw::{DEFAULT_MODEL_REPO as DEFAULT_NUDITY_MODEL_REPO, NudityAdapter};

#[cfg(test)]
pub(crate) mod testing {
    //! Test adapters with call counting

    use super::*;
    use crate::domain::moderation::Detection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct FakeAdapter {
        pub operation: Operation,
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub score: f32,
        pub fail_with: Option<ModerationError>,
    }

    impl FakeAdapter {
        pub fn new(operation: Operation, score: f32) -> Self {
            Self {
                operation,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                score,
                fail_with: None,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn failing(mut self, error: ModerationError) -> Self {
            self.fail_with = Some(error);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ModelAdapter for FakeAdapter {
        fn operation(&self) -> Operation {
            self.operation
        }

        fn is_loaded(&self) -> bool {
            true
        }

        fn warm_up(&self) -> Result<(), ModerationError> {
            Ok(())
        }

        fn score(&self, frame: &Frame, sensitivity: Sensitivity) -> Result<OperationResult, ModerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            Ok(OperationResult {
                score: self.score,
                flagged: self.score > sensitivity.nudity_threshold(),
                summary: format!("{} scored {}x{}", self.operation, frame.width, frame.height),
                details: vec![Detection::new(self.operation.as_str(), self.score)],
            })
        }
    }

    /// Encode a small solid-colour PNG
    pub fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb(color));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }
}

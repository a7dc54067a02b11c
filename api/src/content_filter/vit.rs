use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::IMAGE_SIZE;

struct LoadedModel {
    model: vit::Model,
    labels: Vec<String>,
}

/// ViT image classifier fetched from the Hugging Face hub.
///
/// Loaded lazily and kept behind a mutex: one model instance per process,
/// forward passes are serialized.
pub struct VitClassifier {
    repo: String,
    device: Device,
    model: Mutex<Option<LoadedModel>>,
    loaded: AtomicBool,
}

fn select_device() -> Device {
    #[cfg(feature = "metal")]
    let device = Device::new_metal(0).unwrap_or(Device::Cpu);
    #[cfg(all(feature = "cuda", not(feature = "metal")))]
    let device = Device::new_cuda(0).unwrap_or(Device::Cpu);
    #[cfg(not(any(feature = "metal", feature = "cuda")))]
    let device = Device::Cpu;
    device
}

/// Labels in class-index order from a HF `config.json`
fn labels_from_config(config: &serde_json::Value) -> Result<Vec<String>> {
    let id2label = config
        .get("id2label")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow!("config.json has no id2label"))?;

    let mut labels: Vec<(usize, String)> = id2label
        .iter()
        .map(|(id, label)| -> Result<(usize, String)> {
            let id: usize = id.parse().with_context(|| format!("bad class id {}", id))?;
            let label = label
                .as_str()
                .ok_or_else(|| anyhow!("label for class {} is not a string", id))?;
            Ok((id, label.to_string()))
        })
        .collect::<Result<_>>()?;
    labels.sort_by_key(|(id, _)| *id);

    if labels.iter().enumerate().any(|(i, (id, _))| i != *id) {
        return Err(anyhow!("id2label class ids are not contiguous"));
    }
    Ok(labels.into_iter().map(|(_, label)| label).collect())
}

impl VitClassifier {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            device: select_device(),
            model: Mutex::new(None),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn load(&self) -> Result<LoadedModel> {
        tracing::info!(repo = %self.repo, device = ?self.device, "Loading ViT classifier");

        let api = Api::new()?;
        let repo = api.repo(Repo::new(self.repo.clone(), RepoType::Model));

        let model_path = repo.get("model.safetensors")?;
        let config_path = repo.get("config.json")?;

        let raw_config = std::fs::read_to_string(config_path)?;
        let labels = labels_from_config(&serde_json::from_str(&raw_config)?)?;
        let config: vit::Config = serde_json::from_str(&raw_config)?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_path], DType::F32, &self.device)? };
        let model = vit::Model::new(&config, labels.len(), vb)?;

        tracing::info!(repo = %self.repo, classes = labels.len(), "ViT classifier loaded");
        Ok(LoadedModel { model, labels })
    }

    /// Readable without waiting on an in-progress forward pass
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn ensure_loaded(&self, slot: &mut Option<LoadedModel>) -> Result<()> {
        if slot.is_none() {
            *slot = Some(self.load()?);
            self.loaded.store(true, Ordering::Release);
        }
        Ok(())
    }

    pub fn warm_up(&self) -> Result<()> {
        let mut slot = self.model.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        self.ensure_loaded(&mut slot)
    }

    /// CHW tensor normalized with mean=0.5, std=0.5 on every channel
    fn preprocess(&self, scaled_rgb: &[u8]) -> Result<Tensor> {
        if scaled_rgb.len() != IMAGE_SIZE * IMAGE_SIZE * 3 {
            return Err(anyhow!(
                "expected {}x{}x3 RGB, got {} bytes",
                IMAGE_SIZE,
                IMAGE_SIZE,
                scaled_rgb.len()
            ));
        }

        let mean = 0.5;
        let std = 0.5;
        let plane = IMAGE_SIZE * IMAGE_SIZE;
        let mut data = vec![0f32; 3 * plane];

        for i in 0..plane {
            for c in 0..3 {
                let v = scaled_rgb[i * 3 + c] as f32 / 255.0;
                data[c * plane + i] = (v - mean) / std;
            }
        }

        Ok(Tensor::from_vec(data, (1, 3, IMAGE_SIZE, IMAGE_SIZE), &self.device)?)
    }

    /// Class probabilities as `(label, probability)` in class-index order
    pub fn classify(&self, scaled_rgb: &[u8]) -> Result<Vec<(String, f32)>> {
        let input = self.preprocess(scaled_rgb)?;

        let mut slot = self.model.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        self.ensure_loaded(&mut slot)?;
        let loaded = slot.as_ref().ok_or_else(|| anyhow!("model not loaded"))?;

        let logits = loaded.model.forward(&input)?;
        let probs = candle_nn::ops::softmax(&logits, 1)?;
        let probs: Vec<f32> = probs.flatten_all()?.to_vec1()?;

        Ok(loaded.labels.iter().cloned().zip(probs).collect())
    }
}

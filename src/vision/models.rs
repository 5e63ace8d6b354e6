//! PaddleOCR model files and ONNX Runtime sessions
//!
//! Models are fetched once into the data directory and reused afterwards.
//! Setting `CARD_SCANNER_OFFLINE` disables downloads; missing models then
//! surface as an error the caller can fall back from.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// Environment variable that disables model downloads
pub const OFFLINE_ENV: &str = "CARD_SCANNER_OFFLINE";

/// Model files needed by the scene-text engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [ModelType::Detection, ModelType::Recognition, ModelType::Dictionary];

    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
        }
    }

    /// PaddleOCR ONNX exports on Hugging Face (monkt/paddleocr-onnx)
    pub fn download_url(&self) -> &'static str {
        match self {
            ModelType::Detection => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
            }
            ModelType::Recognition => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
            }
            ModelType::Dictionary => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
            }
        }
    }

    /// Plausible file size in bytes, used to spot truncated downloads
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (2_000_000, 5_000_000),
            ModelType::Recognition => (7_000_000, 10_000_000),
            ModelType::Dictionary => (500, 10_000),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Record of downloaded model files
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix timestamp in seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            models: Vec::new(),
        }
    }
}

/// Downloads and caches model files
pub struct ModelManager {
    models_dir: PathBuf,
    offline: bool,
}

impl ModelManager {
    /// Use `<data dir>/models`
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Use a custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            offline: std::env::var_os(OFFLINE_ENV).is_some(),
        })
    }

    /// Override offline mode
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Whether a model file exists with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        let Ok(metadata) = std::fs::metadata(self.model_path(model_type)) else {
            return false;
        };
        let (min, max) = model_type.expected_size_range();
        (min..=max).contains(&metadata.len())
    }

    /// Whether every PaddleOCR file is already on disk
    pub fn are_models_ready(&self) -> bool {
        ModelType::ALL.iter().all(|&m| self.is_model_available(m))
    }

    /// Return the path of a model, downloading it first if needed
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        if self.offline {
            anyhow::bail!(
                "Offline mode: {} model missing. Download {} and place it at {:?}",
                model_type.display_name(),
                model_type.download_url(),
                path
            );
        }

        self.download_model(model_type)?;
        Ok(path)
    }

    fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(download_file(url, &path))?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Downloaded {} model has an unexpected size", model_type.display_name());
        }

        let size_bytes = std::fs::metadata(&path)?.len();
        self.record_download(ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes,
            sha256,
            downloaded_at: unix_now(),
        })?;

        info!("Downloaded {} model ({} bytes)", model_type.display_name(), size_bytes);
        Ok(())
    }

    fn record_download(&self, model_info: ModelInfo) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        match manifest.models.iter_mut().find(|m| m.filename == model_info.filename) {
            Some(existing) => *existing = model_info,
            None => manifest.models.push(model_info),
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.models_dir.join("manifest.json"), content)?;
        Ok(())
    }
}

/// Stream `url` into `path` through a temp file. Returns the SHA-256 hex digest.
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    debug!("Download size: {:?} bytes", response.content_length());

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path).context("Failed to move downloaded file into place")?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// ONNX Runtime session with a single image input and a single output
pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model has no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("Model has no outputs")?;

        debug!("Model loaded. Input: {}, output: {}", input_name, output_name);

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Run one NCHW tensor through the model. Returns the output shape and
    /// its data in row-major order.
    pub fn run(&mut self, input: &Array4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let contiguous = input.as_standard_layout();
        let data = contiguous
            .as_slice()
            .context("Input tensor is not contiguous")?;

        let tensor = TensorRef::from_array_view((dims, data))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("ONNX Runtime inference failed")?;

        let (shape, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .with_context(|| format!("Failed to extract output '{}' as f32", self.output_name))?;

        let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((shape, values.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, ModelManager) {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ModelManager::with_dir(dir.path().join("models")).unwrap();
        manager.set_offline(true);
        (dir, manager)
    }

    #[test]
    fn test_model_type_filenames() {
        assert_eq!(ModelType::Detection.filename(), "det.onnx");
        assert_eq!(ModelType::Recognition.filename(), "rec.onnx");
        assert_eq!(ModelType::Dictionary.filename(), "dict.txt");
    }

    #[test]
    fn test_with_dir_creates_directory() {
        let (_dir, manager) = manager();
        assert!(manager.models_dir().is_dir());
        assert!(!manager.are_models_ready());
    }

    #[test]
    fn test_size_check_rejects_truncated_file() {
        let (_dir, manager) = manager();
        std::fs::write(manager.model_path(ModelType::Dictionary), "abc").unwrap();
        assert!(!manager.is_model_available(ModelType::Dictionary));

        std::fs::write(manager.model_path(ModelType::Dictionary), "a\n".repeat(400)).unwrap();
        assert!(manager.is_model_available(ModelType::Dictionary));
    }

    #[test]
    fn test_offline_missing_model_is_error() {
        let (_dir, manager) = manager();
        let err = manager.ensure_model(ModelType::Detection).unwrap_err();
        assert!(err.to_string().contains("Offline mode"));
    }

    #[test]
    fn test_offline_present_model_resolves() {
        let (_dir, manager) = manager();
        std::fs::write(manager.model_path(ModelType::Dictionary), "x\n".repeat(1000)).unwrap();
        let path = manager.ensure_model(ModelType::Dictionary).unwrap();
        assert!(path.ends_with("dict.txt"));
    }

    #[test]
    fn test_manifest_upsert() {
        let (_dir, manager) = manager();
        assert_eq!(manager.load_manifest().unwrap(), ModelManifest::default());

        let info = |size| ModelInfo {
            model_type: "Dictionary".into(),
            filename: "dict.txt".into(),
            size_bytes: size,
            sha256: "00".into(),
            downloaded_at: 1,
        };
        manager.record_download(info(10)).unwrap();
        manager.record_download(info(20)).unwrap();

        let manifest = manager.load_manifest().unwrap();
        assert_eq!(manifest.models.len(), 1);
        assert_eq!(manifest.models[0].size_bytes, 20);
    }
}

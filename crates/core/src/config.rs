use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration, built once at start-up and handed to the
/// components that need it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MedrecConfig {
    pub ocr: OcrConfig,
    pub assistant: AssistantConfig,
    pub records: RecordsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract language code(s), e.g. `eng` or `eng+hin`.
    pub language: String,
    /// Directory holding `*.traineddata`; `None` uses Tesseract's default.
    pub tessdata_path: Option<PathBuf>,
    /// Tesseract page segmentation mode. 6 = single uniform block of text.
    pub page_seg_mode: u8,
    /// Neighbourhood size for adaptive thresholding (odd, ≥ 3).
    pub threshold_block_size: u32,
    /// Subtracted from the local mean before comparison.
    pub threshold_offset: i32,
    /// Resolution scanned PDF pages are rasterized at.
    pub render_dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            tessdata_path: None,
            page_seg_mode: 6,
            threshold_block_size: 11,
            threshold_offset: 2,
            render_dpi: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// TOML file with known patient records for direct lookups.
    pub directory: Option<PathBuf>,
}

impl MedrecConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: MedrecConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ocr = &self.ocr;
        if ocr.threshold_block_size < 3 || ocr.threshold_block_size % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "threshold_block_size must be odd and at least 3, got {}",
                ocr.threshold_block_size
            )));
        }
        if ocr.render_dpi == 0 {
            return Err(ConfigError::Invalid("render_dpi must be positive".into()));
        }
        if ocr.page_seg_mode > 13 {
            return Err(ConfigError::Invalid(format!(
                "page_seg_mode must be 0-13, got {}",
                ocr.page_seg_mode
            )));
        }
        if ocr.language.trim().is_empty() {
            return Err(ConfigError::Invalid("language must not be empty".into()));
        }
        Ok(())
    }
}

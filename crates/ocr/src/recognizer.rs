use image::DynamicImage;
use medrec_core::OcrConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use crate::preprocess::{self, PreprocessError};
use crate::strategy::first_non_empty;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("No OCR engine in this build; enable the `tesseract` feature")]
    NotAvailable,
}

/// Abstraction over an OCR backend.
/// Implementations accept PNG image bytes and return the recognized text.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError>;
}

// ── Two-pass recognizer ───────────────────────────────────────────────────────

/// Image variants handed to the backend, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrPass {
    /// Adaptive-thresholded binary image.
    Thresholded,
    /// Plain grayscale; survives low-contrast scans that thresholding erases.
    Grayscale,
}

pub const OCR_PASSES: [OcrPass; 2] = [OcrPass::Thresholded, OcrPass::Grayscale];

/// Deskew → grayscale → threshold → OCR, retrying on grayscale when the
/// thresholded pass reads nothing.
pub struct TextRecognizer<R: OcrBackend> {
    backend: R,
    block_size: u32,
    offset: i32,
}

impl<R: OcrBackend> TextRecognizer<R> {
    pub fn new(backend: R, config: &OcrConfig) -> Self {
        Self {
            backend,
            block_size: config.threshold_block_size,
            offset: config.threshold_offset,
        }
    }

    pub fn backend(&self) -> &R {
        &self.backend
    }

    /// Recognize text in `img`. Blank output from every pass yields an empty
    /// string; an engine failure on any pass is an error.
    pub fn recognize_image(&self, img: &DynamicImage) -> Result<String, OcrError> {
        let gray = {
            let deskewed = preprocess::deskew(&img.to_rgb8());
            preprocess::to_grayscale(&deskewed)
        };

        let found = first_non_empty(&OCR_PASSES, |pass| -> Result<String, OcrError> {
            let input = match pass {
                OcrPass::Thresholded => {
                    preprocess::adaptive_threshold_gaussian(&gray, self.block_size, self.offset)
                }
                OcrPass::Grayscale => gray.clone(),
            };
            let png = preprocess::encode_png(&DynamicImage::ImageLuma8(input))?;
            self.backend.recognize(&png)
        })?;

        Ok(match found {
            Some((pass, text)) => {
                tracing::debug!("Recognized {} chars on {pass:?} pass", text.len());
                text
            }
            None => String::new(),
        })
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string, for testing the upload pipeline
/// without requiring Tesseract to be installed.
///
/// Scripted responses are consumed first, one per call; once exhausted every
/// call returns `text`.
pub struct MockRecognizer {
    pub text: String,
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new("");
        mock.push_responses(responses.into_iter().map(|s| Ok(s.into())));
        mock
    }

    /// A backend whose every call fails with an engine error.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        let mock = Self::new("");
        mock.push_responses(std::iter::repeat(Err(message)).take(64));
        mock
    }

    fn push_responses(&self, responses: impl Iterator<Item = Result<String, String>>) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.extend(responses);
    }

    /// Number of times `recognize` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(OcrError::Engine(message)),
            None => Ok(self.text.clone()),
        }
    }
}

/// Stand-in when no OCR engine is compiled in. Digital PDFs still work; any
/// attempt to read pixels fails with [`OcrError::NotAvailable`].
pub struct NoEngine;

impl OcrBackend for NoEngine {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
        Err(OcrError::NotAvailable)
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use leptess::{LepTess, Variable};
    use medrec_core::OcrConfig;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
        page_seg_mode: u8,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str, page_seg_mode: u8) -> Self {
            Self { data_path, lang: lang.to_string(), page_seg_mode }
        }

        pub fn from_config(config: &OcrConfig) -> Self {
            Self::new(
                config
                    .tessdata_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                &config.language,
                config.page_seg_mode,
            )
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditPagesegMode, &self.page_seg_mode.to_string())
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }
    }
}

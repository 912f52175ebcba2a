use medrec_core::{FieldMap, OcrConfig};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::extract::FieldExtractor;
use crate::hash::ContentHash;
use crate::loader::{DocumentKind, DocumentLoader, LoadedText, TextSource};
use crate::pdf::{PageRasterizer, PdfError};
use crate::preprocess;
use crate::recognizer::{OcrBackend, OcrError, TextRecognizer};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Unsupported file format: {0:?} (expected pdf, png, jpg or jpeg)")]
    UnsupportedFormat(String),
    #[error("Invalid or corrupted file: {0}")]
    CorruptInput(String),
    #[error("No text could be recognized in the document")]
    RecognitionFailure,
    #[error("No patient or record ID found in the document")]
    MissingIdentifier,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("Failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },
}

impl From<PdfError> for UploadError {
    fn from(e: PdfError) -> Self {
        match e {
            PdfError::Parse(reason) => UploadError::CorruptInput(format!("PDF could not be parsed: {reason}")),
            PdfError::Render { page, reason } => UploadError::Render { page, reason },
        }
    }
}

/// Coarse failure category, for callers that report by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    NotFound,
    UnsupportedFormat,
    CorruptInput,
    RecognitionFailure,
    MissingIdentifier,
    ProcessingFailure,
}

impl UploadErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadErrorKind::NotFound => "not_found",
            UploadErrorKind::UnsupportedFormat => "unsupported_format",
            UploadErrorKind::CorruptInput => "corrupt_input",
            UploadErrorKind::RecognitionFailure => "recognition_failure",
            UploadErrorKind::MissingIdentifier => "missing_identifier",
            UploadErrorKind::ProcessingFailure => "processing_failure",
        }
    }
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::NotFound(_) => UploadErrorKind::NotFound,
            UploadError::UnsupportedFormat(_) => UploadErrorKind::UnsupportedFormat,
            UploadError::CorruptInput(_) => UploadErrorKind::CorruptInput,
            UploadError::RecognitionFailure => UploadErrorKind::RecognitionFailure,
            UploadError::MissingIdentifier => UploadErrorKind::MissingIdentifier,
            UploadError::Io(_) | UploadError::Ocr(_) | UploadError::Render { .. } => {
                UploadErrorKind::ProcessingFailure
            }
        }
    }
}

/// A successfully processed upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub fields: FieldMap,
    /// Full recovered text of the document.
    pub text: String,
    pub source: TextSource,
    /// Hex SHA-256 of the uploaded file.
    pub sha256: String,
}

impl UploadOutcome {
    pub fn patient_id(&self) -> &str {
        self.fields.patient_id().unwrap_or_default()
    }
}

/// Orchestrates: validate → load text → extract fields → check identifier.
pub struct UploadProcessor<R: OcrBackend, P: PageRasterizer> {
    loader: DocumentLoader<R, P>,
    extractor: FieldExtractor,
}

impl<R: OcrBackend, P: PageRasterizer> UploadProcessor<R, P> {
    pub fn new(backend: R, rasterizer: P, config: &OcrConfig) -> Self {
        let recognizer = TextRecognizer::new(backend, config);
        Self {
            loader: DocumentLoader::new(recognizer, rasterizer, config.render_dpi),
            extractor: FieldExtractor::default(),
        }
    }

    pub fn loader(&self) -> &DocumentLoader<R, P> {
        &self.loader
    }

    /// Process the file at `path`. Every rejection is a typed `UploadError`;
    /// there is no partial result.
    pub fn process_upload(&self, path: &Path) -> Result<UploadOutcome, UploadError> {
        if !path.exists() {
            return Err(UploadError::NotFound(path.to_path_buf()));
        }
        let kind = DocumentKind::from_path(path).ok_or_else(|| {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            UploadError::UnsupportedFormat(ext)
        })?;

        let bytes = std::fs::read(path)?;
        let sha256 = ContentHash::of_bytes(&bytes).to_hex();

        let LoadedText { text, source } = if kind.is_image() {
            let img = preprocess::decode_verified(&bytes).map_err(|e| UploadError::CorruptInput(e.to_string()))?;
            self.loader.load_image(&img)?
        } else {
            self.loader.load_pdf(&bytes)?
        };

        if text.trim().is_empty() {
            tracing::warn!("No text recognized in {}", path.display());
            return Err(UploadError::RecognitionFailure);
        }

        let fields = self.extractor.extract(&text);
        let Some(patient_id) = fields.patient_id() else {
            tracing::warn!("No identifier in {} ({} chars of text)", path.display(), text.len());
            return Err(UploadError::MissingIdentifier);
        };
        tracing::info!("Processed {} via {source:?}: patient {patient_id}", path.display());

        Ok(UploadOutcome { fields, text, source, sha256 })
    }
}

// ── Default wiring ────────────────────────────────────────────────────────────

#[cfg(feature = "tesseract")]
pub type DefaultBackend = crate::recognizer::tesseract_backend::TesseractRecognizer;
#[cfg(not(feature = "tesseract"))]
pub type DefaultBackend = crate::recognizer::NoEngine;

#[cfg(feature = "pdfium")]
pub type DefaultRasterizer = crate::pdf::pdfium_backend::PdfiumRasterizer;
#[cfg(not(feature = "pdfium"))]
pub type DefaultRasterizer = crate::pdf::EmbeddedImageRasterizer;

/// A processor using the OCR engine and page rasterizer compiled into this build.
pub fn default_processor(config: &OcrConfig) -> UploadProcessor<DefaultBackend, DefaultRasterizer> {
    #[cfg(feature = "tesseract")]
    let backend = DefaultBackend::from_config(config);
    #[cfg(not(feature = "tesseract"))]
    let backend = crate::recognizer::NoEngine;

    #[cfg(feature = "pdfium")]
    let rasterizer = crate::pdf::pdfium_backend::PdfiumRasterizer;
    #[cfg(not(feature = "pdfium"))]
    let rasterizer = crate::pdf::EmbeddedImageRasterizer;

    UploadProcessor::new(backend, rasterizer, config)
}

pub fn process_upload(path: &Path, config: &OcrConfig) -> Result<UploadOutcome, UploadError> {
    default_processor(config).process_upload(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::{scanned_pdf, text_pdf};
    use crate::pdf::EmbeddedImageRasterizer;
    use crate::recognizer::MockRecognizer;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
    use medrec_core::{FieldName, NOT_FOUND};
    use std::io::Cursor;

    fn processor(mock: MockRecognizer) -> UploadProcessor<MockRecognizer, EmbeddedImageRasterizer> {
        UploadProcessor::new(mock, EmbeddedImageRasterizer, &OcrConfig::default())
    }

    fn calls(p: &UploadProcessor<MockRecognizer, EmbeddedImageRasterizer>) -> usize {
        p.loader().recognizer().backend().calls()
    }

    fn scan(format: ImageFormat) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_fn(64, 40, |x, y| {
            if (8..56).contains(&x) && (18..22).contains(&y) {
                Rgb([10, 10, 10])
            } else {
                Rgb([245, 245, 245])
            }
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), format)
            .unwrap();
        buf
    }

    fn write(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn image_upload_produces_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "note.png", &scan(ImageFormat::Png));
        let p = processor(MockRecognizer::new("Patient Name: Jane Doe\nPatient ID: ABC-123\nAge: 40"));

        let outcome = p.process_upload(&path).unwrap();

        assert_eq!(outcome.patient_id(), "ABC-123");
        assert_eq!(outcome.fields.get(FieldName::Name), "Jane Doe");
        assert_eq!(outcome.fields.get(FieldName::Blood), NOT_FOUND);
        assert_eq!(outcome.source, TextSource::ImageOcr);
        assert_eq!(outcome.sha256.len(), 64);
    }

    #[test]
    fn same_file_same_hash() {
        let dir = tempfile::tempdir().unwrap();
        let data = scan(ImageFormat::Png);
        let a = write(&dir, "a.png", &data);
        let b = write(&dir, "b.PNG", &data);
        let p = processor(MockRecognizer::new("ID: R-1"));
        assert_eq!(p.process_upload(&a).unwrap().sha256, p.process_upload(&b).unwrap().sha256);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = processor(MockRecognizer::new("ID: 1"))
            .process_upload(&dir.path().join("absent.pdf"))
            .unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
        assert_eq!(err.kind(), UploadErrorKind::NotFound);
    }

    #[test]
    fn txt_upload_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "notes.txt", b"Patient ID: ABC-123");
        let p = processor(MockRecognizer::new("Patient ID: ABC-123"));
        let err = p.process_upload(&path).unwrap_err();
        assert!(matches!(&err, UploadError::UnsupportedFormat(ext) if ext == "txt"));
        assert_eq!(calls(&p), 0);
    }

    #[test]
    fn truncated_jpeg_never_reaches_recognizer() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = scan(ImageFormat::Jpeg);
        let path = write(&dir, "scan.jpg", &jpeg[..jpeg.len() / 2]);
        let p = processor(MockRecognizer::new("Patient ID: ABC-123"));

        let err = p.process_upload(&path).unwrap_err();

        assert_eq!(err.kind(), UploadErrorKind::CorruptInput);
        assert_eq!(calls(&p), 0);
    }

    #[test]
    fn png_with_garbage_body_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "scan.png", b"\x89PNG\r\n\x1a\n not really");
        let err = processor(MockRecognizer::new("")).process_upload(&path).unwrap_err();
        assert_eq!(err.kind(), UploadErrorKind::CorruptInput);
    }

    #[test]
    fn empty_text_is_recognition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "blank.png", &scan(ImageFormat::Png));
        let err = processor(MockRecognizer::new("  \n\t ")).process_upload(&path).unwrap_err();
        assert!(matches!(err, UploadError::RecognitionFailure));
    }

    #[test]
    fn fields_without_identifier_is_missing_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "note.png", &scan(ImageFormat::Png));
        let text = "Name: Jane Doe\nAge: 40\nGender: F\nBlood Group: A+\nDisease: Flu";
        let err = processor(MockRecognizer::new(text)).process_upload(&path).unwrap_err();
        assert!(matches!(err, UploadError::MissingIdentifier));
    }

    #[test]
    fn digital_pdf_skips_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "claim.pdf", &text_pdf(&["Insurance ID: XY-9", "Disease: Flu"]));
        let p = processor(MockRecognizer::new("Patient ID: WRONG"));

        let outcome = p.process_upload(&path).unwrap();

        assert_eq!(outcome.fields.get(FieldName::PatientId), "XY-9");
        assert_eq!(outcome.fields.get(FieldName::Disease), "Flu");
        assert_eq!(outcome.source, TextSource::PdfTextLayer);
        assert_eq!(calls(&p), 0);
    }

    #[test]
    fn scanned_pdf_pages_are_joined_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "scan.pdf", &scanned_pdf(2));
        let p = processor(MockRecognizer::scripted(["Record ID: R-42", "Medications: Insulin"]));

        let outcome = p.process_upload(&path).unwrap();

        assert_eq!(outcome.source, TextSource::PdfPageOcr);
        assert_eq!(outcome.text.matches("--- Page Break ---").count(), 1);
        assert_eq!(outcome.patient_id(), "R-42");
        assert_eq!(outcome.fields.get(FieldName::Medicines), "Insulin");
    }

    #[test]
    fn corrupt_pdf_is_corrupt_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "broken.pdf", b"%PDF-1.7\nthis is not a pdf body");
        let err = processor(MockRecognizer::new("")).process_upload(&path).unwrap_err();
        assert_eq!(err.kind(), UploadErrorKind::CorruptInput);
    }

    #[test]
    fn engine_failure_is_processing_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "note.jpeg", &scan(ImageFormat::Jpeg));
        let err = processor(MockRecognizer::failing("tessdata missing"))
            .process_upload(&path)
            .unwrap_err();
        assert!(matches!(err, UploadError::Ocr(OcrError::Engine(_))));
        assert_eq!(err.kind(), UploadErrorKind::ProcessingFailure);
    }

    #[test]
    fn scanned_pdf_without_engine_reports_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "scan.pdf", &scanned_pdf(1));
        let p = UploadProcessor::new(crate::recognizer::NoEngine, EmbeddedImageRasterizer, &OcrConfig::default());
        let err = p.process_upload(&path).unwrap_err();
        assert!(matches!(err, UploadError::Ocr(OcrError::NotAvailable)));
    }

    #[test]
    fn outcome_serializes_field_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "claim.pdf", &text_pdf(&["Patient ID: ABC-123"]));
        let outcome = processor(MockRecognizer::new("")).process_upload(&path).unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["fields"]["patient_id"], "ABC-123");
        assert_eq!(json["source"], "pdf_text_layer");
    }
}

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::pdf::{PageRasterizer, ParsedPdf};
use crate::pipeline::UploadError;
use crate::recognizer::{OcrBackend, TextRecognizer};
use crate::strategy::first_non_empty;

/// Joins per-page OCR results of a scanned PDF.
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Png,
    Jpeg,
}

impl DocumentKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn is_image(self) -> bool {
        !matches!(self, Self::Pdf)
    }
}

/// Which loading strategy produced a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    ImageOcr,
    PdfTextLayer,
    PdfPageOcr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PdfStrategy {
    TextLayer,
    PageOcr,
}

const PDF_STRATEGIES: [PdfStrategy; 2] = [PdfStrategy::TextLayer, PdfStrategy::PageOcr];

impl PdfStrategy {
    fn source(self) -> TextSource {
        match self {
            PdfStrategy::TextLayer => TextSource::PdfTextLayer,
            PdfStrategy::PageOcr => TextSource::PdfPageOcr,
        }
    }
}

/// Recovered text for a whole document. `text` is empty when nothing could
/// be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedText {
    pub text: String,
    pub source: TextSource,
}

/// Turns a decoded image or PDF into text.
pub struct DocumentLoader<R: OcrBackend, P: PageRasterizer> {
    recognizer: TextRecognizer<R>,
    rasterizer: P,
    render_dpi: u32,
}

impl<R: OcrBackend, P: PageRasterizer> DocumentLoader<R, P> {
    pub fn new(recognizer: TextRecognizer<R>, rasterizer: P, render_dpi: u32) -> Self {
        Self { recognizer, rasterizer, render_dpi }
    }

    pub fn recognizer(&self) -> &TextRecognizer<R> {
        &self.recognizer
    }

    pub fn load_image(&self, img: &DynamicImage) -> Result<LoadedText, UploadError> {
        let text = self.recognizer.recognize_image(img)?;
        Ok(LoadedText { text, source: TextSource::ImageOcr })
    }

    /// Digital text layer first; only when every page is blank are the pages
    /// rasterized and recognized one by one.
    pub fn load_pdf(&self, pdf_bytes: &[u8]) -> Result<LoadedText, UploadError> {
        let pdf = ParsedPdf::open(pdf_bytes)?;
        tracing::debug!("PDF has {} pages", pdf.page_count());

        let found = first_non_empty(&PDF_STRATEGIES, |strategy| -> Result<String, UploadError> {
            match strategy {
                PdfStrategy::TextLayer => Ok(self.text_layer(&pdf)),
                PdfStrategy::PageOcr => self.ocr_pages(&pdf),
            }
        })?;

        Ok(match found {
            Some((strategy, text)) => LoadedText { text, source: strategy.source() },
            None => LoadedText { text: String::new(), source: TextSource::PdfPageOcr },
        })
    }

    fn text_layer(&self, pdf: &ParsedPdf<'_>) -> String {
        match pdf.text_layer_pages() {
            Ok(pages) => pages.join("\n"),
            Err(e) => {
                tracing::warn!("Text layer unreadable, treating document as scanned: {e}");
                String::new()
            }
        }
    }

    fn ocr_pages(&self, pdf: &ParsedPdf<'_>) -> Result<String, UploadError> {
        let count = pdf.page_count();
        let mut pages = Vec::with_capacity(count);
        self.rasterizer
            .render_pages(pdf, self.render_dpi, |index, image| -> Result<(), UploadError> {
                let text = self.recognizer.recognize_image(&image)?;
                tracing::debug!("Page {}/{count}: {} chars", index + 1, text.len());
                pages.push(text);
                Ok(())
            })?;
        Ok(pages.join(PAGE_BREAK))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::{gray_image, image_pdf, scanned_pdf, text_pdf};
    use crate::pdf::{EmbeddedImageRasterizer, PdfError};
    use crate::recognizer::MockRecognizer;
    use medrec_core::OcrConfig;

    fn loader(mock: MockRecognizer) -> DocumentLoader<MockRecognizer, EmbeddedImageRasterizer> {
        let config = OcrConfig::default();
        DocumentLoader::new(TextRecognizer::new(mock, &config), EmbeddedImageRasterizer, config.render_dpi)
    }

    /// Always fails to render.
    struct BrokenRasterizer;

    impl PageRasterizer for BrokenRasterizer {
        fn render_pages<E, F>(&self, _pdf: &ParsedPdf<'_>, _dpi: u32, _visit: F) -> Result<(), E>
        where
            E: From<PdfError>,
            F: FnMut(usize, DynamicImage) -> Result<(), E>,
        {
            Err(PdfError::Render { page: 0, reason: "no renderer".into() }.into())
        }
    }

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(DocumentKind::from_path(Path::new("a/scan.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("x.Jpeg")), Some(DocumentKind::Jpeg));
        assert_eq!(DocumentKind::from_path(Path::new("x.jpg")), Some(DocumentKind::Jpeg));
        assert_eq!(DocumentKind::from_path(Path::new("x.png")), Some(DocumentKind::Png));
        assert_eq!(DocumentKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(DocumentKind::from_path(Path::new("no_extension")), None);
        assert!(DocumentKind::Png.is_image());
        assert!(!DocumentKind::Pdf.is_image());
    }

    #[test]
    fn digital_pdf_uses_text_layer_without_ocr() {
        let l = loader(MockRecognizer::new("should not be used"));
        let loaded = l.load_pdf(&text_pdf(&["Insurance ID: XY-9", "Disease: Flu"])).unwrap();
        assert_eq!(loaded.source, TextSource::PdfTextLayer);
        assert!(loaded.text.contains("XY-9"));
        assert_eq!(l.recognizer().backend().calls(), 0);
    }

    #[test]
    fn scanned_pdf_is_recognized_page_by_page() {
        let l = loader(MockRecognizer::scripted(["Patient ID: P-1", "Name: Asha"]));
        let loaded = l.load_pdf(&scanned_pdf(2)).unwrap();
        assert_eq!(loaded.source, TextSource::PdfPageOcr);
        assert_eq!(loaded.text, "Patient ID: P-1\n\n--- Page Break ---\n\nName: Asha");
        assert_eq!(loaded.text.matches("--- Page Break ---").count(), 1);
        assert_eq!(l.recognizer().backend().calls(), 2);
    }

    #[test]
    fn one_bit_scan_beside_unreadable_stamp_is_recognized() {
        let scan = gray_image(64, 32, 1, vec![0xAA; 8 * 32]);
        let stamp = gray_image(8, 8, 16, vec![0; 128]);
        let l = loader(MockRecognizer::new("Patient ID: B-2"));
        let loaded = l.load_pdf(&image_pdf(vec![vec![scan, stamp]])).unwrap();
        assert_eq!(loaded.source, TextSource::PdfPageOcr);
        assert_eq!(loaded.text, "Patient ID: B-2");
    }

    #[test]
    fn unreadable_scan_yields_empty_text() {
        let l = loader(MockRecognizer::new(""));
        let loaded = l.load_pdf(&scanned_pdf(1)).unwrap();
        assert_eq!(loaded.text, "");
    }

    #[test]
    fn render_failure_aborts_the_document() {
        let config = OcrConfig::default();
        let l = DocumentLoader::new(
            TextRecognizer::new(MockRecognizer::new("text"), &config),
            BrokenRasterizer,
            config.render_dpi,
        );
        let err = l.load_pdf(&scanned_pdf(2)).unwrap_err();
        assert!(matches!(err, UploadError::Render { page: 0, .. }));
    }

    #[test]
    fn engine_failure_on_a_page_aborts_the_document() {
        let l = loader(MockRecognizer::failing("engine crashed"));
        let err = l.load_pdf(&scanned_pdf(2)).unwrap_err();
        assert!(matches!(err, UploadError::Ocr(_)));
    }

    #[test]
    fn garbage_pdf_is_corrupt_input() {
        let l = loader(MockRecognizer::new(""));
        assert!(matches!(l.load_pdf(b"%PDF-1.4 garbage"), Err(UploadError::CorruptInput(_))));
    }
}

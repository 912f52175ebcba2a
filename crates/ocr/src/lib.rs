pub mod extract;
pub mod hash;
pub mod loader;
pub mod pdf;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod strategy;

pub use extract::{extract_fields, FieldExtractor, FieldRule, Matcher};
pub use hash::ContentHash;
pub use loader::{DocumentKind, DocumentLoader, LoadedText, TextSource, PAGE_BREAK};
pub use pdf::{EmbeddedImageRasterizer, PageRasterizer, ParsedPdf, PdfError};
pub use pipeline::{
    default_processor, process_upload, UploadError, UploadErrorKind, UploadOutcome, UploadProcessor,
};
pub use preprocess::PreprocessError;
pub use recognizer::{MockRecognizer, NoEngine, OcrBackend, OcrError, TextRecognizer};

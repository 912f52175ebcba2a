//! PDF access: the native text layer, and page rasters for scanned documents.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF parsing failed: {0}")]
    Parse(String),
    #[error("Failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },
}

/// A PDF parsed once per upload. Rasterizers read the parsed object tree or
/// the raw bytes, whichever their renderer needs.
pub struct ParsedPdf<'a> {
    bytes: &'a [u8],
    doc: Document,
}

impl<'a> ParsedPdf<'a> {
    /// Parse the document structure. Failure means the file is not a usable PDF.
    pub fn open(bytes: &'a [u8]) -> Result<Self, PdfError> {
        let doc = Document::load_mem(bytes).map_err(|e| PdfError::Parse(e.to_string()))?;
        Ok(Self { bytes, doc })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Native (digital) text of each page, in page order.
    pub fn text_layer_pages(&self) -> Result<Vec<String>, PdfError> {
        pdf_extract::extract_text_from_mem_by_pages(self.bytes).map_err(|e| PdfError::Parse(e.to_string()))
    }
}

/// Turns PDF pages into raster images for OCR.
pub trait PageRasterizer: Send + Sync {
    /// Rasterize every page at roughly `dpi`, in page order, handing each
    /// image to `visit` with its 0-based index. Stops at the first error.
    fn render_pages<E, F>(&self, pdf: &ParsedPdf<'_>, dpi: u32, visit: F) -> Result<(), E>
    where
        E: From<PdfError>,
        F: FnMut(usize, DynamicImage) -> Result<(), E>;
}

// ── Embedded scan extraction (pure Rust, always available) ────────────────────

/// Uses the largest decodable image XObject on each page. For scanned
/// documents that is the scan itself, already at the scanner's resolution, so
/// `dpi` is ignored.
pub struct EmbeddedImageRasterizer;

impl PageRasterizer for EmbeddedImageRasterizer {
    fn render_pages<E, F>(&self, pdf: &ParsedPdf<'_>, _dpi: u32, mut visit: F) -> Result<(), E>
    where
        E: From<PdfError>,
        F: FnMut(usize, DynamicImage) -> Result<(), E>,
    {
        for (index, page_id) in pdf.doc.get_pages().into_values().enumerate() {
            let image = largest_page_image(&pdf.doc, page_id)
                .map_err(|reason| PdfError::Render { page: index, reason })?;
            tracing::debug!(
                "Extracted {}x{} scan from page {}",
                image.width(),
                image.height(),
                index + 1
            );
            visit(index, image)?;
        }
        Ok(())
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object, String> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).map_err(|e| format!("dangling reference: {e}")),
        other => Ok(other),
    }
}

/// Page resources, following `/Parent` for inherited entries.
fn page_resources(doc: &Document, page_id: ObjectId) -> Result<&Dictionary, String> {
    let mut node = doc.get_dictionary(page_id).map_err(|e| format!("page object: {e}"))?;
    for _ in 0..32 {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?
                .as_dict()
                .map_err(|_| "Resources is not a dictionary".to_string());
        }
        let parent = node
            .get(b"Parent")
            .and_then(Object::as_reference)
            .map_err(|_| "page has no Resources".to_string())?;
        node = doc.get_dictionary(parent).map_err(|e| format!("parent object: {e}"))?;
    }
    Err("page tree too deep".into())
}

fn largest_page_image(doc: &Document, page_id: ObjectId) -> Result<DynamicImage, String> {
    let resources = page_resources(doc, page_id)?;
    let xobjects = resources
        .get(b"XObject")
        .map_err(|_| "page has no images".to_string())
        .and_then(|x| resolve(doc, x))?
        .as_dict()
        .map_err(|_| "XObject is not a dictionary".to_string())?;

    let mut largest: Option<DynamicImage> = None;
    let mut last_failure = None;
    for (name, obj) in xobjects.iter() {
        let Ok(Object::Stream(stream)) = resolve(doc, obj) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .map(|s| matches!(s, Object::Name(n) if n == b"Image"))
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let image = match decode_image_stream(doc, stream) {
            Ok(image) => image,
            Err(reason) => {
                tracing::debug!("Skipping image /{}: {reason}", String::from_utf8_lossy(name));
                last_failure = Some(reason);
                continue;
            }
        };
        let area = |img: &DynamicImage| img.width() as u64 * img.height() as u64;
        if largest.as_ref().map_or(true, |prev| area(&image) > area(prev)) {
            largest = Some(image);
        }
    }
    largest.ok_or_else(|| match last_failure {
        Some(reason) => format!("no decodable image on page ({reason})"),
        None => "page has no images".to_string(),
    })
}

fn has_filter(dict: &Dictionary, name: &[u8]) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(n)) => n == name,
        Ok(Object::Array(arr)) => arr.iter().any(|o| matches!(o, Object::Name(n) if n == name)),
        _ => false,
    }
}

/// Bilevel and JPEG 2000 codecs this decoder does not carry.
const UNDECODED_FILTERS: [&[u8]; 3] = [b"CCITTFaxDecode", b"JBIG2Decode", b"JPXDecode"];

fn decode_image_stream(doc: &Document, stream: &lopdf::Stream) -> Result<DynamicImage, String> {
    if has_filter(&stream.dict, b"DCTDecode") {
        return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
            .map_err(|e| format!("embedded JPEG: {e}"));
    }

    if let Some(filter) = UNDECODED_FILTERS.into_iter().find(|f| has_filter(&stream.dict, f)) {
        return Err(format!("unsupported image filter /{}", String::from_utf8_lossy(filter)));
    }

    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    if let Ok(img) = image::load_from_memory(&content) {
        return Ok(img);
    }
    decode_raw_samples(doc, &stream.dict, content)
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Result<u32, String> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("image is missing /{}", String::from_utf8_lossy(key)))
}

fn channel_count(doc: &Document, dict: &Dictionary) -> usize {
    let Ok(space) = dict.get(b"ColorSpace") else {
        return 1;
    };
    let space = resolve(doc, space).unwrap_or(space);
    match space {
        Object::Name(n) => match n.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => 1,
            b"DeviceCMYK" | b"CMYK" => 4,
            _ => 3,
        },
        // [/ICCBased <stream>] carries its component count in /N.
        Object::Array(arr) => arr
            .get(1)
            .and_then(|o| resolve(doc, o).ok())
            .and_then(|o| o.as_stream().ok())
            .and_then(|s| s.dict.get(b"N").and_then(Object::as_i64).ok())
            .map(|n| n as usize)
            .unwrap_or(3),
        _ => 3,
    }
}

fn decode_raw_samples(doc: &Document, dict: &Dictionary, samples: Vec<u8>) -> Result<DynamicImage, String> {
    let width = int_entry(dict, b"Width")?;
    let height = int_entry(dict, b"Height")?;
    let bpc = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    let channels = channel_count(doc, dict);
    let mut samples = match bpc {
        8 => {
            let expected = width as usize * height as usize * channels;
            if samples.len() < expected {
                return Err(format!(
                    "raw image buffer too small: {} bytes, expected {expected} ({width}x{height}x{channels})",
                    samples.len()
                ));
            }
            let mut samples = samples;
            samples.truncate(expected);
            samples
        }
        1 | 2 | 4 => expand_packed_samples(&samples, width as usize, height as usize, channels, bpc)?,
        _ => return Err(format!("unsupported image depth: {bpc} bits per component")),
    };
    if channels == 1 && has_inverted_decode(dict) {
        samples.iter_mut().for_each(|v| *v = 255 - *v);
    }

    let too_small = || "raw image dimensions do not match buffer".to_string();
    match channels {
        1 => GrayImage::from_raw(width, height, samples)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(too_small),
        3 => RgbImage::from_raw(width, height, samples)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(too_small),
        4 => {
            let rgb: Vec<u8> = samples
                .chunks_exact(4)
                .flat_map(|c| {
                    let k = 255 - c[3] as u16;
                    [c[0], c[1], c[2]].map(|v| ((255 - v as u16) * k / 255) as u8)
                })
                .collect();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(too_small)
        }
        n => Err(format!("unsupported color space with {n} components")),
    }
}

/// Unpack sub-byte samples (each row padded to a whole byte) to one byte per
/// sample, scaled to 0..=255.
fn expand_packed_samples(
    packed: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    bpc: u32,
) -> Result<Vec<u8>, String> {
    let bits = bpc as usize;
    let per_row = width * channels;
    let row_bytes = (per_row * bits).div_ceil(8);
    if row_bytes == 0 || packed.len() < row_bytes * height {
        return Err(format!(
            "raw image buffer too small: {} bytes, expected {} ({width}x{height}x{channels} at {bpc} bits)",
            packed.len(),
            row_bytes * height
        ));
    }
    let max = (1u16 << bits) - 1;
    let mut out = Vec::with_capacity(per_row * height);
    for row in packed.chunks_exact(row_bytes).take(height) {
        for i in 0..per_row {
            let bit = i * bits;
            let shift = 8 - bits - bit % 8;
            let sample = (row[bit / 8] >> shift) as u16 & max;
            out.push((sample * 255 / max) as u8);
        }
    }
    Ok(out)
}

/// `/Decode [1 0]` flips a gray image: sample 0 is white.
fn has_inverted_decode(dict: &Dictionary) -> bool {
    let Ok(Object::Array(range)) = dict.get(b"Decode") else {
        return false;
    };
    match range.as_slice() {
        [lo, hi, ..] => matches!((lo.as_float(), hi.as_float()), (Ok(a), Ok(b)) if a > b),
        _ => false,
    }
}

// ── PDFium renderer (optional, gated behind `pdfium` feature) ──────────────────

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::{PageRasterizer, ParsedPdf, PdfError};
    use image::DynamicImage;
    use pdfium_render::prelude::*;

    /// Longest rendered side, guards against absurd page sizes.
    const MAX_DIMENSION_PX: u32 = 4096;
    const POINTS_PER_INCH: f32 = 72.0;

    /// Renders pages with PDFium. The library is located through
    /// `PDFIUM_DYNAMIC_LIB_PATH`, falling back to the system search path.
    pub struct PdfiumRasterizer;

    fn load_pdfium() -> Result<Pdfium, PdfError> {
        let bindings = match std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
            Ok(path) => Pdfium::bind_to_library(&path),
            Err(_) => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| PdfError::Render { page: 0, reason: format!("PDFium library not found: {e}") })?;
        Ok(Pdfium::new(bindings))
    }

    fn render_dimensions(width_pt: f32, height_pt: f32, dpi: u32) -> (u32, u32) {
        let scale = dpi as f32 / POINTS_PER_INCH;
        let w = (width_pt * scale).max(1.0);
        let h = (height_pt * scale).max(1.0);
        let longest = w.max(h);
        if longest > MAX_DIMENSION_PX as f32 {
            let ratio = MAX_DIMENSION_PX as f32 / longest;
            (((w * ratio) as u32).max(1), ((h * ratio) as u32).max(1))
        } else {
            (w as u32, h as u32)
        }
    }

    impl PageRasterizer for PdfiumRasterizer {
        fn render_pages<E, F>(&self, pdf: &ParsedPdf<'_>, dpi: u32, mut visit: F) -> Result<(), E>
        where
            E: From<PdfError>,
            F: FnMut(usize, DynamicImage) -> Result<(), E>,
        {
            let pdfium = load_pdfium()?;
            let document = pdfium
                .load_pdf_from_byte_slice(pdf.bytes(), None)
                .map_err(|e| PdfError::Parse(e.to_string()))?;

            for (index, page) in document.pages().iter().enumerate() {
                let (w, h) = render_dimensions(page.width().value, page.height().value, dpi);
                let config = PdfRenderConfig::new()
                    .set_target_width(w as i32)
                    .set_maximum_height(h as i32);
                let bitmap = page
                    .render_with_config(&config)
                    .map_err(|e| PdfError::Render { page: index, reason: e.to_string() })?;
                tracing::debug!("Rendered page {} at {w}x{h}", index + 1);
                visit(index, bitmap.as_image())?;
            }
            Ok(())
        }
    }

}

// ── Test fixtures ─────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::dictionary;
    use lopdf::{Document, Object, Stream};

    fn finish(mut doc: Document, pages_id: lopdf::ObjectId, kids: Vec<lopdf::ObjectId>) -> Vec<u8> {
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// One page of Helvetica text, one PDF line per entry.
    pub(crate) fn text_pdf(lines: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content: String = lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("BT /F1 12 Tf 72 {} Td ({line}) Tj ET\n", 720 - 24 * i as i64))
            .collect();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        finish(doc, pages_id, vec![page_id])
    }

    /// Raw DeviceGray image XObject of `bpc` bits per sample, rows already packed.
    pub(crate) fn gray_image(width: u32, height: u32, bpc: i64, samples: Vec<u8>) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => bpc,
            },
            samples,
        )
    }

    /// One page per entry, each page drawing all of its images.
    pub(crate) fn image_pdf(pages: Vec<Vec<Stream>>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for images in pages {
            let mut xobjects = lopdf::Dictionary::new();
            let mut content = String::new();
            for (i, image) in images.into_iter().enumerate() {
                let name = format!("Im{}", i + 1);
                content.push_str(&format!("q 612 0 0 792 0 0 cm /{name} Do Q\n"));
                xobjects.set(name, doc.add_object(image));
            }
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! { "XObject" => xobjects },
            });
            kids.push(page_id);
        }
        finish(doc, pages_id, kids)
    }

    /// `pages` pages, each holding only a raw 8-bit grayscale "scan".
    pub(crate) fn scanned_pdf(pages: usize) -> Vec<u8> {
        let (w, h) = (48u32, 24u32);
        let scan = || {
            let pixels: Vec<u8> = (0..w * h)
                .map(|i| if (i / w) % 8 == 4 && (i % w) > 6 { 0 } else { 255 })
                .collect();
            vec![gray_image(w, h, 8, pixels)]
        };
        image_pdf((0..pages).map(|_| scan()).collect())
    }
}

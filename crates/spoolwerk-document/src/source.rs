// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Source documents: open a caller-owned file and expose it page by page.
//
// Only what the delivery strategies need is supported: page counting, page
// rasterisation for images and image-only (scanned) PDFs, and plain text for
// the raw command stream. Everything else is `Opaque` and is left to the
// external renderer and shell strategies, which work from the path alone.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Document, Object, ObjectId};
use spoolwerk_core::error::{Result, SpoolError};
use tracing::{debug, info, instrument, warn};

/// Characters of plain text assumed to fill one printed page.
pub const TEXT_CHARS_PER_PAGE: usize = 3000;

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Largest rendered page side in pixels, whatever the MediaBox claims.
const MAX_SHEET_DOTS: u32 = 14_400;

/// Broad family of a source file, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
    Text,
    /// Anything we cannot look inside (office documents, PostScript, ...).
    Opaque,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "png" | "jpg" | "jpeg" | "bmp" | "gif" | "tif" | "tiff" | "webp" => Self::Image,
            "txt" | "text" | "log" | "csv" => Self::Text,
            _ => Self::Opaque,
        }
    }
}

enum Body {
    Pdf(Document),
    Image(DynamicImage),
    Text(String),
    Opaque,
}

/// A source file opened for delivery.
pub struct SourceDocument {
    path: PathBuf,
    kind: DocumentKind,
    pages: usize,
    body: Body,
}

impl std::fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDocument")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("pages", &self.pages)
            .finish()
    }
}

impl SourceDocument {
    /// Open and inspect a source file.
    ///
    /// A missing file is `SourceNotFound`. A file that exists but cannot be
    /// parsed is an error of its document family; callers that can still
    /// deliver by path fall back to [`SourceDocument::opaque`].
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SpoolError::SourceNotFound(path.display().to_string()));
        }
        let kind = DocumentKind::from_path(path);
        let (pages, body) = match kind {
            DocumentKind::Pdf => {
                let document = Document::load(path).map_err(|err| {
                    SpoolError::PdfError(format!("failed to open {}: {}", path.display(), err))
                })?;
                (document.get_pages().len(), Body::Pdf(document))
            }
            DocumentKind::Image => {
                let img = image::open(path).map_err(|err| {
                    SpoolError::ImageError(format!("failed to open {}: {}", path.display(), err))
                })?;
                (1, Body::Image(img))
            }
            DocumentKind::Text => {
                let text = std::fs::read_to_string(path)?;
                (text_page_estimate(&text), Body::Text(text))
            }
            DocumentKind::Opaque => (1, Body::Opaque),
        };
        info!(?kind, pages, "source document opened");
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            pages,
            body,
        })
    }

    /// A path-only stand-in for a file that exists but could not be parsed.
    pub fn opaque(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kind: DocumentKind::Opaque,
            pages: 1,
            body: Body::Opaque,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn page_count(&self) -> usize {
        self.pages
    }

    /// Plain-text body, for text sources.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Whether [`SourceDocument::render_page`] can produce pixels at all.
    pub fn is_rasterizable(&self) -> bool {
        matches!(self.body, Body::Pdf(_) | Body::Image(_))
    }

    /// Render one page (0-based) to an image sized for `dpi`.
    ///
    /// Images are returned as-is: their pixel grid is taken to be at the
    /// requested resolution. PDF pages are rendered from their largest
    /// embedded image, which covers scanned and image-only documents.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn render_page(&self, index: usize, dpi: u32) -> Result<DynamicImage> {
        if index >= self.pages {
            return Err(SpoolError::UnsupportedDocument(format!(
                "page {} out of range (document has {} pages)",
                index + 1,
                self.pages
            )));
        }
        match &self.body {
            Body::Image(img) => Ok(img.clone()),
            Body::Pdf(document) => render_pdf_page(document, index, dpi),
            Body::Text(_) => Err(SpoolError::UnsupportedDocument(
                "plain text has no raster form; use the raw or external strategies".into(),
            )),
            Body::Opaque => Err(SpoolError::UnsupportedDocument(format!(
                "cannot rasterise {}",
                self.path.display()
            ))),
        }
    }
}

/// Pages a block of text fills at [`TEXT_CHARS_PER_PAGE`]; never less than 1.
pub fn text_page_estimate(text: &str) -> usize {
    text.chars().count().div_ceil(TEXT_CHARS_PER_PAGE).max(1)
}

/// Split text into pages of [`TEXT_CHARS_PER_PAGE`] characters. There are
/// always exactly [`text_page_estimate`] pages; empty text is one empty page.
pub fn text_pages(text: &str) -> Vec<&str> {
    let mut pages = Vec::with_capacity(text_page_estimate(text));
    let mut start = 0;
    for (n, (offset, _)) in text.char_indices().enumerate() {
        if n > 0 && n % TEXT_CHARS_PER_PAGE == 0 {
            pages.push(&text[start..offset]);
            start = offset;
        }
    }
    pages.push(&text[start..]);
    pages
}

fn render_pdf_page(document: &Document, index: usize, dpi: u32) -> Result<DynamicImage> {
    let pages = document.get_pages();
    let page_id = *pages
        .get(&(index as u32 + 1))
        .ok_or_else(|| SpoolError::PdfError(format!("page {} not in page tree", index + 1)))?;

    let image_ids = page_image_ids(document, page_id)?;
    let mut best: Option<(u64, DynamicImage)> = None;
    for id in image_ids {
        match decode_image_xobject(document, id) {
            Ok(img) => {
                let area = u64::from(img.width()) * u64::from(img.height());
                if best.as_ref().is_none_or(|(a, _)| area > *a) {
                    best = Some((area, img));
                }
            }
            Err(err) => debug!(error = %err, "skipping undecodable page image"),
        }
    }
    let (_, img) = best.ok_or_else(|| {
        SpoolError::UnsupportedDocument(format!(
            "page {} has no decodable image; vector PDF pages need the external renderer",
            index + 1
        ))
    })?;

    // Stretch to the page box at the requested resolution.
    match page_size_points(document, page_id).and_then(|(w, h)| sheet_pixels(w, h, dpi)) {
        Some((w, h)) => Ok(img.resize_exact(w, h, image::imageops::FilterType::Triangle)),
        None => {
            warn!(page = index + 1, "page has no usable MediaBox, using image size");
            Ok(img)
        }
    }
}

/// Pixel size of a page box at `dpi`, scaled down so neither side exceeds
/// [`MAX_SHEET_DOTS`]. `None` for empty or non-finite boxes.
fn sheet_pixels(w_pt: f32, h_pt: f32, dpi: u32) -> Option<(u32, u32)> {
    if !(w_pt.is_finite() && h_pt.is_finite() && w_pt > 0.0 && h_pt > 0.0) {
        return None;
    }
    let w = f64::from(w_pt) / f64::from(POINTS_PER_INCH) * f64::from(dpi);
    let h = f64::from(h_pt) / f64::from(POINTS_PER_INCH) * f64::from(dpi);
    let longest = w.max(h);
    let shrink = if longest > f64::from(MAX_SHEET_DOTS) {
        f64::from(MAX_SHEET_DOTS) / longest
    } else {
        1.0
    };
    let side = |v: f64| (v * shrink).round().clamp(1.0, f64::from(MAX_SHEET_DOTS)) as u32;
    Some((side(w), side(h)))
}

/// Image XObjects referenced from a page's resources (own or inherited).
fn page_image_ids(document: &Document, page_id: ObjectId) -> Result<Vec<ObjectId>> {
    let page = document
        .get_dictionary(page_id)
        .map_err(|err| SpoolError::PdfError(format!("page dictionary: {err}")))?;

    let resources = page.get(b"Resources").ok().or_else(|| {
        let parent = page.get(b"Parent").ok()?.as_reference().ok()?;
        document.get_dictionary(parent).ok()?.get(b"Resources").ok()
    });
    let Some(resources) = resources else {
        return Ok(Vec::new());
    };
    let resources = deref_dict(document, resources)?;
    let Ok(xobjects) = resources.get(b"XObject") else {
        return Ok(Vec::new());
    };
    let xobjects = deref_dict(document, xobjects)?;

    let mut ids = Vec::new();
    for (_, value) in xobjects.iter() {
        let Ok(id) = value.as_reference() else {
            continue;
        };
        let is_image = document
            .get_object(id)
            .and_then(Object::as_stream)
            .ok()
            .and_then(|s| s.dict.get(b"Subtype").ok())
            .and_then(|o| o.as_name().ok())
            .is_some_and(|name| name == b"Image");
        if is_image {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn deref_dict<'a>(document: &'a Document, object: &'a Object) -> Result<&'a lopdf::Dictionary> {
    let (_, object) = document
        .dereference(object)
        .map_err(|err| SpoolError::PdfError(format!("dangling reference: {err}")))?;
    object
        .as_dict()
        .map_err(|err| SpoolError::PdfError(format!("expected dictionary: {err}")))
}

fn decode_image_xobject(document: &Document, id: ObjectId) -> Result<DynamicImage> {
    let stream = document
        .get_object(id)
        .and_then(Object::as_stream)
        .map_err(|err| SpoolError::PdfError(format!("image object {id:?}: {err}")))?;

    let filters = stream_filters(&stream.dict);
    if filters.iter().any(|f| f == b"DCTDecode" || f == b"JPXDecode") {
        // JPEG data can be handed straight to the decoder.
        return image::load_from_memory(&stream.content)
            .map_err(|err| SpoolError::ImageError(format!("embedded JPEG: {err}")));
    }

    let width = dict_u32(&stream.dict, b"Width")?;
    let height = dict_u32(&stream.dict, b"Height")?;
    let bits = dict_u32(&stream.dict, b"BitsPerComponent").unwrap_or(8);
    if bits != 8 {
        return Err(SpoolError::UnsupportedDocument(format!(
            "{bits}-bit embedded images"
        )));
    }
    let color_space = stream
        .dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| o.as_name().ok())
        .unwrap_or(b"DeviceRGB".as_slice());
    let data = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|err| SpoolError::PdfError(format!("decompress image: {err}")))?
    };

    match color_space {
        b"DeviceGray" => GrayImage::from_raw(width, height, data)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| SpoolError::ImageError("gray image data too short".into())),
        b"DeviceRGB" => RgbImage::from_raw(width, height, data)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| SpoolError::ImageError("RGB image data too short".into())),
        other => Err(SpoolError::UnsupportedDocument(format!(
            "embedded image colour space {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn stream_filters(dict: &lopdf::Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn dict_u32(dict: &lopdf::Dictionary, key: &[u8]) -> Result<u32> {
    dict.get(key)
        .and_then(Object::as_i64)
        .map(|v| v.max(0) as u32)
        .map_err(|err| {
            SpoolError::PdfError(format!("{}: {err}", String::from_utf8_lossy(key)))
        })
}

fn page_size_points(document: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let page = document.get_dictionary(page_id).ok()?;
    let media_box = page.get(b"MediaBox").ok().or_else(|| {
        let parent = page.get(b"Parent").ok()?.as_reference().ok()?;
        document.get_dictionary(parent).ok()?.get(b"MediaBox").ok()
    })?;
    let (_, media_box) = document.dereference(media_box).ok()?;
    let values: Vec<f32> = media_box
        .as_array()
        .ok()?
        .iter()
        .filter_map(|o| o.as_float().ok())
        .collect();
    match values.as_slice() {
        [x0, y0, x1, y1] => Some(((x1 - x0).abs(), (y1 - y0).abs())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn kind_from_extension() {
        assert_eq!(DocumentKind::from_path(Path::new("a.PDF")), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_path(Path::new("scan.jpeg")), DocumentKind::Image);
        assert_eq!(DocumentKind::from_path(Path::new("notes.txt")), DocumentKind::Text);
        assert_eq!(DocumentKind::from_path(Path::new("report.docx")), DocumentKind::Opaque);
        assert_eq!(DocumentKind::from_path(Path::new("README")), DocumentKind::Opaque);
    }

    #[test]
    fn text_estimate_rounds_up() {
        assert_eq!(text_page_estimate(""), 1);
        assert_eq!(text_page_estimate(&"x".repeat(3000)), 1);
        assert_eq!(text_page_estimate(&"x".repeat(3001)), 2);
    }

    #[test]
    fn text_splits_on_character_boundaries() {
        assert_eq!(text_pages(""), vec![""]);
        let text = format!("{}{}", "é".repeat(3000), "tail");
        let pages = text_pages(&text);
        assert_eq!(pages.len(), text_page_estimate(&text));
        assert_eq!(pages[0].chars().count(), 3000);
        assert_eq!(pages[1], "tail");
        assert_eq!(text_pages(&"x".repeat(6000)).len(), 2);
    }

    #[test]
    fn sheet_size_follows_media_box() {
        // A4 in points at 150 dpi.
        assert_eq!(sheet_pixels(595.0, 842.0, 150), Some((1240, 1754)));
        assert_eq!(sheet_pixels(0.0, 842.0, 150), None);
        assert_eq!(sheet_pixels(f32::NAN, 842.0, 150), None);
    }

    #[test]
    fn oversized_media_box_is_clamped() {
        // A 200 x 100 inch page would be 30000 x 15000 px at 150 dpi.
        let (w, h) = sheet_pixels(14_400.0, 7_200.0, 150).expect("size");
        assert_eq!(w, MAX_SHEET_DOTS);
        assert_eq!(h, MAX_SHEET_DOTS / 2);
        let (w, h) = sheet_pixels(1.0e9, 1.0, 600).expect("size");
        assert_eq!((w, h), (MAX_SHEET_DOTS, 1));
    }

    #[test]
    fn missing_file_is_source_not_found() {
        let err = SourceDocument::open("/definitely/not/here.pdf").expect_err("missing file");
        assert!(matches!(err, SpoolError::SourceNotFound(_)));
    }

    #[test]
    fn image_source_renders_one_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("page.png");
        DynamicImage::new_rgb8(40, 20).save(&path).expect("write png");

        let doc = SourceDocument::open(&path).expect("open image");
        assert_eq!(doc.kind(), DocumentKind::Image);
        assert_eq!(doc.page_count(), 1);
        assert!(doc.is_rasterizable());
        let page = doc.render_page(0, 150).expect("render");
        assert_eq!((page.width(), page.height()), (40, 20));
        assert!(doc.render_page(1, 150).is_err());
    }

    #[test]
    fn text_source_exposes_body() {
        let mut file = tempfile::Builder::new()
            .suffix(".txt")
            .tempfile()
            .expect("tempfile");
        write!(file, "hello printer").expect("write");

        let doc = SourceDocument::open(file.path()).expect("open text");
        assert_eq!(doc.text(), Some("hello printer"));
        assert!(!doc.is_rasterizable());
        assert!(doc.render_page(0, 150).is_err());
    }

    #[test]
    fn opaque_source_keeps_path() {
        let doc = SourceDocument::opaque("/tmp/letter.docx");
        assert_eq!(doc.kind(), DocumentKind::Opaque);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.path(), Path::new("/tmp/letter.docx"));
    }
}

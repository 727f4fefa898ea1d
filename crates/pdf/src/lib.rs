pub mod export;
#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;
pub mod import;

pub use export::{export_bubbles, ExportError, ExportFailure, ExportOutput};
pub use import::{import_bubbles, parse_label, ImportOptions, ImportOutcome, ImportStats};

use fai_model::geometry::{PageBox, PageSize, Rect, Rotation};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::fs;
use std::path::Path;

/// Written to `/T` and `/Subj` of every annotation this crate exports.
pub const MARKER_TAG: &str = "AS9102_FAI_BUBBLE";

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
}

/// Geometry of one drawing page as stored in the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    pub page_box: PageBox,
    /// The page's own `/Rotate`, normalized to a right angle.
    pub rotation: Rotation,
}

impl PageInfo {
    pub fn size(&self) -> PageSize {
        self.page_box.size()
    }
}

impl Default for PageInfo {
    fn default() -> Self {
        Self { page_box: PageBox::default(), rotation: Rotation::Deg0 }
    }
}

/// Page sizes and native rotations of every page, in page order.
pub fn inspect(bytes: &[u8]) -> Result<Vec<PageInfo>, PdfError> {
    let doc = load(bytes)?;
    let pages: Vec<PageInfo> =
        doc.get_pages().into_values().map(|page_id| page_info(&doc, page_id)).collect();

    if pages.is_empty() {
        return Err(PdfError::NoPages);
    }

    Ok(pages)
}

pub fn inspect_file(path: &Path) -> Result<Vec<PageInfo>, PdfError> {
    let bytes = fs::read(path)?;
    inspect(&bytes)
}

pub(crate) fn load(bytes: &[u8]) -> Result<Document, PdfError> {
    if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
        return Err(PdfError::EncryptedUnsupported);
    }

    Ok(Document::load_mem(bytes)?)
}

pub(crate) fn page_info(doc: &Document, page_id: ObjectId) -> PageInfo {
    let page_box = resolve_inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| rect_numbers(doc, obj))
        .map(|[x0, y0, x1, y1]| PageBox::from_corners(x0, y0, x1, y1))
        .filter(|page_box| page_box.size().width_pt > 0.0 && page_box.size().height_pt > 0.0)
        .unwrap_or_default();

    let rotation = resolve_inherited(doc, page_id, b"Rotate")
        .and_then(|obj| resolve(doc, obj).as_i64().ok())
        .map(Rotation::from_pdf_rotate)
        .unwrap_or_default();

    PageInfo { page_box, rotation }
}

/// Look a page attribute up on the page, then on its ancestors in the page tree.
fn resolve_inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    // Guard against cyclic /Parent chains in damaged files.
    for _ in 0..64 {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

pub(crate) fn rect_numbers(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let array = resolve(doc, obj).as_array().ok()?;
    if array.len() != 4 {
        return None;
    }

    let mut numbers = [0.0; 4];
    for (slot, value) in numbers.iter_mut().zip(array) {
        *slot = resolve(doc, value).as_float().ok()?;
    }
    Some(numbers)
}

/// Annotation dictionaries on a page, with their object ids when indirect.
pub(crate) fn page_annotations(
    doc: &Document,
    page_id: ObjectId,
) -> Vec<(Option<ObjectId>, &Dictionary)> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    let Some(annots) = page.get(b"Annots").ok().and_then(|obj| resolve(doc, obj).as_array().ok())
    else {
        return Vec::new();
    };

    annots
        .iter()
        .filter_map(|entry| match entry {
            Object::Reference(id) => {
                doc.get_dictionary(*id).ok().map(|dict| (Some(*id), dict))
            }
            Object::Dictionary(dict) => Some((None, dict)),
            _ => None,
        })
        .collect()
}

pub(crate) fn name_is(dict: &Dictionary, key: &[u8], expected: &[u8]) -> bool {
    matches!(dict.get(key), Ok(Object::Name(name)) if name.as_slice() == expected)
}

pub(crate) fn text_entry(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match resolve(doc, dict.get(key).ok()?) {
        Object::String(bytes, _) => Some(decode_text(bytes)),
        _ => None,
    }
}

pub(crate) fn is_marker(doc: &Document, dict: &Dictionary) -> bool {
    [b"T".as_slice(), b"Subj".as_slice()]
        .into_iter()
        .any(|key| text_entry(doc, dict, key).is_some_and(|text| text == MARKER_TAG))
}

/// PDF text string to Rust: UTF-16BE when it carries a byte order mark,
/// otherwise UTF-8 with a Latin-1 fallback.
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> =
            utf16.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect();
        return String::from_utf16_lossy(&units);
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes.iter().map(|&byte| byte as char).collect(),
    }
}

/// Rust text to a PDF text string. ASCII stays a literal; anything else is
/// written as UTF-16BE with a byte order mark.
pub(crate) fn text_object(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }

    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn pdf_rect(rect: [f32; 4]) -> Object {
    Object::Array(rect.iter().map(|&value| Object::Real(value)).collect())
}

pub(crate) fn storage_rect(doc: &Document, dict: &Dictionary, page: &PageInfo) -> Option<Rect> {
    let numbers = rect_numbers(doc, dict.get(b"Rect").ok()?)?;
    Some(fai_model::geometry::from_pdf_rect(numbers, page.page_box))
}

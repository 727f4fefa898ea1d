//! Bake a bubble store into a copy of the drawing as real PDF annotations.
//!
//! Each bubble becomes a tagged `/Circle` outline plus a tagged `/FreeText`
//! label drawn on top of it. Markers from earlier exports are removed first.

use crate::{is_marker, load, page_annotations, page_info, pdf_rect, text_object, PdfError};
use crate::{PageInfo, MARKER_TAG};
use fai_model::geometry::{self, Rect, Rotation};
use fai_model::{Bubble, BubbleId, BubbleStore, MarkerStyle};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::fmt;
use std::io::Write;

/// Helvetica advance width is roughly half the font size on average.
const HELVETICA_AVG_ADVANCE: f32 = 0.5;
const HELVETICA_CAP_HEIGHT: f32 = 0.72;
/// Bezier control distance for a quarter ellipse.
const KAPPA: f32 = 0.552_284_8;
/// Annotation flag: print.
const FLAG_PRINT: i64 = 4;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source PDF could not be parsed: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("source PDF has no pages")]
    NoPages,
}

impl From<PdfError> for ExportError {
    fn from(error: PdfError) -> Self {
        match error {
            PdfError::Io(err) => Self::Io(err),
            PdfError::Parse(err) => Self::Parse(err),
            PdfError::EncryptedUnsupported => Self::EncryptedUnsupported,
            PdfError::NoPages => Self::NoPages,
        }
    }
}

/// Bubbles that could not be placed because their page does not exist in
/// the drawing. The export still succeeds without them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFailure {
    pub skipped: Vec<BubbleId>,
    pub page_count: u32,
}

impl fmt::Display for ExportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bubble(s) reference pages beyond the drawing's {} page(s) and were not exported",
            self.skipped.len(),
            self.page_count
        )
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub bytes: Vec<u8>,
    pub exported: usize,
    pub failure: Option<ExportFailure>,
}

pub fn export_bubbles(
    store: &BubbleStore,
    source: &[u8],
    style: &MarkerStyle,
) -> Result<ExportOutput, ExportError> {
    let mut doc = load(source)?;
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let page_count = page_ids.len() as u32;

    let removed = strip_markers(&mut doc, &page_ids);
    if removed > 0 {
        tracing::debug!(removed, "removed markers from an earlier export");
    }

    let pages: Vec<PageInfo> = page_ids.iter().map(|&page_id| page_info(&doc, page_id)).collect();
    for (index, &page_id) in page_ids.iter().enumerate() {
        let rotation = store.rotation(index as u32);
        if let Ok(page) = doc.get_dictionary_mut(page_id) {
            page.set("Rotate", i64::from(rotation.degrees()));
        }
    }

    let mut exported = 0;
    let mut skipped = Vec::new();
    for bubble in store.bubbles() {
        let Some((&page_id, page)) =
            page_ids.get(bubble.page_index as usize).zip(pages.get(bubble.page_index as usize))
        else {
            tracing::warn!(
                id = %bubble.id,
                number = bubble.number,
                page = bubble.page_index,
                page_count,
                "bubble is on a page the drawing does not have; skipping"
            );
            skipped.push(bubble.id);
            continue;
        };

        let rotation = store.rotation(bubble.page_index);
        let circle = circle_annotation(&mut doc, bubble, page, style)?;
        let label = label_annotation(&mut doc, bubble, page, rotation, style)?;
        add_annotation_to_page(&mut doc, page_id, circle)?;
        add_annotation_to_page(&mut doc, page_id, label)?;
        exported += 1;
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;

    let failure = (!skipped.is_empty()).then_some(ExportFailure { skipped, page_count });
    let skipped_count = failure.as_ref().map_or(0, |failure| failure.skipped.len());
    tracing::info!(exported, skipped = skipped_count, "exported bubbles");

    Ok(ExportOutput { bytes, exported, failure })
}

/// Remove every tagged annotation, and the appearance streams it owns.
fn strip_markers(doc: &mut Document, page_ids: &[ObjectId]) -> usize {
    let mut removed = 0;

    for &page_id in page_ids {
        let annotations = page_annotations(doc, page_id);
        if !annotations.iter().any(|(_, dict)| is_marker(doc, dict)) {
            continue;
        }

        let mut kept = Vec::new();
        let mut doomed = Vec::new();
        for (id, dict) in &annotations {
            if is_marker(doc, dict) {
                doomed.extend(*id);
                doomed.extend(appearance_ids(dict));
                removed += 1;
            } else {
                kept.push(match id {
                    Some(id) => Object::Reference(*id),
                    None => Object::Dictionary((*dict).clone()),
                });
            }
        }

        for id in doomed {
            doc.objects.remove(&id);
        }
        if let Ok(page) = doc.get_dictionary_mut(page_id) {
            if kept.is_empty() {
                page.remove(b"Annots");
            } else {
                page.set("Annots", kept);
            }
        }
    }

    removed
}

fn appearance_ids(annotation: &Dictionary) -> Vec<ObjectId> {
    let Ok(Object::Dictionary(appearance)) = annotation.get(b"AP") else {
        return Vec::new();
    };
    appearance.iter().filter_map(|(_, value)| value.as_reference().ok()).collect()
}

fn add_annotation_to_page(
    doc: &mut Document,
    page_id: ObjectId,
    annot_id: ObjectId,
) -> Result<(), ExportError> {
    let shared = match doc.get_dictionary(page_id)?.get(b"Annots") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };
    if let Some(Ok(Object::Array(annots))) = shared.map(|id| doc.get_object_mut(id)) {
        annots.push(Object::Reference(annot_id));
        return Ok(());
    }

    let page = doc.get_dictionary_mut(page_id)?;
    match page.get_mut(b"Annots") {
        Ok(Object::Array(annots)) => annots.push(Object::Reference(annot_id)),
        _ => page.set("Annots", vec![Object::Reference(annot_id)]),
    }
    Ok(())
}

fn tagged(mut annotation: Dictionary, bubble: &Bubble, rect: [f32; 4]) -> Dictionary {
    annotation.set("Type", "Annot");
    annotation.set("Rect", pdf_rect(rect));
    annotation.set("T", Object::string_literal(MARKER_TAG));
    annotation.set("Subj", Object::string_literal(MARKER_TAG));
    annotation.set("F", FLAG_PRINT);
    annotation.set("NM", Object::string_literal(bubble.id.to_string()));
    annotation
}

fn color_array(color: [f32; 3]) -> Object {
    Object::Array(color.iter().map(|&c| Object::Real(c)).collect())
}

fn circle_annotation(
    doc: &mut Document,
    bubble: &Bubble,
    page: &PageInfo,
    style: &MarkerStyle,
) -> Result<ObjectId, ExportError> {
    let anchor = geometry::clamp_to_page(bubble.anchor, page.size());
    let rect = geometry::to_pdf_rect(anchor, page.page_box);

    let mut content = Vec::new();
    let [r, g, b] = style.stroke_color;
    writeln!(content, "q")?;
    writeln!(content, "{r} {g} {b} RG")?;
    writeln!(content, "{} w", style.line_width)?;
    if let Some([r, g, b]) = style.fill_color {
        writeln!(content, "{r} {g} {b} rg")?;
    }
    ellipse_path(&mut content, anchor, style.line_width)?;
    writeln!(content, "{}", if style.fill_color.is_some() { "B" } else { "S" })?;
    writeln!(content, "Q")?;

    let appearance = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), anchor.width.into(), anchor.height.into()],
        },
        content,
    );
    let appearance_id = doc.add_object(appearance);

    let mut border = Dictionary::new();
    border.set("W", Object::Real(style.line_width));

    let mut circle = tagged(
        dictionary! {
            "Subtype" => "Circle",
            "C" => color_array(style.stroke_color),
            "BS" => border,
            "AP" => dictionary! { "N" => Object::Reference(appearance_id) },
        },
        bubble,
        rect,
    );
    if let Some(fill) = style.fill_color {
        circle.set("IC", color_array(fill));
    }

    Ok(doc.add_object(circle))
}

/// Ellipse inscribed in a `width` by `height` box, inset by half the stroke.
fn ellipse_path(out: &mut Vec<u8>, anchor: Rect, line_width: f32) -> std::io::Result<()> {
    let inset = (line_width / 2.0).min(anchor.width / 2.0).min(anchor.height / 2.0);
    let rx = anchor.width / 2.0 - inset;
    let ry = anchor.height / 2.0 - inset;
    let (cx, cy) = (anchor.width / 2.0, anchor.height / 2.0);
    let (kx, ky) = (rx * KAPPA, ry * KAPPA);

    writeln!(out, "{} {} m", cx + rx, cy)?;
    writeln!(out, "{} {} {} {} {} {} c", cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry)?;
    writeln!(out, "{} {} {} {} {} {} c", cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy)?;
    writeln!(out, "{} {} {} {} {} {} c", cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry)?;
    writeln!(out, "{} {} {} {} {} {} c", cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy)?;
    Ok(())
}

fn label_annotation(
    doc: &mut Document,
    bubble: &Bubble,
    page: &PageInfo,
    rotation: Rotation,
    style: &MarkerStyle,
) -> Result<ObjectId, ExportError> {
    let anchor = geometry::clamp_to_page(bubble.anchor, page.size());
    let rect = geometry::to_pdf_rect(anchor, page.page_box);
    let view = geometry::to_view(anchor, rotation, page.size());
    let label = bubble.label();

    let [r, g, b] = style.stroke_color;
    let font_size = fitted_font_size(&label, view, style.font_size);
    let text_width = label.chars().count() as f32 * font_size * HELVETICA_AVG_ADVANCE;
    let tx = ((view.width - text_width) / 2.0).max(0.0);
    let ty = ((view.height - font_size * HELVETICA_CAP_HEIGHT) / 2.0).max(0.0);

    let mut content = Vec::new();
    writeln!(content, "/Tx BMC")?;
    writeln!(content, "q")?;
    writeln!(content, "BT")?;
    writeln!(content, "/Helv {font_size} Tf")?;
    writeln!(content, "{r} {g} {b} rg")?;
    writeln!(content, "{tx} {ty} Td")?;
    content.push(b'(');
    content.extend(win_ansi_literal(&label));
    content.extend_from_slice(b") Tj\n");
    writeln!(content, "ET")?;
    writeln!(content, "Q")?;
    writeln!(content, "EMC")?;

    let font = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    };
    let appearance = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), view.width.into(), view.height.into()],
            "Matrix" => geometry::appearance_matrix(rotation)
                .iter()
                .map(|&value| Object::Real(value))
                .collect::<Vec<_>>(),
            "Resources" => dictionary! { "Font" => dictionary! { "Helv" => font } },
        },
        content,
    );
    let appearance_id = doc.add_object(appearance);

    let label_annotation = tagged(
        dictionary! {
            "Subtype" => "FreeText",
            "Contents" => text_object(&label),
            "DA" => Object::string_literal(format!("/Helv {font_size} Tf {r} {g} {b} rg")),
            "Q" => 1,
            "Border" => vec![0.into(), 0.into(), 0.into()],
            "AP" => dictionary! { "N" => Object::Reference(appearance_id) },
        },
        bubble,
        rect,
    );

    Ok(doc.add_object(label_annotation))
}

/// Shrink the preferred size until the label fits the marker width.
fn fitted_font_size(label: &str, view: Rect, preferred: f32) -> f32 {
    let chars = label.chars().count().max(1) as f32;
    let by_width = view.width / (chars * HELVETICA_AVG_ADVANCE);
    let by_height = view.height / HELVETICA_CAP_HEIGHT;
    preferred.min(by_width).min(by_height).max(1.0)
}

/// Bytes for a PDF literal string in WinAnsi encoding. Characters outside
/// Latin-1 become `?`.
fn win_ansi_literal(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            c if (c as u32) < 0x20 => out.push(b' '),
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

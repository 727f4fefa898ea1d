//! Small synthetic drawings for tests.

use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};

#[derive(Debug, Clone, Copy)]
pub struct PageSpec {
    pub width: f32,
    pub height: f32,
    pub rotate: Option<i64>,
}

impl PageSpec {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height, rotate: None }
    }

    pub fn rotate(mut self, degrees: i64) -> Self {
        self.rotate = Some(degrees);
        self
    }
}

/// A third-party FreeText annotation to place on a fixture page.
#[derive(Debug, Clone)]
pub struct FreeTextSpec {
    pub page_index: usize,
    /// `[llx lly urx ury]` in user space.
    pub rect: [f32; 4],
    pub contents: String,
    pub title: Option<String>,
}

impl FreeTextSpec {
    pub fn new(page_index: usize, rect: [f32; 4], contents: &str) -> Self {
        Self { page_index, rect, contents: contents.to_owned(), title: None }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_owned());
        self
    }
}

pub fn blank_document(pages: &[PageSpec]) -> Vec<u8> {
    annotated_document(pages, &[])
}

pub fn annotated_document(pages: &[PageSpec], annotations: &[FreeTextSpec]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let page_ids: Vec<ObjectId> = pages
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let annots: Vec<Object> = annotations
                .iter()
                .filter(|annotation| annotation.page_index == index)
                .map(|annotation| Object::Reference(doc.add_object(free_text(annotation))))
                .collect();

            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![0.into(), 0.into(), spec.width.into(), spec.height.into()],
            };
            if let Some(rotate) = spec.rotate {
                page.set("Rotate", rotate);
            }
            if !annots.is_empty() {
                page.set("Annots", annots);
            }
            doc.add_object(page)
        })
        .collect();

    finish(doc, pages_id, page_ids, None)
}

/// One page whose MediaBox lives only on the parent `/Pages` node.
pub fn inherited_media_box_document(width: f32, height: f32) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
    });

    let media_box = vec![0.into(), 0.into(), width.into(), height.into()];
    finish(doc, pages_id, vec![page_id], Some(media_box))
}

fn free_text(spec: &FreeTextSpec) -> Object {
    let mut annotation = dictionary! {
        "Type" => "Annot",
        "Subtype" => "FreeText",
        "Rect" => spec.rect.iter().map(|&value| Object::Real(value)).collect::<Vec<_>>(),
        "Contents" => Object::String(spec.contents.as_bytes().to_vec(), StringFormat::Literal),
        "DA" => Object::string_literal("/Helv 10 Tf 0 0 0 rg"),
    };
    if let Some(title) = &spec.title {
        annotation.set("T", Object::string_literal(title.as_str()));
    }
    Object::Dictionary(annotation)
}

fn finish(
    mut doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    media_box: Option<Vec<Object>>,
) -> Vec<u8> {
    let count = page_ids.len() as i64;
    let mut pages = dictionary! {
        "Type" => "Pages",
        "Kids" => page_ids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
        "Count" => count,
    };
    if let Some(media_box) = media_box {
        pages.set("MediaBox", media_box);
    }
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("fixture document should serialize");
    buffer
}

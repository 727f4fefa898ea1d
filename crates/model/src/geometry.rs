//! Page geometry and rotation
//!
//! Bubble anchors live in *storage space*: the unrotated page, origin at the
//! top-left corner, x to the right, y downward, units in points (1/72 inch).
//! The viewer displays pages rotated clockwise by a multiple of 90 degrees;
//! *view space* is that rotated page, again with a top-left origin.
//!
//! PDF files use *user space*: origin at the bottom-left of the MediaBox,
//! y upward. Conversions to and from user space live here as well so the
//! importer and exporter agree on them.

use crate::ModelError;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.width, self.height].iter().all(|value| value.is_finite())
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Inclusive hit test with a tolerance on every edge.
    pub fn contains(&self, x: f32, y: f32, tolerance: f32) -> bool {
        x >= self.x - tolerance
            && x <= self.right() + tolerance
            && y >= self.y - tolerance
            && y <= self.bottom() + tolerance
    }
}

/// Unrotated page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    pub fn new(width_pt: f32, height_pt: f32) -> Self {
        Self { width_pt, height_pt }
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self { width_pt: 612.0, height_pt: 792.0 }
    }
}

/// Clockwise display rotation of a page.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] =
        [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270];

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Strict conversion used at API boundaries.
    pub fn from_degrees(degrees: i64) -> Result<Self, ModelError> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(ModelError::InvalidRotation(other)),
        }
    }

    /// Lenient conversion for values read from PDF `/Rotate` entries.
    ///
    /// Negative and >= 360 multiples of 90 wrap around; anything that is not a
    /// right angle falls back to no rotation.
    pub fn from_pdf_rotate(value: i64) -> Self {
        if value % 90 != 0 {
            return Self::Deg0;
        }
        Self::from_degrees(value.rem_euclid(360)).unwrap_or_default()
    }

    /// Whether width and height trade places in view space.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

impl TryFrom<i64> for Rotation {
    type Error = ModelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_degrees(value)
    }
}

impl From<Rotation> for i64 {
    fn from(value: Rotation) -> Self {
        i64::from(value.degrees())
    }
}

/// Size of the page as displayed under `rotation`.
pub fn view_size(page: PageSize, rotation: Rotation) -> PageSize {
    if rotation.swaps_axes() {
        PageSize::new(page.height_pt, page.width_pt)
    } else {
        page
    }
}

/// Storage space to view space.
pub fn to_view(anchor: Rect, rotation: Rotation, page: PageSize) -> Rect {
    let (w, h) = (page.width_pt, page.height_pt);
    match rotation {
        Rotation::Deg0 => anchor,
        Rotation::Deg90 => Rect::new(h - anchor.bottom(), anchor.x, anchor.height, anchor.width),
        Rotation::Deg180 => {
            Rect::new(w - anchor.right(), h - anchor.bottom(), anchor.width, anchor.height)
        }
        Rotation::Deg270 => Rect::new(anchor.y, w - anchor.right(), anchor.height, anchor.width),
    }
}

/// View space back to storage space. Inverse of [`to_view`].
pub fn to_storage(view: Rect, rotation: Rotation, page: PageSize) -> Rect {
    let (w, h) = (page.width_pt, page.height_pt);
    match rotation {
        Rotation::Deg0 => view,
        Rotation::Deg90 => Rect::new(view.y, h - view.right(), view.height, view.width),
        Rotation::Deg180 => Rect::new(w - view.right(), h - view.bottom(), view.width, view.height),
        Rotation::Deg270 => Rect::new(w - view.bottom(), view.x, view.height, view.width),
    }
}

/// Pull an anchor back onto the page, shrinking it if it is larger than the page.
pub fn clamp_to_page(anchor: Rect, page: PageSize) -> Rect {
    let width = anchor.width.abs().min(page.width_pt);
    let height = anchor.height.abs().min(page.height_pt);
    let x = anchor.x.clamp(0.0, page.width_pt - width);
    let y = anchor.y.clamp(0.0, page.height_pt - height);
    Rect::new(x, y, width, height)
}

/// Page box as stored in a PDF (`/MediaBox`), in user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl PageBox {
    /// Build from the four numbers of a PDF rectangle, in any corner order.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { left: x0.min(x1), bottom: y0.min(y1), right: x0.max(x1), top: y0.max(y1) }
    }

    pub fn size(&self) -> PageSize {
        PageSize::new(self.right - self.left, self.top - self.bottom)
    }
}

impl Default for PageBox {
    fn default() -> Self {
        Self { left: 0.0, bottom: 0.0, right: 612.0, top: 792.0 }
    }
}

/// Storage space to a PDF `/Rect` array (`[llx lly urx ury]`).
pub fn to_pdf_rect(anchor: Rect, page_box: PageBox) -> [f32; 4] {
    [
        page_box.left + anchor.x,
        page_box.top - anchor.bottom(),
        page_box.left + anchor.right(),
        page_box.top - anchor.y,
    ]
}

/// A PDF `/Rect` array back to storage space.
pub fn from_pdf_rect(rect: [f32; 4], page_box: PageBox) -> Rect {
    let normalized = PageBox::from_corners(rect[0], rect[1], rect[2], rect[3]);
    Rect::new(
        normalized.left - page_box.left,
        page_box.top - normalized.top,
        normalized.right - normalized.left,
        normalized.top - normalized.bottom,
    )
}

/// Form matrix for an annotation appearance so that content drawn upright in
/// view space stays upright once the page is displayed with `rotation`.
///
/// The page turns clockwise, so the form turns counter-clockwise by the same
/// angle. Translation is left at zero; PDF readers fit the transformed
/// `/BBox` into the annotation `/Rect`.
pub fn appearance_matrix(rotation: Rotation) -> [f32; 6] {
    match rotation {
        Rotation::Deg0 => [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        Rotation::Deg90 => [0.0, 1.0, -1.0, 0.0, 0.0, 0.0],
        Rotation::Deg180 => [-1.0, 0.0, 0.0, -1.0, 0.0, 0.0],
        Rotation::Deg270 => [0.0, -1.0, 1.0, 0.0, 0.0, 0.0],
    }
}

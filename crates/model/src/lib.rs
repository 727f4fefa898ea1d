pub mod geometry;

use geometry::{Rect, Rotation};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("no bubble with id {0}")]
    NotFound(BubbleId),
    #[error("invalid rotation {0}; expected 0, 90, 180 or 270")]
    InvalidRotation(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BubbleId(Uuid);

impl BubbleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BubbleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BubbleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for BubbleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One numbered inspection marker placed on a drawing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bubble {
    pub id: BubbleId,
    pub number: u32,
    pub page_index: u32,
    pub anchor: Rect,
    pub note: Option<String>,
}

impl Bubble {
    /// Rebuild a bubble whose identity and number come from elsewhere (a
    /// sidecar or a recovered PDF annotation).
    pub fn restored(
        id: BubbleId,
        number: u32,
        page_index: u32,
        anchor: Rect,
        note: Option<String>,
    ) -> Self {
        Self { id, number, page_index, anchor, note: normalize_note(note) }
    }

    /// Text shown on the marker: the number, then the note if there is one.
    pub fn label(&self) -> String {
        match &self.note {
            Some(note) => format!("{} {}", self.number, note),
            None => self.number.to_string(),
        }
    }
}

pub fn normalize_note(note: Option<String>) -> Option<String> {
    note.and_then(|text| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == text.len() {
            Some(text)
        } else {
            Some(trimmed.to_owned())
        }
    })
}

/// Partial update for [`BubbleStore::update`]. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BubblePatch {
    pub anchor: Option<Rect>,
    pub note: Option<Option<String>>,
}

impl BubblePatch {
    pub fn anchor(mut self, anchor: Rect) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(Some(note.into()));
        self
    }

    pub fn clear_note(mut self) -> Self {
        self.note = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.anchor.is_none() && self.note.is_none()
    }
}

/// Top-to-bottom, then left-to-right, by anchor position.
pub fn reading_order(a: &Bubble, b: &Bubble) -> Ordering {
    a.anchor
        .y
        .total_cmp(&b.anchor.y)
        .then_with(|| a.anchor.x.total_cmp(&b.anchor.x))
        .then_with(|| a.number.cmp(&b.number))
}

/// The overlay model for one drawing: every bubble, the per-page display
/// rotation, and the counter that hands out bubble numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleStore {
    bubbles: Vec<Bubble>,
    rotations: BTreeMap<u32, Rotation>,
    next_number: u32,
}

impl Default for BubbleStore {
    fn default() -> Self {
        Self { bubbles: Vec::new(), rotations: BTreeMap::new(), next_number: 1 }
    }
}

impl BubbleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a store from already validated parts. `next_number` is raised
    /// past the largest number present so the store stays consistent.
    pub fn from_parts(
        bubbles: Vec<Bubble>,
        rotations: BTreeMap<u32, Rotation>,
        next_number: u32,
    ) -> Self {
        let floor = bubbles.iter().map(|bubble| bubble.number).max().unwrap_or(0).saturating_add(1);
        Self { bubbles, rotations, next_number: next_number.max(floor) }
    }

    pub fn bubbles(&self) -> &[Bubble] {
        &self.bubbles
    }

    pub fn rotations(&self) -> &BTreeMap<u32, Rotation> {
        &self.rotations
    }

    pub fn next_number(&self) -> u32 {
        self.next_number
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    pub fn get(&self, id: BubbleId) -> Option<&Bubble> {
        self.bubbles.iter().find(|bubble| bubble.id == id)
    }

    pub fn page_bubbles(&self, page_index: u32) -> impl Iterator<Item = &Bubble> {
        self.bubbles.iter().filter(move |bubble| bubble.page_index == page_index)
    }

    /// Topmost bubble under a storage-space point. Later bubbles draw on top.
    pub fn bubble_at(&self, page_index: u32, x: f32, y: f32) -> Option<&Bubble> {
        self.bubbles
            .iter()
            .rev()
            .find(|bubble| bubble.page_index == page_index && bubble.anchor.contains(x, y, 0.0))
    }

    pub fn max_number(&self) -> Option<u32> {
        self.bubbles.iter().map(|bubble| bubble.number).max()
    }

    pub fn pages_in_use(&self) -> BTreeSet<u32> {
        self.bubbles.iter().map(|bubble| bubble.page_index).collect()
    }

    pub fn rotation(&self, page_index: u32) -> Rotation {
        self.rotations.get(&page_index).copied().unwrap_or_default()
    }

    pub fn add(&mut self, page_index: u32, anchor: Rect, note: Option<String>) -> Bubble {
        let bubble = Bubble {
            id: BubbleId::new(),
            number: self.next_number,
            page_index,
            anchor,
            note: normalize_note(note),
        };
        self.next_number = self.next_number.saturating_add(1);
        self.bubbles.push(bubble.clone());
        bubble
    }

    pub fn update(&mut self, id: BubbleId, patch: BubblePatch) -> Result<&Bubble, ModelError> {
        let bubble = self
            .bubbles
            .iter_mut()
            .find(|bubble| bubble.id == id)
            .ok_or(ModelError::NotFound(id))?;

        if let Some(anchor) = patch.anchor {
            bubble.anchor = anchor;
        }
        if let Some(note) = patch.note {
            bubble.note = normalize_note(note);
        }

        Ok(bubble)
    }

    pub fn remove(&mut self, id: BubbleId) -> Result<Bubble, ModelError> {
        let index = self
            .bubbles
            .iter()
            .position(|bubble| bubble.id == id)
            .ok_or(ModelError::NotFound(id))?;

        Ok(self.bubbles.remove(index))
    }

    /// Reassign numbers on one page following `compare`, starting from the
    /// smallest number already used on that page. Identities and insertion
    /// order are unchanged. Returns how many bubbles were renumbered.
    pub fn renumber_by<F>(&mut self, page_index: u32, mut compare: F) -> usize
    where
        F: FnMut(&Bubble, &Bubble) -> Ordering,
    {
        let mut order: Vec<usize> = self
            .bubbles
            .iter()
            .enumerate()
            .filter(|(_, bubble)| bubble.page_index == page_index)
            .map(|(index, _)| index)
            .collect();

        let Some(start) = order.iter().map(|&index| self.bubbles[index].number).min() else {
            return 0;
        };

        order.sort_by(|&a, &b| compare(&self.bubbles[a], &self.bubbles[b]));

        let mut number = start;
        for &index in &order {
            self.bubbles[index].number = number;
            number = number.saturating_add(1);
        }

        let last = number - 1;
        if last >= self.next_number {
            self.next_number = last.saturating_add(1);
        }

        order.len()
    }

    pub fn set_rotation(&mut self, page_index: u32, degrees: i64) -> Result<Rotation, ModelError> {
        let rotation = Rotation::try_from(degrees)?;
        self.rotations.insert(page_index, rotation);
        Ok(rotation)
    }
}

/// Colors are RGB components in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    pub stroke_color: [f32; 3],
    pub fill_color: Option<[f32; 3]>,
    pub line_width: f32,
    pub font_size: f32,
    /// Edge length of a newly placed bubble, in points.
    pub bubble_size: f32,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            stroke_color: [1.0, 0.0, 0.0],
            fill_color: None,
            line_width: 1.5,
            font_size: 10.0,
            bubble_size: 24.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Recover numbered FreeText annotations that this application did not
    /// write when a drawing has no sidecar.
    pub auto_import_external: bool,
    pub marker: MarkerStyle,
}

impl Default for Preferences {
    fn default() -> Self {
        Self { auto_import_external: true, marker: MarkerStyle::default() }
    }
}

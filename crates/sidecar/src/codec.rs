//! JSON encoding of a [`BubbleStore`].
//!
//! ```json
//! {
//!   "version": 1,
//!   "next_number": 4,
//!   "rotations": { "0": 90 },
//!   "bubbles": [
//!     { "id": "…", "number": 1, "page_index": 0,
//!       "anchor": { "x": 10.0, "y": 10.0, "width": 20.0, "height": 20.0 },
//!       "note": "Ø5.00 ±0.05" }
//!   ]
//! }
//! ```

use fai_model::geometry::{Rect, Rotation};
use fai_model::{Bubble, BubbleId, BubbleStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

/// Newest schema this build reads and the one it writes.
pub const SIDECAR_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorruptSidecar {
    #[error("malformed sidecar: {0}")]
    Malformed(String),
    #[error("sidecar version {found} is not supported (this build reads up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("bubble id {0} appears more than once")]
    DuplicateId(BubbleId),
    #[error("bubble {0} has number 0; numbers start at 1")]
    InvalidNumber(BubbleId),
    #[error("page {page} has invalid rotation {degrees}")]
    InvalidRotation { page: u32, degrees: i64 },
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct SidecarDocument {
    version: u32,
    #[serde(default)]
    next_number: Option<u32>,
    #[serde(default)]
    rotations: BTreeMap<String, i64>,
    bubbles: Vec<SidecarBubble>,
}

#[derive(Serialize, Deserialize)]
struct SidecarBubble {
    id: Uuid,
    number: u32,
    page_index: u32,
    anchor: Rect,
    #[serde(default)]
    note: Option<String>,
}

/// JSON has no infinities or NaN; such an anchor would be written as `null`
/// and the sidecar could not be read back, so it is refused here.
pub fn encode(store: &BubbleStore) -> Result<Vec<u8>, serde_json::Error> {
    if let Some(bubble) = store.bubbles().iter().find(|bubble| !bubble.anchor.is_finite()) {
        return Err(serde::ser::Error::custom(format!(
            "bubble #{} has a non-finite anchor",
            bubble.number
        )));
    }

    let document = SidecarDocument {
        version: SIDECAR_VERSION,
        next_number: Some(store.next_number()),
        rotations: store
            .rotations()
            .iter()
            .map(|(page, rotation)| (page.to_string(), i64::from(*rotation)))
            .collect(),
        bubbles: store
            .bubbles()
            .iter()
            .map(|bubble| SidecarBubble {
                id: *bubble.id.as_uuid(),
                number: bubble.number,
                page_index: bubble.page_index,
                anchor: bubble.anchor,
                note: bubble.note.clone(),
            })
            .collect(),
    };

    serde_json::to_vec_pretty(&document)
}

pub fn decode(bytes: &[u8]) -> Result<BubbleStore, CorruptSidecar> {
    let probe: VersionProbe = serde_json::from_slice(bytes).map_err(malformed)?;
    if probe.version == 0 || probe.version > SIDECAR_VERSION {
        return Err(CorruptSidecar::UnsupportedVersion {
            found: probe.version,
            supported: SIDECAR_VERSION,
        });
    }

    let document: SidecarDocument = serde_json::from_slice(bytes).map_err(malformed)?;

    let mut rotations = BTreeMap::new();
    for (key, degrees) in document.rotations {
        let page: u32 = key
            .parse()
            .map_err(|_| CorruptSidecar::Malformed(format!("rotation key {key:?} is not a page index")))?;
        let rotation = Rotation::try_from(degrees)
            .map_err(|_| CorruptSidecar::InvalidRotation { page, degrees })?;
        rotations.insert(page, rotation);
    }

    let mut seen = HashSet::with_capacity(document.bubbles.len());
    let mut bubbles = Vec::with_capacity(document.bubbles.len());
    for entry in document.bubbles {
        let id = BubbleId::from_uuid(entry.id);
        if !seen.insert(id) {
            return Err(CorruptSidecar::DuplicateId(id));
        }
        if entry.number == 0 {
            return Err(CorruptSidecar::InvalidNumber(id));
        }
        bubbles.push(Bubble::restored(id, entry.number, entry.page_index, entry.anchor, entry.note));
    }

    let max_number = bubbles.iter().map(|bubble| bubble.number).max().unwrap_or(0);
    let next_number = match document.next_number {
        Some(next) if next > max_number => next,
        Some(next) => {
            tracing::warn!(next, max_number, "sidecar next_number not past highest bubble; repairing");
            max_number.saturating_add(1)
        }
        None => max_number.saturating_add(1),
    };

    Ok(BubbleStore::from_parts(bubbles, rotations, next_number))
}

fn malformed(error: serde_json::Error) -> CorruptSidecar {
    CorruptSidecar::Malformed(error.to_string())
}

//! Recover bubbles from FreeText annotations when a drawing has no sidecar.
//!
//! Markers this application exported carry [`MARKER_TAG`] and are always
//! taken. Other FreeText annotations whose label starts with a number are
//! "external": they are taken only when enabled, and never when they sit on
//! top of one of our own markers.

use crate::{is_marker, load, name_is, page_annotations, page_info, storage_rect, text_entry};
use crate::MARKER_TAG;
use fai_model::geometry::{Rect, Rotation};
use fai_model::{normalize_note, Bubble, BubbleId, BubbleStore, Preferences};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// External markers closer than this to one of ours are treated as the same marker.
const COLLISION_DISTANCE_PT: f32 = 15.0;

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^[#(\[]?(\d{1,6})(?:[)\]]|\s|$)(.*)$").expect("leading number pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub include_external: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { include_external: true }
    }
}

impl From<&Preferences> for ImportOptions {
    fn from(preferences: &Preferences) -> Self {
        Self { include_external: preferences.auto_import_external }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Annotations looked at, of any subtype.
    pub total_found: usize,
    pub imported: usize,
    /// Not a numbered FreeText, or external while external import is off.
    pub skipped: usize,
    /// External markers dropped for overlapping one of ours.
    pub collisions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub store: BubbleStore,
    pub stats: ImportStats,
}

struct Candidate {
    number: u32,
    note: Option<String>,
    anchor: Rect,
    internal: bool,
}

/// Build a store from the annotations in `bytes`. Never fails: a file that
/// cannot be parsed, or holds nothing recognizable, yields an empty store.
pub fn import_bubbles(bytes: &[u8], options: &ImportOptions) -> ImportOutcome {
    let doc = match load(bytes) {
        Ok(doc) => doc,
        Err(err) => {
            tracing::warn!(error = %err, "drawing unreadable; starting with no bubbles");
            return ImportOutcome { store: BubbleStore::new(), stats: ImportStats::default() };
        }
    };

    let mut stats = ImportStats::default();
    let mut rotations = BTreeMap::new();
    let mut bubbles = Vec::new();

    for (page_number, page_id) in doc.get_pages() {
        let page_index = page_number.saturating_sub(1);
        let page = page_info(&doc, page_id);
        if page.rotation != Rotation::Deg0 {
            rotations.insert(page_index, page.rotation);
        }

        let before = bubbles.len();
        let mut candidates = Vec::new();
        for (_, annotation) in page_annotations(&doc, page_id) {
            stats.total_found += 1;

            if !name_is(annotation, b"Subtype", b"FreeText") {
                stats.skipped += 1;
                continue;
            }

            let label = [b"Contents".as_slice(), b"Subj".as_slice(), b"T".as_slice()]
                .into_iter()
                .filter_map(|key| text_entry(&doc, annotation, key))
                .find(|text| !text.trim().is_empty() && text != MARKER_TAG);
            let internal = is_marker(&doc, annotation);
            let parsed = label.as_deref().and_then(parse_label);
            let anchor = storage_rect(&doc, annotation, &page);

            let (Some((number, note)), Some(anchor)) = (parsed, anchor) else {
                stats.skipped += 1;
                continue;
            };

            // Our own labels are "<number> <note>" verbatim; only hand-typed
            // labels get their separators tidied.
            let note =
                if internal { note } else { note.and_then(|note| tidy_external_note(&note)) };
            candidates.push(Candidate { number, note, anchor, internal });
        }

        let ours: Vec<(f32, f32)> = candidates
            .iter()
            .filter(|candidate| candidate.internal)
            .map(|candidate| candidate.anchor.center())
            .collect();

        for candidate in candidates {
            if !candidate.internal {
                if !options.include_external {
                    stats.skipped += 1;
                    continue;
                }
                if overlaps_any(candidate.anchor, &ours) {
                    stats.collisions += 1;
                    continue;
                }
            }

            bubbles.push(Bubble::restored(
                BubbleId::new(),
                candidate.number,
                page_index,
                candidate.anchor,
                candidate.note,
            ));
        }

        tracing::debug!(
            page = page_index,
            found = bubbles.len() - before,
            "scanned page annotations"
        );
    }

    bubbles.sort_by_key(|bubble| (bubble.page_index, bubble.number));
    stats.imported = bubbles.len();
    tracing::info!(
        imported = stats.imported,
        skipped = stats.skipped,
        collisions = stats.collisions,
        "recovered bubbles from drawing annotations"
    );

    ImportOutcome { store: BubbleStore::from_parts(bubbles, rotations, 1), stats }
}

fn overlaps_any(anchor: Rect, ours: &[(f32, f32)]) -> bool {
    let (x, y) = anchor.center();
    ours.iter().any(|&(ox, oy)| (x - ox).hypot(y - oy) <= COLLISION_DISTANCE_PT)
}

/// Split a marker label into its number and the text after it.
///
/// `"12"`, `"#12"` and `"(12) Ø5.00"` all parse; `"12.5"`, `"3-5"` and
/// `"Rev 2"` do not. The note is the label after the number and the one
/// character ending it, with outer whitespace trimmed and nothing else
/// touched.
pub fn parse_label(raw: &str) -> Option<(u32, Option<String>)> {
    let captures = LEADING_NUMBER.captures(raw.trim_start())?;

    let number: u32 = captures.get(1)?.as_str().parse().ok()?;
    if number == 0 {
        return None;
    }

    let rest = captures.get(2).map_or("", |rest| rest.as_str());
    Some((number, normalize_note(Some(rest.to_owned()))))
}

/// Hand-typed labels often read `"5 - thread depth"` or `"8: Ø5.00"`, with
/// stray line breaks. Drop the separator and collapse the whitespace.
fn tidy_external_note(note: &str) -> Option<String> {
    let collapsed = note
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let rest = collapsed
        .strip_prefix(['-', ':', '\u{2010}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2212}'])
        .unwrap_or(&collapsed);

    normalize_note(Some(rest.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{annotated_document, blank_document, FreeTextSpec, PageSpec};

    fn letter() -> PageSpec {
        PageSpec::new(612.0, 792.0)
    }

    #[test]
    fn labels_with_leading_numbers_parse() {
        assert_eq!(parse_label("12"), Some((12, None)));
        assert_eq!(parse_label("#7"), Some((7, None)));
        assert_eq!(parse_label("(3)"), Some((3, None)));
        assert_eq!(parse_label("[4] 2X"), Some((4, Some("2X".to_owned()))));
        assert_eq!(parse_label("6 −0.05"), Some((6, Some("−0.05".to_owned()))));
        assert_eq!(parse_label("7 - datum A"), Some((7, Some("- datum A".to_owned()))));
        assert_eq!(parse_label("\t8\r\n2X  R0.25 "), Some((8, Some("2X  R0.25".to_owned()))));
    }

    #[test]
    fn external_notes_lose_separators_and_extra_whitespace() {
        assert_eq!(tidy_external_note("\u{2013} thread depth"), Some("thread depth".to_owned()));
        assert_eq!(tidy_external_note("\n: Ø5.00  ±0.05 "), Some("Ø5.00 ±0.05".to_owned()));
        assert_eq!(tidy_external_note(" - "), None);
    }

    #[test]
    fn labels_without_leading_numbers_are_rejected() {
        for label in ["", "Rev 2", "12.5", "3-5", "0", "1234567", "x12", "NOTE"] {
            assert_eq!(parse_label(label), None, "label {label:?}");
        }
    }

    #[test]
    fn external_free_text_is_recovered_in_page_and_number_order() {
        let bytes = annotated_document(
            &[letter(), letter().rotate(90)],
            &[
                FreeTextSpec::new(1, [100.0, 700.0, 120.0, 720.0], "2 slot width"),
                FreeTextSpec::new(0, [10.0, 752.0, 30.0, 772.0], "9"),
                FreeTextSpec::new(0, [50.0, 50.0, 200.0, 80.0], "GENERAL NOTES"),
                FreeTextSpec::new(1, [300.0, 300.0, 320.0, 320.0], "1"),
            ],
        );

        let outcome = import_bubbles(&bytes, &ImportOptions::default());
        let store = outcome.store;

        let summary: Vec<(u32, u32)> =
            store.bubbles().iter().map(|bubble| (bubble.page_index, bubble.number)).collect();
        assert_eq!(summary, vec![(0, 9), (1, 1), (1, 2)]);
        assert_eq!(store.next_number(), 10);
        assert_eq!(store.rotation(1), Rotation::Deg90);
        assert_eq!(store.rotation(0), Rotation::Deg0);

        let nine = &store.bubbles()[0];
        assert_eq!(nine.anchor, Rect::new(10.0, 20.0, 20.0, 20.0));
        assert_eq!(store.bubbles()[2].note.as_deref(), Some("slot width"));

        assert_eq!(
            outcome.stats,
            ImportStats { total_found: 4, imported: 3, skipped: 1, collisions: 0 }
        );
    }

    #[test]
    fn external_import_can_be_disabled() {
        let bytes = annotated_document(
            &[letter()],
            &[
                FreeTextSpec::new(0, [10.0, 10.0, 30.0, 30.0], "4"),
                FreeTextSpec::new(0, [100.0, 10.0, 120.0, 30.0], "5").title(MARKER_TAG),
            ],
        );

        let outcome = import_bubbles(&bytes, &ImportOptions { include_external: false });

        let numbers: Vec<u32> = outcome.store.bubbles().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![5]);
        assert_eq!(outcome.stats.skipped, 1);
    }

    #[test]
    fn external_marker_on_top_of_ours_is_dropped() {
        let bytes = annotated_document(
            &[letter()],
            &[
                FreeTextSpec::new(0, [100.0, 100.0, 124.0, 124.0], "3").title(MARKER_TAG),
                FreeTextSpec::new(0, [105.0, 104.0, 129.0, 128.0], "3"),
                FreeTextSpec::new(0, [300.0, 300.0, 324.0, 324.0], "4"),
            ],
        );

        let outcome = import_bubbles(&bytes, &ImportOptions::default());

        let numbers: Vec<u32> = outcome.store.bubbles().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![3, 4]);
        assert_eq!(outcome.stats.collisions, 1);
    }

    #[test]
    fn unreadable_or_empty_drawings_yield_empty_store() {
        let garbage = import_bubbles(b"%PDF-1.7 truncated", &ImportOptions::default());
        assert!(garbage.store.is_empty());
        assert_eq!(garbage.store.next_number(), 1);

        let blank = import_bubbles(&blank_document(&[letter()]), &ImportOptions::default());
        assert!(blank.store.is_empty());
        assert_eq!(blank.stats, ImportStats::default());
    }
}

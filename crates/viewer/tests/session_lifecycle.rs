use fai_model::geometry::Rect;
use fai_model::{BubblePatch, Preferences};
use fai_pdf::fixtures::{annotated_document, blank_document, FreeTextSpec, PageSpec};
use fai_sidecar::{sidecar_path, CorruptSidecar, SidecarError};
use fai_viewer::{ControllerError, LoadSource, ViewerController, ViewerState};
use std::fs;
use std::path::{Path, PathBuf};

fn write_drawing(dir: &Path, name: &str, bytes: Vec<u8>) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("drawing should be written");
    path
}

fn two_page_drawing(dir: &Path) -> PathBuf {
    write_drawing(
        dir,
        "housing.pdf",
        blank_document(&[PageSpec::new(612.0, 792.0), PageSpec::new(600.0, 800.0)]),
    )
}

fn summary(controller: &ViewerController) -> Vec<(u32, u32, Option<String>)> {
    let session = controller.session().expect("session should be open");
    let mut list: Vec<_> = session
        .store
        .bubbles()
        .iter()
        .map(|bubble| (bubble.page_index, bubble.number, bubble.note.clone()))
        .collect();
    list.sort_by_key(|(page, number, _)| (*page, *number));
    list
}

#[test]
fn removed_numbers_stay_retired_across_save_and_reopen() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = two_page_drawing(temp.path());
    let mut controller = ViewerController::default();
    controller.open(&drawing).expect("open");

    let first = controller.add_bubble(0, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");
    let second = controller.add_bubble(0, Rect::new(50.0, 50.0, 20.0, 20.0), None).expect("add");
    assert_eq!((first.number, second.number), (1, 2));

    controller.remove_bubble(first.id).expect("remove");
    let third = controller.add_bubble(0, Rect::new(90.0, 90.0, 20.0, 20.0), None).expect("add");
    assert_eq!(third.number, 3);

    controller.save().expect("save");
    controller.open(&drawing).expect("reopen");
    let fourth = controller.add_bubble(1, Rect::new(5.0, 5.0, 20.0, 20.0), None).expect("add");
    assert_eq!(fourth.number, 4);
}

#[test]
fn reopening_after_export_in_place_does_not_duplicate_bubbles() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = two_page_drawing(temp.path());
    let mut controller = ViewerController::default();
    controller.open(&drawing).expect("open");

    controller
        .add_bubble(0, Rect::new(10.0, 10.0, 24.0, 24.0), Some("Ø12.70 +0.05/-0".to_owned()))
        .expect("add");
    controller.add_bubble(1, Rect::new(300.0, 400.0, 24.0, 24.0), None).expect("add");
    controller.set_page_rotation(1, 270).expect("rotate");

    // Exporting over the drawing itself is the worst case for duplicates.
    let report = controller.export(&drawing).expect("export");
    assert_eq!(report.exported, 2);
    controller.save().expect("save");
    let before = controller.session().expect("session").store.clone();

    let loaded = controller.open(&drawing).expect("reopen");

    assert_eq!(loaded.source, LoadSource::Sidecar);
    assert_eq!(controller.session().expect("session").store, before);
}

#[test]
fn import_after_export_recovers_numbers_and_notes() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = two_page_drawing(temp.path());
    let exported = temp.path().join("housing-bubbled.pdf");
    let mut controller = ViewerController::default();
    controller.open(&drawing).expect("open");

    controller.add_bubble(0, Rect::new(40.0, 40.0, 24.0, 24.0), Some("2X".to_owned())).expect("add");
    let dropped = controller.add_bubble(0, Rect::new(80.0, 40.0, 24.0, 24.0), None).expect("add");
    controller
        .add_bubble(1, Rect::new(120.0, 500.0, 24.0, 24.0), Some("R0.5 TYP".to_owned()))
        .expect("add");
    controller.remove_bubble(dropped.id).expect("remove");
    controller
        .update_bubble(dropped.id, BubblePatch::default().note("gone"))
        .expect_err("removed bubble cannot be updated");

    let expected = summary(&controller);
    controller.export(&exported).expect("export");

    let mut fresh = ViewerController::default();
    let loaded = fresh.open(&exported).expect("open exported copy");

    assert!(matches!(loaded.source, LoadSource::Imported(_)));
    assert_eq!(summary(&fresh), expected);
    assert_eq!(fresh.session().expect("session").store.next_number(), 4);
}

#[test]
fn newer_sidecar_fails_load_and_is_kept_on_recovery() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = two_page_drawing(temp.path());
    let sidecar = sidecar_path(&drawing);
    let newer = br#"{"version": 7, "next_number": 1, "rotations": {}, "bubbles": []}"#;
    fs::write(&sidecar, newer).expect("write sidecar");

    let mut controller = ViewerController::default();
    let err = controller.open(&drawing).expect_err("newer sidecar should not load");

    assert!(matches!(
        err,
        ControllerError::Sidecar(SidecarError::Corrupt(CorruptSidecar::UnsupportedVersion {
            found: 7,
            ..
        }))
    ));
    assert_eq!(controller.state(), ViewerState::LoadFailed);
    assert!(controller.session().is_none());
    assert!(matches!(
        controller.add_bubble(0, Rect::new(0.0, 0.0, 5.0, 5.0), None),
        Err(ControllerError::NotLoaded)
    ));
    assert_eq!(fs::read(&sidecar).expect("sidecar still there"), newer);

    controller.recover_by_import().expect("recover");
    assert_eq!(controller.state(), ViewerState::Ready);
    assert!(controller.is_dirty());
    assert_eq!(fs::read(&sidecar).expect("sidecar untouched until save"), newer);

    controller.save().expect("save");
    let mut backup = sidecar.clone().into_os_string();
    backup.push(".corrupt");
    assert_eq!(fs::read(PathBuf::from(backup)).expect("backup copy"), newer);

    let rewritten: serde_json::Value =
        serde_json::from_slice(&fs::read(&sidecar).expect("new sidecar")).expect("json");
    assert_eq!(rewritten["version"], 1);
}

#[test]
fn export_reports_exactly_the_bubble_on_a_missing_page() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = two_page_drawing(temp.path());
    let mut controller = ViewerController::default();
    controller.open(&drawing).expect("open");

    controller.add_bubble(0, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");
    let stray = controller.add_bubble(4, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");
    controller.add_bubble(1, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");

    let output = temp.path().join("out.pdf");
    let report = controller.export(&output).expect("export should still succeed");

    assert_eq!(report.exported, 2);
    let failure = report.failure.expect("a warning should be reported");
    assert_eq!(failure.skipped, vec![stray.id]);
    assert!(output.exists());
    assert_eq!(controller.session().expect("session").store.len(), 3);
    assert!(!sidecar_path(&drawing).exists());
}

#[test]
fn export_of_unreadable_source_writes_nothing() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = two_page_drawing(temp.path());
    let mut controller = ViewerController::default();
    controller.open(&drawing).expect("open");
    controller.add_bubble(0, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");

    fs::write(&drawing, b"overwritten by something else").expect("clobber drawing");
    let output = temp.path().join("out.pdf");
    let err = controller.export(&output).expect_err("source no longer parses");

    assert!(matches!(err, ControllerError::Export(_)));
    assert!(!output.exists());
    assert_eq!(controller.state(), ViewerState::Ready);
}

#[test]
fn background_export_uses_a_snapshot_and_blocks_save() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = two_page_drawing(temp.path());
    let output = temp.path().join("background.pdf");
    let mut controller = ViewerController::default();
    controller.open(&drawing).expect("open");
    controller.add_bubble(0, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");

    controller.begin_export(&output).expect("begin export");
    assert_eq!(controller.state(), ViewerState::Exporting);

    let late = controller.add_bubble(0, Rect::new(60.0, 10.0, 20.0, 20.0), None);
    assert!(late.is_ok(), "edits stay allowed while exporting");
    assert!(matches!(controller.save(), Err(ControllerError::Busy)));
    assert!(matches!(controller.open(&drawing), Err(ControllerError::Busy)));
    assert!(matches!(controller.begin_export(&output), Err(ControllerError::Busy)));

    let report = controller.wait_export().expect("export should finish");
    assert_eq!(report.exported, 1);
    assert_eq!(report.output, output);
    assert_eq!(controller.state(), ViewerState::Ready);
    assert!(controller.poll_export().is_none());

    controller.save().expect("save after export");
    assert_eq!(controller.session().expect("session").store.len(), 2);
}

#[test]
fn failed_save_keeps_session_and_dirty_flag() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = two_page_drawing(temp.path());
    let mut controller = ViewerController::default();
    controller.open(&drawing).expect("open");
    controller.add_bubble(0, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");

    // A directory squatting on the sidecar path makes the final rename fail.
    fs::create_dir(sidecar_path(&drawing)).expect("create blocking dir");
    let err = controller.save().expect_err("save should fail");

    assert!(matches!(err, ControllerError::Sidecar(SidecarError::Io(_))));
    assert_eq!(controller.state(), ViewerState::Ready);
    assert!(controller.is_dirty());
    assert_eq!(controller.session().expect("session").store.len(), 1);
}

#[test]
fn external_annotations_follow_import_preference() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let drawing = write_drawing(
        temp.path(),
        "legacy.pdf",
        annotated_document(
            &[PageSpec::new(612.0, 792.0)],
            &[
                FreeTextSpec::new(0, [100.0, 100.0, 124.0, 124.0], "1"),
                FreeTextSpec::new(0, [200.0, 100.0, 224.0, 124.0], "2 BSC"),
            ],
        ),
    );

    let mut lenient = ViewerController::default();
    lenient.open(&drawing).expect("open");
    assert_eq!(summary(&lenient), vec![(0, 1, None), (0, 2, Some("BSC".to_owned()))]);
    assert!(lenient.is_dirty());

    let strict_prefs = Preferences { auto_import_external: false, ..Preferences::default() };
    let mut strict = ViewerController::new(strict_prefs);
    strict.open(&drawing).expect("open");
    assert!(summary(&strict).is_empty());
    assert!(!strict.is_dirty());
}

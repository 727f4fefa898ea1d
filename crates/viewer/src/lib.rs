//! Drawing session controller.
//!
//! Owns the live [`DrawingSession`] for one drawing and moves it through
//! open, edit, save and export. The GUI (or the `fai` shell) only calls into
//! this type; nothing it displays is ever read back as the source of truth.

mod worker;

pub use worker::ExportReport;

use fai_model::geometry::{self, PageSize, Rect, Rotation};
use fai_model::{
    reading_order, Bubble, BubbleId, BubblePatch, BubbleStore, ModelError, Preferences,
};
use fai_pdf::{import_bubbles, ExportError, ImportOptions, ImportStats, PageInfo, PdfError};
use fai_sidecar::SidecarError;
use std::fs;
use std::path::{Path, PathBuf};
use worker::{ExportJob, ExportSnapshot, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    Unloaded,
    Loading,
    Ready,
    LoadFailed,
    Editing,
    Saving,
    Exporting,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("no drawing is open")]
    NotLoaded,
    #[error("an export is still running")]
    Busy,
    #[error("there is no failed load to recover from")]
    NothingToRecover,
    #[error("no export is running")]
    NoExportRunning,
    #[error("cannot read drawing {}: {source}", .path.display())]
    DrawingUnreadable { path: PathBuf, source: PdfError },
    #[error("page {page} does not exist (drawing has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("export worker could not be started: {0}")]
    WorkerSpawn(std::io::Error),
    #[error("export worker stopped without reporting a result")]
    WorkerLost,
}

/// The live aggregate for one open drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingSession {
    pub source_path: PathBuf,
    /// Page geometry read from the drawing; not persisted.
    pub pages: Vec<PageInfo>,
    pub store: BubbleStore,
}

impl DrawingSession {
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn page_size(&self, page_index: u32) -> Result<PageSize, ControllerError> {
        self.pages.get(page_index as usize).map(PageInfo::size).ok_or(
            ControllerError::PageOutOfRange { page: page_index, page_count: self.page_count() },
        )
    }

    /// Bubble anchor as currently displayed, or `None` when the page is unknown.
    pub fn view_rect(&self, bubble: &Bubble) -> Option<Rect> {
        let size = self.page_size(bubble.page_index).ok()?;
        Some(geometry::to_view(bubble.anchor, self.store.rotation(bubble.page_index), size))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    Sidecar,
    Imported(ImportStats),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub source: LoadSource,
    pub bubbles: usize,
    pub pages: usize,
}

struct FailedLoad {
    path: PathBuf,
    pages: Vec<PageInfo>,
    sidecar_unreadable: bool,
}

pub struct ViewerController {
    state: ViewerState,
    preferences: Preferences,
    session: Option<DrawingSession>,
    failed: Option<FailedLoad>,
    dirty: bool,
    /// Set after a corrupt sidecar was bypassed; the next save copies it aside first.
    preserve_corrupt: bool,
    export_job: Option<ExportJob>,
}

impl Default for ViewerController {
    fn default() -> Self {
        Self::new(Preferences::default())
    }
}

impl ViewerController {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            state: ViewerState::Unloaded,
            preferences,
            session: None,
            failed: None,
            dirty: false,
            preserve_corrupt: false,
            export_job: None,
        }
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    pub fn session(&self) -> Option<&DrawingSession> {
        self.session.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Open a drawing, replacing any session already open.
    ///
    /// Bubbles come from the sidecar when there is one, otherwise from the
    /// drawing's own annotations. A sidecar that cannot be decoded leaves the
    /// controller in [`ViewerState::LoadFailed`] until the caller picks a
    /// recovery.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<LoadReport, ControllerError> {
        self.ensure_idle()?;
        let path = path.as_ref().to_path_buf();

        self.state = ViewerState::Loading;
        self.session = None;
        self.failed = None;
        self.dirty = false;
        self.preserve_corrupt = false;

        let drawing = fs::read(&path)
            .map_err(PdfError::from)
            .and_then(|bytes| fai_pdf::inspect(&bytes).map(|pages| (bytes, pages)));
        let (bytes, pages) = match drawing {
            Ok(drawing) => drawing,
            Err(source) => {
                tracing::warn!(path = %path.display(), error = %source, "drawing unreadable");
                self.fail(path.clone(), Vec::new(), false);
                return Err(ControllerError::DrawingUnreadable { path, source });
            }
        };

        let (store, source) = match fai_sidecar::load_sidecar(&path) {
            Ok(Some(store)) => (store, LoadSource::Sidecar),
            Ok(None) => {
                let outcome = import_bubbles(&bytes, &ImportOptions::from(&self.preferences));
                (outcome.store, LoadSource::Imported(outcome.stats))
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "sidecar unreadable");
                self.fail(path, pages, true);
                return Err(err.into());
            }
        };

        let dirty = matches!(source, LoadSource::Imported(_)) && !store.is_empty();
        Ok(self.install(path, pages, store, source, dirty))
    }

    /// Leave [`ViewerState::LoadFailed`] by recovering bubbles from the
    /// drawing's annotations, as if no sidecar existed.
    pub fn recover_by_import(&mut self) -> Result<LoadReport, ControllerError> {
        let failed = self.take_failed()?;
        let bytes = fs::read(&failed.path).unwrap_or_default();
        let outcome = import_bubbles(&bytes, &ImportOptions::from(&self.preferences));

        self.preserve_corrupt = failed.sidecar_unreadable;
        Ok(self.install(
            failed.path,
            failed.pages,
            outcome.store,
            LoadSource::Imported(outcome.stats),
            true,
        ))
    }

    /// Leave [`ViewerState::LoadFailed`] with no bubbles at all. Pages keep
    /// the rotation the drawing itself declares.
    pub fn recover_empty(&mut self) -> Result<LoadReport, ControllerError> {
        let failed = self.take_failed()?;

        let rotations = failed
            .pages
            .iter()
            .enumerate()
            .filter(|(_, page)| page.rotation != Rotation::Deg0)
            .map(|(index, page)| (index as u32, page.rotation))
            .collect();
        let store = BubbleStore::from_parts(Vec::new(), rotations, 1);

        self.preserve_corrupt = failed.sidecar_unreadable;
        Ok(self.install(failed.path, failed.pages, store, LoadSource::Empty, true))
    }

    pub fn add_bubble(
        &mut self,
        page_index: u32,
        anchor: Rect,
        note: Option<String>,
    ) -> Result<Bubble, ControllerError> {
        self.edit(|session| Ok(session.store.add(page_index, anchor, note)))
    }

    /// Place a bubble from a rectangle drawn on the page as displayed.
    pub fn add_bubble_in_view(
        &mut self,
        page_index: u32,
        view_rect: Rect,
        note: Option<String>,
    ) -> Result<Bubble, ControllerError> {
        self.edit(|session| {
            let size = session.page_size(page_index)?;
            let rotation = session.store.rotation(page_index);
            let anchor = geometry::to_storage(view_rect, rotation, size);
            Ok(session.store.add(page_index, anchor, note))
        })
    }

    pub fn update_bubble(
        &mut self,
        id: BubbleId,
        patch: BubblePatch,
    ) -> Result<Bubble, ControllerError> {
        self.edit(|session| Ok(session.store.update(id, patch)?.clone()))
    }

    pub fn remove_bubble(&mut self, id: BubbleId) -> Result<Bubble, ControllerError> {
        self.edit(|session| Ok(session.store.remove(id)?))
    }

    /// Renumber a page in reading order as the page is displayed.
    pub fn renumber_page(&mut self, page_index: u32) -> Result<usize, ControllerError> {
        self.edit(|session| {
            let rotation = session.store.rotation(page_index);
            let renumbered = match session.page_size(page_index) {
                Ok(size) => session.store.renumber_by(page_index, |a, b| {
                    let (a, b) = (view_bubble(a, rotation, size), view_bubble(b, rotation, size));
                    reading_order(&a, &b)
                }),
                Err(_) => session.store.renumber_by(page_index, reading_order),
            };
            Ok(renumbered)
        })
    }

    pub fn set_page_rotation(
        &mut self,
        page_index: u32,
        degrees: i64,
    ) -> Result<Rotation, ControllerError> {
        self.edit(|session| Ok(session.store.set_rotation(page_index, degrees)?))
    }

    /// Write the session to its sidecar. On failure nothing in memory changes.
    pub fn save(&mut self) -> Result<PathBuf, ControllerError> {
        self.ensure_idle()?;
        let session = self.session.as_ref().ok_or(ControllerError::NotLoaded)?;

        self.state = ViewerState::Saving;
        let result = save_session(session, self.preserve_corrupt);
        self.state = ViewerState::Ready;

        let path = result?;
        self.preserve_corrupt = false;
        self.dirty = false;
        tracing::info!(path = %path.display(), bubbles = session.store.len(), "saved bubbles");

        Ok(path)
    }

    /// Export synchronously. The sidecar and the live session are untouched.
    pub fn export(&mut self, output: impl Into<PathBuf>) -> Result<ExportReport, ControllerError> {
        let snapshot = self.snapshot(output.into())?;

        self.state = ViewerState::Exporting;
        let result = worker::run_export(&snapshot);
        self.state = ViewerState::Ready;

        Ok(result?)
    }

    /// Start an export on a worker thread. Edits stay allowed while it runs;
    /// saving, opening and another export report [`ControllerError::Busy`].
    pub fn begin_export(&mut self, output: impl Into<PathBuf>) -> Result<(), ControllerError> {
        let snapshot = self.snapshot(output.into())?;

        let job = ExportJob::spawn(snapshot).map_err(ControllerError::WorkerSpawn)?;
        self.export_job = Some(job);
        self.state = ViewerState::Exporting;
        Ok(())
    }

    /// Collect a finished background export, or `None` while it is running
    /// (or when none was started).
    pub fn poll_export(&mut self) -> Option<Result<ExportReport, ControllerError>> {
        let status = self.export_job.as_mut()?.poll();
        if matches!(status, JobStatus::Running) {
            return None;
        }

        self.export_job = None;
        Some(self.finish_export(status))
    }

    /// Block until the background export finishes.
    pub fn wait_export(&mut self) -> Result<ExportReport, ControllerError> {
        let job = self.export_job.take().ok_or(ControllerError::NoExportRunning)?;
        let status = job.wait();
        self.finish_export(status)
    }

    /// Drop the session. Returns `true` when unsaved edits were discarded.
    pub fn close(&mut self) -> Result<bool, ControllerError> {
        self.ensure_idle()?;

        let discarded = self.session.is_some() && self.dirty;
        if discarded {
            tracing::warn!("closing with unsaved bubble edits");
        }

        self.session = None;
        self.failed = None;
        self.dirty = false;
        self.preserve_corrupt = false;
        self.state = ViewerState::Unloaded;
        Ok(discarded)
    }

    fn ensure_idle(&self) -> Result<(), ControllerError> {
        if self.export_job.is_some() {
            return Err(ControllerError::Busy);
        }
        Ok(())
    }

    fn edit<R>(
        &mut self,
        apply: impl FnOnce(&mut DrawingSession) -> Result<R, ControllerError>,
    ) -> Result<R, ControllerError> {
        let session = self.session.as_mut().ok_or(ControllerError::NotLoaded)?;

        let resting = self.state;
        if resting == ViewerState::Ready {
            self.state = ViewerState::Editing;
        }
        let result = apply(session);
        self.state = resting;

        if result.is_ok() {
            self.dirty = true;
        }
        result
    }

    fn snapshot(&self, output: PathBuf) -> Result<ExportSnapshot, ControllerError> {
        self.ensure_idle()?;
        let session = self.session.as_ref().ok_or(ControllerError::NotLoaded)?;

        Ok(ExportSnapshot {
            store: session.store.clone(),
            source: session.source_path.clone(),
            output,
            style: self.preferences.marker.clone(),
        })
    }

    fn finish_export(&mut self, status: JobStatus) -> Result<ExportReport, ControllerError> {
        self.state =
            if self.session.is_some() { ViewerState::Ready } else { ViewerState::Unloaded };

        match status {
            JobStatus::Finished(result) => Ok(result?),
            JobStatus::Running | JobStatus::Lost => Err(ControllerError::WorkerLost),
        }
    }

    fn fail(&mut self, path: PathBuf, pages: Vec<PageInfo>, sidecar_unreadable: bool) {
        self.failed = Some(FailedLoad { path, pages, sidecar_unreadable });
        self.state = ViewerState::LoadFailed;
    }

    fn take_failed(&mut self) -> Result<FailedLoad, ControllerError> {
        if self.state != ViewerState::LoadFailed {
            return Err(ControllerError::NothingToRecover);
        }
        self.failed.take().ok_or(ControllerError::NothingToRecover)
    }

    fn install(
        &mut self,
        source_path: PathBuf,
        pages: Vec<PageInfo>,
        store: BubbleStore,
        source: LoadSource,
        dirty: bool,
    ) -> LoadReport {
        let report = LoadReport { source, bubbles: store.len(), pages: pages.len() };
        tracing::info!(
            path = %source_path.display(),
            bubbles = report.bubbles,
            pages = report.pages,
            "drawing opened"
        );

        self.session = Some(DrawingSession { source_path, pages, store });
        self.dirty = dirty;
        self.state = ViewerState::Ready;
        report
    }
}

fn save_session(session: &DrawingSession, preserve_corrupt: bool) -> Result<PathBuf, SidecarError> {
    if preserve_corrupt {
        fai_sidecar::preserve_corrupt_sidecar(&session.source_path)?;
    }
    fai_sidecar::save_sidecar(&session.source_path, &session.store)
}

fn view_bubble(bubble: &Bubble, rotation: Rotation, size: PageSize) -> Bubble {
    Bubble { anchor: geometry::to_view(bubble.anchor, rotation, size), ..bubble.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fai_pdf::fixtures::{blank_document, PageSpec};

    fn drawing(dir: &Path, pages: &[PageSpec]) -> PathBuf {
        let path = dir.join("drawing.pdf");
        fs::write(&path, blank_document(pages)).expect("write drawing");
        path
    }

    fn opened(dir: &Path) -> ViewerController {
        let path = drawing(dir, &[PageSpec::new(600.0, 800.0), PageSpec::new(612.0, 792.0)]);
        let mut controller = ViewerController::default();
        controller.open(&path).expect("open should succeed");
        controller
    }

    #[test]
    fn starts_unloaded_and_rejects_edits() {
        let mut controller = ViewerController::default();

        assert_eq!(controller.state(), ViewerState::Unloaded);
        assert!(matches!(
            controller.add_bubble(0, Rect::new(0.0, 0.0, 10.0, 10.0), None),
            Err(ControllerError::NotLoaded)
        ));
        assert!(matches!(controller.save(), Err(ControllerError::NotLoaded)));
    }

    #[test]
    fn open_without_sidecar_imports_and_reaches_ready() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let controller = opened(temp.path());

        assert_eq!(controller.state(), ViewerState::Ready);
        assert!(!controller.is_dirty());
        let session = controller.session().expect("session");
        assert_eq!(session.page_count(), 2);
        assert!(session.store.is_empty());
    }

    #[test]
    fn edits_mark_dirty_and_save_clears_it() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut controller = opened(temp.path());

        let bubble =
            controller.add_bubble(0, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");
        assert!(controller.is_dirty());
        assert_eq!(controller.state(), ViewerState::Ready);

        controller
            .update_bubble(bubble.id, BubblePatch::default().note("THRU"))
            .expect("update");
        let path = controller.save().expect("save");

        assert!(!controller.is_dirty());
        assert!(path.to_string_lossy().ends_with("drawing.pdf.as9102_bubbles.json"));
    }

    #[test]
    fn view_placement_uses_page_rotation() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut controller = opened(temp.path());

        controller.set_page_rotation(0, 90).expect("rotate");
        let bubble = controller
            .add_bubble_in_view(0, Rect::new(100.0, 100.0, 30.0, 30.0), None)
            .expect("add in view");

        assert_eq!(bubble.anchor, Rect::new(100.0, 670.0, 30.0, 30.0));
        let session = controller.session().expect("session");
        assert_eq!(session.view_rect(&bubble), Some(Rect::new(100.0, 100.0, 30.0, 30.0)));
    }

    #[test]
    fn view_placement_needs_a_known_page() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut controller = opened(temp.path());

        let err = controller
            .add_bubble_in_view(5, Rect::new(0.0, 0.0, 10.0, 10.0), None)
            .expect_err("page 5 does not exist");
        assert!(matches!(err, ControllerError::PageOutOfRange { page: 5, page_count: 2 }));
        assert!(!controller.is_dirty());
    }

    #[test]
    fn invalid_rotation_is_rejected_without_dirtying() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut controller = opened(temp.path());

        let err = controller.set_page_rotation(0, 45).expect_err("45 is not a right angle");
        assert!(matches!(err, ControllerError::Model(ModelError::InvalidRotation(45))));
        assert!(!controller.is_dirty());
    }

    #[test]
    fn renumber_follows_displayed_reading_order() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut controller = opened(temp.path());

        // Upright, `left` reads first; turned a half turn, `right` does.
        let left = controller.add_bubble(0, Rect::new(10.0, 10.0, 20.0, 20.0), None).expect("add");
        let right =
            controller.add_bubble(0, Rect::new(500.0, 10.0, 20.0, 20.0), None).expect("add");
        controller.set_page_rotation(0, 180).expect("rotate");

        assert_eq!(controller.renumber_page(0).expect("renumber"), 2);

        let store = &controller.session().expect("session").store;
        assert_eq!(store.get(right.id).map(|b| b.number), Some(1));
        assert_eq!(store.get(left.id).map(|b| b.number), Some(2));
    }

    #[test]
    fn unreadable_drawing_fails_load_and_allows_empty_recovery() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = temp.path().join("missing.pdf");
        let mut controller = ViewerController::default();

        let err = controller.open(&path).expect_err("missing drawing");
        assert!(matches!(err, ControllerError::DrawingUnreadable { .. }));
        assert_eq!(controller.state(), ViewerState::LoadFailed);

        let report = controller.recover_empty().expect("recover");
        assert_eq!(report.source, LoadSource::Empty);
        assert_eq!(controller.state(), ViewerState::Ready);
        assert!(matches!(controller.recover_empty(), Err(ControllerError::NothingToRecover)));
    }

    #[test]
    fn empty_recovery_keeps_native_page_rotation() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = drawing(
            temp.path(),
            &[PageSpec::new(600.0, 800.0).rotate(90), PageSpec::new(600.0, 800.0)],
        );
        fs::write(fai_sidecar::sidecar_path(&path), b"{ not json").expect("write sidecar");
        let mut controller = ViewerController::default();

        assert!(controller.open(&path).is_err());
        controller.recover_empty().expect("recover");

        let store = &controller.session().expect("session").store;
        assert!(store.is_empty());
        assert_eq!(store.rotation(0), Rotation::Deg90);
        assert_eq!(store.rotation(1), Rotation::Deg0);

        let output = temp.path().join("out.pdf");
        controller.export(&output).expect("export");
        let pages = fai_pdf::inspect_file(&output).expect("inspect export");
        assert_eq!(pages[0].rotation, Rotation::Deg90);
    }

    #[test]
    fn save_refuses_non_finite_anchor() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut controller = opened(temp.path());
        controller
            .add_bubble(0, Rect::new(0.0, 0.0, f32::INFINITY, 10.0), None)
            .expect("add");

        let err = controller.save().expect_err("anchor cannot be stored");
        assert!(matches!(err, ControllerError::Sidecar(SidecarError::Serde(_))));
        assert!(controller.is_dirty());
        assert_eq!(controller.state(), ViewerState::Ready);
        let drawing = controller.session().expect("session").source_path.clone();
        assert!(!fai_sidecar::sidecar_exists(&drawing));
    }

    #[test]
    fn close_reports_discarded_edits() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut controller = opened(temp.path());
        controller.add_bubble(1, Rect::new(0.0, 0.0, 10.0, 10.0), None).expect("add");

        assert!(controller.close().expect("close"));
        assert_eq!(controller.state(), ViewerState::Unloaded);
        assert!(controller.session().is_none());
        assert!(!controller.close().expect("second close"));
    }

    #[test]
    fn wait_without_export_is_an_error() {
        let mut controller = ViewerController::default();
        assert!(controller.poll_export().is_none());
        assert!(matches!(controller.wait_export(), Err(ControllerError::NoExportRunning)));
    }
}

//! Export on a worker thread.
//!
//! The worker owns a snapshot of the store taken when the export started, so
//! edits made while it runs land in the live session and the next save, not
//! in the file being written.

use fai_model::{BubbleStore, MarkerStyle};
use fai_pdf::{export_bubbles, ExportError, ExportFailure};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub output: PathBuf,
    pub exported: usize,
    pub failure: Option<ExportFailure>,
}

/// Everything an export needs, detached from the live session.
#[derive(Debug, Clone)]
pub(crate) struct ExportSnapshot {
    pub store: BubbleStore,
    pub source: PathBuf,
    pub output: PathBuf,
    pub style: MarkerStyle,
}

pub(crate) fn run_export(snapshot: &ExportSnapshot) -> Result<ExportReport, ExportError> {
    let source = fs::read(&snapshot.source)?;
    let output = export_bubbles(&snapshot.store, &source, &snapshot.style)?;
    fai_sidecar::atomic_write(&snapshot.output, &output.bytes)?;

    Ok(ExportReport {
        output: snapshot.output.clone(),
        exported: output.exported,
        failure: output.failure,
    })
}

pub(crate) enum JobStatus {
    Running,
    Finished(Result<ExportReport, ExportError>),
    Lost,
}

pub(crate) struct ExportJob {
    receiver: Receiver<Result<ExportReport, ExportError>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ExportJob {
    pub fn spawn(snapshot: ExportSnapshot) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new().name("fai-export".to_owned()).spawn(move || {
            let result = run_export(&snapshot);
            // The controller may have been dropped; nobody is left to tell.
            let _ = sender.send(result);
        })?;

        Ok(Self { receiver, handle: Some(handle) })
    }

    pub fn poll(&mut self) -> JobStatus {
        match self.receiver.try_recv() {
            Ok(result) => {
                self.join();
                JobStatus::Finished(result)
            }
            Err(TryRecvError::Empty) => JobStatus::Running,
            Err(TryRecvError::Disconnected) => {
                self.join();
                JobStatus::Lost
            }
        }
    }

    pub fn wait(mut self) -> JobStatus {
        let status = match self.receiver.recv() {
            Ok(result) => JobStatus::Finished(result),
            Err(_) => JobStatus::Lost,
        };
        self.join();
        status
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("export worker panicked");
            }
        }
    }
}

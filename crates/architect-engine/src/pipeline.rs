use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use architect_contracts::event_payload;
use architect_contracts::events::EventWriter;
use architect_contracts::navigation::ResultsAddress;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::analyze::AnalysisProvider;
use crate::chat::BusyGuard;
use crate::store::AssetStore;
use crate::upload::{Progress, UploadCollector, UploadedFile};

const PROGRESS_STARTED: u8 = 10;
const PROGRESS_STORED: u8 = 50;
const PROGRESS_DONE: u8 = 100;

const SUBMISSION_FAILED_MESSAGE: &str =
    "Failed to upload and analyze the floorplan. Please try again.";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("upload failed: {0:#}")]
    Upload(#[source] anyhow::Error),
    #[error("analysis failed: {0:#}")]
    Analysis(#[source] anyhow::Error),
    #[error("a submission is already in progress")]
    Busy,
    #[error("no floorplan selected")]
    NothingSelected,
}

impl SubmissionError {
    /// What the user is told. Upload and analysis failures read the same.
    pub fn user_message(&self) -> &'static str {
        match self {
            SubmissionError::Upload(_) | SubmissionError::Analysis(_) => SUBMISSION_FAILED_MESSAGE,
            SubmissionError::Busy => "A floorplan is already being analyzed.",
            SubmissionError::NothingSelected => "Select a floorplan image first.",
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            SubmissionError::Upload(_) => "upload",
            SubmissionError::Analysis(_) => "analysis",
            SubmissionError::Busy => "busy",
            SubmissionError::NothingSelected => "selection",
        }
    }
}

/// A finished submission. `raw_analysis` has not been validated; the results
/// side does that when it loads `address`.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub image_url: String,
    pub raw_analysis: Value,
    pub address: ResultsAddress,
}

/// Store, then analyze. No retries, one submission at a time.
pub struct SubmissionPipeline {
    store: Arc<dyn AssetStore>,
    analyzer: Arc<dyn AnalysisProvider>,
    events: EventWriter,
    progress: Progress,
    uploading: AtomicBool,
}

impl SubmissionPipeline {
    pub fn new(
        store: Arc<dyn AssetStore>,
        analyzer: Arc<dyn AnalysisProvider>,
        events: EventWriter,
        progress: Progress,
    ) -> Self {
        Self {
            store,
            analyzer,
            events,
            progress,
            uploading: AtomicBool::new(false),
        }
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// Submits the collector's file and clears the collector once the
    /// submission has gone through. On failure the selection is kept.
    pub fn submit_selected(
        &self,
        collector: &mut UploadCollector,
    ) -> Result<Submission, SubmissionError> {
        let Some(file) = collector.file().cloned() else {
            return Err(SubmissionError::NothingSelected);
        };
        let submission = self.submit(&file)?;
        collector.discard();
        Ok(submission)
    }

    pub fn submit(&self, file: &UploadedFile) -> Result<Submission, SubmissionError> {
        let Some(_uploading) = BusyGuard::acquire(&self.uploading) else {
            return Err(SubmissionError::Busy);
        };
        self.progress.set(PROGRESS_STARTED);
        match self.run(file) {
            Ok(submission) => Ok(submission),
            Err(err) => {
                self.progress.reset();
                warn!(stage = err.stage(), error = %err, "submission failed");
                self.events.record(
                    "submission_failed",
                    event_payload! {
                        "stage" => err.stage(),
                        "error" => err.to_string(),
                        "file_name" => file.file_name,
                    },
                );
                Err(err)
            }
        }
    }

    fn run(&self, file: &UploadedFile) -> Result<Submission, SubmissionError> {
        let image_url = self.store.store(file).map_err(SubmissionError::Upload)?;
        self.progress.set(PROGRESS_STORED);
        self.events.record(
            "upload_stored",
            event_payload! {
                "image_url" => image_url,
                "store" => self.store.name(),
                "file_name" => file.file_name,
                "media_type" => file.media_type,
                "size" => file.size(),
            },
        );

        let raw_analysis = match self.analyzer.analyze(&image_url) {
            Ok(raw) => raw,
            Err(err) => {
                self.release_orphan(&image_url);
                return Err(SubmissionError::Analysis(err));
            }
        };
        let address = match ResultsAddress::new(&image_url, &raw_analysis) {
            Ok(address) => address,
            Err(err) => {
                self.release_orphan(&image_url);
                return Err(SubmissionError::Analysis(err.into()));
            }
        };
        self.progress.set(PROGRESS_DONE);

        self.events.record(
            "analysis_received",
            event_payload! {
                "image_url" => image_url,
                "analyzer" => self.analyzer.name(),
            },
        );
        info!(%image_url, analyzer = self.analyzer.name(), "floorplan submitted");

        Ok(Submission {
            image_url,
            raw_analysis,
            address,
        })
    }

    /// Best effort: the stored asset is useless once analysis has failed.
    fn release_orphan(&self, image_url: &str) {
        let mut payload = event_payload! {
            "image_url" => image_url,
            "store" => self.store.name(),
        };
        let event_type = match self.store.discard(image_url) {
            Ok(true) => "asset_discarded",
            Ok(false) => {
                payload.insert("reason".to_string(), json!("store does not support delete"));
                "asset_orphaned"
            }
            Err(err) => {
                warn!(%image_url, error = %format!("{err:#}"), "failed to discard asset");
                payload.insert("reason".to_string(), json!(format!("{err:#}")));
                "asset_orphaned"
            }
        };
        self.events.record(event_type, payload);
    }
}

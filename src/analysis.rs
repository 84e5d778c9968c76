//! Media analysis workflow: submit, derive a scan record, save it.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::client::{DetectionApi, DEFAULT_FRAME_SKIP};
use crate::kv_store::KeyValueStore;
use crate::models::{ImageDetectionResult, MediaKind, ScanRecord, VideoDetectionResult};
use crate::query::{DetectImageVars, DetectVideoVars, DetectionHooks, MutationCallbacks};
use crate::record_store::RecordStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisResult {
    Image(ImageDetectionResult),
    Video(VideoDetectionResult),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub record: ScanRecord,
    /// Whether the record was written to scan history
    pub saved: bool,
}

pub struct Analyzer<A, S> {
    hooks: Arc<DetectionHooks<A>>,
    records: Arc<RecordStore<S>>,
}

impl<A: DetectionApi, S: KeyValueStore> Analyzer<A, S> {
    pub fn new(hooks: Arc<DetectionHooks<A>>, records: Arc<RecordStore<S>>) -> Self {
        Self { hooks, records }
    }

    /// Runs detection on one image or video with the stored confidence threshold
    /// and records the scan when auto-save is enabled.
    ///
    /// A failed submission is returned as an [`crate::error::ApiError`] inside the
    /// `anyhow::Error`; nothing is saved in that case.
    pub async fn analyze(&self, media_uri: &str, media_type: MediaKind) -> Result<AnalysisOutcome> {
        let settings = self.records.get_settings().await?;
        let confidence = settings.detection_confidence();

        tracing::info!(
            "Analyzing {:?} {} at confidence {}",
            media_type,
            media_uri,
            confidence
        );

        let (result, record) = match media_type {
            MediaKind::Image => {
                let vars = DetectImageVars::new(media_uri).with_confidence(confidence);
                let result = self
                    .hooks
                    .detect_image(vars, MutationCallbacks::new())
                    .await?;
                let record = ScanRecord::from_image_result(&result, media_uri);
                (AnalysisResult::Image(result), record)
            }
            MediaKind::Video => {
                let vars = DetectVideoVars::new(media_uri)
                    .with_confidence(confidence)
                    .with_frame_skip(DEFAULT_FRAME_SKIP);
                let result = self
                    .hooks
                    .detect_video(vars, MutationCallbacks::new())
                    .await?;
                let record = ScanRecord::from_video_result(&result, media_uri);
                (AnalysisResult::Video(result), record)
            }
        };

        let saved = settings.auto_save;
        if saved {
            self.records.save_scan(record.clone()).await?;
        } else {
            tracing::debug!("Auto-save disabled, scan {} not stored", record.id);
        }

        Ok(AnalysisOutcome {
            result,
            record,
            saved,
        })
    }
}

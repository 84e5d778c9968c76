use serde::{Deserialize, Serialize};

use super::serde_helpers::deserialize_null_default;

// ===== ENUMS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    /// Reported when the service could not grade the diagnosis
    #[default]
    #[serde(other)]
    Unknown,
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        match s {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            _ => Severity::Unknown,
        }
    }
}

// ===== DETECTION RESULTS =====

/// One classified region within analyzed media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    /// Four coordinates in the order and units chosen by the service
    pub bbox: [f64; 4],
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f64, bbox: [f64; 4]) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDetectionResult {
    pub success: bool,
    pub disease_name: String,
    pub confidence: f64,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub severity: Severity,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub recommendations: Vec<String>,
    pub detections: Vec<Detection>,
    pub total_detections: u32,
    pub annotated_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrameResult {
    pub frame: u32,
    pub detections: Vec<Detection>,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDetectionResult {
    pub success: bool,
    pub total_frames: u32,
    pub frames_processed: u32,
    pub total_detections: u32,
    pub frame_results: Vec<VideoFrameResult>,
    pub annotated_url: String,
}

impl VideoDetectionResult {
    /// All detections across processed frames, in frame order
    pub fn all_detections(&self) -> Vec<Detection> {
        self.frame_results
            .iter()
            .flat_map(|frame| frame.detections.iter().cloned())
            .collect()
    }
}

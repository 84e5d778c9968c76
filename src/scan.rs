//! Scan record derivation: aggregating detections into a persistable summary

use chrono::{DateTime, Utc};

use crate::models::{
    Detection, DiagnosisSummary, ImageDetectionResult, MediaKind, ScanDiagnosis, ScanRecord,
    Severity, VideoDetectionResult,
};

pub const HEALTHY_CLASS: &str = "healthy";
pub const DAMAGE_CLASS: &str = "damage";

/// Health tallies over a list of detections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCounts {
    pub total: u32,
    pub healthy: u32,
    pub damage: u32,
}

impl HealthCounts {
    pub fn tally(detections: &[Detection]) -> Self {
        let count = |class: &str| detections.iter().filter(|d| d.class_name == class).count() as u32;

        Self {
            total: detections.len() as u32,
            healthy: count(HEALTHY_CLASS),
            damage: count(DAMAGE_CLASS),
        }
    }

    /// Share of healthy detections, rounded to a whole percent; 0 when nothing was detected
    pub fn health_percentage(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.healthy as f64 / self.total as f64) * 100.0).round() as u32
    }
}

/// Builds a fresh scan record with a new identity and the current time.
/// Diagnosis fields are copied verbatim when given; only image analysis produces them.
pub fn create_scan_record(
    detections: Vec<Detection>,
    annotated_url: impl Into<String>,
    source_uri: impl Into<String>,
    media_type: MediaKind,
    diagnosis: Option<ScanDiagnosis>,
) -> ScanRecord {
    let counts = HealthCounts::tally(&detections);

    // null, empty and zero diagnosis fields are stored as absent
    let (disease_name, confidence, severity, description, recommendations) = match diagnosis {
        Some(d) => (
            non_empty(d.disease_name),
            Some(d.confidence).filter(|c| *c > 0.0),
            Some(d.severity).filter(|s| *s != Severity::Unknown),
            non_empty(d.description),
            Some(d.recommendations).filter(|r| !r.is_empty()),
        ),
        None => (None, None, None, None, None),
    };

    ScanRecord {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: Utc::now().timestamp_millis(),
        media_type,
        disease_name,
        confidence,
        severity,
        description,
        recommendations,
        total_detections: counts.total,
        healthy_count: counts.healthy,
        damage_count: counts.damage,
        health_percentage: counts.health_percentage(),
        detections,
        annotated_url: annotated_url.into(),
        source_uri: source_uri.into(),
    }
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.trim().is_empty())
}

impl From<&ImageDetectionResult> for ScanDiagnosis {
    fn from(result: &ImageDetectionResult) -> Self {
        ScanDiagnosis {
            disease_name: result.disease_name.clone(),
            confidence: result.confidence,
            severity: result.severity,
            description: result.description.clone(),
            recommendations: result.recommendations.clone(),
        }
    }
}

impl ScanRecord {
    /// Record for a completed image analysis, including its diagnosis
    pub fn from_image_result(result: &ImageDetectionResult, source_uri: &str) -> Self {
        create_scan_record(
            result.detections.clone(),
            result.annotated_url.clone(),
            source_uri,
            MediaKind::Image,
            Some(ScanDiagnosis::from(result)),
        )
    }

    /// Record for a completed video analysis; detections of all frames, in frame order
    pub fn from_video_result(result: &VideoDetectionResult, source_uri: &str) -> Self {
        create_scan_record(
            result.all_detections(),
            result.annotated_url.clone(),
            source_uri,
            MediaKind::Video,
            None,
        )
    }

    /// Case-insensitive match against detection classes and the record id
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.detections
            .iter()
            .any(|d| d.class_name.to_lowercase().contains(&query))
            || self.id.to_lowercase().contains(&query)
    }

    /// The recorded severity, or one derived from the health percentage
    pub fn effective_severity(&self) -> Severity {
        if let Some(severity) = self.severity.filter(|s| *s != Severity::Unknown) {
            return severity;
        }
        match self.health_percentage {
            p if p > 80 => Severity::Low,
            p if p > 40 => Severity::Medium,
            _ => Severity::High,
        }
    }

    pub fn summary(&self) -> DiagnosisSummary {
        let fully_healthy = self.health_percentage == 100;

        let disease_name = self.disease_name.clone().and_then(non_empty).unwrap_or_else(|| {
            if fully_healthy {
                "Healthy Crop".to_string()
            } else {
                "Disease Detected".to_string()
            }
        });

        let description = self.description.clone().and_then(non_empty).unwrap_or_else(|| {
            let scanned_at = DateTime::<Utc>::from_timestamp_millis(self.timestamp)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| self.timestamp.to_string());
            format!(
                "This scan was performed on {}. It identified {} points of interest.",
                scanned_at, self.total_detections
            )
        });

        let recommendations = self
            .recommendations
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| {
                let steps: [&str; 2] = if fully_healthy {
                    ["Keep monitoring regularly", "Ensure consistent watering"]
                } else {
                    ["Review the detailed detections", "Consider applying treatment"]
                };
                steps.iter().map(|s| s.to_string()).collect()
            });

        DiagnosisSummary {
            id: self.id.clone(),
            disease_name,
            confidence: self
                .confidence
                .filter(|c| *c > 0.0)
                .unwrap_or(self.health_percentage as f64 / 100.0),
            severity: self.effective_severity(),
            description,
            recommendations,
            image_url: self.annotated_url.clone(),
            timestamp: self.timestamp,
        }
    }
}

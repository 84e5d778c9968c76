use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::detection::{Detection, Severity};

// ===== TRAITS =====

/// Records persisted in the local store: identified locally and ordered by creation time
pub trait LocalRecord {
    fn id_local(&self) -> &str;
    fn timestamp(&self) -> i64;
}

// ===== ENUMS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(anyhow!(
                "Unknown media type '{}', expected image or video",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FarmHealth {
    #[default]
    Healthy,
    Warning,
    Danger,
}

impl FromStr for FarmHealth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "healthy" => Ok(FarmHealth::Healthy),
            "warning" => Ok(FarmHealth::Warning),
            "danger" => Ok(FarmHealth::Danger),
            other => Err(anyhow!(
                "Unknown farm health '{}', expected Healthy, Warning or Danger",
                other
            )),
        }
    }
}

// ===== SCAN RECORDS =====

/// Diagnosis fields only image analysis produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDiagnosis {
    pub disease_name: String,
    pub confidence: f64,
    pub severity: Severity,
    pub description: String,
    pub recommendations: Vec<String>,
}

/// Summary of one completed analysis, stored under `scan_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub media_type: MediaKind,
    #[serde(rename = "disease_name", default, skip_serializing_if = "Option::is_none")]
    pub disease_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
    pub total_detections: u32,
    pub healthy_count: u32,
    pub damage_count: u32,
    pub health_percentage: u32,
    pub detections: Vec<Detection>,
    pub annotated_url: String,
    pub source_uri: String,
}

impl LocalRecord for ScanRecord {
    fn id_local(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Diagnosis view of a stored scan, with fallbacks for scans that carry no diagnosis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisSummary {
    pub id: String,
    pub disease_name: String,
    pub confidence: f64,
    pub severity: Severity,
    pub description: String,
    pub recommendations: Vec<String>,
    pub image_url: String,
    pub timestamp: i64,
}

// ===== FARM RECORDS =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmRecord {
    pub id: String,
    pub name: String,
    pub location: String,
    pub size: String,
    pub crop_type: String,
    pub health: FarmHealth,
    pub timestamp: i64,
}

impl LocalRecord for FarmRecord {
    fn id_local(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// User-entered farm details; identity, timestamp and health are assigned on save
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFarm {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub size: String,
    pub crop_type: String,
}

impl NewFarm {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        size: impl Into<String>,
        crop_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            size: size.into(),
            crop_type: crop_type.into(),
        }
    }

    /// Name, location and crop type are required; size is optional
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("name", &self.name),
            ("location", &self.location),
            ("crop type", &self.crop_type),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();

        if !missing.is_empty() {
            return Err(anyhow!(
                "Please enter at least the farm name, location, and crop type (missing: {})",
                missing.join(", ")
            ));
        }

        Ok(())
    }

    pub fn into_record(self, id: String, timestamp: i64) -> FarmRecord {
        FarmRecord {
            id,
            name: self.name,
            location: self.location,
            size: self.size,
            crop_type: self.crop_type,
            health: FarmHealth::default(),
            timestamp,
        }
    }
}

/// Counts shown on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub farm_count: usize,
    pub scan_count: usize,
}

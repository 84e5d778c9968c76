use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_API_URL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    High,
    Medium,
    Low,
}

/// Application settings stored under `app_settings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub confidence: f64,
    pub api_url: String,
    pub auto_save: bool,
    pub image_quality: ImageQuality,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            api_url: DEFAULT_API_URL.to_string(),
            auto_save: true,
            image_quality: ImageQuality::High,
        }
    }
}

/// Partial settings; unset fields leave the current value alone.
/// Stored settings are read through this type too, so fields missing from the
/// store fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_save: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_quality: Option<ImageQuality>,
}

impl AppSettingsPatch {
    pub fn confidence(confidence: f64) -> Self {
        Self {
            confidence: Some(confidence),
            ..Default::default()
        }
    }
}

impl AppSettings {
    /// Returns a copy with every field set in `patch` replaced
    pub fn merged(&self, patch: &AppSettingsPatch) -> Self {
        Self {
            confidence: patch.confidence.unwrap_or(self.confidence),
            api_url: patch.api_url.clone().unwrap_or_else(|| self.api_url.clone()),
            auto_save: patch.auto_save.unwrap_or(self.auto_save),
            image_quality: patch.image_quality.unwrap_or(self.image_quality),
        }
    }

    /// Confidence used for analysis; an unset (zero) threshold falls back to the default
    pub fn detection_confidence(&self) -> f64 {
        if self.confidence > 0.0 {
            self.confidence
        } else {
            AppSettings::default().confidence
        }
    }
}

pub mod detection;
pub mod health;
pub mod kv_entry;
pub mod records;
pub mod serde_helpers;
pub mod settings;

// ===== MODELS =====
// Wire shapes of the detection service live in `detection` and `health`;
// locally persisted records live in `records` and `settings`. `KvEntry` is the
// only native_db model: every collection is stored as one JSON block under its key.

pub use detection::{
    Detection, ImageDetectionResult, Severity, VideoDetectionResult, VideoFrameResult,
};
pub use health::HealthResponse;
pub use kv_entry::KvEntry;
pub use records::{
    DashboardStats, DiagnosisSummary, FarmHealth, FarmRecord, LocalRecord, MediaKind, NewFarm,
    ScanDiagnosis, ScanRecord,
};
pub use settings::{AppSettings, AppSettingsPatch, ImageQuality};

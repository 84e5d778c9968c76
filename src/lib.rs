//! Client for a crop-health detection service, with local farm and scan records.

pub mod analysis;
pub mod client;
pub mod config;
pub mod error;
pub mod kv_store;
pub mod models;
pub mod query;
pub mod record_store;
pub mod scan;

pub use analysis::{AnalysisOutcome, AnalysisResult, Analyzer};
pub use client::{DetectionApi, DetectionClient};
pub use config::ClientConfig;
pub use error::{failure_message, ApiError, ApiErrorKind};
pub use kv_store::{KeyValueStore, MemoryStore, NativeDbStore};
pub use query::{DetectionHooks, QueryClient};
pub use record_store::RecordStore;

//! Local record store for farms, scans and settings.
//!
//! Each collection is one JSON block under a fixed key. Every write reads the
//! whole collection, modifies it and writes it back. Those sequences run under
//! a per-key lock, so concurrent saves to one collection never lose records.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::kv_store::{KeyLocks, KeyValueStore};
use crate::models::{
    AppSettings, AppSettingsPatch, DashboardStats, FarmHealth, FarmRecord, LocalRecord, NewFarm,
    ScanRecord,
};

pub const FARMS_KEY: &str = "farm_records";
pub const SCANS_KEY: &str = "scan_history";
pub const SETTINGS_KEY: &str = "app_settings";

pub struct RecordStore<S> {
    store: S,
    locks: KeyLocks,
}

impl<S: KeyValueStore> RecordStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
        }
    }

    /// The backing key-value store
    pub fn backend(&self) -> &S {
        &self.store
    }

    // ===== FARMS =====

    /// All farms, newest first
    pub async fn get_farms(&self) -> Result<Vec<FarmRecord>> {
        self.read_collection(FARMS_KEY).await
    }

    /// Stores a new farm with a fresh identity, the current time and `Healthy` status
    pub async fn save_farm(&self, farm: NewFarm) -> Result<FarmRecord> {
        let _guard = self.locks.lock(FARMS_KEY).await;

        let mut farms: Vec<FarmRecord> = self.read_collection(FARMS_KEY).await?;
        let record = farm.into_record(new_id(), Utc::now().timestamp_millis());
        farms.insert(0, record.clone());
        self.write_collection(FARMS_KEY, &farms).await?;

        tracing::info!("Saved farm {} ({})", record.name, record.id);
        Ok(record)
    }

    /// Changes the health of one farm; unknown ids are ignored
    pub async fn update_farm_health(&self, id: &str, health: FarmHealth) -> Result<()> {
        let _guard = self.locks.lock(FARMS_KEY).await;

        let mut farms: Vec<FarmRecord> = self.read_collection(FARMS_KEY).await?;
        match farms.iter_mut().find(|farm| farm.id == id) {
            Some(farm) => {
                farm.health = health;
                self.write_collection(FARMS_KEY, &farms).await?;
                tracing::debug!("Farm {} health set to {:?}", id, health);
            }
            None => tracing::debug!("No farm {} to update", id),
        }
        Ok(())
    }

    pub async fn delete_farm(&self, id: &str) -> Result<()> {
        self.delete_record::<FarmRecord>(FARMS_KEY, id).await
    }

    pub async fn clear_farms(&self) -> Result<()> {
        self.clear_collection(FARMS_KEY).await
    }

    // ===== SCANS =====

    /// All scans, newest first
    pub async fn get_scans(&self) -> Result<Vec<ScanRecord>> {
        self.read_collection(SCANS_KEY).await
    }

    pub async fn get_scan(&self, id: &str) -> Result<Option<ScanRecord>> {
        let scans = self.get_scans().await?;
        Ok(scans.into_iter().find(|scan| scan.id == id))
    }

    /// Scans whose detection classes or id contain `query`, newest first
    pub async fn search_scans(&self, query: &str) -> Result<Vec<ScanRecord>> {
        let scans = self.get_scans().await?;
        Ok(scans
            .into_iter()
            .filter(|scan| scan.matches_query(query))
            .collect())
    }

    pub async fn save_scan(&self, scan: ScanRecord) -> Result<()> {
        let _guard = self.locks.lock(SCANS_KEY).await;

        let mut scans: Vec<ScanRecord> = self.read_collection(SCANS_KEY).await?;
        let id = scan.id.clone();
        scans.insert(0, scan);
        self.write_collection(SCANS_KEY, &scans).await?;

        tracing::info!("Saved scan {}", id);
        Ok(())
    }

    pub async fn delete_scan(&self, id: &str) -> Result<()> {
        self.delete_record::<ScanRecord>(SCANS_KEY, id).await
    }

    pub async fn clear_scans(&self) -> Result<()> {
        self.clear_collection(SCANS_KEY).await
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        Ok(DashboardStats {
            farm_count: self.get_farms().await?.len(),
            scan_count: self.get_scans().await?.len(),
        })
    }

    // ===== SETTINGS =====

    /// Stored settings merged over the defaults
    pub async fn get_settings(&self) -> Result<AppSettings> {
        let defaults = AppSettings::default();
        match self.store.get_item(SETTINGS_KEY).await? {
            None => Ok(defaults),
            Some(data) => {
                let stored: AppSettingsPatch = serde_json::from_str(&data)
                    .map_err(|e| anyhow!("Failed to parse stored settings: {}", e))?;
                Ok(defaults.merged(&stored))
            }
        }
    }

    /// Merges `patch` over the current settings and persists the full result
    pub async fn save_settings(&self, patch: AppSettingsPatch) -> Result<AppSettings> {
        let _guard = self.locks.lock(SETTINGS_KEY).await;

        let updated = self.get_settings().await?.merged(&patch);
        let data = serde_json::to_string(&updated)?;
        self.store.set_item(SETTINGS_KEY, data).await?;

        tracing::debug!("Saved settings {:?}", updated);
        Ok(updated)
    }

    // ===== HELPER METHODS =====

    /// Reads a collection sorted newest first; an absent key is an empty collection
    async fn read_collection<T>(&self, key: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + LocalRecord,
    {
        let Some(data) = self.store.get_item(key).await? else {
            return Ok(Vec::new());
        };

        let mut records: Vec<T> = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Failed to parse stored collection '{}': {}", key, e))?;
        records.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        Ok(records)
    }

    async fn write_collection<T: Serialize>(&self, key: &str, records: &[T]) -> Result<()> {
        let data = serde_json::to_string(records)?;
        self.store.set_item(key, data).await
    }

    async fn delete_record<T>(&self, key: &str, id: &str) -> Result<()>
    where
        T: DeserializeOwned + Serialize + LocalRecord,
    {
        let _guard = self.locks.lock(key).await;

        let records: Vec<T> = self.read_collection(key).await?;
        let before = records.len();
        let remaining: Vec<T> = records
            .into_iter()
            .filter(|record| record.id_local() != id)
            .collect();
        self.write_collection(key, &remaining).await?;

        if remaining.len() < before {
            tracing::info!("Deleted {} from {}", id, key);
        }
        Ok(())
    }

    async fn clear_collection(&self, key: &str) -> Result<()> {
        let _guard = self.locks.lock(key).await;
        self.store.remove_item(key).await?;
        tracing::info!("Cleared {}", key);
        Ok(())
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

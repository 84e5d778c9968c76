use native_db::{native_db, ToKey};
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

/// One key of the local store; `value` holds the serialized JSON block for that key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct KvEntry {
    #[primary_key]
    pub storage_key: String,
    pub value: String,
}

impl KvEntry {
    pub fn new(storage_key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            value: value.into(),
        }
    }
}

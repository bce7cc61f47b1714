//! Requests submitted from this machine, cached until the ERP lists them.
//!
//! A freshly created movement can take a while to show up in the listing
//! consultation; merging this cache into the list hides that delay. Nothing
//! here is ever sent back to the ERP.

use crate::schema::RequestListItem;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const MAX_ITEMS: usize = 50;
pub const MAX_AGE_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Raw storage behind the cache.
pub trait RequestPersistence: Send + Sync {
    fn read(&self) -> Option<String>;
    fn write(&self, raw: &str);
    fn remove(&self);
}

impl<T: RequestPersistence + ?Sized> RequestPersistence for Arc<T> {
    fn read(&self) -> Option<String> {
        (**self).read()
    }

    fn write(&self, raw: &str) {
        (**self).write(raw)
    }

    fn remove(&self) {
        (**self).remove()
    }
}

/// Stores the cache as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RequestPersistence for JsonFilePersistence {
    fn read(&self) -> Option<String> {
        std::fs::read_to_string(&self.path).ok()
    }

    fn write(&self, raw: &str) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Could not create {}: {}", parent.display(), e);
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, raw) {
            warn!("Could not write {}: {}", self.path.display(), e);
        }
    }

    fn remove(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    raw: Mutex<Option<String>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestPersistence for MemoryPersistence {
    fn read(&self) -> Option<String> {
        self.raw.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn write(&self, raw: &str) {
        *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw.to_string());
    }

    fn remove(&self) {
        *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRequest {
    /// Milliseconds since the Unix epoch.
    created_at: i64,
    item: RequestListItem,
}

pub struct LocalRequests {
    persistence: Box<dyn RequestPersistence>,
}

impl LocalRequests {
    pub fn new(persistence: impl RequestPersistence + 'static) -> Self {
        Self {
            persistence: Box::new(persistence),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryPersistence::new())
    }

    /// Entries that fail to parse are dropped; unreadable storage is empty.
    fn load(&self) -> Vec<StoredRequest> {
        let Some(raw) = self.persistence.read() else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(entries) => entries
                .into_iter()
                .filter_map(|entry| serde_json::from_value(entry).ok())
                .collect(),
            Err(e) => {
                warn!("Ignoring unreadable local request cache: {}", e);
                Vec::new()
            }
        }
    }

    fn save(&self, list: &[StoredRequest]) {
        match serde_json::to_string(list) {
            Ok(raw) => self.persistence.write(&raw),
            Err(e) => warn!("Could not serialize local request cache: {}", e),
        }
    }

    fn cleanup(list: Vec<StoredRequest>, now_ms: i64) -> Vec<StoredRequest> {
        list.into_iter()
            .filter(|entry| now_ms - entry.created_at <= MAX_AGE_MS)
            .take(MAX_ITEMS)
            .collect()
    }

    pub fn add_at(&self, item: RequestListItem, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let mut list = Self::cleanup(self.load(), now_ms);
        list.insert(
            0,
            StoredRequest {
                created_at: now_ms,
                item,
            },
        );
        list.truncate(MAX_ITEMS);
        self.save(&list);
    }

    pub fn add(&self, item: RequestListItem) {
        self.add_at(item, Utc::now());
    }

    /// Cached requests, newest first, as of `now`.
    pub fn list_at(&self, now: DateTime<Utc>) -> Vec<RequestListItem> {
        let loaded = self.load();
        let before = loaded.len();
        let cleaned = Self::cleanup(loaded, now.timestamp_millis());
        if cleaned.len() != before {
            self.save(&cleaned);
        }
        cleaned.into_iter().map(|entry| entry.item).collect()
    }

    pub fn list(&self) -> Vec<RequestListItem> {
        self.list_at(Utc::now())
    }

    pub fn clear(&self) {
        self.persistence.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RequestStatus, RequestType};
    use chrono::{Duration, TimeZone};

    fn item(id: &str) -> RequestListItem {
        RequestListItem {
            id: id.to_string(),
            request_type: RequestType::Reimbursement,
            cost_center: "Obra Alpha".to_string(),
            date: "15/01/2025".to_string(),
            total: 116.0,
            status: RequestStatus::Pending,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_newest_first() {
        let cache = LocalRequests::in_memory();
        cache.add_at(item("a"), t0());
        cache.add_at(item("b"), t0() + Duration::minutes(1));

        let ids: Vec<_> = cache
            .list_at(t0() + Duration::minutes(2))
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_entries_expire_after_seven_days() {
        let cache = LocalRequests::in_memory();
        cache.add_at(item("old"), t0());
        cache.add_at(item("new"), t0() + Duration::days(5));

        let later = t0() + Duration::days(7) + Duration::hours(1);
        let ids: Vec<_> = cache.list_at(later).into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["new"]);
    }

    #[test]
    fn test_capped_at_fifty() {
        let cache = LocalRequests::in_memory();
        for i in 0..60 {
            cache.add_at(item(&i.to_string()), t0() + Duration::seconds(i));
        }
        let list = cache.list_at(t0() + Duration::minutes(5));
        assert_eq!(list.len(), MAX_ITEMS);
        assert_eq!(list[0].id, "59");
    }

    #[test]
    fn test_corrupt_storage_reads_empty() {
        let persistence = MemoryPersistence::new();
        persistence.write("{not json");
        let cache = LocalRequests::new(persistence);
        assert!(cache.list_at(t0()).is_empty());

        let persistence = MemoryPersistence::new();
        persistence.write(r#"[{"createdAt": "x"}, {"item": {}}]"#);
        let cache = LocalRequests::new(persistence);
        assert!(cache.list_at(t0()).is_empty());
    }

    #[test]
    fn test_file_persistence_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let cache = LocalRequests::new(JsonFilePersistence::new(&path));
        cache.add_at(item("x"), t0());
        assert!(path.exists());

        let reopened = LocalRequests::new(JsonFilePersistence::new(&path));
        assert_eq!(reopened.list_at(t0())[0].id, "x");

        reopened.clear();
        assert!(!path.exists());
        assert!(reopened.list_at(t0()).is_empty());
    }
}

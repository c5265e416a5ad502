//! Building mirror
//!
//! JSON projection of building records keyed by address, kept on top of any
//! [`CacheBackend`]. Every operation here is best-effort: failures are logged,
//! counted and swallowed so that a broken mirror can never fail or roll back
//! a durable write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::{CacheBackend, CacheConfig};
use crate::db::schemas::{BuildingDoc, Content};
use crate::types::{MiesError, Result};

pub struct BuildingMirror {
    backend: Arc<dyn CacheBackend>,
    building_ttl: Duration,
    failures: AtomicU64,
}

impl BuildingMirror {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            building_ttl: config.building_ttl,
            failures: AtomicU64::new(0),
        }
    }

    /// Number of mirror operations that failed and were swallowed
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Merge changed fields into the mirrored copy and refresh its expiry.
    ///
    /// Returns whether the mirror was rewritten. A missing entry is skipped:
    /// the next full rewrite repopulates it.
    pub async fn merge_update(&self, address: &str, fields: &Content) -> bool {
        if fields.is_empty() {
            return false;
        }

        let data = match self.backend.get(address).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(address, "No mirrored copy to merge into, skipping");
                return false;
            }
            Err(e) => {
                self.record_failure();
                warn!(address, error = %e, "Failed to read mirrored building");
                return false;
            }
        };

        let mut cached = match parse_object(&data) {
            Ok(cached) => cached,
            Err(e) => {
                self.record_failure();
                error!(
                    address,
                    error = %e,
                    content = %String::from_utf8_lossy(&data),
                    "Mirrored building is not a JSON object"
                );
                return false;
            }
        };

        for (key, value) in fields {
            cached.insert(key.clone(), value.clone());
        }

        self.write(address, &cached, self.building_ttl).await
    }

    /// Replace the mirrored copy with the full record
    pub async fn put_building(&self, building: &BuildingDoc, ttl: Option<Duration>) -> bool {
        let record = match serde_json::to_value(building) {
            Ok(Value::Object(record)) => record,
            Ok(_) => {
                self.record_failure();
                error!(address = %building.address, "Building did not serialize to an object");
                return false;
            }
            Err(e) => {
                self.record_failure();
                error!(address = %building.address, error = %e, "Failed to serialize building");
                return false;
            }
        };

        self.write(&building.address, &record, ttl.unwrap_or(self.building_ttl))
            .await
    }

    /// Mirrored copy of a building, if any
    pub async fn get_building(&self, address: &str) -> Option<Content> {
        match self.backend.get(address).await {
            Ok(Some(data)) => match parse_object(&data) {
                Ok(record) => Some(record),
                Err(e) => {
                    self.record_failure();
                    warn!(address, error = %e, "Ignoring unreadable mirrored building");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.record_failure();
                warn!(address, error = %e, "Failed to read mirrored building");
                None
            }
        }
    }

    async fn write(&self, address: &str, record: &Content, ttl: Duration) -> bool {
        let data = match serde_json::to_vec(record) {
            Ok(data) => data,
            Err(e) => {
                self.record_failure();
                error!(address, error = %e, "Failed to encode mirrored building");
                return false;
            }
        };

        match self.backend.set(address, data, ttl).await {
            Ok(()) => true,
            Err(e) => {
                self.record_failure();
                warn!(address, error = %e, "Failed to write mirrored building");
                false
            }
        }
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

fn parse_object(data: &[u8]) -> Result<Content> {
    match serde_json::from_slice::<Value>(data)? {
        Value::Object(record) => Ok(record),
        other => Err(MiesError::Cache(format!(
            "expected an object, found {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use async_trait::async_trait;
    use serde_json::json;

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(MiesError::Cache("connection refused".into()))
        }

        async fn set(&self, _key: &str, _data: Vec<u8>, _ttl: Duration) -> Result<()> {
            Err(MiesError::Cache("connection refused".into()))
        }
    }

    fn fields(value: Value) -> Content {
        value.as_object().cloned().unwrap()
    }

    fn mirror() -> (Arc<ContentCache>, BuildingMirror) {
        let cache = Arc::new(ContentCache::with_defaults());
        let mirror = BuildingMirror::new(cache.clone(), &CacheConfig::default());
        (cache, mirror)
    }

    #[tokio::test]
    async fn test_put_then_merge() {
        let (_cache, mirror) = mirror();
        let building = BuildingDoc::new("a-1", "0").with_energy(40.0);
        assert!(mirror.put_building(&building, None).await);

        let merged = mirror
            .merge_update("a-1", &fields(json!({ "energy": 0.0, "processed": true })))
            .await;
        assert!(merged);

        let cached = mirror.get_building("a-1").await.unwrap();
        assert_eq!(cached["energy"], 0.0);
        assert_eq!(cached["processed"], true);
        assert_eq!(cached["flr"], "0");
    }

    #[tokio::test]
    async fn test_merge_refreshes_expiry() {
        let (cache, mirror) = mirror();
        let building = BuildingDoc::new("a-1", "0");
        mirror
            .put_building(&building, Some(Duration::from_secs(5)))
            .await;
        assert!(cache.get_entry("a-1").unwrap().remaining_ttl_secs() <= 5);

        mirror
            .merge_update("a-1", &fields(json!({ "processed": true })))
            .await;
        assert!(cache.get_entry("a-1").unwrap().remaining_ttl_secs() > 86_000);
    }

    #[tokio::test]
    async fn test_merge_on_miss_is_skipped() {
        let (cache, mirror) = mirror();
        let merged = mirror
            .merge_update("a-9", &fields(json!({ "processed": true })))
            .await;
        assert!(!merged);
        assert!(cache.get_entry("a-9").is_none());
        assert_eq!(mirror.failures(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_left_alone() {
        let (cache, mirror) = mirror();
        cache.put("a-1", b"not json".to_vec(), Duration::from_secs(60));

        let merged = mirror
            .merge_update("a-1", &fields(json!({ "processed": true })))
            .await;
        assert!(!merged);
        assert_eq!(mirror.failures(), 1);
        assert_eq!(cache.get_entry("a-1").unwrap().data, b"not json");
    }

    #[tokio::test]
    async fn test_broken_backend_is_swallowed() {
        let mirror = BuildingMirror::new(Arc::new(BrokenBackend), &CacheConfig::default());
        let building = BuildingDoc::new("a-1", "0");

        assert!(!mirror.put_building(&building, None).await);
        assert!(
            !mirror
                .merge_update("a-1", &fields(json!({ "energy": 1.0 })))
                .await
        );
        assert!(mirror.get_building("a-1").await.is_none());
        assert_eq!(mirror.failures(), 3);
    }
}

//! Persisted form of the cache.
//!
//! Only handle metadata is written (name, kind, priority, paths, attributes),
//! never payloads. A restored cache reloads every resource through its
//! loaders, dependencies first.

use crate::error::{CacheError, Result};
use crate::resources::handle::name_from_path;
use crate::resources::{Priority, ResourceCache, ResourceHandle, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One serialized handle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleRecord {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_paths: Vec<String>,
}

impl HandleRecord {
    pub fn resolved_name(&self) -> String {
        name_from_record(self)
    }
}

/// Name for a handle restored from `record`: the stored name, or the file
/// stem of its path when no name was stored. Animations always keep the
/// stored name since several can share one file.
pub fn name_from_record(record: &HandleRecord) -> String {
    if record.kind == ResourceKind::Animation || !record.name.is_empty() || record.path.is_empty() {
        record.name.clone()
    } else {
        name_from_path(&record.path)
    }
}

/// Top-level persisted container
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDocument {
    #[serde(default)]
    pub resources: Vec<HandleRecord>,
    #[serde(default)]
    pub max_cost: u64,
}

impl ResourceCache {
    /// Snapshot of every saved top-level handle, sorted by name.
    ///
    /// Fails while loads are in flight: a loading handle's metadata may still
    /// change when its result is attached.
    pub fn to_document(&self) -> Result<CacheDocument> {
        let in_flight = self.load_count();
        if in_flight > 0 {
            return Err(CacheError::LoadInProgress(in_flight));
        }

        let mut resources: Vec<HandleRecord> = self
            .top_level_handles()
            .into_iter()
            .filter(|handle| !handle.is_unsaved())
            .map(|handle| handle.to_record())
            .collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.kind.cmp(&b.kind)));

        Ok(CacheDocument {
            resources,
            max_cost: self.max_cost(),
        })
    }

    pub fn as_json(&self) -> Result<Value> {
        serde_json::to_value(self.to_document()?)
            .map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_document()?)
            .map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    /// Restore handles from a document and dispatch their loads.
    ///
    /// Records are stably sorted by kind first, so every kind is requested
    /// after the kinds it can depend on. A document naming a kind with no
    /// registered loader is rejected before anything changes. A dispatch
    /// failure after that (a worker that cannot be spawned) leaves the
    /// records restored so far in place.
    pub fn load_document(&self, document: CacheDocument) -> Result<Vec<Arc<ResourceHandle>>> {
        let mut records = document.resources;
        records.sort_by_key(|record| record.kind);

        if let Some(record) = records.iter().find(|record| !self.has_loader(record.kind)) {
            return Err(CacheError::NoLoader(record.kind));
        }

        self.set_max_cost(document.max_cost);

        let mut restored = Vec::with_capacity(records.len());
        for record in &records {
            let handle = self.insert_handle(ResourceHandle::from_record(record))?;
            if handle.needs_reload() {
                self.load_resource(&handle)?;
            }
            restored.push(handle);
        }

        tracing::debug!(count = restored.len(), "restored resource handles");
        Ok(restored)
    }

    pub fn load_from_json(&self, json: &Value) -> Result<Vec<Arc<ResourceHandle>>> {
        let document: CacheDocument = serde_json::from_value(json.clone())
            .map_err(|e| CacheError::DeserializationError(e.to_string()))?;
        self.load_document(document)
    }

    pub fn load_from_json_str(&self, json: &str) -> Result<Vec<Arc<ResourceHandle>>> {
        let document: CacheDocument = serde_json::from_str(json)
            .map_err(|e| CacheError::DeserializationError(e.to_string()))?;
        self.load_document(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_field_names() {
        let record = HandleRecord {
            name: "wood".to_string(),
            kind: ResourceKind::Material,
            priority: Priority::Permanent,
            path: "materials/wood.mtl".to_string(),
            attributes: Map::new(),
            additional_paths: Vec::new(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "wood",
                "type": 2,
                "priority": 1,
                "path": "materials/wood.mtl",
                "attributes": {}
            })
        );
    }

    #[test]
    fn test_additional_paths_round_trip() {
        let value = json!({
            "name": "lit",
            "type": 7,
            "priority": 0,
            "path": "shaders/lit.vert",
            "attributes": {},
            "additionalPaths": ["shaders/lit.frag"]
        });
        let record: HandleRecord = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(record.additional_paths, vec!["shaders/lit.frag".to_string()]);
        assert_eq!(serde_json::to_value(&record).unwrap(), value);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let record: HandleRecord = serde_json::from_value(json!({ "type": 3 })).unwrap();
        assert_eq!(record.kind, ResourceKind::Mesh);
        assert_eq!(record.priority, Priority::Removable);
        assert!(record.path.is_empty());
    }

    #[test]
    fn test_name_from_record() {
        let mut record: HandleRecord =
            serde_json::from_value(json!({ "type": 6, "path": "models/crate.gltf" })).unwrap();
        assert_eq!(name_from_record(&record), "crate");

        record.name = "Crate".to_string();
        assert_eq!(name_from_record(&record), "Crate");

        record.kind = ResourceKind::Animation;
        record.name = String::new();
        assert_eq!(name_from_record(&record), "");
    }

    #[test]
    fn test_document_rejects_bad_kind() {
        let cache = ResourceCache::default();
        let result = cache.load_from_json_str(r#"{ "resources": [{ "type": 99 }], "maxCost": 4 }"#);
        assert!(matches!(result, Err(CacheError::DeserializationError(_))));
    }
}

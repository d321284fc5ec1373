// ── Device catalog ──
//
// Concurrent mapping from `"<endpoint_id>_<device_id>"` to the names,
// usages, and metadata collected across several message families
// (`/configs/file`, `/devices/meta`). Data frames arriving later are
// hydrated against it.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::model::{DeviceKind, TydomDevice};

/// One catalog entry. Fields are optional because the message families
/// that feed the catalog each contribute a different subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub unique_id: String,
    pub name: Option<String>,
    pub usage: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl CacheEntry {
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            ..Self::default()
        }
    }
}

/// A hydrated device identity, returned only once the catalog knows
/// both a name and a usage for the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub unique_id: String,
    pub name: String,
    pub usage: String,
    pub kind: DeviceKind,
    pub metadata: Option<Map<String, Value>>,
}

impl DeviceInfo {
    /// Build a [`TydomDevice`] around this identity.
    pub fn into_device(
        self,
        device_id: i64,
        endpoint_id: i64,
        data: Map<String, Value>,
    ) -> TydomDevice {
        TydomDevice {
            id: device_id,
            endpoint_id,
            unique_id: self.unique_id,
            name: self.name,
            usage: self.usage,
            kind: self.kind,
            data,
            metadata: self.metadata,
        }
    }
}

/// Optional persistent backend fronting the in-memory catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn load(&self) -> Result<Vec<CacheEntry>, CoreError>;
    async fn persist(&self, entry: &CacheEntry) -> Result<(), CoreError>;
}

// ── DeviceCatalog ───────────────────────────────────────────────────

/// Concurrency-safe device catalog.
///
/// Shared between the decoder (which upserts) and the hydrator (which
/// reads) through `Arc` handles; `DashMap` gives lock-free reads with
/// per-shard write locking.
#[derive(Debug, Default)]
pub struct DeviceCatalog {
    entries: DashMap<String, CacheEntry>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an entry into the catalog.
    ///
    /// Only fields present in `incoming` are written; unset fields leave
    /// the stored value untouched. Setting the same field twice is
    /// last-write-wins, which makes upserts idempotent and
    /// order-insensitive for disjoint field sets.
    pub fn upsert(&self, incoming: CacheEntry) {
        let mut slot = self
            .entries
            .entry(incoming.unique_id.clone())
            .or_insert_with(|| CacheEntry::new(incoming.unique_id.clone()));

        if let Some(name) = incoming.name {
            slot.name = Some(name);
        }
        if let Some(usage) = incoming.usage {
            slot.usage = Some(usage);
        }
        if let Some(metadata) = incoming.metadata {
            slot.metadata = Some(metadata);
        }
    }

    pub fn get(&self, unique_id: &str) -> Option<CacheEntry> {
        self.entries.get(unique_id).map(|e| e.value().clone())
    }

    /// Hydrated identity lookup.
    ///
    /// Returns `Some` only when both name and usage are known and
    /// non-empty; partial entries stay invisible so data frames for
    /// endpoints the catalog has not met yet are dropped silently.
    pub fn device_info(&self, unique_id: &str) -> Option<DeviceInfo> {
        let entry = self.entries.get(unique_id)?;
        let name = entry.name.as_deref().filter(|n| !n.is_empty())?;
        let usage = entry.usage.as_deref().filter(|u| !u.is_empty())?;

        Some(DeviceInfo {
            unique_id: entry.unique_id.clone(),
            name: name.to_owned(),
            usage: usage.to_owned(),
            kind: DeviceKind::from_usage(usage),
            metadata: entry.metadata.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Bulk-import entries, e.g. from a [`CatalogStore`] at startup.
    pub fn import(&self, entries: impl IntoIterator<Item = CacheEntry>) {
        for entry in entries {
            self.upsert(entry);
        }
    }

    /// Snapshot of every entry, e.g. for persisting.
    pub fn export(&self) -> Vec<CacheEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

//! In-memory version store
//!
//! Append-only set of [`UpdateRecord`]s keyed by [`Version`], plus the pull
//! and rollback resolution rules. Records are handed out as `Arc`s so readers
//! keep a consistent view while later registrations land.

pub mod record;

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{OtaError, OtaResult};
use crate::version::Version;

pub use record::{Origin, Settings, UpdateConfig, UpdateRecord};

/// Outcome of [`VersionStore::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A newer record the caller should apply
    Update(Arc<UpdateRecord>),
    /// Nothing is newer than the caller's version
    Current,
    /// The newest record is targeted at other devices
    Excluded,
}

impl Resolution {
    pub fn update(&self) -> Option<&Arc<UpdateRecord>> {
        match self {
            Resolution::Update(record) => Some(record),
            Resolution::Current | Resolution::Excluded => None,
        }
    }
}

pub struct VersionStore {
    records: RwLock<BTreeMap<Version, Arc<UpdateRecord>>>,
    max_payload_bytes: usize,
}

impl VersionStore {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            max_payload_bytes,
        }
    }

    /// Load seed records from a JSON array file. A missing file is not an error.
    pub fn seed_from_file(&self, path: &Path) -> OtaResult<usize> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no seed file, starting with an empty store");
            return Ok(0);
        }

        let bytes = std::fs::read(path)?;
        let records: Vec<UpdateRecord> = serde_json::from_slice(&bytes)?;
        let count = records.len();
        for record in records {
            self.register(record)?;
        }

        tracing::info!(path = %path.display(), count, "seeded version store");
        Ok(count)
    }

    /// Append a record. Fails if the version is already present or the
    /// serialized config exceeds the payload limit.
    pub fn register(&self, record: UpdateRecord) -> OtaResult<Arc<UpdateRecord>> {
        let size = serde_json::to_vec(&record.config)?.len();
        if size > self.max_payload_bytes {
            return Err(OtaError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        let mut records = self.records.write();
        if records.contains_key(&record.version) {
            return Err(OtaError::DuplicateVersion(record.version));
        }

        let record = Arc::new(record);
        records.insert(record.version, record.clone());
        Ok(record)
    }

    /// Latest record newer than `current`, subject to device targeting.
    pub fn resolve(&self, current: &Version, device_id: Option<&str>) -> Resolution {
        let records = self.records.read();
        let Some((latest, record)) = records.last_key_value() else {
            return Resolution::Current;
        };

        if latest <= current {
            return Resolution::Current;
        }
        if !record.targets(device_id) {
            return Resolution::Excluded;
        }
        Resolution::Update(record.clone())
    }

    /// Explicit target when present, otherwise the record `current` rolls back to.
    pub fn resolve_rollback(
        &self,
        current: &Version,
        explicit_target: Option<&Version>,
    ) -> OtaResult<Arc<UpdateRecord>> {
        let records = self.records.read();

        if let Some(record) = explicit_target.and_then(|target| records.get(target)) {
            return Ok(record.clone());
        }

        records
            .get(current)
            .and_then(|record| record.rollback_version.as_ref())
            .and_then(|previous| records.get(previous))
            .cloned()
            .ok_or(OtaError::RollbackNotFound(*current))
    }

    pub fn latest_version(&self) -> Option<Version> {
        self.records.read().last_key_value().map(|(version, _)| *version)
    }

    pub fn get(&self, version: &Version) -> Option<Arc<UpdateRecord>> {
        self.records.read().get(version).cloned()
    }

    /// All known versions in ascending order
    pub fn versions(&self) -> Vec<Version> {
        self.records.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::version::Version;

/// One immutable OTA update. Records are shared as `Arc<UpdateRecord>` once
/// registered and never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    pub version: Version,
    pub config: UpdateConfig,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub mandatory: bool,
    /// Version this record supersedes
    #[serde(rename = "rollback", default, skip_serializing_if = "Option::is_none")]
    pub rollback_version: Option<Version>,
    /// Pull-side targeting only; broadcasts ignore it
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub target_devices: BTreeSet<String>,
    #[serde(flatten)]
    pub origin: Origin,
}

/// Where a record came from. Records without a `source` field are manual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum Origin {
    Manual,
    FileWatch {
        #[serde(rename = "changedFile")]
        changed_file: String,
    },
}

#[derive(Deserialize)]
struct OriginFields {
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "changedFile", default)]
    changed_file: Option<String>,
}

impl<'de> Deserialize<'de> for Origin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = OriginFields::deserialize(deserializer)?;
        match fields.source.as_deref() {
            None | Some("manual") => Ok(Origin::Manual),
            Some("file-watch") | Some("file-watcher") => Ok(Origin::FileWatch {
                changed_file: fields
                    .changed_file
                    .ok_or_else(|| de::Error::missing_field("changedFile"))?,
            }),
            Some(other) => Err(de::Error::unknown_variant(other, &["manual", "file-watch"])),
        }
    }
}

/// Payload delivered verbatim to clients
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_debug_logs: Option<bool>,
    /// Basename of the file that produced a file-watch update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<String>,
    /// Anything else is passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpdateRecord {
    pub fn new(version: Version, config: UpdateConfig, origin: Origin) -> Self {
        Self {
            version,
            config,
            timestamp: Utc::now(),
            mandatory: false,
            rollback_version: None,
            target_devices: BTreeSet::new(),
            origin,
        }
    }

    pub fn with_rollback(mut self, rollback: Version) -> Self {
        self.rollback_version = Some(rollback);
        self
    }

    pub fn with_targets<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// True when the record is open to every device, or lists `device_id`.
    pub fn targets(&self, device_id: Option<&str>) -> bool {
        if self.target_devices.is_empty() {
            return true;
        }
        device_id.is_some_and(|id| self.target_devices.contains(id))
    }

    pub fn changed_file(&self) -> Option<&str> {
        match &self.origin {
            Origin::FileWatch { changed_file } => Some(changed_file),
            Origin::Manual => None,
        }
    }
}

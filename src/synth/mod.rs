//! Update synthesis
//!
//! Turns a trigger (an authored record or a changed source file) into a
//! registered [`UpdateRecord`]. File-watch updates take the next patch version
//! after the store's latest; if another synthesis claimed that version first,
//! the version is recomputed and registration retried once.

pub mod template;

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::WatchConfig;
use crate::error::{with_retry, OtaError, OtaResult, RetryPolicy};
use crate::store::{Origin, UpdateConfig, UpdateRecord, VersionStore};
use crate::version::Version;

pub use template::{build_config, BaselineTemplate, CodeFragment};

/// What caused an update
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A complete record supplied by an operator
    Authored(AuthoredUpdate),
    /// A watched file was modified
    FileChange(PathBuf),
}

/// Body of a manual "create update" request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoredUpdate {
    pub version: Version,
    pub config: UpdateConfig,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(rename = "rollback", default)]
    pub rollback_version: Option<Version>,
    #[serde(default)]
    pub target_devices: BTreeSet<String>,
}

impl AuthoredUpdate {
    fn into_record(self) -> UpdateRecord {
        let mut config = self.config;
        if config.version.is_empty() {
            config.version = self.version.to_string();
        }

        let mut record = UpdateRecord::new(self.version, config, Origin::Manual);
        record.mandatory = self.mandatory;
        record.rollback_version = self.rollback_version;
        record.target_devices = self.target_devices;
        record
    }
}

pub struct Synthesizer {
    store: Arc<VersionStore>,
    template: BaselineTemplate,
    fragment_pattern: Regex,
    max_file_bytes: u64,
    retry: RetryPolicy,
}

impl Synthesizer {
    pub fn new(
        store: Arc<VersionStore>,
        template: BaselineTemplate,
        watch: &WatchConfig,
    ) -> OtaResult<Self> {
        let fragment_pattern = Regex::new(&watch.fragment_pattern)
            .map_err(|e| OtaError::Config(format!("invalid fragment_pattern: {e}")))?;

        Ok(Self {
            store,
            template,
            fragment_pattern,
            max_file_bytes: watch.max_file_bytes,
            retry: RetryPolicy::once(),
        })
    }

    pub async fn synthesize(&self, trigger: Trigger) -> OtaResult<Arc<UpdateRecord>> {
        match trigger {
            // Explicit versions are never renumbered, so a collision is final.
            Trigger::Authored(authored) => self.store.register(authored.into_record()),
            Trigger::FileChange(path) => self.from_file(&path).await,
        }
    }

    async fn from_file(&self, path: &Path) -> OtaResult<Arc<UpdateRecord>> {
        let changed_file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let text = self.read_source(path).await;
        let fragment = CodeFragment::extract(&self.fragment_pattern, &text);

        register_with_retry(
            &self.store,
            &self.retry,
            || next_version(&self.store),
            |version| self.file_record(version, &changed_file, &fragment),
        )
        .await
    }

    fn file_record(&self, version: Version, changed_file: &str, fragment: &CodeFragment) -> UpdateRecord {
        let timestamp = Utc::now();
        let config = build_config(&self.template, &version, changed_file, &timestamp, fragment);

        let mut record = UpdateRecord::new(
            version,
            config,
            Origin::FileWatch {
                changed_file: changed_file.to_string(),
            },
        )
        .with_rollback(version.previous_patch());
        record.timestamp = timestamp;
        record
    }

    /// File text for fragment extraction; unreadable or oversized files
    /// contribute nothing.
    async fn read_source(&self, path: &Path) -> String {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > self.max_file_bytes => {
                tracing::warn!(
                    path = %path.display(),
                    size = meta.len(),
                    limit = self.max_file_bytes,
                    "changed file too large, skipping code fragment"
                );
                return String::new();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot stat changed file");
                return String::new();
            }
        }

        tokio::fs::read_to_string(path).await.unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "cannot read changed file");
            String::new()
        })
    }
}

/// Patch after the store's latest version, or after the baseline when empty.
pub fn next_version(store: &VersionStore) -> Version {
    store
        .latest_version()
        .unwrap_or_else(Version::baseline)
        .bump_patch()
}

/// Register `build(next_version())`, recomputing the version and retrying
/// according to `policy` when it collides.
pub async fn register_with_retry<N, B>(
    store: &VersionStore,
    policy: &RetryPolicy,
    mut next_version: N,
    build: B,
) -> OtaResult<Arc<UpdateRecord>>
where
    N: FnMut() -> Version,
    B: Fn(Version) -> UpdateRecord,
{
    with_retry(policy, |attempt| {
        let version = next_version();
        if attempt > 1 {
            tracing::debug!(%version, attempt, "recomputed version after collision");
        }
        store.register(build(version))
    })
    .await
}

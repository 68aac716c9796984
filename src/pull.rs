//! Pull resolution for polling clients.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::ApiKeyPolicy;
use crate::error::OtaResult;
use crate::store::{Resolution, UpdateRecord, VersionStore};
use crate::version::Version;

/// Query of a pull request, as sent by the SDK
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub api_key: Option<String>,
    /// Defaults to `1.0.0` when absent
    pub current_version: Option<String>,
    pub device_id: Option<String>,
    /// Only `"rollback"` changes behavior
    pub action: Option<String>,
    /// Explicit rollback target
    pub target_version: Option<String>,
}

impl PullRequest {
    pub fn is_rollback(&self) -> bool {
        self.action.as_deref() == Some("rollback")
    }
}

/// Blank query values count as absent.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|raw| !raw.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Update(Arc<UpdateRecord>),
    Rollback(Arc<UpdateRecord>),
    /// Already current, or the newest record targets other devices
    NoContent,
}

/// Body of a rollback response: the record plus a marker field.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackBody<'a> {
    #[serde(flatten)]
    pub record: &'a UpdateRecord,
    pub is_rollback: bool,
}

impl<'a> RollbackBody<'a> {
    pub fn new(record: &'a UpdateRecord) -> Self {
        Self {
            record,
            is_rollback: true,
        }
    }
}

#[derive(Clone)]
pub struct PullResolver {
    store: Arc<VersionStore>,
    auth: ApiKeyPolicy,
}

impl PullResolver {
    pub fn new(store: Arc<VersionStore>, auth: ApiKeyPolicy) -> Self {
        Self { store, auth }
    }

    pub fn handle(&self, request: &PullRequest) -> OtaResult<PullOutcome> {
        self.auth.check(request.api_key.as_deref())?;

        let current = match non_blank(request.current_version.as_deref()) {
            Some(raw) => raw.parse::<Version>()?,
            None => Version::baseline(),
        };

        if request.is_rollback() {
            let target = non_blank(request.target_version.as_deref())
                .map(str::parse::<Version>)
                .transpose()?;
            let record = self.store.resolve_rollback(&current, target.as_ref())?;
            tracing::info!(from = %current, to = %record.version, "serving rollback");
            return Ok(PullOutcome::Rollback(record));
        }

        match self.store.resolve(&current, request.device_id.as_deref()) {
            Resolution::Update(record) => {
                tracing::debug!(from = %current, to = %record.version, "serving update");
                Ok(PullOutcome::Update(record))
            }
            Resolution::Current => Ok(PullOutcome::NoContent),
            Resolution::Excluded => {
                tracing::debug!(
                    device_id = request.device_id.as_deref().unwrap_or("-"),
                    "latest update not targeted at device"
                );
                Ok(PullOutcome::NoContent)
            }
        }
    }
}

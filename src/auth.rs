//! Static API key check shared by the pull endpoint and both push transports.

use crate::error::{OtaError, OtaResult};

#[derive(Debug, Clone)]
pub struct ApiKeyPolicy {
    prefix: String,
}

impl ApiKeyPolicy {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn check<'a>(&self, key: Option<&'a str>) -> OtaResult<&'a str> {
        match key {
            Some(key) if key.starts_with(&self.prefix) => Ok(key),
            _ => Err(OtaError::Unauthorized),
        }
    }
}

impl Default for ApiKeyPolicy {
    fn default() -> Self {
        Self::new("nxs_")
    }
}

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Library configuration for the embedding application.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Row cap applied to `get` calls that pass no explicit limit.
    pub search_limit: u32,
    /// When false, mutations skip writing audit records.
    pub audit_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            search_limit: 1000,
            audit_enabled: true,
        }
    }
}

impl ApiConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ApiResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|err| ApiError::Config(format!("failed to read config: {err}")))?;
        toml::from_str(&content).map_err(|err| ApiError::Config(err.to_string()))
    }
}

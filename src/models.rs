//! The model catalogue served at `/v1/models`.
//!
//! Consumers only ever see the advertised ids; the upstream candidates stay
//! private. The list is static for the life of the process.

use crate::config::ProxyConfig;
use serde::{Deserialize, Serialize};

/// Fixed creation stamp so the catalogue is byte-for-byte stable.
const CATALOGUE_CREATED: i64 = 1_686_935_002;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelEntry>,
}

/// Advertised id first, then aliases, without duplicates. Never empty.
#[must_use]
pub fn advertised_models(config: &ProxyConfig) -> ModelList {
    let mut ids: Vec<&str> = vec![config.models.advertised.as_str()];
    for alias in &config.models.aliases {
        if !alias.trim().is_empty() && !ids.contains(&alias.as_str()) {
            ids.push(alias);
        }
    }

    ModelList {
        object: "list".to_string(),
        data: ids
            .into_iter()
            .map(|id| ModelEntry {
                id: id.to_string(),
                object: "model".to_string(),
                created: CATALOGUE_CREATED,
                owned_by: "openai".to_string(),
            })
            .collect(),
    }
}

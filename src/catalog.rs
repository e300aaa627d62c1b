// Key bindings resolved from configuration
//
// Built once; reconfiguring means building a new catalog. Every payload is
// validated here, so nothing in the catalog can fail to encode later.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{BridgeConfig, STOP_KEY};
use crate::payload::{PayloadError, PayloadSpec};

/// Error types for catalog construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("No stop payload configured (directions must contain \"stop\")")]
    NoStopConfigured,

    #[error("Invalid key '{key}': bindings use a single character")]
    InvalidKey { key: String },

    #[error("Key '{key}' is bound more than once")]
    DuplicateKey { key: char },

    #[error("Invalid payload for '{key}': {source}")]
    Payload {
        key: String,
        #[source]
        source: PayloadError,
    },
}

/// A direction key and the payload streamed while it is held
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionBinding {
    pub key: char,
    pub payload: PayloadSpec,
}

/// A one-shot action fired on key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBinding {
    pub key: char,
    pub payload: PayloadSpec,
    pub label: String,
}

/// Direction, stop and action bindings
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    directions: HashMap<char, DirectionBinding>,
    stop: PayloadSpec,
    actions: Vec<ActionBinding>,
}

impl CommandCatalog {
    /// Assemble a catalog from already-built bindings
    ///
    /// Fails with `NoStopConfigured` when `stop` is missing; a controller must
    /// never be able to stream without a way to stop.
    pub fn new(
        directions: impl IntoIterator<Item = DirectionBinding>,
        stop: Option<PayloadSpec>,
        actions: impl IntoIterator<Item = ActionBinding>,
    ) -> Result<Self, CatalogError> {
        let stop = stop.ok_or(CatalogError::NoStopConfigured)?;

        let mut bound = HashMap::new();
        for binding in directions {
            let key = binding.key;
            if bound.insert(key, binding).is_some() {
                return Err(CatalogError::DuplicateKey { key });
            }
        }
        let directions = bound;

        let mut seen = Vec::new();
        let mut kept = Vec::new();
        for action in actions {
            if directions.contains_key(&action.key) || seen.contains(&action.key) {
                return Err(CatalogError::DuplicateKey { key: action.key });
            }
            seen.push(action.key);
            kept.push(action);
        }

        Ok(Self {
            directions,
            stop,
            actions: kept,
        })
    }

    /// Resolve the JSON configuration into bindings
    pub fn from_config(config: &BridgeConfig) -> Result<Self, CatalogError> {
        let mut directions = Vec::new();
        let mut stop = None;

        for (raw_key, value) in &config.directions {
            let payload = PayloadSpec::from_json(value).map_err(|source| CatalogError::Payload {
                key: raw_key.clone(),
                source,
            })?;

            let key = raw_key.to_lowercase();
            if key == STOP_KEY {
                stop = Some(payload);
                continue;
            }
            directions.push(DirectionBinding {
                key: single_char(&key)?,
                payload,
            });
        }

        let mut actions = Vec::new();
        for item in &config.actions {
            let key = item.key.trim().to_lowercase();
            if key.is_empty() {
                debug!("Skipping action without key");
                continue;
            }
            let payload = PayloadSpec::from_json(&item.data).map_err(|source| {
                CatalogError::Payload {
                    key: key.clone(),
                    source,
                }
            })?;
            let label = item
                .label
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| key.to_uppercase());
            actions.push(ActionBinding {
                key: single_char(&key)?,
                payload,
                label,
            });
        }

        let catalog = Self::new(directions, stop, actions)?;
        info!(
            "Catalog ready: {} direction(s), {} action(s)",
            catalog.directions.len(),
            catalog.actions.len()
        );
        Ok(catalog)
    }

    pub fn lookup_direction(&self, key: char) -> Option<&PayloadSpec> {
        self.directions.get(&key).map(|b| &b.payload)
    }

    pub fn stop_payload(&self) -> &PayloadSpec {
        &self.stop
    }

    /// Payload and label of the action bound to `key`
    pub fn lookup_action(&self, key: char) -> Option<(&PayloadSpec, &str)> {
        self.actions
            .iter()
            .find(|a| a.key == key)
            .map(|a| (&a.payload, a.label.as_str()))
    }

    pub fn is_direction(&self, key: char) -> bool {
        self.directions.contains_key(&key)
    }

    /// Direction keys, sorted
    pub fn direction_keys(&self) -> Vec<char> {
        let mut keys: Vec<char> = self.directions.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Actions in configuration order
    pub fn actions(&self) -> &[ActionBinding] {
        &self.actions
    }
}

fn single_char(key: &str) -> Result<char, CatalogError> {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(CatalogError::InvalidKey {
            key: key.to_string(),
        }),
    }
}

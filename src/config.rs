// Timing, defaults, and the actions.json document
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

// Direction streaming frequency (Hz)
pub const DEFAULT_FREQUENCY_HZ: f64 = 10.0;
pub const MIN_FREQUENCY_HZ: f64 = 1.0;
pub const MAX_FREQUENCY_HZ: f64 = 50.0;

// Streaming loop polling interval, independent of the transmit frequency
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

// How long shutdown waits for the final stop frame before giving up
pub const STOP_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

// Extra attempts for a stop frame whose send failed
pub const STOP_RETRY_ATTEMPTS: u32 = 1;

// Frame header prepended when the header option is on
pub const DEFAULT_HEADER: [u8; 2] = [0xFF, 0x55];

// Configuration file looked up in the working directory
pub const ACTIONS_FILE: &str = "actions.json";

// Name of the direction entry holding the stop payload
pub const STOP_KEY: &str = "stop";

// Serial transport (Auriga USB port or a BLE-serial module)
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Zenoh key prefix for a remote BLE gateway: <prefix>/tx and <prefix>/rx
pub const DEFAULT_ZENOH_PREFIX: &str = "makeblock/robot";

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// One entry of the "actions" list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Resolved actions.json: header, direction payloads (with "stop"), one-shot actions
///
/// Payload values are kept as raw JSON here; the catalog turns them into
/// PayloadSpecs and rejects the ones it can't encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_header_value")]
    pub header: Value,
    #[serde(default)]
    pub directions: Map<String, Value>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

fn default_header_value() -> Value {
    json!(DEFAULT_HEADER)
}

impl BridgeConfig {
    /// Built-in template used when no actions.json exists
    pub fn template() -> Self {
        let directions = json!({
            "w": "F", "a": "L", "s": "B", "d": "R", "e": "K", "stop": "S"
        });
        Self {
            header: default_header_value(),
            directions: directions.as_object().cloned().unwrap_or_default(),
            actions: vec![
                ActionConfig {
                    key: "l".to_string(),
                    data: json!("LIGHT_TOGGLE"),
                    label: Some("Toggle Light".to_string()),
                },
                ActionConfig {
                    key: "z".to_string(),
                    data: json!([255, 85]),
                    label: Some("Special Command".to_string()),
                },
            ],
        }
    }

    /// Parse a configuration document
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Json {
            path: origin.to_string(),
            source,
        })
    }

    /// Load from disk, falling back to the template if the file is missing
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_json_str(&text, &shown)?;
                info!("Loaded configuration from {}", shown);
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} not found, using built-in template", shown);
                Ok(Self::template())
            }
            Err(source) => Err(ConfigError::Io {
                path: shown,
                source,
            }),
        }
    }

    /// Header bytes; anything other than an array of integers falls back to FF 55
    pub fn header_bytes(&self) -> Vec<u8> {
        let parsed = self.header.as_array().and_then(|items| {
            items
                .iter()
                .map(|v| v.as_i64().map(|n| (n & 0xFF) as u8))
                .collect::<Option<Vec<u8>>>()
        });

        match parsed {
            Some(bytes) => bytes,
            None => {
                warn!("Invalid header {}, using default", self.header);
                DEFAULT_HEADER.to_vec()
            }
        }
    }
}

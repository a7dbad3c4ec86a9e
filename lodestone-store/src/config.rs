//! Node configuration, loaded from JSON at startup.

use crate::error::StoreError;
use lodestone_types::consts;
use lodestone_types::{FilterOperator, KeyFilters};
use serde::Deserialize;
use std::path::Path;

/// Top-level node configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub node_name: String,
    #[serde(default)]
    pub domain: String,
    pub areas: Vec<AreaConfig>,
    #[serde(default)]
    pub kv: KvConfig,
    /// Transport listen address, overridable on the daemon command line.
    #[serde(default)]
    pub listen_addr: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AreaConfig {
    pub area_id: String,
    /// Neighbor names accepted as peers in this area.
    #[serde(default)]
    pub neighbor_regexes: Vec<String>,
    /// Interfaces this area spans; consumed by the link monitor, carried
    /// here so one config file serves the whole agent.
    #[serde(default)]
    pub include_interface_regexes: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub sync_interval_secs: u64,
    pub enable_flood_optimization: bool,
    pub is_flood_root: bool,
    pub ttl_decrement_ms: i64,
    pub key_prefix_filters: Vec<String>,
    pub originator_id_filters: Vec<String>,
    /// "OR" or "AND".
    pub filter_operator: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 60,
            enable_flood_optimization: false,
            is_flood_root: false,
            ttl_decrement_ms: consts::DEFAULT_TTL_DECREMENT_MS,
            key_prefix_filters: Vec::new(),
            originator_id_filters: Vec::new(),
            filter_operator: "OR".to_string(),
        }
    }
}

impl KvConfig {
    /// Compile the configured admission filters, if any.
    pub fn admission_filters(&self) -> Result<Option<KeyFilters>, StoreError> {
        if self.key_prefix_filters.is_empty() && self.originator_id_filters.is_empty() {
            return Ok(None);
        }
        let operator = match self.filter_operator.to_ascii_uppercase().as_str() {
            "AND" => FilterOperator::And,
            "OR" => FilterOperator::Or,
            other => {
                return Err(StoreError::InvalidArgument(format!(
                    "unsupported filter operator: {other}"
                )))
            }
        };
        let filters = KeyFilters::new(
            self.key_prefix_filters.clone(),
            self.originator_id_filters.iter().cloned(),
            operator,
        )?;
        Ok(Some(filters))
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| StoreError::InvalidArgument(format!("cannot read config: {e}")))?;
        let mut config: Config = serde_json::from_str(&raw)
            .map_err(|e| StoreError::InvalidArgument(format!("malformed config: {e}")))?;
        if let Ok(name) = std::env::var("NODE_NAME") {
            if !name.is_empty() {
                config.node_name = name;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.node_name.is_empty() {
            return Err(StoreError::InvalidArgument("node_name is empty".into()));
        }
        if self.areas.is_empty() {
            return Err(StoreError::InvalidArgument("no areas configured".into()));
        }
        self.kv.admission_filters()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_parses() {
        let raw = r#"{
            "node_name": "node-1",
            "areas": [{ "area_id": "spine" }]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.node_name, "node-1");
        assert_eq!(config.kv.sync_interval_secs, 60);
        assert!(config.kv.admission_filters().unwrap().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn bad_filter_operator_rejected() {
        let config = Config {
            node_name: "n".into(),
            domain: String::new(),
            areas: vec![AreaConfig {
                area_id: "a".into(),
                neighbor_regexes: vec![],
                include_interface_regexes: vec![],
            }],
            kv: KvConfig {
                key_prefix_filters: vec!["adj:".into()],
                filter_operator: "XOR".into(),
                ..Default::default()
            },
            listen_addr: None,
        };
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "node_name": "node-2", "areas": [{{ "area_id": "pod-1" }}] }}"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.areas[0].area_id, "pod-1");
    }
}

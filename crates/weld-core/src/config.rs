use crate::FusionKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed fusion config: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to do when the oracle accepts only part of a buffer-fusion group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartialAcceptPolicy {
    /// Drop the whole group.
    #[default]
    RejectGroup,
    /// Keep the accepted nodes, provided at least one remains.
    DropRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    #[serde(rename = "on", alias = "ON", alias = "On")]
    On,
    #[serde(rename = "off", alias = "OFF", alias = "Off")]
    Off,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SwitchTable {
    #[serde(rename = "GraphFusion", default)]
    graph_fusion: BTreeMap<String, SwitchState>,
    #[serde(rename = "UBFusion", default)]
    buffer_fusion: BTreeMap<String, SwitchState>,
}

/// Per-pass on/off switches, in the fusion switch file format:
///
/// ```json
/// {"Switch": {"GraphFusion": {"ZConcatv2dFusionPass": "off"}, "UBFusion": {}}}
/// ```
///
/// Passes not listed are on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionSwitch {
    #[serde(rename = "Switch", default)]
    table: SwitchTable,
}

impl FusionSwitch {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let switch = Self::from_json_str(&json)?;
        log::info!("loaded fusion switch file {}", path.display());
        Ok(switch)
    }

    fn table(&self, kind: FusionKind) -> &BTreeMap<String, SwitchState> {
        match kind {
            FusionKind::Graph => &self.table.graph_fusion,
            FusionKind::Buffer => &self.table.buffer_fusion,
        }
    }

    pub fn is_enabled(&self, kind: FusionKind, pass: &str) -> bool {
        self.table(kind).get(pass) != Some(&SwitchState::Off)
    }

    pub fn set(&mut self, kind: FusionKind, pass: &str, state: SwitchState) {
        let table = match kind {
            FusionKind::Graph => &mut self.table.graph_fusion,
            FusionKind::Buffer => &mut self.table.buffer_fusion,
        };
        table.insert(pass.to_string(), state);
    }

    pub fn with_off(mut self, kind: FusionKind, pass: &str) -> Self {
        self.set(kind, pass, SwitchState::Off);
        self
    }
}

/// Settings of one fusion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Partition key for fusion statistics.
    pub session_id: String,
    /// Cap on first-round sweeps while looking for a fixed point.
    pub max_first_round_iterations: usize,
    pub partial_accept: PartialAcceptPolicy,
    /// Consult the capability oracle before applying a rewrite.
    pub check_support: bool,
    pub switch: FusionSwitch,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            max_first_round_iterations: 16,
            partial_accept: PartialAcceptPolicy::default(),
            check_support: true,
            switch: FusionSwitch::default(),
        }
    }
}

impl FusionConfig {
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

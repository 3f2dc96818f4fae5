//! Node configuration – read from a TOML file plus `TFCHASE_*` overrides.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! classic two-turtle setup: `turtle2` is spawned at `(4, 2)` and chases
//! `turtle1` once per second.
//!
//! ```toml
//! source_frame = "turtle1"
//! tick_period_ms = 100
//! max_transform_skew_ms = 2000
//!
//! [spawn]
//! name = "turtle2"
//! x = 4.0
//! y = 2.0
//! theta = 0.0
//!
//! [[broadcasters]]
//! agent_name = "turtle1"
//!
//! [[broadcasters]]
//! agent_name = "turtle2"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tfchase_perception::TfBuffer;
use tfchase_types::{ChaseError, SpawnRequest};

use crate::pursuit::{PursuitConfig, PursuitGains};

/// One pose-to-frame broadcaster to run inside the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
        }
    }
}

/// Spawn request issued for the pursuer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnConfig {
    #[serde(default = "default_pursuer_frame")]
    pub name: String,
    #[serde(default = "default_spawn_x")]
    pub x: f64,
    #[serde(default = "default_spawn_y")]
    pub y: f64,
    #[serde(default)]
    pub theta: f64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            name: default_pursuer_frame(),
            x: default_spawn_x(),
            y: default_spawn_y(),
            theta: 0.0,
        }
    }
}

impl From<&SpawnConfig> for SpawnRequest {
    fn from(cfg: &SpawnConfig) -> Self {
        SpawnRequest {
            name: cfg.name.clone(),
            x: cfg.x,
            y: cfg.y,
            theta: cfg.theta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Frame being chased.
    #[serde(default = "default_source_frame")]
    pub source_frame: String,

    /// Frame of the chasing agent.
    #[serde(default = "default_pursuer_frame")]
    pub pursuer_frame: String,

    /// Parent frame of every broadcast transform.
    #[serde(default = "default_world_frame")]
    pub world_frame: String,

    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    #[serde(default = "default_rotation_gain")]
    pub rotation_gain: f64,

    #[serde(default = "default_forward_gain")]
    pub forward_gain: f64,

    /// Reject lookups whose links are further apart in time than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_transform_skew_ms: Option<u64>,

    #[serde(default)]
    pub spawn: SpawnConfig,

    #[serde(default = "default_broadcasters")]
    pub broadcasters: Vec<BroadcasterConfig>,
}

fn default_agent_name() -> String {
    "turtle".to_string()
}
fn default_source_frame() -> String {
    "turtle1".to_string()
}
fn default_pursuer_frame() -> String {
    "turtle2".to_string()
}
fn default_world_frame() -> String {
    tfchase_middleware::broadcaster::WORLD_FRAME.to_string()
}
fn default_tick_period_ms() -> u64 {
    1000
}
fn default_rotation_gain() -> f64 {
    1.0
}
fn default_forward_gain() -> f64 {
    0.5
}
fn default_spawn_x() -> f64 {
    4.0
}
fn default_spawn_y() -> f64 {
    2.0
}
fn default_broadcasters() -> Vec<BroadcasterConfig> {
    ["turtle1", "turtle2"]
        .into_iter()
        .map(|agent_name| BroadcasterConfig {
            agent_name: agent_name.to_string(),
        })
        .collect()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            source_frame: default_source_frame(),
            pursuer_frame: default_pursuer_frame(),
            world_frame: default_world_frame(),
            tick_period_ms: default_tick_period_ms(),
            rotation_gain: default_rotation_gain(),
            forward_gain: default_forward_gain(),
            max_transform_skew_ms: None,
            spawn: SpawnConfig::default(),
            broadcasters: default_broadcasters(),
        }
    }
}

impl NodeConfig {
    /// Parse a TOML document.  No environment overrides are applied.
    pub fn parse(raw: &str) -> Result<Self, ChaseError> {
        toml::from_str(raw).map_err(|e| ChaseError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn to_toml(&self) -> Result<String, ChaseError> {
        toml::to_string_pretty(self)
            .map_err(|e| ChaseError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ChaseError> {
        for (field, value) in [
            ("source_frame", &self.source_frame),
            ("pursuer_frame", &self.pursuer_frame),
            ("world_frame", &self.world_frame),
            ("spawn.name", &self.spawn.name),
        ] {
            if value.trim().is_empty() {
                return Err(ChaseError::Config(format!("{field} must not be empty")));
            }
        }
        if self.source_frame == self.pursuer_frame {
            return Err(ChaseError::Config(format!(
                "source_frame and pursuer_frame are both {:?}",
                self.source_frame
            )));
        }
        if self.tick_period_ms == 0 {
            return Err(ChaseError::Config("tick_period_ms must be positive".to_string()));
        }
        for (field, value) in [
            ("rotation_gain", self.rotation_gain),
            ("forward_gain", self.forward_gain),
            ("spawn.x", self.spawn.x),
            ("spawn.y", self.spawn.y),
            ("spawn.theta", self.spawn.theta),
        ] {
            if !value.is_finite() {
                return Err(ChaseError::Config(format!("{field} must be finite, got {value}")));
            }
        }
        if self.broadcasters.is_empty() {
            return Err(ChaseError::Config("broadcasters must name at least one agent".to_string()));
        }
        let mut seen = HashSet::new();
        for b in &self.broadcasters {
            if b.agent_name.trim().is_empty() {
                return Err(ChaseError::Config("broadcaster agent_name must not be empty".to_string()));
            }
            if b.agent_name == self.world_frame {
                return Err(ChaseError::Config(format!(
                    "broadcaster agent_name {:?} collides with world_frame",
                    b.agent_name
                )));
            }
            if !seen.insert(b.agent_name.as_str()) {
                return Err(ChaseError::Config(format!(
                    "broadcaster {:?} is configured twice",
                    b.agent_name
                )));
            }
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn pursuit_config(&self) -> PursuitConfig {
        PursuitConfig {
            target_frame: self.source_frame.clone(),
            pursuer_frame: self.pursuer_frame.clone(),
            gains: PursuitGains {
                rotation: self.rotation_gain,
                forward: self.forward_gain,
            },
            spawn_request: SpawnRequest::from(&self.spawn),
        }
    }

    /// Fresh frame buffer honouring `max_transform_skew_ms`.
    pub fn frame_buffer(&self) -> TfBuffer {
        let buffer = TfBuffer::new();
        match self.max_transform_skew_ms {
            Some(ms) => buffer.with_max_skew(chrono::Duration::milliseconds(ms as i64)),
            None => buffer,
        }
    }
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
///
/// `TFCHASE_*` overrides are applied to a config that was found.
pub fn load_from(path: &Path) -> Result<Option<NodeConfig>, ChaseError> {
    load_with(path, |key| std::env::var(key).ok())
}

/// Load the config from `path`, falling back to [`NodeConfig::default`]
/// when the file does not exist.
///
/// `TFCHASE_*` overrides are applied in both cases and the result is
/// validated.
pub fn load_or_default(path: &Path) -> Result<NodeConfig, ChaseError> {
    load_or_default_with(path, |key| std::env::var(key).ok())
}

fn load_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<NodeConfig>, ChaseError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ChaseError::Config(format!("Failed to read config at {}: {e}", path.display())))?;
    let mut cfg = NodeConfig::parse(&raw)?;
    apply_overrides(&mut cfg, lookup);
    Ok(Some(cfg))
}

fn load_or_default_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<NodeConfig, ChaseError> {
    let cfg = match load_with(path, &lookup)? {
        Some(cfg) => cfg,
        None => {
            let mut cfg = NodeConfig::default();
            apply_overrides(&mut cfg, &lookup);
            cfg
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Write `cfg` to `path` as TOML.
pub fn save_to(cfg: &NodeConfig, path: &Path) -> Result<(), ChaseError> {
    let raw = cfg.to_toml()?;
    fs::write(path, raw)
        .map_err(|e| ChaseError::Config(format!("Failed to write config at {}: {e}", path.display())))
}

/// Apply `TFCHASE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TFCHASE_SOURCE_FRAME` | `source_frame` |
/// | `TFCHASE_PURSUER_FRAME` | `pursuer_frame` |
/// | `TFCHASE_AGENT_NAME` | `broadcasters` (comma-separated agent names) |
/// | `TFCHASE_TICK_PERIOD_MS` | `tick_period_ms` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut NodeConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut NodeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("TFCHASE_SOURCE_FRAME") {
        cfg.source_frame = v;
    }
    if let Some(v) = lookup("TFCHASE_PURSUER_FRAME") {
        cfg.pursuer_frame = v;
    }
    if let Some(v) = lookup("TFCHASE_AGENT_NAME") {
        cfg.broadcasters = v
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| BroadcasterConfig {
                agent_name: name.to_string(),
            })
            .collect();
    }
    if let Some(v) = lookup("TFCHASE_TICK_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.tick_period_ms = ms;
    }
}

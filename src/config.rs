// engine settings, loaded from an optional json file next to the samples

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "pocketseq.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// every hit goes through the shared echo -> reverb chain
    #[default]
    SharedChain,
    /// each track gets a send into the chain and a direct dry path
    PerTrackSends,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32, // offline only; live streams run at the device rate
    pub block_size: usize,
    pub lookahead_secs: f64,
    pub command_capacity: usize,
    pub event_capacity: usize,
    pub max_voices: usize,
    pub echo_level: f32,
    pub echo_feedback: f32,
    pub reverb_level: f32,
    pub init_timeout_ms: u64,
    pub routing: RoutingMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 128,
            lookahead_secs: 0.05,
            command_capacity: 1024,
            event_capacity: 1024,
            max_voices: 32,
            echo_level: 0.2,
            echo_feedback: 0.3,
            reverb_level: 0.25,
            init_timeout_ms: 2000,
            routing: RoutingMode::SharedChain,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid { field, reason: reason.into() }
        }
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate", "must be positive"));
        }
        if self.block_size == 0 {
            return Err(invalid("block_size", "must be positive"));
        }
        if !(self.lookahead_secs >= 0.0 && self.lookahead_secs.is_finite()) {
            return Err(invalid("lookahead_secs", format!("{} is not a non-negative time", self.lookahead_secs)));
        }
        if self.command_capacity == 0 || self.event_capacity == 0 {
            return Err(invalid("capacity", "channel capacities must be positive"));
        }
        if self.max_voices == 0 {
            return Err(invalid("max_voices", "must be positive"));
        }
        for (field, v) in [
            ("echo_level", self.echo_level),
            ("echo_feedback", self.echo_feedback),
            ("reverb_level", self.reverb_level),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(field, format!("{v} outside [0, 1]")));
            }
        }
        Ok(())
    }

    pub fn init_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.init_timeout_ms)
    }
}

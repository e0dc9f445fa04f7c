// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Loading run configuration from JSON.
//!
//! Every field is optional; missing ones take the values of
//! [`ExperimentConfig::default`]. A pacer given by name picks one of the
//! presets:
//!
//! ```json
//! { "pacer": "display_120hz", "seed": 7 }
//! ```
//!
//! A pacer given as an object must spell out every field.

use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use stagecue_core::config::ExperimentConfig;
use stagecue_core::scheduler::PacerConfig;

/// Why a configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The text is not valid configuration JSON.
    #[error("parsing configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// A pacer preset name that does not exist.
    #[error("unknown pacer preset {0:?}")]
    UnknownPreset(String),
}

/// Looks up a pacer preset by name.
#[must_use]
pub fn pacer_preset(name: &str) -> Option<PacerConfig> {
    match name {
        "display_60hz" => Some(PacerConfig::display_60hz()),
        "display_120hz" => Some(PacerConfig::display_120hz()),
        "headless" => Some(PacerConfig::headless()),
        _ => None,
    }
}

/// Parses a configuration from JSON text.
pub fn parse_config(text: &str) -> Result<ExperimentConfig, ConfigError> {
    let mut value: Value = serde_json::from_str(text)?;
    let mut preset = None;
    if let Some(Value::String(name)) = value.get("pacer") {
        preset = Some(pacer_preset(name).ok_or_else(|| ConfigError::UnknownPreset(name.clone()))?);
    }
    if preset.is_some()
        && let Some(object) = value.as_object_mut()
    {
        object.remove("pacer");
    }
    let mut config: ExperimentConfig = serde_json::from_value(value)?;
    if let Some(pacer) = preset {
        config.pacer = pacer;
    }
    Ok(config)
}

/// Reads and parses a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ExperimentConfig, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let config = parse_config(&text)?;
    log::debug!("loaded configuration from {}", path.display());
    Ok(config)
}

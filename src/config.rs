// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, File};
use duration_string::DurationString;
use serde::Deserialize;

pub mod audio;
pub mod bank;
pub mod error;
pub mod input;
pub mod latency;
pub mod voices;

pub use self::audio::Audio;
pub use self::bank::{Bank, Pad};
pub use self::error::ConfigError;
pub use self::input::Input;
pub use self::latency::Latency;
pub use self::voices::{StealPolicy, Voices};

/// The top level player configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    /// Audio output configuration.
    #[serde(default)]
    audio: Audio,

    /// Voice allocation configuration.
    #[serde(default)]
    voices: Voices,

    /// Input routing configuration.
    #[serde(default)]
    input: Input,

    /// Latency monitoring configuration.
    #[serde(default)]
    latency: Latency,

    /// The pad banks.
    #[serde(default)]
    banks: Vec<Bank>,
}

impl Config {
    /// Parse a configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Config, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Config>()?;

        let mut seen = HashSet::new();
        for bank in config.banks.iter() {
            if !seen.insert(bank.name()) {
                return Err(ConfigError::DuplicateBank(bank.name().to_string()));
            }
        }

        Ok(config)
    }

    /// Gets the audio configuration.
    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// Gets the voice configuration.
    pub fn voices(&self) -> &Voices {
        &self.voices
    }

    /// Gets the input configuration.
    pub fn input(&self) -> &Input {
        &self.input
    }

    /// Gets the latency configuration.
    pub fn latency(&self) -> &Latency {
        &self.latency
    }

    /// Gets the bank configurations.
    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }
}

/// Parses a human readable duration such as "10ms" or "2s".
pub(crate) fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<DurationString>()
        .map(Duration::from)
        .map_err(|e| ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

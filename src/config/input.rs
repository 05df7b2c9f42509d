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
use std::time::Duration;

use serde::Deserialize;

use super::{error::ConfigError, parse_duration};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(10);
const DEFAULT_PRELOAD_DEBOUNCE: Duration = Duration::from_millis(50);
const DEFAULT_VELOCITY: f32 = 1.0;

/// A YAML representation of the input routing configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Input {
    /// Minimum time between two accepted triggers of the same sample (default: 10ms).
    debounce: Option<String>,

    /// Velocity used for keys, which carry no velocity of their own (default: 1.0).
    default_velocity: Option<f32>,

    /// Quiet period after a sample-set change before preloading starts (default: 50ms).
    preload_debounce: Option<String>,

    /// The bank that is active at startup. Defaults to the first bank.
    initial_bank: Option<String>,
}

impl Input {
    /// Returns the trigger debounce window.
    pub fn debounce(&self) -> Result<Duration, ConfigError> {
        match &self.debounce {
            Some(debounce) => parse_duration("input.debounce", debounce),
            None => Ok(DEFAULT_DEBOUNCE),
        }
    }

    /// Returns the velocity used for key presses, clamped to [0, 1].
    pub fn default_velocity(&self) -> f32 {
        self.default_velocity
            .unwrap_or(DEFAULT_VELOCITY)
            .clamp(0.0, 1.0)
    }

    /// Returns the preload debounce period.
    pub fn preload_debounce(&self) -> Result<Duration, ConfigError> {
        match &self.preload_debounce {
            Some(debounce) => parse_duration("input.preload_debounce", debounce),
            None => Ok(DEFAULT_PRELOAD_DEBOUNCE),
        }
    }

    /// Returns the bank to activate at startup, if configured.
    pub fn initial_bank(&self) -> Option<&str> {
        self.initial_bank.as_deref()
    }
}

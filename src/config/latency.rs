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
use crate::latency::Thresholds;

const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_MEASUREMENTS: usize = 1000;

/// A YAML representation of the latency monitor configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Latency {
    /// Rating thresholds in milliseconds.
    #[serde(default)]
    thresholds: Thresholds,

    /// Aggregation interval for periodic monitoring (default: 1s).
    monitor_interval: Option<String>,

    /// Number of measurements retained per category (default: 1000).
    max_measurements: Option<usize>,
}

impl Latency {
    /// Returns the rating thresholds.
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Returns the periodic aggregation interval.
    pub fn monitor_interval(&self) -> Result<Duration, ConfigError> {
        match &self.monitor_interval {
            Some(interval) => parse_duration("latency.monitor_interval", interval),
            None => Ok(DEFAULT_MONITOR_INTERVAL),
        }
    }

    /// Returns the per-category retention cap.
    pub fn max_measurements(&self) -> usize {
        self.max_measurements
            .unwrap_or(DEFAULT_MAX_MEASUREMENTS)
            .max(1)
    }
}

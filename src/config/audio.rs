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

/// The device name that selects the host's default output device.
pub const DEFAULT_DEVICE: &str = "default";
const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_BUFFER_SIZE: usize = 128;
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// A YAML representation of the audio output configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct Audio {
    /// The audio device. "default" picks the host default, names starting
    /// with "mock" select the mock output.
    #[serde(default = "default_device")]
    device: String,

    /// Output sample rate in Hz (default: 44100). Samples are resampled to this
    /// rate when they are preloaded.
    sample_rate: Option<u32>,

    /// Number of output channels (default: 2).
    channels: Option<u16>,

    /// Output period size in frames (default: 128). Lower values reduce latency
    /// but are more sensitive to callback jitter.
    buffer_size: Option<usize>,

    /// How long to wait for the output to come up before giving up (default: 2s).
    startup_timeout: Option<String>,

    /// Whether to raise the audio callback thread to real-time priority (default: true).
    realtime_priority: Option<bool>,
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

impl Default for Audio {
    fn default() -> Self {
        Audio::new(DEFAULT_DEVICE)
    }
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            sample_rate: None,
            channels: None,
            buffer_size: None,
            startup_timeout: None,
            realtime_priority: None,
        }
    }

    /// Overrides the buffer size.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Audio {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Overrides the startup timeout.
    pub fn with_startup_timeout(mut self, startup_timeout: &str) -> Audio {
        self.startup_timeout = Some(startup_timeout.to_string());
        self
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the output sample rate (default: 44100).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE).max(1)
    }

    /// Returns the output channel count (default: 2).
    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS).max(1)
    }

    /// Returns the output period size in frames (default: 128).
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1)
    }

    /// Returns the startup timeout (default: 2s).
    pub fn startup_timeout(&self) -> Result<Duration, ConfigError> {
        match &self.startup_timeout {
            Some(timeout) => parse_duration("audio.startup_timeout", timeout),
            None => Ok(DEFAULT_STARTUP_TIMEOUT),
        }
    }

    /// Returns whether the audio thread should request real-time priority.
    pub fn realtime_priority(&self) -> bool {
        self.realtime_priority.unwrap_or(true)
    }
}

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
use serde::{Deserialize, Serialize};

/// Default maximum number of concurrent voices.
pub const DEFAULT_MAX_VOICES: u32 = 32;

/// What to do when a trigger arrives and the voice ceiling has been reached.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StealPolicy {
    /// Stop the oldest sounding voice to make room.
    #[default]
    Oldest,
    /// Refuse the new trigger.
    Reject,
}

/// A YAML representation of the voice allocation configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Voices {
    /// Maximum number of concurrent voices. 0 disables the ceiling.
    max_voices: Option<u32>,

    /// Behavior when the ceiling is reached.
    #[serde(default)]
    stealing: StealPolicy,
}

impl Voices {
    /// Creates a new voice configuration.
    pub fn new(max_voices: u32, stealing: StealPolicy) -> Voices {
        Voices {
            max_voices: Some(max_voices),
            stealing,
        }
    }

    /// Returns the voice ceiling, or None if voices are unbounded.
    pub fn max_voices(&self) -> Option<usize> {
        match self.max_voices.unwrap_or(DEFAULT_MAX_VOICES) {
            0 => None,
            max => Some(max as usize),
        }
    }

    /// Returns the stealing policy.
    pub fn stealing(&self) -> StealPolicy {
        self.stealing
    }
}

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
use std::str::FromStr;

use serde::Deserialize;

use super::error::ConfigError;
use crate::input::{PhysicalKey, PAD_SLOTS};

/// A YAML representation of a bank of pads.
#[derive(Deserialize, Clone, Debug)]
pub struct Bank {
    /// The bank name, used to switch banks.
    name: String,

    /// The pads in this bank.
    #[serde(default)]
    pads: Vec<Pad>,
}

impl Bank {
    /// Creates a new bank configuration.
    pub fn new(name: &str, pads: Vec<Pad>) -> Bank {
        Bank {
            name: name.to_string(),
            pads,
        }
    }

    /// Gets the bank name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the pads.
    pub fn pads(&self) -> &[Pad] {
        &self.pads
    }
}

/// A YAML representation of a single pad: which chop plays when it fires.
#[derive(Deserialize, Clone, Debug)]
pub struct Pad {
    /// The key that fires this pad, e.g. "q" or "KeyQ". Mutually exclusive with slot.
    key: Option<String>,

    /// The 1-indexed pad slot (1-26). Mutually exclusive with key.
    slot: Option<usize>,

    /// The sample id this pad plays.
    sample: String,

    /// The source audio file, relative to the config file.
    file: String,

    /// Start of the chop in seconds (default: 0).
    trim_start: Option<f64>,

    /// End of the chop in seconds (default: end of the source).
    trim_end: Option<f64>,
}

impl Pad {
    /// Creates a new pad bound to a key.
    pub fn new(key: &str, sample: &str, file: &str, trim_start: f64, trim_end: Option<f64>) -> Pad {
        Pad {
            key: Some(key.to_string()),
            slot: None,
            sample: sample.to_string(),
            file: file.to_string(),
            trim_start: Some(trim_start),
            trim_end,
        }
    }

    /// Resolves the 0-indexed slot this pad occupies.
    pub fn slot_index(&self, bank: &str) -> Result<usize, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPad {
            bank: bank.to_string(),
            reason,
        };

        match (&self.key, self.slot) {
            (Some(_), Some(_)) => Err(invalid(format!(
                "pad for sample {} sets both key and slot",
                self.sample
            ))),
            (None, None) => Err(invalid(format!(
                "pad for sample {} needs a key or a slot",
                self.sample
            ))),
            (Some(key), None) => PhysicalKey::from_str(key)
                .map(|key| key.slot())
                .map_err(|e| invalid(e.to_string())),
            (None, Some(slot)) if (1..=PAD_SLOTS).contains(&slot) => Ok(slot - 1),
            (None, Some(slot)) => Err(invalid(format!(
                "slot {} is outside 1-{}",
                slot, PAD_SLOTS
            ))),
        }
    }

    /// Gets the sample id.
    pub fn sample(&self) -> &str {
        &self.sample
    }

    /// Gets the source file.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Gets the chop start in seconds.
    pub fn trim_start(&self) -> f64 {
        self.trim_start.unwrap_or(0.0)
    }

    /// Gets the chop end in seconds, if set.
    pub fn trim_end(&self) -> Option<f64> {
        self.trim_end
    }
}

#[cfg(test)]
mod test {
    use super::Pad;

    #[test]
    fn test_slot_from_key() {
        let pad = Pad::new("q", "A1", "a.wav", 0.0, None);
        assert_eq!(pad.slot_index("A").unwrap(), 0);

        let pad = Pad::new("KeyM", "A26", "a.wav", 0.0, None);
        assert_eq!(pad.slot_index("A").unwrap(), 25);

        // Digits alias the top row.
        let pad = Pad::new("0", "A10", "a.wav", 0.0, None);
        assert_eq!(pad.slot_index("A").unwrap(), 9);
    }

    #[test]
    fn test_slot_errors() {
        let pad = Pad::new("F13", "A1", "a.wav", 0.0, None);
        assert!(pad.slot_index("A").is_err());

        let mut pad = Pad::new("q", "A1", "a.wav", 0.0, None);
        pad.slot = Some(2);
        assert!(pad.slot_index("A").is_err());

        pad.key = None;
        assert_eq!(pad.slot_index("A").unwrap(), 1);

        pad.slot = Some(27);
        assert!(pad.slot_index("A").is_err());

        pad.slot = None;
        assert!(pad.slot_index("A").is_err());
    }
}

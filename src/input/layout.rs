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
use std::{fmt, str::FromStr};

use crate::config::{self, ConfigError};

/// Number of pads in a bank.
pub const PAD_SLOTS: usize = 26;

/// The physical keys that can fire pads. Letters follow the keyboard rows, so
/// Q is slot 1 and M is slot 26. Digits alias slots 1-10.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhysicalKey {
    KeyQ,
    KeyW,
    KeyE,
    KeyR,
    KeyT,
    KeyY,
    KeyU,
    KeyI,
    KeyO,
    KeyP,
    KeyA,
    KeyS,
    KeyD,
    KeyF,
    KeyG,
    KeyH,
    KeyJ,
    KeyK,
    KeyL,
    KeyZ,
    KeyX,
    KeyC,
    KeyV,
    KeyB,
    KeyN,
    KeyM,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Digit0,
}

use PhysicalKey::*;

const ALL_KEYS: [PhysicalKey; PhysicalKey::COUNT] = [
    KeyQ, KeyW, KeyE, KeyR, KeyT, KeyY, KeyU, KeyI, KeyO, KeyP, KeyA, KeyS, KeyD, KeyF, KeyG,
    KeyH, KeyJ, KeyK, KeyL, KeyZ, KeyX, KeyC, KeyV, KeyB, KeyN, KeyM, Digit1, Digit2, Digit3,
    Digit4, Digit5, Digit6, Digit7, Digit8, Digit9, Digit0,
];

const LETTERS: &str = "qwertyuiopasdfghjklzxcvbnm";
const DIGITS: &str = "1234567890";

/// A key name that isn't part of the pad layout.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("{0} is not a pad key")]
pub struct KeyParseError(String);

impl PhysicalKey {
    /// Number of physical keys.
    pub const COUNT: usize = 36;

    /// Returns every key, letters first.
    pub fn all() -> &'static [PhysicalKey] {
        &ALL_KEYS
    }

    /// Returns the key's position in the layout, used to index key state.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the 0-indexed pad slot this key fires.
    pub fn slot(self) -> usize {
        let index = self.index();
        if index < PAD_SLOTS {
            index
        } else {
            index - PAD_SLOTS
        }
    }

    /// Returns the key for a single character, if it is part of the layout.
    pub fn from_char(c: char) -> Option<PhysicalKey> {
        let c = c.to_ascii_lowercase();
        if let Some(pos) = LETTERS.find(c) {
            return Some(ALL_KEYS[pos]);
        }
        DIGITS.find(c).map(|pos| ALL_KEYS[PAD_SLOTS + pos])
    }

    /// Returns the character printed on the key.
    pub fn as_char(self) -> char {
        let index = self.index();
        let chars = if index < PAD_SLOTS {
            LETTERS.as_bytes()[index]
        } else {
            DIGITS.as_bytes()[index - PAD_SLOTS]
        };
        chars as char
    }
}

impl FromStr for PhysicalKey {
    type Err = KeyParseError;

    /// Accepts key codes ("KeyQ", "Digit1") and bare characters ("q", "Q", "1").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let single = name
            .strip_prefix("Key")
            .or_else(|| name.strip_prefix("Digit"))
            .unwrap_or(name);

        let mut chars = single.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                // "KeyQ" must be a letter and "Digit1" a digit.
                let letter_ok = !name.starts_with("Key") || c.is_ascii_alphabetic();
                let digit_ok = !name.starts_with("Digit") || c.is_ascii_digit();
                if letter_ok && digit_ok {
                    if let Some(key) = PhysicalKey::from_char(c) {
                        return Ok(key);
                    }
                }
                Err(KeyParseError(s.to_string()))
            }
            _ => Err(KeyParseError(s.to_string())),
        }
    }
}

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.as_char();
        if c.is_ascii_digit() {
            write!(f, "Digit{}", c)
        } else {
            write!(f, "Key{}", c.to_ascii_uppercase())
        }
    }
}

/// The chop a pad plays.
#[derive(Clone, Debug, PartialEq)]
pub struct PadSample {
    pub sample_id: String,
    /// Source reference handed to the buffer provider.
    pub source: String,
    pub trim_start: f64,
    /// None plays to the end of the source.
    pub trim_end: Option<f64>,
}

/// A named set of pads sharing the key layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Bank {
    name: String,
    pads: [Option<PadSample>; PAD_SLOTS],
}

impl Bank {
    /// Creates an empty bank.
    pub fn new(name: &str) -> Bank {
        Bank {
            name: name.to_string(),
            pads: Default::default(),
        }
    }

    /// Builds a bank from its configuration.
    pub fn from_config(config: &config::Bank) -> Result<Bank, ConfigError> {
        let mut bank = Bank::new(config.name());
        for pad in config.pads() {
            let slot = pad.slot_index(config.name())?;
            if bank.pads[slot].is_some() {
                return Err(ConfigError::InvalidPad {
                    bank: config.name().to_string(),
                    reason: format!("slot {} is assigned more than once", slot + 1),
                });
            }
            bank.pads[slot] = Some(PadSample {
                sample_id: pad.sample().to_string(),
                source: pad.file().to_string(),
                trim_start: pad.trim_start(),
                trim_end: pad.trim_end(),
            });
        }
        Ok(bank)
    }

    /// Assigns a chop to a 0-indexed slot, returning the bank for chaining.
    pub fn with_pad(mut self, slot: usize, pad: PadSample) -> Bank {
        if slot < PAD_SLOTS {
            self.pads[slot] = Some(pad);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the chop at a 0-indexed slot.
    pub fn pad(&self, slot: usize) -> Option<&PadSample> {
        self.pads.get(slot).and_then(Option::as_ref)
    }

    /// Iterates assigned pads with their slots.
    pub fn pads(&self) -> impl Iterator<Item = (usize, &PadSample)> {
        self.pads
            .iter()
            .enumerate()
            .filter_map(|(slot, pad)| pad.as_ref().map(|pad| (slot, pad)))
    }
}

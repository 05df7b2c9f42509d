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

//! Storage for trimmed, ready-to-play chops.
//!
//! Chops are copied out of their decoded source at preload time so that triggering
//! only has to look up an `Arc` and never touches the source buffer.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::collections::TryReserveError;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::provider::DecodedBuffer;

/// Reasons a preload is refused.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Invalid trim [{start}s, {end}s] for a {duration}s source")]
    InvalidTrim { start: f64, end: f64, duration: f64 },

    #[error("Source buffer has no channels")]
    NoChannels,

    #[error("Source buffer has a sample rate of 0")]
    InvalidSampleRate,

    #[error("Trim window [{start}s, {end}s] contains no frames")]
    EmptyWindow { start: f64, end: f64 },

    #[error("Unable to allocate sample memory: {0}")]
    Allocation(#[from] TryReserveError),
}

/// A trimmed chop, ready to play at the engine's sample rate.
#[derive(Debug)]
pub struct PreloadedSample {
    id: String,
    /// Planar sample data, one entry per channel.
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    trim_start: f64,
    trim_end: f64,
}

impl PreloadedSample {
    /// Returns the sample id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the planar sample data.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Returns the number of frames.
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Returns the sample rate of the stored data.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the trim start within the source, in seconds.
    pub fn trim_start(&self) -> f64 {
        self.trim_start
    }

    /// Returns the trim end within the source, in seconds.
    pub fn trim_end(&self) -> f64 {
        self.trim_end
    }

    /// Returns the playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.channels.iter().map(Vec::len).sum::<usize>() * std::mem::size_of::<f32>()
    }

    /// Reads every page of the sample data so the first trigger doesn't fault.
    pub(crate) fn touch(&self) -> f32 {
        // 1024 f32s per 4 KiB page.
        self.channels
            .iter()
            .flat_map(|channel| channel.iter().step_by(1024))
            .fold(0.0, |acc, sample| acc + sample.abs())
    }
}

/// Holds every preloaded chop, keyed by sample id.
pub struct SampleRepository {
    samples: RwLock<HashMap<String, Arc<PreloadedSample>>>,
    /// Rate samples are converted to, matching the audio output.
    target_sample_rate: u32,
}

impl SampleRepository {
    /// Creates an empty repository that stores samples at the given rate.
    pub fn new(target_sample_rate: u32) -> SampleRepository {
        SampleRepository {
            samples: RwLock::new(HashMap::new()),
            target_sample_rate,
        }
    }

    /// Trims the source to [trim_start, trim_end] seconds and stores the result
    /// under sample_id, replacing any previous entry. Returns false if the input
    /// is invalid or memory could not be allocated.
    pub fn preload(
        &self,
        sample_id: &str,
        source: &DecodedBuffer,
        trim_start: f64,
        trim_end: f64,
    ) -> bool {
        match self.build(sample_id, source, trim_start, trim_end) {
            Ok(sample) => {
                info!(
                    sample = sample_id,
                    channels = sample.channel_count(),
                    frames = sample.frames(),
                    memory_kb = sample.memory_size() / 1024,
                    "Sample preloaded"
                );
                let sample = Arc::new(sample);
                match self.samples.write().entry(sample_id.to_string()) {
                    Entry::Occupied(mut entry) => {
                        debug!(sample = sample_id, "Replacing preloaded sample");
                        entry.insert(sample);
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(sample);
                    }
                }
                true
            }
            Err(e) => {
                warn!(sample = sample_id, err = %e, "Unable to preload sample");
                false
            }
        }
    }

    fn build(
        &self,
        sample_id: &str,
        source: &DecodedBuffer,
        trim_start: f64,
        trim_end: f64,
    ) -> Result<PreloadedSample, ConfigurationError> {
        if source.channel_count() == 0 {
            return Err(ConfigurationError::NoChannels);
        }
        if source.sample_rate() == 0 {
            return Err(ConfigurationError::InvalidSampleRate);
        }

        let duration = source.duration_secs();
        let valid = trim_start.is_finite()
            && trim_end.is_finite()
            && trim_start >= 0.0
            && trim_end > trim_start
            && trim_end <= duration;
        if !valid {
            return Err(ConfigurationError::InvalidTrim {
                start: trim_start,
                end: trim_end,
                duration,
            });
        }

        let source_rate = source.sample_rate() as f64;
        let start_frame = (trim_start * source_rate).round() as usize;
        let end_frame = ((trim_end * source_rate).round() as usize).min(source.frames());
        if end_frame <= start_frame {
            return Err(ConfigurationError::EmptyWindow {
                start: trim_start,
                end: trim_end,
            });
        }

        let mut channels = Vec::new();
        channels.try_reserve_exact(source.channel_count())?;
        for channel in source.channel_data() {
            let window = &channel[start_frame..end_frame];
            let data = if source.sample_rate() == self.target_sample_rate {
                let mut data = Vec::new();
                data.try_reserve_exact(window.len())?;
                data.extend_from_slice(window);
                data
            } else {
                resample(window, source.sample_rate(), self.target_sample_rate)?
            };
            channels.push(data);
        }

        Ok(PreloadedSample {
            id: sample_id.to_string(),
            channels,
            sample_rate: self.target_sample_rate,
            trim_start,
            trim_end,
        })
    }

    /// Returns true if a sample is stored under the id.
    pub fn is_preloaded(&self, sample_id: &str) -> bool {
        self.samples.read().contains_key(sample_id)
    }

    /// Returns the sample stored under the id.
    pub fn get(&self, sample_id: &str) -> Option<Arc<PreloadedSample>> {
        self.samples.read().get(sample_id).cloned()
    }

    /// Removes a sample. Voices already playing it keep their reference.
    pub fn evict(&self, sample_id: &str) -> bool {
        let removed = self.samples.write().remove(sample_id).is_some();
        if removed {
            debug!(sample = sample_id, "Sample evicted");
        }
        removed
    }

    /// Removes every sample, returning how many were stored.
    pub fn clear_all(&self) -> usize {
        let mut samples = self.samples.write();
        let count = samples.len();
        samples.clear();
        if count > 0 {
            info!(count, "All samples evicted");
        }
        count
    }

    /// Returns the number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    /// Returns the total memory used by stored samples.
    pub fn memory_usage(&self) -> usize {
        self.samples.read().values().map(|s| s.memory_size()).sum()
    }

    /// Returns every stored sample.
    pub fn all(&self) -> Vec<Arc<PreloadedSample>> {
        self.samples.read().values().cloned().collect()
    }
}

impl std::fmt::Debug for SampleRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRepository")
            .field("samples", &self.len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("memory_kb", &(self.memory_usage() / 1024))
            .finish()
    }
}

/// Converts one channel between sample rates using linear interpolation, which is
/// adequate for one-shot chops.
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, TryReserveError> {
    let ratio = target_rate as f64 / source_rate as f64;
    let target_frames = (samples.len() as f64 * ratio).ceil() as usize;

    let mut output = Vec::new();
    output.try_reserve_exact(target_frames)?;

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        let s0 = samples.get(source_frame).copied().unwrap_or(0.0);
        let s1 = samples.get(source_frame + 1).copied().unwrap_or(s0);
        output.push(s0 + (s1 - s0) * frac);
    }

    Ok(output)
}

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

//! Decoded audio buffers and the providers that supply them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use tracing::{debug, info};

/// Errors produced while obtaining a decoded buffer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Audio file error for {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("Unsupported sample format in {path}: {bits}-bit {format}")]
    UnsupportedFormat {
        path: PathBuf,
        bits: u16,
        format: &'static str,
    },

    #[error("Unknown source {0}")]
    UnknownSource(String),
}

/// Fully decoded PCM audio in planar layout.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedBuffer {
    /// One Vec per channel.
    channel_data: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Creates a buffer from planar channel data. Channels are truncated to the
    /// length of the shortest one.
    pub fn new(mut channel_data: Vec<Vec<f32>>, sample_rate: u32) -> DecodedBuffer {
        let frames = channel_data.iter().map(Vec::len).min().unwrap_or(0);
        for channel in channel_data.iter_mut() {
            channel.truncate(frames);
        }
        DecodedBuffer {
            channel_data,
            sample_rate,
        }
    }

    /// Creates a buffer from interleaved samples.
    pub fn from_interleaved(samples: &[f32], channel_count: u16, sample_rate: u32) -> DecodedBuffer {
        let channels = channel_count.max(1) as usize;
        let frames = samples.len() / channels;
        let mut channel_data = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (channel, sample) in channel_data.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        DecodedBuffer::new(channel_data, sample_rate)
    }

    /// Returns the per-channel sample data.
    pub fn channel_data(&self) -> &[Vec<f32>] {
        &self.channel_data
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> usize {
        self.channel_data.len()
    }

    /// Returns the number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channel_data.first().map(Vec::len).unwrap_or(0)
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns the duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

/// Supplies decoded audio for a source reference (a file name, a cache key...).
pub trait BufferProvider: Send + Sync {
    /// Decodes the given source.
    fn decode(&self, source: &str) -> Result<DecodedBuffer, ProviderError>;
}

/// Reads PCM WAV files relative to a base directory.
pub struct WavFileProvider {
    base_path: PathBuf,
}

impl WavFileProvider {
    /// Creates a provider that resolves relative paths against base_path.
    pub fn new(base_path: &Path) -> WavFileProvider {
        WavFileProvider {
            base_path: base_path.to_path_buf(),
        }
    }

    fn resolve(&self, source: &str) -> PathBuf {
        if Path::new(source).is_absolute() {
            PathBuf::from(source)
        } else {
            self.base_path.join(source)
        }
    }
}

impl BufferProvider for WavFileProvider {
    fn decode(&self, source: &str) -> Result<DecodedBuffer, ProviderError> {
        let path = self.resolve(source);
        let wav_error = |source: hound::Error| ProviderError::Wav {
            path: path.clone(),
            source,
        };

        let reader = WavReader::open(&path).map_err(wav_error)?;
        let spec = reader.spec();
        debug!(
            path = ?path,
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            bits = spec.bits_per_sample,
            "Decoding WAV file"
        );

        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(wav_error)?,
            (SampleFormat::Int, bits @ 8..=32) => {
                let scale = 1.0 / (1i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|sample| sample.map(|s| s as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(wav_error)?
            }
            (format, bits) => {
                return Err(ProviderError::UnsupportedFormat {
                    path: path.clone(),
                    bits,
                    format: match format {
                        SampleFormat::Float => "float",
                        SampleFormat::Int => "int",
                    },
                })
            }
        };

        let buffer = DecodedBuffer::from_interleaved(&interleaved, spec.channels, spec.sample_rate);
        info!(
            path = ?path,
            channels = buffer.channel_count(),
            duration_ms = buffer.duration().as_millis(),
            "Decoded source audio"
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sine, write_wav};

    #[test]
    fn test_from_interleaved() {
        let buffer = DecodedBuffer::from_interleaved(&[1.0, -1.0, 0.5, -0.5, 0.25], 2, 44100);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.channel_data()[0], vec![1.0, 0.5]);
        assert_eq!(buffer.channel_data()[1], vec![-1.0, -0.5]);
    }

    #[test]
    fn test_ragged_channels_are_truncated() {
        let buffer = DecodedBuffer::new(vec![vec![0.0; 10], vec![0.0; 7]], 10);
        assert_eq!(buffer.frames(), 7);
        assert!((buffer.duration_secs() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_wav_provider_float() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let left = sine(440.0, 44100, 0.1);
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        write_wav(dir.path().join("tone.wav"), vec![left.clone(), right], 44100)?;

        let provider = WavFileProvider::new(dir.path());
        let buffer = provider.decode("tone.wav")?;
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.sample_rate(), 44100);
        assert_eq!(buffer.frames(), left.len());
        assert!((buffer.channel_data()[0][10] - left[10]).abs() < 1e-6);
        assert!((buffer.channel_data()[1][10] + left[10]).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_wav_provider_missing_file() {
        let provider = WavFileProvider::new(Path::new("/nonexistent"));
        assert!(matches!(
            provider.decode("nope.wav"),
            Err(ProviderError::Wav { .. })
        ));
    }
}

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
// Core render loop shared by every output backend. The mixer is owned by the render
// thread; it never takes the voice table lock. New voices arrive over a channel and
// finished voices are reported back over another.
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::samples::{PreloadedSample, VoiceHandle, VoiceId};

/// Represents a voice's playback source in the mixer.
pub struct ActiveSource {
    /// The voice this source belongs to.
    voice_id: VoiceId,
    /// The trimmed sample data.
    sample: Arc<PreloadedSample>,
    /// Current read position in frames.
    position: usize,
    /// Linear gain applied to every sample.
    gain: f32,
    /// State shared with the allocator.
    handle: Arc<VoiceHandle>,
    /// Where to report natural completion.
    completion_tx: Sender<VoiceId>,
}

impl ActiveSource {
    /// Creates a source that plays the sample from the start.
    pub(crate) fn new(
        voice_id: VoiceId,
        sample: Arc<PreloadedSample>,
        gain: f32,
        handle: Arc<VoiceHandle>,
        completion_tx: Sender<VoiceId>,
    ) -> ActiveSource {
        ActiveSource {
            voice_id,
            sample,
            position: 0,
            gain,
            handle,
            completion_tx,
        }
    }

    /// Adds up to `frames` frames of this source into the interleaved output.
    fn mix_into(&mut self, output: &mut [f32], channels: usize, frames: usize) {
        let sample_channels = self.sample.channel_count();
        let remaining = self.sample.frames().saturating_sub(self.position);
        let count = remaining.min(frames);
        if count == 0 || sample_channels == 0 {
            return;
        }

        for out_channel in 0..channels {
            // Mono chops feed every output, otherwise channels map one to one.
            let source_channel = if sample_channels == 1 {
                0
            } else if out_channel < sample_channels {
                out_channel
            } else {
                continue;
            };

            let data = &self.sample.channels()[source_channel][self.position..self.position + count];
            for (frame, sample) in data.iter().enumerate() {
                output[frame * channels + out_channel] += sample * self.gain;
            }
        }

        self.position += count;
    }

    fn is_finished(&self) -> bool {
        self.position >= self.sample.frames()
    }

    /// Marks the voice ended and notifies the allocator.
    fn complete(&self) {
        self.handle.mark_ended();
        // The allocator may already be gone during shutdown.
        let _ = self.completion_tx.send(self.voice_id);
    }
}

/// Mixes every active source into interleaved output buffers.
pub struct Mixer {
    /// Number of output channels.
    channels: u16,
    /// Sample rate.
    sample_rate: u32,
    /// Sources currently playing.
    sources: Vec<ActiveSource>,
    /// New sources posted by the allocator.
    source_rx: Receiver<ActiveSource>,
}

impl Mixer {
    /// Creates a new mixer. `capacity` pre-sizes the source list so the render
    /// loop doesn't allocate under normal polyphony.
    pub fn new(
        channels: u16,
        sample_rate: u32,
        source_rx: Receiver<ActiveSource>,
        capacity: usize,
    ) -> Mixer {
        Mixer {
            channels: channels.max(1),
            sample_rate,
            sources: Vec::with_capacity(capacity),
            source_rx,
        }
    }

    /// Renders the next block into `output`, which holds interleaved frames.
    pub fn render(&mut self, output: &mut [f32]) {
        while let Ok(source) = self.source_rx.try_recv() {
            self.sources.push(source);
        }

        output.fill(0.0);
        let channels = self.channels as usize;
        let frames = output.len() / channels;

        self.sources.retain_mut(|source| {
            // Stopped voices were already removed by the allocator.
            if source.handle.stop_requested() {
                return false;
            }

            source.mix_into(output, channels, frames);
            if source.is_finished() {
                source.complete();
                return false;
            }
            true
        });
    }

    /// Gets the number of output channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Gets the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Gets the number of sources being mixed.
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("active_sources", &self.sources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::{DecodedBuffer, SampleRepository, VoiceState};

    fn sample(channels: Vec<Vec<f32>>) -> Arc<PreloadedSample> {
        let repository = SampleRepository::new(10);
        let frames = channels[0].len();
        let source = DecodedBuffer::new(channels, 10);
        assert!(repository.preload("test", &source, 0.0, frames as f64 / 10.0));
        repository.get("test").unwrap()
    }

    fn source(
        id: u64,
        sample: Arc<PreloadedSample>,
        gain: f32,
        completion_tx: &Sender<VoiceId>,
    ) -> (ActiveSource, Arc<VoiceHandle>) {
        let handle = Arc::new(VoiceHandle::new());
        handle.mark_playing();
        (
            ActiveSource::new(VoiceId(id), sample, gain, handle.clone(), completion_tx.clone()),
            handle,
        )
    }

    #[test]
    fn test_stereo_mixing_with_gain() {
        let (source_tx, source_rx) = crossbeam_channel::unbounded();
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let mut mixer = Mixer::new(2, 10, source_rx, 4);

        let chop = sample(vec![vec![0.5, 0.25, 1.0], vec![-0.5, -0.25, -1.0]]);
        let (active, handle) = source(1, chop, 0.5, &completion_tx);
        source_tx.send(active).unwrap();

        let mut output = vec![0.0; 4];
        mixer.render(&mut output);
        assert_eq!(output, vec![0.25, -0.25, 0.125, -0.125]);
        assert_eq!(mixer.active_sources(), 1);
        assert!(completion_rx.try_recv().is_err());

        mixer.render(&mut output);
        assert_eq!(output, vec![0.5, -0.5, 0.0, 0.0]);
        assert_eq!(mixer.active_sources(), 0);
        assert_eq!(completion_rx.try_recv().unwrap(), VoiceId(1));
        assert_eq!(handle.state(), VoiceState::Ended);
    }

    #[test]
    fn test_mono_feeds_all_outputs_and_sources_sum() {
        let (source_tx, source_rx) = crossbeam_channel::unbounded();
        let (completion_tx, _completion_rx) = crossbeam_channel::unbounded();
        let mut mixer = Mixer::new(2, 10, source_rx, 4);

        let chop = sample(vec![vec![0.5, 0.5, 0.5, 0.5]]);
        source_tx.send(source(1, chop.clone(), 1.0, &completion_tx).0).unwrap();
        source_tx.send(source(2, chop, 0.5, &completion_tx).0).unwrap();

        let mut output = vec![0.0; 2];
        mixer.render(&mut output);
        assert_eq!(output, vec![0.75, 0.75]);
        assert_eq!(mixer.active_sources(), 2);
    }

    #[test]
    fn test_stopped_sources_are_dropped_silently() {
        let (source_tx, source_rx) = crossbeam_channel::unbounded();
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let mut mixer = Mixer::new(1, 10, source_rx, 4);

        let chop = sample(vec![vec![1.0; 8]]);
        let (active, handle) = source(7, chop, 1.0, &completion_tx);
        source_tx.send(active).unwrap();

        let mut output = vec![0.0; 2];
        mixer.render(&mut output);
        assert_eq!(output, vec![1.0, 1.0]);

        handle.request_stop();
        mixer.render(&mut output);
        assert_eq!(output, vec![0.0, 0.0]);
        assert_eq!(mixer.active_sources(), 0);
        assert!(completion_rx.try_recv().is_err());
    }
}

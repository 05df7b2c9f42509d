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

//! Voice allocation for polyphonic chop playback.
//!
//! The allocator owns the table of sounding voices. New voices are posted to the
//! mixer over a channel, and the mixer reports natural completion back over another
//! channel that a reaper thread drains.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, span, warn, Level};

use super::repository::PreloadedSample;
use crate::audio::mixer::ActiveSource;
use crate::config::{StealPolicy, Voices};

/// Identifies a voice within one allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice-{}", self.0)
    }
}

/// Lifecycle of a voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    Scheduled,
    Playing,
    Ended,
}

const SCHEDULED: u8 = 0;
const PLAYING: u8 = 1;
const ENDED: u8 = 2;

/// State shared between the allocator and the mixer for one voice.
#[derive(Debug)]
pub struct VoiceHandle {
    state: AtomicU8,
    stop: AtomicBool,
}

impl VoiceHandle {
    /// Creates a handle in the Scheduled state.
    pub fn new() -> VoiceHandle {
        VoiceHandle {
            state: AtomicU8::new(SCHEDULED),
            stop: AtomicBool::new(false),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> VoiceState {
        match self.state.load(Ordering::Acquire) {
            SCHEDULED => VoiceState::Scheduled,
            PLAYING => VoiceState::Playing,
            _ => VoiceState::Ended,
        }
    }

    /// Moves Scheduled to Playing. A voice the mixer already finished stays Ended.
    pub fn mark_playing(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, PLAYING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks the voice as ended.
    pub fn mark_ended(&self) {
        self.state.store(ENDED, Ordering::Release);
    }

    /// Asks the mixer to drop the source on its next render.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Returns true if a stop was requested.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl Default for VoiceHandle {
    fn default() -> Self {
        VoiceHandle::new()
    }
}

/// A sounding voice.
struct Voice {
    id: VoiceId,
    sample_id: String,
    started_at: Instant,
    gain: f32,
    handle: Arc<VoiceHandle>,
}

impl Voice {
    /// Cuts the voice off immediately.
    fn stop(&self) {
        self.handle.request_stop();
        self.handle.mark_ended();
    }
}

/// Reasons a voice could not be allocated.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum AllocationError {
    #[error("Audio output is not running")]
    NotRunning,

    #[error("All {max} voices are in use")]
    PolyphonyExhausted { max: usize },

    #[error("Invalid gain")]
    InvalidGain,

    #[error("Audio output has closed")]
    OutputClosed,
}

/// Allocates voices and tracks them until they finish.
pub struct VoiceAllocator {
    voices: Arc<Mutex<Vec<Voice>>>,
    source_tx: Sender<ActiveSource>,
    completion_tx: Sender<VoiceId>,
    next_id: AtomicU64,
    accepting: AtomicBool,
    max_voices: Option<usize>,
    stealing: StealPolicy,
    /// Dropping this sender stops the reaper.
    shutdown_tx: Option<Sender<()>>,
    reaper: Option<JoinHandle<()>>,
}

impl VoiceAllocator {
    /// Creates an allocator and the receiver the mixer should read new sources from.
    pub fn new(config: &Voices) -> Result<(VoiceAllocator, Receiver<ActiveSource>), std::io::Error> {
        let (source_tx, source_rx) = crossbeam_channel::unbounded();
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let voices = Arc::new(Mutex::new(Vec::new()));

        let reaper = {
            let voices = voices.clone();
            thread::Builder::new()
                .name("voice-reaper".into())
                .spawn(move || reap(voices, completion_rx, shutdown_rx))?
        };

        Ok((
            VoiceAllocator {
                voices,
                source_tx,
                completion_tx,
                next_id: AtomicU64::new(1),
                accepting: AtomicBool::new(false),
                max_voices: config.max_voices(),
                stealing: config.stealing(),
                shutdown_tx: Some(shutdown_tx),
                reaper: Some(reaper),
            },
            source_rx,
        ))
    }

    /// Starts a voice for the given chop. The effective gain is the clamped
    /// velocity scaled by the non-negative gain.
    pub fn allocate(
        &self,
        sample_id: &str,
        sample: Arc<PreloadedSample>,
        velocity: f32,
        gain: f32,
    ) -> Result<VoiceId, AllocationError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(AllocationError::NotRunning);
        }

        let velocity = if velocity.is_nan() {
            0.0
        } else {
            velocity.clamp(0.0, 1.0)
        };
        let gain = velocity * gain.max(0.0);
        if !gain.is_finite() {
            return Err(AllocationError::InvalidGain);
        }

        let id = VoiceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(VoiceHandle::new());
        let source = ActiveSource::new(
            id,
            sample,
            gain,
            handle.clone(),
            self.completion_tx.clone(),
        );

        {
            let mut voices = self.voices.lock();
            // Checked again under the lock so a shutdown can't miss this voice.
            if !self.accepting.load(Ordering::Acquire) {
                return Err(AllocationError::NotRunning);
            }

            let mut victim = None;
            if let Some(max) = self.max_voices {
                if voices.len() >= max {
                    match self.stealing {
                        StealPolicy::Reject => {
                            return Err(AllocationError::PolyphonyExhausted { max });
                        }
                        StealPolicy::Oldest => {
                            victim = voices
                                .iter()
                                .enumerate()
                                .min_by_key(|(_, v)| v.started_at)
                                .map(|(i, _)| i);
                        }
                    }
                }
            }

            // The oldest voice is only stolen once the new one has reached the mixer.
            if self.source_tx.send(source).is_err() {
                return Err(AllocationError::OutputClosed);
            }

            if let Some(oldest) = victim {
                let stolen = voices.remove(oldest);
                stolen.stop();
                debug!(
                    voice = %stolen.id,
                    sample = stolen.sample_id,
                    gain = stolen.gain,
                    max_voices = ?self.max_voices,
                    "Voice limit reached, stole oldest"
                );
            }

            voices.push(Voice {
                id,
                sample_id: sample_id.to_string(),
                started_at: Instant::now(),
                gain,
                handle: handle.clone(),
            });
        }

        handle.mark_playing();
        Ok(id)
    }

    /// Stops every voice immediately and returns how many were sounding.
    pub fn stop_all(&self) -> usize {
        let stopped: Vec<Voice> = self.voices.lock().drain(..).collect();
        for voice in stopped.iter() {
            voice.stop();
        }
        if !stopped.is_empty() {
            info!(count = stopped.len(), "Stopped all voices");
        }
        stopped.len()
    }

    /// Returns the number of sounding voices.
    pub fn active_voice_count(&self) -> usize {
        self.voices.lock().len()
    }

    /// Returns the state of a voice, or None once it has been removed.
    pub fn voice_state(&self, id: VoiceId) -> Option<VoiceState> {
        self.voices
            .lock()
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.handle.state())
    }

    /// Returns the effective gain of a voice, or None once it has been removed.
    pub fn voice_gain(&self, id: VoiceId) -> Option<f32> {
        self.voices.lock().iter().find(|v| v.id == id).map(|v| v.gain)
    }

    /// Controls whether new voices are accepted. Taken under the voice table lock,
    /// so once this returns false no allocation can still add a voice.
    pub fn set_accepting(&self, accepting: bool) {
        let _voices = self.voices.lock();
        self.accepting.store(accepting, Ordering::Release);
    }

    /// Returns true if new voices are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Pre-sizes the voice table so allocation doesn't grow it under load.
    pub fn reserve(&self) {
        let mut voices = self.voices.lock();
        let target = self.max_voices.unwrap_or(crate::config::voices::DEFAULT_MAX_VOICES as usize);
        let additional = target.saturating_sub(voices.len());
        voices.reserve(additional);
    }

    /// Returns the voice ceiling.
    pub fn max_voices(&self) -> Option<usize> {
        self.max_voices
    }

    /// Returns the policy applied at the voice ceiling.
    pub fn stealing(&self) -> StealPolicy {
        self.stealing
    }
}

impl fmt::Debug for VoiceAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceAllocator")
            .field("active_voices", &self.active_voice_count())
            .field("max_voices", &self.max_voices)
            .field("stealing", &self.stealing)
            .finish()
    }
}

impl Drop for VoiceAllocator {
    fn drop(&mut self) {
        self.set_accepting(false);
        self.stop_all();
        self.shutdown_tx.take();
        if let Some(reaper) = self.reaper.take() {
            if reaper.join().is_err() {
                warn!("Voice reaper panicked");
            }
        }
    }
}

/// Removes voices from the table as the mixer finishes them.
fn reap(voices: Arc<Mutex<Vec<Voice>>>, completion_rx: Receiver<VoiceId>, shutdown_rx: Receiver<()>) {
    let span = span!(Level::INFO, "voice reaper");
    let _enter = span.enter();

    loop {
        select! {
            recv(completion_rx) -> id => match id {
                Ok(id) => {
                    let mut voices = voices.lock();
                    if let Some(pos) = voices.iter().position(|v| v.id == id) {
                        voices.remove(pos);
                    }
                }
                Err(_) => return,
            },
            recv(shutdown_rx) -> _ => {
                debug!("Voice reaper shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mixer::Mixer;
    use crate::samples::{DecodedBuffer, SampleRepository};
    use crate::testutil::eventually;

    fn chop(frames: usize) -> Arc<PreloadedSample> {
        let repository = SampleRepository::new(100);
        let source = DecodedBuffer::new(vec![vec![0.5; frames]], 100);
        assert!(repository.preload("chop", &source, 0.0, frames as f64 / 100.0));
        repository.get("chop").unwrap()
    }

    fn allocator(max: u32, stealing: StealPolicy) -> (VoiceAllocator, Receiver<ActiveSource>) {
        let (allocator, source_rx) = VoiceAllocator::new(&Voices::new(max, stealing)).unwrap();
        allocator.set_accepting(true);
        (allocator, source_rx)
    }

    #[test]
    fn test_not_running() {
        let (allocator, _source_rx) = VoiceAllocator::new(&Voices::default()).unwrap();
        assert_eq!(
            allocator.allocate("chop", chop(10), 1.0, 1.0),
            Err(AllocationError::NotRunning)
        );
    }

    #[test]
    fn test_allocate_and_complete() {
        let (allocator, source_rx) = allocator(4, StealPolicy::Oldest);
        let mut mixer = Mixer::new(1, 100, source_rx, 4);

        let id = allocator.allocate("chop", chop(10), 1.0, 1.0).unwrap();
        assert_eq!(allocator.active_voice_count(), 1);
        assert_eq!(allocator.voice_state(id), Some(VoiceState::Playing));

        let mut output = vec![0.0; 16];
        mixer.render(&mut output);
        assert_eq!(output[0], 0.5);
        assert_eq!(output[10], 0.0);

        eventually(
            || allocator.active_voice_count() == 0,
            "Finished voice was never removed",
        );
        assert_eq!(allocator.voice_state(id), None);
    }

    #[test]
    fn test_velocity_and_gain() {
        let (allocator, source_rx) = allocator(4, StealPolicy::Oldest);
        let mut mixer = Mixer::new(1, 100, source_rx, 4);

        // Velocity clamps to 1.0, gain scales linearly.
        allocator.allocate("chop", chop(10), 3.0, 0.5).unwrap();
        // Negative gain is silent.
        allocator.allocate("chop", chop(10), 1.0, -1.0).unwrap();

        let mut output = vec![0.0; 1];
        mixer.render(&mut output);
        assert_eq!(output[0], 0.25);

        assert_eq!(
            allocator.allocate("chop", chop(10), 1.0, f32::INFINITY),
            Err(AllocationError::InvalidGain)
        );
    }

    #[test]
    fn test_steal_oldest() {
        let (allocator, source_rx) = allocator(2, StealPolicy::Oldest);

        let first = allocator.allocate("chop", chop(100), 1.0, 1.0).unwrap();
        let second = allocator.allocate("chop", chop(100), 1.0, 1.0).unwrap();
        let third = allocator.allocate("chop", chop(100), 1.0, 1.0).unwrap();

        assert_eq!(allocator.active_voice_count(), 2);
        assert_eq!(allocator.voice_state(first), None);
        assert_eq!(allocator.voice_state(second), Some(VoiceState::Playing));
        assert_eq!(allocator.voice_state(third), Some(VoiceState::Playing));

        // The stolen source is dropped by the mixer without a completion.
        let mut mixer = Mixer::new(1, 100, source_rx, 4);
        let mut output = vec![0.0; 1];
        mixer.render(&mut output);
        assert_eq!(mixer.active_sources(), 2);
    }

    #[test]
    fn test_reject_when_full() {
        let (allocator, _source_rx) = allocator(1, StealPolicy::Reject);
        allocator.allocate("chop", chop(100), 1.0, 1.0).unwrap();
        assert_eq!(
            allocator.allocate("chop", chop(100), 1.0, 1.0),
            Err(AllocationError::PolyphonyExhausted { max: 1 })
        );
        assert_eq!(allocator.active_voice_count(), 1);
    }

    #[test]
    fn test_unbounded() {
        let (allocator, _source_rx) = allocator(0, StealPolicy::Reject);
        for _ in 0..64 {
            allocator.allocate("chop", chop(100), 1.0, 1.0).unwrap();
        }
        assert_eq!(allocator.active_voice_count(), 64);
    }

    #[test]
    fn test_stop_all() {
        let (allocator, source_rx) = allocator(8, StealPolicy::Oldest);
        for _ in 0..3 {
            allocator.allocate("chop", chop(100), 1.0, 1.0).unwrap();
        }
        assert_eq!(allocator.stop_all(), 3);
        assert_eq!(allocator.active_voice_count(), 0);
        assert_eq!(allocator.stop_all(), 0);

        let mut mixer = Mixer::new(1, 100, source_rx, 4);
        let mut output = vec![0.0; 4];
        mixer.render(&mut output);
        assert_eq!(output, vec![0.0; 4]);
        assert_eq!(mixer.active_sources(), 0);
    }

    #[test]
    fn test_output_closed() {
        let (allocator, source_rx) = allocator(8, StealPolicy::Oldest);
        drop(source_rx);
        assert_eq!(
            allocator.allocate("chop", chop(10), 1.0, 1.0),
            Err(AllocationError::OutputClosed)
        );
        assert_eq!(allocator.active_voice_count(), 0);
    }

    #[test]
    fn test_closed_output_does_not_steal() {
        let (allocator, source_rx) = allocator(1, StealPolicy::Oldest);
        let first = allocator.allocate("chop", chop(100), 1.0, 1.0).unwrap();
        drop(source_rx);

        assert_eq!(
            allocator.allocate("chop", chop(100), 1.0, 1.0),
            Err(AllocationError::OutputClosed)
        );
        assert_eq!(allocator.active_voice_count(), 1);
        assert_eq!(allocator.voice_state(first), Some(VoiceState::Playing));
    }

    #[test]
    fn test_stop_racing_allocations() {
        let (allocator, _source_rx) = allocator(0, StealPolicy::Oldest);
        let sample = chop(1000);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while allocator.allocate("chop", sample.clone(), 1.0, 1.0).is_ok() {}
                });
            }
            eventually(
                || allocator.active_voice_count() > 0,
                "No voices were allocated",
            );
            allocator.set_accepting(false);
            allocator.stop_all();
        });

        // Nothing allocated after stop_all survives it.
        assert_eq!(allocator.active_voice_count(), 0);
    }

    #[test]
    fn test_voice_gain() {
        let (allocator, _source_rx) = allocator(4, StealPolicy::Oldest);
        let id = allocator.allocate("chop", chop(100), 0.5, 0.5).unwrap();
        assert_eq!(allocator.voice_gain(id), Some(0.25));
        allocator.stop_all();
        assert_eq!(allocator.voice_gain(id), None);
    }

    #[test]
    fn test_ids_are_unique() {
        let (allocator, _source_rx) = allocator(0, StealPolicy::Oldest);
        let a = allocator.allocate("chop", chop(10), 1.0, 1.0).unwrap();
        let b = allocator.allocate("chop", chop(10), 1.0, 1.0).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), format!("voice-{}", a.0));
    }
}

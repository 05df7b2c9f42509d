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

//! The trigger engine.
//!
//! An engine owns one sample repository, one voice allocator and one audio output.
//! Triggering is synchronous: a repository lookup, a voice allocation and a channel
//! post to the render thread.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audio::{self, mixer::ActiveSource, AudioError, Mixer, Output, OutputSettings, RunningOutput};
use crate::clock::Clock;
use crate::config::{self, ConfigError, StealPolicy};
use crate::samples::{
    AllocationError, DecodedBuffer, SampleRepository, VoiceAllocator, VoiceId, VoiceState,
};

/// Errors raised while building or starting an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Why a trigger produced no sound.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum TriggerError {
    #[error("Sample not preloaded")]
    NotPreloaded,

    #[error("Voice allocation failed: {0}")]
    Allocation(#[from] AllocationError),
}

/// Per-trigger options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerOptions {
    /// Linear gain applied on top of velocity.
    pub volume: f32,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        TriggerOptions { volume: 1.0 }
    }
}

/// The outcome of a trigger and how long the engine took to produce it.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerResult {
    pub latency_ms: f64,
    pub outcome: Result<VoiceId, TriggerError>,
}

impl TriggerResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn voice_id(&self) -> Option<VoiceId> {
        self.outcome.as_ref().ok().copied()
    }

    pub fn error(&self) -> Option<&TriggerError> {
        self.outcome.as_ref().err()
    }
}

/// A snapshot of the engine's performance.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Mean latency of successful triggers, in milliseconds.
    pub average_latency: f64,
    pub active_voices: usize,
    pub preloaded_samples: usize,
    /// Latency of one output block, in milliseconds. 0 until the output is running.
    pub audio_context_latency: f64,
    pub buffer_size: usize,
    pub sample_rate: u32,
}

/// The settings the engine runs with, included in latency exports.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Optimizations {
    pub ultra_low_latency: bool,
    pub buffer_size: usize,
    pub sample_rate: u32,
    pub realtime_priority: bool,
    pub max_voices: Option<usize>,
    pub stealing: StealPolicy,
    pub samples_paged_in: usize,
}

/// Plays preloaded chops on demand.
pub struct TriggerEngine {
    clock: Clock,
    repository: SampleRepository,
    allocator: VoiceAllocator,
    output: Arc<dyn Output>,
    running: Mutex<Option<RunningOutput>>,
    /// Kept so the mixer can be rebuilt if startup has to be retried.
    source_rx: Receiver<ActiveSource>,
    settings: OutputSettings,
    /// Running sum of successful trigger latencies, in nanoseconds.
    latency_sum_ns: AtomicU64,
    latency_count: AtomicU64,
    optimized: AtomicBool,
    samples_paged_in: AtomicUsize,
}

impl TriggerEngine {
    /// Creates an engine for the configured audio device. The output isn't started
    /// until `initialize` is called.
    pub fn new(audio: &config::Audio, voices: &config::Voices) -> Result<TriggerEngine, EngineError> {
        TriggerEngine::with_output(audio, voices, audio::get_output(audio.device()))
    }

    /// Creates an engine that renders through the given output.
    pub fn with_output(
        audio: &config::Audio,
        voices: &config::Voices,
        output: Arc<dyn Output>,
    ) -> Result<TriggerEngine, EngineError> {
        let settings = OutputSettings::from_config(audio)?;
        let (allocator, source_rx) = VoiceAllocator::new(voices).map_err(AudioError::from)?;

        Ok(TriggerEngine {
            clock: Clock::new(),
            repository: SampleRepository::new(settings.sample_rate),
            allocator,
            output,
            running: Mutex::new(None),
            source_rx,
            settings,
            latency_sum_ns: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            optimized: AtomicBool::new(false),
            samples_paged_in: AtomicUsize::new(0),
        })
    }

    /// Starts the audio output. Calling this on a running engine does nothing.
    pub fn initialize(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let capacity = self
            .allocator
            .max_voices()
            .unwrap_or(config::voices::DEFAULT_MAX_VOICES as usize)
            * 2;
        let mixer = Mixer::new(
            self.settings.channels,
            self.settings.sample_rate,
            self.source_rx.clone(),
            capacity,
        );

        info!(output = %self.output, "Initializing trigger engine");
        let output = self.output.start(mixer, &self.settings)?;
        *running = Some(output);
        self.allocator.set_accepting(true);
        Ok(())
    }

    /// Returns true once the output is running.
    pub fn is_initialized(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Initializes if needed, pre-sizes the voice table and pages in every
    /// preloaded chop. Safe to call more than once.
    pub fn optimize_for_ultra_low_latency(&self) -> Result<(), EngineError> {
        self.initialize()?;
        self.allocator.reserve();

        let samples = self.repository.all();
        let mut checksum = 0.0;
        for sample in samples.iter() {
            checksum += sample.touch();
        }
        std::hint::black_box(checksum);

        self.samples_paged_in.store(samples.len(), Ordering::Relaxed);
        if !self.optimized.swap(true, Ordering::AcqRel) {
            info!(
                samples = samples.len(),
                max_voices = ?self.allocator.max_voices(),
                "Engine optimized for low latency"
            );
        }
        Ok(())
    }

    /// Trims and stores a chop. Returns false if the trim or buffer is invalid.
    pub fn preload_sample(
        &self,
        sample_id: &str,
        source: &DecodedBuffer,
        trim_start: f64,
        trim_end: f64,
    ) -> bool {
        if !self.repository.preload(sample_id, source, trim_start, trim_end) {
            return false;
        }
        if self.optimized.load(Ordering::Acquire) {
            if let Some(sample) = self.repository.get(sample_id) {
                std::hint::black_box(sample.touch());
            }
        }
        true
    }

    pub fn is_preloaded(&self, sample_id: &str) -> bool {
        self.repository.is_preloaded(sample_id)
    }

    /// Removes a chop. Voices already playing it finish normally.
    pub fn evict_sample(&self, sample_id: &str) -> bool {
        self.repository.evict(sample_id)
    }

    /// Removes every chop and returns how many were stored.
    pub fn clear_samples(&self) -> usize {
        self.repository.clear_all()
    }

    /// Starts a voice for a preloaded chop.
    pub fn trigger_sample(&self, sample_id: &str, velocity: f32, options: TriggerOptions) -> TriggerResult {
        let t0 = self.clock.now_ms();
        let outcome = match self.repository.get(sample_id) {
            Some(sample) => self
                .allocator
                .allocate(sample_id, sample, velocity, options.volume)
                .map_err(TriggerError::from),
            None => Err(TriggerError::NotPreloaded),
        };
        let latency_ms = self.clock.now_ms() - t0;

        match &outcome {
            Ok(_) => {
                self.latency_sum_ns
                    .fetch_add((latency_ms * 1_000_000.0) as u64, Ordering::Relaxed);
                self.latency_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(TriggerError::NotPreloaded) => {
                debug!(sample = sample_id, "Trigger for sample that isn't preloaded");
            }
            Err(TriggerError::Allocation(e)) => {
                if cfg!(debug_assertions) {
                    error!(
                        sample = sample_id,
                        velocity,
                        volume = options.volume,
                        active_voices = self.allocator.active_voice_count(),
                        err = %e,
                        "Voice allocation failed"
                    );
                } else {
                    warn!(sample = sample_id, "Voice allocation failed");
                }
            }
        }

        TriggerResult { latency_ms, outcome }
    }

    /// Stops every voice and returns how many were sounding.
    pub fn stop_all_samples(&self) -> usize {
        self.allocator.stop_all()
    }

    pub fn active_voice_count(&self) -> usize {
        self.allocator.active_voice_count()
    }

    pub fn voice_state(&self, voice_id: VoiceId) -> Option<VoiceState> {
        self.allocator.voice_state(voice_id)
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let count = self.latency_count.load(Ordering::Relaxed);
        let average_latency = if count == 0 {
            0.0
        } else {
            self.latency_sum_ns.load(Ordering::Relaxed) as f64 / count as f64 / 1_000_000.0
        };
        let info = self.running.lock().as_ref().map(RunningOutput::info);

        PerformanceMetrics {
            average_latency,
            active_voices: self.allocator.active_voice_count(),
            preloaded_samples: self.repository.len(),
            audio_context_latency: info.map(|info| info.latency_ms).unwrap_or(0.0),
            buffer_size: info
                .map(|info| info.buffer_size)
                .unwrap_or(self.settings.buffer_size),
            sample_rate: info
                .map(|info| info.sample_rate)
                .unwrap_or(self.settings.sample_rate),
        }
    }

    pub fn optimizations(&self) -> Optimizations {
        Optimizations {
            ultra_low_latency: self.optimized.load(Ordering::Acquire),
            buffer_size: self.settings.buffer_size,
            sample_rate: self.settings.sample_rate,
            realtime_priority: self.settings.realtime_priority,
            max_voices: self.allocator.max_voices(),
            stealing: self.allocator.stealing(),
            samples_paged_in: self.samples_paged_in.load(Ordering::Relaxed),
        }
    }

    /// Returns the engine's clock. Latency timestamps should come from it.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Stops every voice and the audio output. The engine can be initialized again.
    pub fn shutdown(&self) {
        self.allocator.set_accepting(false);
        self.allocator.stop_all();
        if self.running.lock().take().is_some() {
            info!("Trigger engine shut down");
        }
    }
}

impl fmt::Debug for TriggerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerEngine")
            .field("output", &self.output.to_string())
            .field("repository", &self.repository)
            .field("allocator", &self.allocator)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Drop for TriggerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::audio::mock;
    use crate::testutil::{eventually, mock_audio, stereo_buffer};

    fn engine() -> TriggerEngine {
        TriggerEngine::new(&mock_audio(), &config::Voices::default()).unwrap()
    }

    #[test]
    fn test_not_preloaded() {
        let engine = engine();
        engine.initialize().unwrap();

        let result = engine.trigger_sample("missing", 1.0, TriggerOptions::default());
        assert!(!result.is_success());
        assert_eq!(result.voice_id(), None);
        assert_eq!(result.error(), Some(&TriggerError::NotPreloaded));
        assert_eq!(result.error().unwrap().to_string(), "Sample not preloaded");
    }

    #[test]
    fn test_trigger_before_initialize() {
        let engine = engine();
        assert!(engine.preload_sample("A1", &stereo_buffer(44100, 1.0), 0.0, 0.5));

        let result = engine.trigger_sample("A1", 1.0, TriggerOptions::default());
        assert_eq!(
            result.error(),
            Some(&TriggerError::Allocation(AllocationError::NotRunning))
        );
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn test_concurrent_triggers() {
        let engine = TriggerEngine::new(&mock_audio(), &config::Voices::new(0, StealPolicy::Oldest)).unwrap();
        engine.initialize().unwrap();
        let source = stereo_buffer(44100, 2.0);
        let ids: Vec<String> = (0..8).map(|i| format!("A{}", i + 1)).collect();
        for id in ids.iter() {
            assert!(engine.preload_sample(id, &source, 0.0, 2.0));
        }

        let results: Vec<TriggerResult> = std::thread::scope(|s| {
            let handles: Vec<_> = ids
                .iter()
                .map(|id| {
                    let engine = &engine;
                    s.spawn(move || {
                        (0..4)
                            .map(|_| engine.trigger_sample(id, 1.0, TriggerOptions::default()))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        assert_eq!(results.len(), 32);
        assert!(results.iter().all(TriggerResult::is_success));
        let voices: std::collections::HashSet<VoiceId> =
            results.iter().filter_map(TriggerResult::voice_id).collect();
        assert_eq!(voices.len(), 32);
        assert_eq!(engine.active_voice_count(), 32);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let engine = engine();
        assert!(!engine.is_initialized());
        engine.initialize().unwrap();
        engine.initialize().unwrap();
        engine.optimize_for_ultra_low_latency().unwrap();
        engine.optimize_for_ultra_low_latency().unwrap();
        assert!(engine.is_initialized());
        assert!(engine.optimizations().ultra_low_latency);
    }

    #[test]
    fn test_trigger_and_complete() {
        let engine = engine();
        engine.initialize().unwrap();
        assert!(engine.preload_sample("short", &stereo_buffer(44100, 1.0), 0.0, 0.05));

        let result = engine.trigger_sample("short", 0.8, TriggerOptions { volume: 0.5 });
        assert!(result.is_success(), "{:?}", result.error());
        assert!(result.latency_ms >= 0.0);
        let voice_id = result.voice_id().unwrap();
        assert_eq!(engine.active_voice_count(), 1);

        eventually(
            || engine.active_voice_count() == 0,
            "Voice never completed",
        );
        assert_eq!(engine.voice_state(voice_id), None);
    }

    #[test]
    fn test_metrics() {
        let engine = engine();
        let metrics = engine.performance_metrics();
        assert_eq!(metrics.audio_context_latency, 0.0);
        assert_eq!(metrics.average_latency, 0.0);

        engine.initialize().unwrap();
        assert!(engine.preload_sample("A1", &stereo_buffer(44100, 2.0), 0.0, 2.0));
        assert!(engine.trigger_sample("A1", 1.0, TriggerOptions::default()).is_success());

        let metrics = engine.performance_metrics();
        assert_eq!(metrics.preloaded_samples, 1);
        assert_eq!(metrics.active_voices, 1);
        assert_eq!(metrics.buffer_size, 64);
        assert_eq!(metrics.sample_rate, 44100);
        assert!((metrics.audio_context_latency - 64.0 / 44100.0 * 1000.0).abs() < 1e-9);
        assert!(metrics.average_latency >= 0.0);

        let json = serde_json::to_value(&metrics).unwrap();
        for key in [
            "averageLatency",
            "activeVoices",
            "preloadedSamples",
            "audioContextLatency",
            "bufferSize",
            "sampleRate",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_startup_timeout() {
        let audio = config::Audio::new(mock::STALLED).with_startup_timeout("50ms");
        let engine = TriggerEngine::new(&audio, &config::Voices::default()).unwrap();
        assert!(matches!(
            engine.initialize(),
            Err(EngineError::Audio(AudioError::StartupTimeout(timeout))) if timeout == Duration::from_millis(50)
        ));
        assert!(!engine.is_initialized());

        assert!(engine.preload_sample("A1", &stereo_buffer(44100, 1.0), 0.0, 0.5));
        assert_eq!(
            engine.trigger_sample("A1", 1.0, TriggerOptions::default()).error(),
            Some(&TriggerError::Allocation(AllocationError::NotRunning))
        );
    }

    #[test]
    fn test_shutdown() {
        let engine = engine();
        engine.initialize().unwrap();
        assert!(engine.preload_sample("A1", &stereo_buffer(44100, 2.0), 0.0, 2.0));
        assert!(engine.trigger_sample("A1", 1.0, TriggerOptions::default()).is_success());

        engine.shutdown();
        assert!(!engine.is_initialized());
        assert_eq!(engine.active_voice_count(), 0);

        // A shut down engine comes back up on initialize.
        engine.initialize().unwrap();
        assert!(engine.trigger_sample("A1", 1.0, TriggerOptions::default()).is_success());
    }

    #[test]
    fn test_independent_engines() {
        let first = engine();
        let second = engine();
        first.initialize().unwrap();
        second.initialize().unwrap();
        assert!(first.preload_sample("A1", &stereo_buffer(44100, 1.0), 0.0, 1.0));

        assert!(first.trigger_sample("A1", 1.0, TriggerOptions::default()).is_success());
        assert!(!second.trigger_sample("A1", 1.0, TriggerOptions::default()).is_success());
    }
}

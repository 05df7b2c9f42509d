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
use std::{fmt, sync::Arc, thread, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};

use crate::config;

pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod thread_priority;

pub use mixer::Mixer;

/// Errors raised by audio outputs.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio output did not start within {0:?}")]
    StartupTimeout(Duration),

    #[error("Audio output failed to start: {0}")]
    StartupFailed(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Unable to spawn audio thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// The parameters an output is started with.
#[derive(Clone, Debug)]
pub struct OutputSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per render block.
    pub buffer_size: usize,
    pub startup_timeout: Duration,
    pub realtime_priority: bool,
}

impl OutputSettings {
    /// Builds settings from the audio configuration.
    pub fn from_config(config: &config::Audio) -> Result<OutputSettings, config::ConfigError> {
        Ok(OutputSettings {
            sample_rate: config.sample_rate(),
            channels: config.channels(),
            buffer_size: config.buffer_size().max(1),
            startup_timeout: config.startup_timeout()?,
            realtime_priority: config.realtime_priority(),
        })
    }
}

/// What a running output reports about itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputInfo {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub channels: u16,
    /// Latency contributed by one render block, in milliseconds.
    pub latency_ms: f64,
}

impl OutputInfo {
    pub fn new(sample_rate: u32, buffer_size: usize, channels: u16) -> OutputInfo {
        OutputInfo {
            sample_rate,
            buffer_size,
            channels,
            latency_ms: if sample_rate == 0 {
                0.0
            } else {
                buffer_size as f64 / sample_rate as f64 * 1000.0
            },
        }
    }
}

/// An audio backend able to drive a mixer.
pub trait Output: fmt::Display + Send + Sync {
    /// Starts rendering the mixer. Returns once the output is running, or with an
    /// error if it failed or did not come up within the startup timeout.
    fn start(&self, mixer: Mixer, settings: &OutputSettings) -> Result<RunningOutput, AudioError>;
}

/// A started output. Dropping it stops the output thread.
pub struct RunningOutput {
    info: OutputInfo,
    /// Dropping this sender signals the output thread to stop.
    stop_tx: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RunningOutput {
    /// Spawns an output thread and waits for it to report readiness.
    ///
    /// The body receives a sender it must use exactly once to report readiness (or
    /// the reason it could not start), and a receiver that disconnects on stop.
    pub(crate) fn spawn<F>(name: &str, timeout: Duration, body: F) -> Result<RunningOutput, AudioError>
    where
        F: FnOnce(Sender<Result<OutputInfo, String>>, Receiver<()>) + Send + 'static,
    {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(ready_tx, stop_rx))?;

        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(info)) => {
                info!(
                    sample_rate = info.sample_rate,
                    buffer_size = info.buffer_size,
                    channels = info.channels,
                    latency_ms = info.latency_ms,
                    "Audio output started"
                );
                Ok(RunningOutput {
                    info,
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                })
            }
            Ok(Err(reason)) => {
                drop(stop_tx);
                let _ = thread.join();
                Err(AudioError::StartupFailed(reason))
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread exits once it notices the stop channel has closed.
                drop(stop_tx);
                warn!(timeout = ?timeout, "Audio output startup timed out");
                Err(AudioError::StartupTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                drop(stop_tx);
                let _ = thread.join();
                Err(AudioError::StartupFailed(
                    "output thread exited before it was ready".to_string(),
                ))
            }
        }
    }

    /// Gets the output's reported parameters.
    pub fn info(&self) -> OutputInfo {
        self.info
    }
}

impl fmt::Debug for RunningOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningOutput").field("info", &self.info).finish()
    }
}

impl Drop for RunningOutput {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio output thread panicked");
            }
        }
    }
}

/// Describes an output device for listing.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<DeviceInfo>, AudioError> {
    cpal::Output::list()
}

/// Gets an output for the given device name. Names starting with "mock" give a
/// timer-driven output that needs no hardware.
pub fn get_output(device: &str) -> Arc<dyn Output> {
    if device.starts_with("mock") {
        return Arc::new(mock::Output::new(device));
    }
    Arc::new(cpal::Output::new(device))
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_output_info_latency() {
        let info = OutputInfo::new(48000, 128, 2);
        assert!((info.latency_ms - 2.6666).abs() < 0.001);
        assert_eq!(OutputInfo::new(0, 128, 2).latency_ms, 0.0);
    }

    #[test]
    fn test_spawn_reports_failure() {
        let result = RunningOutput::spawn("test", Duration::from_secs(1), |ready_tx, _| {
            let _ = ready_tx.send(Err("no device".to_string()));
        });
        assert!(matches!(result, Err(AudioError::StartupFailed(reason)) if reason == "no device"));
    }

    #[test]
    fn test_spawn_times_out() {
        let start = Instant::now();
        let result = RunningOutput::spawn("test", Duration::from_millis(50), |_ready_tx, stop_rx| {
            let _ = stop_rx.recv();
        });
        assert!(matches!(result, Err(AudioError::StartupTimeout(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_get_output() {
        assert_eq!(get_output("mock").to_string(), "mock (Mock)");
    }
}

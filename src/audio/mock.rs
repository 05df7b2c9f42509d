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
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::TryRecvError;
use tracing::{debug, info, span, Level};

use super::{AudioError, Mixer, OutputInfo, OutputSettings, RunningOutput};

/// Device name of a mock output that never becomes ready.
pub const STALLED: &str = "mock-stalled";

/// A mock output. Renders the mixer on a timer thread and discards the audio.
#[derive(Clone)]
pub struct Output {
    name: String,
    /// Number of blocks rendered so far.
    blocks: Arc<AtomicU64>,
}

impl Output {
    /// Gets the given mock output.
    pub fn new(name: &str) -> Output {
        Output {
            name: name.to_string(),
            blocks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the number of blocks rendered.
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }
}

impl super::Output for Output {
    fn start(&self, mut mixer: Mixer, settings: &OutputSettings) -> Result<RunningOutput, AudioError> {
        let name = self.name.clone();
        let blocks = self.blocks.clone();
        let info = OutputInfo::new(settings.sample_rate, settings.buffer_size, mixer.channels());
        let period = if settings.sample_rate == 0 {
            Duration::from_millis(1)
        } else {
            Duration::from_secs_f64(settings.buffer_size as f64 / settings.sample_rate as f64)
        };

        RunningOutput::spawn("mock-audio", settings.startup_timeout, move |ready_tx, stop_rx| {
            let span = span!(Level::INFO, "mock output");
            let _enter = span.enter();

            if name == STALLED {
                debug!(device = name, "Stalling on startup");
                let _ = stop_rx.recv();
                return;
            }

            info!(device = name, period = ?period, "Starting mock output");
            let mut buffer = vec![0.0f32; info.buffer_size * info.channels as usize];
            if ready_tx.send(Ok(info)).is_err() {
                return;
            }

            let mut next = Instant::now();
            loop {
                match stop_rx.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    _ => break,
                }

                mixer.render(&mut buffer);
                blocks.fetch_add(1, Ordering::Relaxed);

                next += period;
                let now = Instant::now();
                if next > now {
                    spin_sleep::sleep(next - now);
                } else {
                    // Fell behind; don't try to catch up with a burst.
                    next = now;
                }
            }
            info!(device = name, "Mock output stopped");
        })
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::Output as _;
    use crate::testutil::eventually;

    fn settings(startup_timeout: Duration) -> OutputSettings {
        OutputSettings {
            sample_rate: 44100,
            channels: 2,
            buffer_size: 128,
            startup_timeout,
            realtime_priority: false,
        }
    }

    #[test]
    fn test_mock_renders_until_dropped() {
        let (_source_tx, source_rx) = crossbeam_channel::unbounded();
        let output = Output::new("mock");
        let running = output
            .start(Mixer::new(2, 44100, source_rx, 4), &settings(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(running.info().buffer_size, 128);

        eventually(|| output.blocks_rendered() > 3, "Mock output never rendered");
        drop(running);
        let rendered = output.blocks_rendered();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(output.blocks_rendered(), rendered);
    }

    #[test]
    fn test_stalled_mock_times_out() {
        let (_source_tx, source_rx) = crossbeam_channel::unbounded();
        let output = Output::new(STALLED);
        let result = output.start(
            Mixer::new(2, 44100, source_rx, 4),
            &settings(Duration::from_millis(50)),
        );
        assert!(matches!(result, Err(AudioError::StartupTimeout(_))));
    }
}

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

//! Latency measurement, rating and export.
//!
//! Measurements are recorded off the trigger path. Aggregation runs either on
//! demand or on an independent interval task.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Weak},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::engine::Optimizations;
use crate::subscribers::{SubscriptionId, Subscribers};

/// What a measurement covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LatencyCategory {
    /// From the input event to the pad being resolved.
    KeyPress,
    /// The engine trigger call.
    AudioTrigger,
    /// From the input event to the engine returning.
    Total,
}

impl LatencyCategory {
    pub const ALL: [LatencyCategory; 3] = [
        LatencyCategory::KeyPress,
        LatencyCategory::AudioTrigger,
        LatencyCategory::Total,
    ];
}

impl fmt::Display for LatencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LatencyCategory::KeyPress => "keyPress",
            LatencyCategory::AudioTrigger => "audioTrigger",
            LatencyCategory::Total => "total",
        })
    }
}

/// Qualitative rating of a latency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyRating {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Unacceptable,
}

impl fmt::Display for LatencyRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LatencyRating::Excellent => "excellent",
            LatencyRating::Good => "good",
            LatencyRating::Acceptable => "acceptable",
            LatencyRating::Poor => "poor",
            LatencyRating::Unacceptable => "unacceptable",
        })
    }
}

/// Upper bounds, in milliseconds, of each rating below unacceptable.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Thresholds {
    pub excellent: f64,
    pub good: f64,
    pub acceptable: f64,
    pub poor: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            excellent: 5.0,
            good: 15.0,
            acceptable: 30.0,
            poor: 50.0,
        }
    }
}

impl Thresholds {
    /// Rates a latency in milliseconds. Each bound is exclusive.
    pub fn rate(&self, latency_ms: f64) -> LatencyRating {
        if latency_ms < self.excellent {
            LatencyRating::Excellent
        } else if latency_ms < self.good {
            LatencyRating::Good
        } else if latency_ms < self.acceptable {
            LatencyRating::Acceptable
        } else if latency_ms < self.poor {
            LatencyRating::Poor
        } else {
            LatencyRating::Unacceptable
        }
    }
}

/// A single recorded interval, in clock milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LatencyMeasurement {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

/// A value for each latency category.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerCategory<T> {
    pub key_press: T,
    pub audio_trigger: T,
    pub total: T,
}

impl<T> PerCategory<T> {
    pub fn get(&self, category: LatencyCategory) -> &T {
        match category {
            LatencyCategory::KeyPress => &self.key_press,
            LatencyCategory::AudioTrigger => &self.audio_trigger,
            LatencyCategory::Total => &self.total,
        }
    }

    fn get_mut(&mut self, category: LatencyCategory) -> &mut T {
        match category {
            LatencyCategory::KeyPress => &mut self.key_press,
            LatencyCategory::AudioTrigger => &mut self.audio_trigger,
            LatencyCategory::Total => &mut self.total,
        }
    }

    fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> PerCategory<U> {
        PerCategory {
            key_press: f(&self.key_press),
            audio_trigger: f(&self.audio_trigger),
            total: f(&self.total),
        }
    }
}

/// Aggregate statistics for one category. Empty categories report zeros.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CategoryAnalysis {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub rating: LatencyRating,
}

/// Statistics for every category.
pub type LatencyAnalysis = PerCategory<CategoryAnalysis>;

/// Delivered to latency subscribers.
#[derive(Clone, Debug)]
pub enum LatencyEvent {
    Measurement {
        category: LatencyCategory,
        measurement: LatencyMeasurement,
    },
    Tick(LatencyAnalysis),
}

#[derive(Serialize)]
struct Export<'a> {
    measurements: PerCategory<&'a VecDeque<LatencyMeasurement>>,
    analysis: LatencyAnalysis,
    optimizations: Optimizations,
    timestamp: u64,
}

/// Records and aggregates latency measurements.
pub struct LatencyMonitor {
    clock: Clock,
    thresholds: Thresholds,
    /// Per-category retention cap. Oldest measurements are dropped first.
    max_measurements: usize,
    measurements: Mutex<PerCategory<VecDeque<LatencyMeasurement>>>,
    optimizations: Mutex<Optimizations>,
    subscribers: Subscribers<LatencyEvent>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl LatencyMonitor {
    /// Creates a monitor. Use the engine's clock so timestamps line up.
    pub fn new(clock: Clock, thresholds: Thresholds, max_measurements: usize) -> LatencyMonitor {
        LatencyMonitor {
            clock,
            thresholds,
            max_measurements: max_measurements.max(1),
            measurements: Mutex::new(PerCategory::default()),
            optimizations: Mutex::new(Optimizations::default()),
            subscribers: Subscribers::new(),
            monitor_task: Mutex::new(None),
        }
    }

    /// Returns the monitor's clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Records an interval and returns its duration in milliseconds.
    pub fn record(&self, category: LatencyCategory, start: f64, end: f64) -> f64 {
        let measurement = LatencyMeasurement {
            start,
            end,
            duration: end - start,
        };

        {
            let mut measurements = self.measurements.lock();
            let list = measurements.get_mut(category);
            list.push_back(measurement);
            while list.len() > self.max_measurements {
                list.pop_front();
            }
        }

        self.subscribers.notify(&LatencyEvent::Measurement {
            category,
            measurement,
        });
        measurement.duration
    }

    pub fn record_key_press(&self, start: f64, end: f64) -> f64 {
        self.record(LatencyCategory::KeyPress, start, end)
    }

    pub fn record_audio_trigger(&self, start: f64, end: f64) -> f64 {
        self.record(LatencyCategory::AudioTrigger, start, end)
    }

    pub fn record_total(&self, start: f64, end: f64) -> f64 {
        self.record(LatencyCategory::Total, start, end)
    }

    /// Rates a latency with this monitor's thresholds.
    pub fn rate(&self, latency_ms: f64) -> LatencyRating {
        self.thresholds.rate(latency_ms)
    }

    /// Returns the number of retained measurements in a category.
    pub fn count(&self, category: LatencyCategory) -> usize {
        self.measurements.lock().get(category).len()
    }

    /// Aggregates the retained measurements.
    pub fn analysis(&self) -> LatencyAnalysis {
        let measurements = self.measurements.lock();
        measurements.map(|list| self.analyze(list))
    }

    fn analyze(&self, measurements: &VecDeque<LatencyMeasurement>) -> CategoryAnalysis {
        if measurements.is_empty() {
            return CategoryAnalysis {
                count: 0,
                average: 0.0,
                min: 0.0,
                max: 0.0,
                p95: 0.0,
                rating: self.thresholds.rate(0.0),
            };
        }

        let mut durations: Vec<f64> = measurements.iter().map(|m| m.duration).collect();
        durations.sort_by(f64::total_cmp);

        let count = durations.len();
        let average = durations.iter().sum::<f64>() / count as f64;
        // Nearest-rank percentile.
        let p95_rank = ((count as f64 * 0.95).ceil() as usize).clamp(1, count);

        CategoryAnalysis {
            count,
            average,
            min: durations[0],
            max: durations[count - 1],
            p95: durations[p95_rank - 1],
            rating: self.thresholds.rate(average),
        }
    }

    /// Starts periodic aggregation on the current Tokio runtime, replacing any
    /// running monitor task. Returns false if there is no runtime.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, latency monitoring not started");
            return false;
        };
        let interval = interval.max(Duration::from_millis(1));

        let monitor = Arc::downgrade(self);
        let task = runtime.spawn(monitor_loop(monitor, interval));
        if let Some(previous) = self.monitor_task.lock().replace(task) {
            previous.abort();
        }
        info!(interval = ?interval, "Latency monitoring started");
        true
    }

    /// Stops periodic aggregation.
    pub fn stop_monitoring(&self) {
        if let Some(task) = self.monitor_task.lock().take() {
            task.abort();
            info!("Latency monitoring stopped");
        }
    }

    /// Returns true while periodic aggregation is running.
    pub fn is_monitoring(&self) -> bool {
        self.monitor_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Registers a callback for measurements and monitoring ticks.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LatencyEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Records the engine settings included in exports.
    pub fn set_optimizations(&self, optimizations: Optimizations) {
        *self.optimizations.lock() = optimizations;
    }

    /// Serializes raw measurements, their analysis and the engine settings to JSON.
    pub fn export_data(&self) -> Result<String, serde_json::Error> {
        let analysis = self.analysis();
        let optimizations = self.optimizations.lock().clone();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let measurements = self.measurements.lock();
        serde_json::to_string_pretty(&Export {
            measurements: PerCategory {
                key_press: &measurements.key_press,
                audio_trigger: &measurements.audio_trigger,
                total: &measurements.total,
            },
            analysis,
            optimizations,
            timestamp,
        })
    }

    /// Drops every measurement.
    pub fn clear(&self) {
        *self.measurements.lock() = PerCategory::default();
    }
}

impl fmt::Debug for LatencyMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyMonitor")
            .field("thresholds", &self.thresholds)
            .field("max_measurements", &self.max_measurements)
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

impl Drop for LatencyMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.monitor_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn monitor_loop(monitor: Weak<LatencyMonitor>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(monitor) = monitor.upgrade() else {
            return;
        };

        let analysis = monitor.analysis();
        debug!(
            total_count = analysis.total.count,
            total_average = analysis.total.average,
            total_rating = %analysis.total.rating,
            "Latency tick"
        );
        monitor.subscribers.notify(&LatencyEvent::Tick(analysis));
    }
}

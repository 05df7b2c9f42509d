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

//! Routes key events to pads.
//!
//! Key state and debounce checks happen synchronously on the caller's thread along
//! with the trigger itself. Latency recording and subscriber notification are
//! handed to a notifier task, and preloading runs on a debounced scheduler task.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, span, warn, Level};

use super::layout::{Bank, PadSample, PhysicalKey};
use crate::config::{self, ConfigError};
use crate::engine::{TriggerEngine, TriggerOptions, TriggerResult};
use crate::latency::LatencyMonitor;
use crate::samples::{BufferProvider, DecodedBuffer, VoiceId};
use crate::subscribers::{SubscriptionId, Subscribers};

/// Errors raised while building a router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("An async runtime is required to route input")]
    NoRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A key press.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyEvent {
    pub key: PhysicalKey,
    /// Velocity in [0, 1]. Keys without one use the configured default.
    pub velocity: Option<f32>,
    /// When the event happened, in engine clock milliseconds. Defaults to now.
    pub timestamp_ms: Option<f64>,
}

impl KeyEvent {
    pub fn new(key: PhysicalKey) -> KeyEvent {
        KeyEvent {
            key,
            velocity: None,
            timestamp_ms: None,
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> KeyEvent {
        self.velocity = Some(velocity);
        self
    }

    pub fn at(mut self, timestamp_ms: f64) -> KeyEvent {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
}

/// Sent to subscribers after a pad fires successfully.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerNotification {
    pub sample_id: String,
    pub bank: String,
    /// 0-indexed pad slot.
    pub pad: usize,
    pub velocity: f32,
    pub latency_ms: f64,
    pub voice_id: VoiceId,
}

/// Timing of one trigger, handed to the notifier task.
struct Fired {
    notification: TriggerNotification,
    event_ms: f64,
    resolved_ms: f64,
    returned_ms: f64,
}

/// Which keys are held and when each sample last fired.
struct InputState {
    held: [bool; PhysicalKey::COUNT],
    /// Indexed by the sample's debounce slot.
    last_trigger: Vec<f64>,
}

impl InputState {
    fn new(samples: usize) -> InputState {
        InputState {
            held: [false; PhysicalKey::COUNT],
            last_trigger: vec![f64::NEG_INFINITY; samples],
        }
    }
}

struct BankSet {
    banks: Vec<Bank>,
    active: usize,
    /// Sample id to debounce slot. Pads sharing a sample share a slot.
    debounce_slots: HashMap<String, usize>,
}

impl BankSet {
    fn new(banks: Vec<Bank>, active: usize) -> BankSet {
        let mut debounce_slots = HashMap::new();
        for bank in banks.iter() {
            for (_, pad) in bank.pads() {
                let next = debounce_slots.len();
                debounce_slots.entry(pad.sample_id.clone()).or_insert(next);
            }
        }
        BankSet {
            banks,
            active,
            debounce_slots,
        }
    }
}

/// State shared with the background tasks.
struct Shared {
    engine: Arc<TriggerEngine>,
    provider: Arc<dyn BufferProvider>,
    banks: RwLock<BankSet>,
    preload_passes: AtomicUsize,
}

/// Maps key events to chops in the active bank.
pub struct InputRouter {
    shared: Arc<Shared>,
    monitor: Arc<LatencyMonitor>,
    state: Mutex<InputState>,
    debounce_ms: f64,
    default_velocity: f32,
    subscribers: Arc<Subscribers<TriggerNotification>>,
    fired_tx: mpsc::UnboundedSender<Fired>,
    preload_tx: mpsc::UnboundedSender<()>,
}

impl InputRouter {
    /// Creates a router and starts its notifier and preload tasks on the current
    /// runtime. The first bank, or the configured initial bank, is active.
    pub fn new(
        engine: Arc<TriggerEngine>,
        monitor: Arc<LatencyMonitor>,
        provider: Arc<dyn BufferProvider>,
        banks: Vec<Bank>,
        config: &config::Input,
    ) -> Result<InputRouter, RouterError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RouterError::NoRuntime)?;
        let debounce = config.debounce()?;
        let preload_debounce = config.preload_debounce()?;

        let active = config
            .initial_bank()
            .and_then(|name| banks.iter().position(|bank| bank.name() == name))
            .unwrap_or(0);
        let set = BankSet::new(banks, active);
        let state = InputState::new(set.debounce_slots.len());

        let shared = Arc::new(Shared {
            engine,
            provider,
            banks: RwLock::new(set),
            preload_passes: AtomicUsize::new(0),
        });
        let subscribers = Arc::new(Subscribers::new());

        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        runtime.spawn(notify_loop(fired_rx, monitor.clone(), subscribers.clone()));

        let (preload_tx, preload_rx) = mpsc::unbounded_channel();
        runtime.spawn(preload_loop(preload_rx, shared.clone(), preload_debounce));

        let router = InputRouter {
            shared,
            monitor,
            state: Mutex::new(state),
            debounce_ms: debounce.as_secs_f64() * 1000.0,
            default_velocity: config.default_velocity(),
            subscribers,
            fired_tx,
            preload_tx,
        };
        router.schedule_preload();
        Ok(router)
    }

    /// Handles a key press. Returns the trigger result, or None if the press was
    /// ignored because the key is held, unmapped or its sample is within the
    /// debounce window.
    pub fn key_down(&self, event: KeyEvent) -> Option<TriggerResult> {
        let clock = self.shared.engine.clock();
        let event_ms = event.timestamp_ms.unwrap_or_else(|| clock.now_ms());
        let key = event.key.index();
        let slot = event.key.slot();

        let (bank_name, sample_id) = {
            let mut state = self.state.lock();
            if state.held[key] {
                return None;
            }

            let banks = self.shared.banks.read();
            let bank = banks.banks.get(banks.active)?;
            let pad = bank.pad(slot)?;

            let debounce_slot = *banks.debounce_slots.get(&pad.sample_id)?;
            if event_ms - state.last_trigger[debounce_slot] < self.debounce_ms {
                debug!(key = %event.key, sample = pad.sample_id, "Trigger debounced");
                return None;
            }

            state.held[key] = true;
            state.last_trigger[debounce_slot] = event_ms;
            (bank.name().to_string(), pad.sample_id.clone())
        };

        let velocity = event.velocity.unwrap_or(self.default_velocity);
        let velocity = if velocity.is_nan() {
            0.0
        } else {
            velocity.clamp(0.0, 1.0)
        };
        let resolved_ms = clock.now_ms();
        let result = self
            .shared
            .engine
            .trigger_sample(&sample_id, velocity, TriggerOptions::default());
        let returned_ms = clock.now_ms();

        if let Some(voice_id) = result.voice_id() {
            let fired = Fired {
                notification: TriggerNotification {
                    sample_id,
                    bank: bank_name,
                    pad: slot,
                    velocity,
                    latency_ms: result.latency_ms,
                    voice_id,
                },
                event_ms,
                resolved_ms,
                returned_ms,
            };
            if self.fired_tx.send(fired).is_err() {
                warn!("Trigger notifier has stopped");
            }
        }

        Some(result)
    }

    /// Handles a key release.
    pub fn key_up(&self, key: PhysicalKey) {
        self.state.lock().held[key.index()] = false;
    }

    /// Releases every key, e.g. when the window loses focus and releases would be missed.
    pub fn focus_lost(&self) {
        self.state.lock().held = [false; PhysicalKey::COUNT];
    }

    /// Returns true if the key is currently held.
    pub fn is_held(&self, key: PhysicalKey) -> bool {
        self.state.lock().held[key.index()]
    }

    /// Switches to the named bank. Returns false if there is no such bank.
    pub fn set_active_bank(&self, name: &str) -> bool {
        {
            let mut banks = self.shared.banks.write();
            let Some(index) = banks.banks.iter().position(|bank| bank.name() == name) else {
                warn!(bank = name, "Unknown bank");
                return false;
            };
            banks.active = index;
        }
        info!(bank = name, "Active bank changed");
        self.schedule_preload();
        true
    }

    /// Returns the active bank's name.
    pub fn active_bank(&self) -> Option<String> {
        let banks = self.shared.banks.read();
        banks.banks.get(banks.active).map(|bank| bank.name().to_string())
    }

    /// Replaces every bank. The active bank is kept if it still exists.
    pub fn set_banks(&self, banks: Vec<Bank>) {
        {
            let mut state = self.state.lock();
            let mut set = self.shared.banks.write();
            let active_name = set.banks.get(set.active).map(|bank| bank.name().to_string());
            let active = active_name
                .and_then(|name| banks.iter().position(|bank| bank.name() == name))
                .unwrap_or(0);
            *set = BankSet::new(banks, active);
            state.last_trigger = vec![f64::NEG_INFINITY; set.debounce_slots.len()];
            info!(banks = set.banks.len(), "Banks replaced");
        }
        self.schedule_preload();
    }

    /// Registers a callback for successful triggers.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TriggerNotification) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Preloads every chop of the active bank that isn't loaded yet, blocking until
    /// done. Returns the number of chops loaded.
    pub fn preload_active_bank(&self) -> usize {
        preload_missing(&self.shared)
    }

    /// Returns how many background preload passes have completed.
    pub fn preload_passes(&self) -> usize {
        self.shared.preload_passes.load(Ordering::Acquire)
    }

    /// Returns the engine this router triggers.
    pub fn engine(&self) -> &Arc<TriggerEngine> {
        &self.shared.engine
    }

    /// Returns the latency monitor this router records into.
    pub fn monitor(&self) -> &Arc<LatencyMonitor> {
        &self.monitor
    }

    fn schedule_preload(&self) {
        if self.preload_tx.send(()).is_err() {
            warn!("Preload scheduler has stopped");
        }
    }
}

impl fmt::Debug for InputRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputRouter")
            .field("active_bank", &self.active_bank())
            .field("debounce_ms", &self.debounce_ms)
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

/// Records latencies and notifies subscribers for each successful trigger.
async fn notify_loop(
    mut fired_rx: mpsc::UnboundedReceiver<Fired>,
    monitor: Arc<LatencyMonitor>,
    subscribers: Arc<Subscribers<TriggerNotification>>,
) {
    while let Some(fired) = fired_rx.recv().await {
        monitor.record_key_press(fired.event_ms, fired.resolved_ms);
        monitor.record_audio_trigger(fired.resolved_ms, fired.returned_ms);
        monitor.record_total(fired.event_ms, fired.returned_ms);
        subscribers.notify(&fired.notification);
    }
}

/// Runs a preload pass once requests have been quiet for the debounce period.
async fn preload_loop(mut preload_rx: mpsc::UnboundedReceiver<()>, shared: Arc<Shared>, debounce: Duration) {
    while preload_rx.recv().await.is_some() {
        loop {
            tokio::select! {
                request = preload_rx.recv() => {
                    if request.is_none() {
                        return;
                    }
                }
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        let pass = shared.clone();
        match tokio::task::spawn_blocking(move || preload_missing(&pass)).await {
            Ok(loaded) => debug!(loaded, "Preload pass finished"),
            Err(e) => warn!(err = %e, "Preload pass failed"),
        }
        shared.preload_passes.fetch_add(1, Ordering::AcqRel);
    }
}

/// Decodes and preloads the active bank's missing chops. Failures are logged and
/// skipped.
fn preload_missing(shared: &Shared) -> usize {
    let span = span!(Level::INFO, "preload");
    let _enter = span.enter();

    let pending: Vec<PadSample> = {
        let banks = shared.banks.read();
        match banks.banks.get(banks.active) {
            Some(bank) => bank
                .pads()
                .filter(|(_, pad)| !shared.engine.is_preloaded(&pad.sample_id))
                .map(|(_, pad)| pad.clone())
                .collect(),
            None => return 0,
        }
    };
    if pending.is_empty() {
        return 0;
    }

    // Pads often share a source, so decode each one once per pass.
    let mut sources: HashMap<String, Option<DecodedBuffer>> = HashMap::new();
    let mut loaded = 0;
    for pad in pending {
        let source = sources.entry(pad.source.clone()).or_insert_with(|| {
            match shared.provider.decode(&pad.source) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    warn!(source = pad.source, err = %e, "Unable to decode source");
                    None
                }
            }
        });
        let Some(source) = source else {
            continue;
        };

        let trim_end = pad.trim_end.unwrap_or_else(|| source.duration_secs());
        if shared
            .engine
            .preload_sample(&pad.sample_id, source, pad.trim_start, trim_end)
        {
            loaded += 1;
        }
    }

    info!(loaded, "Preloaded bank samples");
    loaded
}

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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the audio render thread when CHOPFIRE_THREAD_PRIORITY is unset.
const DEFAULT_RENDER_THREAD_PRIORITY: u8 = 70;

/// Reads CHOPFIRE_THREAD_PRIORITY (0-99) once; used when building the render loop so we
/// don't touch env in the hot path.
pub fn render_thread_priority() -> Option<ThreadPriorityValue> {
    std::env::var("CHOPFIRE_THREAD_PRIORITY")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .or(Some(DEFAULT_RENDER_THREAD_PRIORITY))
        .and_then(|n| ThreadPriorityValue::try_from(n).ok())
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the render thread.
/// Users can opt out with CHOPFIRE_DISABLE_RT_AUDIO=1 regardless of configuration.
pub fn rt_audio_enabled(configured: bool) -> bool {
    configured && !env_flag("CHOPFIRE_DISABLE_RT_AUDIO")
}

/// Raises the priority of the calling thread once. Returns true if the
/// real-time policy was applied.
pub fn configure_render_thread_priority(
    priority: Option<ThreadPriorityValue>,
    rt_audio: bool,
    priority_set: &mut bool,
) -> bool {
    if *priority_set {
        return false;
    }
    *priority_set = true;

    let Some(priority) = priority else {
        return false;
    };
    let tp = ThreadPriority::Crossplatform(priority);
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        return match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for audio render thread");
                true
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to set RT SCHED_FIFO for audio render thread"
                );
                false
            }
        };
    }

    #[cfg(not(unix))]
    let _ = rt_audio;
    false
}

#[cfg(test)]
mod test {
    use super::configure_render_thread_priority;

    #[test]
    fn test_priority_applied_once() {
        let mut priority_set = false;
        configure_render_thread_priority(None, false, &mut priority_set);
        assert!(priority_set);
        assert!(!configure_render_thread_priority(None, true, &mut priority_set));
    }
}

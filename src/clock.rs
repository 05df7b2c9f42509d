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

//! Monotonic millisecond clock shared by every component of an engine context.
//!
//! With the `quanta` feature enabled, timestamps come from the TSC, which is
//! considerably cheaper to read than the OS clock on some platforms.

use std::fmt;

#[cfg(not(feature = "quanta"))]
type RawInstant = std::time::Instant;
#[cfg(feature = "quanta")]
type RawInstant = quanta::Instant;

/// A monotonic clock reporting milliseconds since its creation.
///
/// Clones share the same origin, so timestamps from clones are comparable.
#[derive(Clone)]
pub struct Clock {
    #[cfg(feature = "quanta")]
    inner: quanta::Clock,
    origin: RawInstant,
}

impl Clock {
    /// Creates a new clock whose origin is now.
    pub fn new() -> Clock {
        #[cfg(feature = "quanta")]
        {
            let inner = quanta::Clock::new();
            let origin = inner.now();
            Clock { inner, origin }
        }
        #[cfg(not(feature = "quanta"))]
        {
            Clock {
                origin: std::time::Instant::now(),
            }
        }
    }

    #[inline]
    fn raw_now(&self) -> RawInstant {
        #[cfg(feature = "quanta")]
        {
            self.inner.now()
        }
        #[cfg(not(feature = "quanta"))]
        {
            std::time::Instant::now()
        }
    }

    /// Milliseconds elapsed since the clock was created.
    #[inline]
    pub fn now_ms(&self) -> f64 {
        self.raw_now().duration_since(self.origin).as_secs_f64() * 1000.0
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("now_ms", &self.now_ms())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{thread, time::Duration};

    use super::Clock;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let first = clock.now_ms();
        thread::sleep(Duration::from_millis(5));
        let second = clock.now_ms();
        assert!(second >= first + 4.0, "{} -> {}", first, second);
    }

    #[test]
    fn test_clones_share_origin() {
        let clock = Clock::new();
        thread::sleep(Duration::from_millis(5));
        let cloned = clock.clone();
        assert!(cloned.now_ms() >= 4.0);
    }
}

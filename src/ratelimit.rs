// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! A simple send rate limiter.

use std::time::{Duration, Instant};

/// Allows up to `burst` events per `interval`. The budget refills in
/// full once `interval` has passed since the first event of the current
/// window.
#[derive(Clone, Debug)]
pub struct RateLimit {
    interval: Duration,
    burst: u32,
    window_start: Option<Instant>,
    used: u32,
}

impl RateLimit {
    pub const fn new(interval: Duration, burst: u32) -> Self {
        Self {
            interval,
            burst,
            window_start: None,
            used: 0,
        }
    }

    /// Consumes one unit of the budget if any remains at time `now`.
    /// Returns whether the event is allowed.
    pub fn test(&mut self, now: Instant) -> bool {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.interval => (),
            _ => {
                self.window_start = Some(now);
                self.used = 0;
            }
        }
        if self.used < self.burst {
            self.used += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_exhausted_then_refilled() {
        let start = Instant::now();
        let mut limit = RateLimit::new(Duration::from_secs(1), 3);
        assert!(limit.test(start));
        assert!(limit.test(start));
        assert!(limit.test(start + Duration::from_millis(500)));
        assert!(!limit.test(start + Duration::from_millis(999)));
        assert!(limit.test(start + Duration::from_secs(1)));
    }
}

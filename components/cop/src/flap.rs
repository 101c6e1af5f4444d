// Copyright (c) 2017 Chef Software Inc. and/or applicable contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! FlapState, manager-only, lives on the Watchdog's own thread and is
//! touched nowhere else. `should_spawn` is the one decision point:
//! called immediately before the Watchdog would fork+exec the
//! manager, it both evaluates and mutates the state, matching §4.10's
//! "evaluate FlapState ... else fork+exec ... increment count".

use std::time::{Duration, Instant};

const MAX_FLAP_COUNT: u32 = 5;
const FLAP_INTERVAL: Duration = Duration::from_secs(60);
const RETRY_WINDOW: Duration = Duration::from_secs(60);

pub struct FlapState {
    flapping: bool,
    count: u32,
    interval_start: Option<Instant>,
    retry_start: Option<Instant>,
}

impl FlapState {
    pub fn new() -> FlapState {
        FlapState { flapping: false, count: 0, interval_start: None, retry_start: None }
    }

    pub fn is_flapping(&self) -> bool {
        self.flapping
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Decide whether the Watchdog may spawn the manager this tick,
    /// given `now`. Returns `true` and records the spawn (incrementing
    /// `count`, starting `interval_start` if this is the first spawn
    /// in a fresh window) when spawning is allowed; returns `false`
    /// and flips into (or stays in) the flapping state otherwise.
    pub fn should_spawn(&mut self, now: Instant) -> bool {
        if self.flapping {
            let retry_start = self.retry_start.expect("flapping implies retry_start is set");
            if now.duration_since(retry_start) > RETRY_WINDOW {
                self.flapping = false;
                self.count = 0;
                self.interval_start = None;
                self.retry_start = None;
            } else {
                return false;
            }
        }

        let within_window = self
            .interval_start
            .map(|start| now.duration_since(start) < FLAP_INTERVAL)
            .unwrap_or(false);

        if within_window && self.count >= MAX_FLAP_COUNT {
            self.flapping = true;
            self.retry_start = Some(now);
            return false;
        }

        if !within_window {
            self.interval_start = Some(now);
            self.count = 0;
        }

        self.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_spawn_in_a_fresh_window_is_allowed() {
        let mut flap = FlapState::new();
        assert!(flap.should_spawn(Instant::now()));
        assert_eq!(flap.count(), 1);
    }

    #[test]
    fn ceiling_trips_after_max_flap_count_within_the_interval() {
        let mut flap = FlapState::new();
        let t0 = Instant::now();
        for i in 0..MAX_FLAP_COUNT {
            assert!(flap.should_spawn(t0 + Duration::from_millis(i as u64)), "spawn {} should be allowed", i);
        }
        assert!(!flap.should_spawn(t0 + Duration::from_millis(MAX_FLAP_COUNT as u64)));
        assert!(flap.is_flapping());
    }

    #[test]
    fn flapping_clears_once_the_retry_window_elapses() {
        let mut flap = FlapState::new();
        let t0 = Instant::now();
        for i in 0..MAX_FLAP_COUNT {
            flap.should_spawn(t0 + Duration::from_millis(i as u64));
        }
        assert!(!flap.should_spawn(t0 + Duration::from_millis(10)));
        assert!(flap.is_flapping());

        let past_retry = t0 + RETRY_WINDOW + Duration::from_secs(1);
        assert!(flap.should_spawn(past_retry));
        assert!(!flap.is_flapping());
        assert_eq!(flap.count(), 1);
    }

    #[test]
    fn window_resets_once_flap_interval_has_fully_elapsed_without_tripping() {
        let mut flap = FlapState::new();
        let t0 = Instant::now();
        assert!(flap.should_spawn(t0));
        assert!(flap.should_spawn(t0 + Duration::from_millis(10)));
        assert_eq!(flap.count(), 2);

        let next_window = t0 + FLAP_INTERVAL + Duration::from_secs(1);
        assert!(flap.should_spawn(next_window));
        assert_eq!(flap.count(), 1, "a fresh window starts the count over");
    }
}

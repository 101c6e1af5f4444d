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

//! The manager x server action table from §4.10, minus anything that
//! touches a socket, a lock file, or the OS. `watchdog.rs` calls a
//! probe or a lock, turns the result into one success/failure bit,
//! and hands it to a `StrikeCounter` here; everything above that line
//! is plain data and is unit-testable without forking a process.

pub const DEFAULT_STRIKE_THRESHOLD: u32 = 2;

/// Consecutive-failure counter with a trip threshold. A success
/// resets the count to zero. Reaching the threshold on a failure
/// trips once and resets, so the counter can be reused across the
/// next observation window rather than staying latched.
#[derive(Clone, Debug)]
pub struct StrikeCounter {
    count: u32,
    threshold: u32,
}

impl StrikeCounter {
    pub fn new(threshold: u32) -> StrikeCounter {
        StrikeCounter { count: 0, threshold }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Record one observation. Returns `true` exactly when this
    /// failure is the one that reaches `threshold`.
    pub fn record(&mut self, ok: bool) -> bool {
        if ok {
            self.count = 0;
            return false;
        }
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

/// What the Watchdog should do this iteration, independent of how it
/// gets carried out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Manager and server both look healthy, or the manager lock is
    /// free and a spawn is not yet due.
    None,
    /// The manager lock was free: any stray server was cleared and
    /// the manager was (or, subject to flap, was not) spawned.
    SpawnAttempted { spawned: bool },
    /// Two consecutive manager control-probe failures: kill the
    /// manager's whole process group.
    KillManagerGroup,
    /// The server lock became acquirable out from under a healthy
    /// manager twice in a row: kill the manager so it notices and
    /// respawns its server from a clean slate.
    KillManagerForMissingServer,
    /// Two consecutive server HTTP-probe failures: kill the server.
    KillServer,
}

/// The manager lock is held (manager running). Feed the outcome of
/// one control-channel probe in; get back whether to kill it.
pub fn evaluate_manager_probe(strikes: &mut StrikeCounter, probe_ok: bool) -> Action {
    if strikes.record(probe_ok) {
        Action::KillManagerGroup
    } else {
        Action::None
    }
}

/// The manager is up and reports `proxy_running`; feed in whether the
/// server lock was just found acquirable (server process gone).
pub fn evaluate_server_presence(strikes: &mut StrikeCounter, server_present: bool) -> Action {
    if strikes.record(server_present) {
        Action::KillManagerForMissingServer
    } else {
        Action::None
    }
}

/// The server is present; feed in one HTTP health-probe outcome.
pub fn evaluate_server_probe(strikes: &mut StrikeCounter, probe_ok: bool) -> Action {
    if strikes.record(probe_ok) {
        Action::KillServer
    } else {
        Action::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_failure_does_not_trip_the_two_strike_rule() {
        let mut strikes = StrikeCounter::new(DEFAULT_STRIKE_THRESHOLD);
        assert_eq!(evaluate_manager_probe(&mut strikes, false), Action::None);
    }

    #[test]
    fn two_consecutive_failures_trip_a_manager_kill() {
        let mut strikes = StrikeCounter::new(DEFAULT_STRIKE_THRESHOLD);
        assert_eq!(evaluate_manager_probe(&mut strikes, false), Action::None);
        assert_eq!(evaluate_manager_probe(&mut strikes, false), Action::KillManagerGroup);
    }

    #[test]
    fn an_intervening_success_resets_the_strike_count() {
        let mut strikes = StrikeCounter::new(DEFAULT_STRIKE_THRESHOLD);
        assert_eq!(evaluate_manager_probe(&mut strikes, false), Action::None);
        assert_eq!(evaluate_manager_probe(&mut strikes, true), Action::None);
        assert_eq!(strikes.count(), 0);
        assert_eq!(evaluate_manager_probe(&mut strikes, false), Action::None);
    }

    #[test]
    fn server_missing_twice_kills_the_manager_not_the_server() {
        let mut strikes = StrikeCounter::new(DEFAULT_STRIKE_THRESHOLD);
        assert_eq!(evaluate_server_presence(&mut strikes, true), Action::None);
        assert_eq!(evaluate_server_presence(&mut strikes, true), Action::KillManagerForMissingServer);
    }

    #[test]
    fn server_probe_failures_kill_only_the_server() {
        let mut strikes = StrikeCounter::new(DEFAULT_STRIKE_THRESHOLD);
        assert_eq!(evaluate_server_probe(&mut strikes, false), Action::None);
        assert_eq!(evaluate_server_probe(&mut strikes, false), Action::KillServer);
    }

    #[test]
    fn trip_resets_the_counter_so_it_can_be_reused() {
        let mut strikes = StrikeCounter::new(DEFAULT_STRIKE_THRESHOLD);
        strikes.record(false);
        let tripped = strikes.record(false);
        assert!(tripped);
        assert_eq!(strikes.count(), 0);
    }
}

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

//! §4.11 GracefulShutdown: control handlers set `mgmt_shutdown_outstanding`;
//! the manager's main loop consumes it once per tick, waiting for
//! idleness (or a timeout) before acting on `Idle*` variants.

use std::time::{Duration, Instant};

static LOGKEY: &'static str = "SHT";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pending {
    None,
    Restart,
    IdleRestart,
    Bounce,
    IdleBounce,
    Stop,
    IdleStop,
    Drain,
    IdleDrain,
    UndoDrain,
}

/// What the main loop should do once `GracefulShutdown::evaluate` has
/// decided a pending action is ready to fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    /// Ensure `processDrain()` has been called, but the action itself
    /// is still waiting on idleness or the timeout.
    AwaitIdle,
    RestartManager,
    BounceServer,
    StopManager,
    SetDrainFlag(bool),
}

pub struct GracefulShutdown {
    pending: Pending,
    triggered_at: Option<Instant>,
    timeout: Duration,
    drained: bool,
}

impl GracefulShutdown {
    pub fn new(timeout: Duration) -> GracefulShutdown {
        GracefulShutdown { pending: Pending::None, triggered_at: None, timeout, drained: false }
    }

    pub fn pending(&self) -> Pending {
        self.pending
    }

    pub fn request(&mut self, pending: Pending) {
        outputln!("shutdown request set to {:?}", pending);
        self.pending = pending;
        self.triggered_at = Some(Instant::now());
        self.drained = false;
    }

    fn waited_enough(&self) -> bool {
        match self.triggered_at {
            Some(t) => Instant::now() >= t + self.timeout,
            None => false,
        }
    }

    /// Called once per main-loop tick with the current idleness
    /// reading (active client connections at or below the configured
    /// threshold). Returns the action the loop should take this tick
    /// and clears `pending` once a terminal action has fired.
    pub fn evaluate(&mut self, is_idle: bool) -> Action {
        let action = match self.pending {
            Pending::None => Action::None,
            Pending::Restart => Action::RestartManager,
            Pending::Stop => Action::StopManager,
            Pending::Bounce => Action::BounceServer,
            Pending::Drain => Action::SetDrainFlag(true),
            Pending::UndoDrain => Action::SetDrainFlag(false),
            Pending::IdleRestart | Pending::IdleBounce | Pending::IdleStop | Pending::IdleDrain => {
                if !self.drained {
                    self.drained = true;
                    return Action::AwaitIdle;
                }
                if is_idle || self.waited_enough() {
                    match self.pending {
                        Pending::IdleRestart => Action::RestartManager,
                        Pending::IdleBounce => Action::BounceServer,
                        Pending::IdleStop => Action::StopManager,
                        Pending::IdleDrain => Action::SetDrainFlag(true),
                        _ => unreachable!(),
                    }
                } else {
                    Action::AwaitIdle
                }
            }
        };

        match action {
            Action::RestartManager | Action::StopManager | Action::BounceServer | Action::SetDrainFlag(_) => {
                self.pending = Pending::None;
                self.triggered_at = None;
            }
            _ => {}
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_restart_fires_on_first_evaluation() {
        let mut shutdown = GracefulShutdown::new(Duration::from_secs(60));
        shutdown.request(Pending::Restart);
        assert_eq!(shutdown.evaluate(false), Action::RestartManager);
        assert_eq!(shutdown.pending(), Pending::None);
    }

    #[test]
    fn idle_restart_waits_until_idle() {
        let mut shutdown = GracefulShutdown::new(Duration::from_secs(60));
        shutdown.request(Pending::IdleRestart);
        assert_eq!(shutdown.evaluate(false), Action::AwaitIdle);
        assert_eq!(shutdown.evaluate(false), Action::AwaitIdle);
        assert_eq!(shutdown.evaluate(true), Action::RestartManager);
        assert_eq!(shutdown.pending(), Pending::None);
    }

    #[test]
    fn idle_stop_fires_after_timeout_even_if_not_idle() {
        let mut shutdown = GracefulShutdown::new(Duration::from_millis(0));
        shutdown.request(Pending::IdleStop);
        assert_eq!(shutdown.evaluate(false), Action::AwaitIdle);
        assert_eq!(shutdown.evaluate(false), Action::StopManager);
    }

    #[test]
    fn drain_and_undo_drain_set_the_flag_directly() {
        let mut shutdown = GracefulShutdown::new(Duration::from_secs(60));
        shutdown.request(Pending::Drain);
        assert_eq!(shutdown.evaluate(false), Action::SetDrainFlag(true));
        shutdown.request(Pending::UndoDrain);
        assert_eq!(shutdown.evaluate(false), Action::SetDrainFlag(false));
    }

    #[test]
    fn no_pending_action_is_a_no_op() {
        let mut shutdown = GracefulShutdown::new(Duration::from_secs(60));
        assert_eq!(shutdown.evaluate(true), Action::None);
    }
}

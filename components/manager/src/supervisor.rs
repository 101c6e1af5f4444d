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

//! §4.9 ChildSupervisor: fork/exec the server child, collect its exit
//! status, relaunch with back-off, and publish alarms through the
//! `EventBus`. Runs entirely on the manager's main thread -- no
//! separate supervision thread, matching §5's "mostly single-threaded"
//! scheduling model.

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use libc;

use ts_core::exitcode;
use ts_core::os::process::{self, Pid, Signal};

use event_bus::{AlarmId, EventBus};

static LOGKEY: &'static str = "SVR";

const BACKOFF_INITIAL_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 60_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitClass {
    Normal(i32),
    Signalled(i32),
}

pub struct ChildSupervisor {
    binary: String,
    argv: Vec<String>,
    stdout_path: Option<String>,
    stderr_path: Option<String>,
    run_proxy: bool,
    child: Option<Child>,
    pid: Pid,
    launch_outstanding: bool,
    last_exit: Option<ExitClass>,
    backoff_ms: u64,
    next_allowed: Instant,
}

impl ChildSupervisor {
    pub fn new(binary: String, argv: Vec<String>, stdout_path: Option<String>, stderr_path: Option<String>) -> ChildSupervisor {
        ChildSupervisor {
            binary,
            argv,
            stdout_path,
            stderr_path,
            run_proxy: true,
            child: None,
            pid: -1,
            launch_outstanding: false,
            last_exit: None,
            backoff_ms: 0,
            next_allowed: Instant::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid > 0
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn launch_outstanding(&self) -> bool {
        self.launch_outstanding
    }

    /// A server that has re-contacted the manager (via whatever
    /// application-level handshake the proxy itself uses) clears the
    /// outstanding-launch flag and resets back-off, per §4.9.
    pub fn mark_contacted(&mut self) {
        self.launch_outstanding = false;
        self.backoff_ms = 0;
    }

    pub fn set_run_proxy(&mut self, run: bool) {
        self.run_proxy = run;
    }

    /// Fork+exec the server binary, honoring any still-pending
    /// back-off window. Does nothing if the child is already running
    /// or `run_proxy` is false.
    pub fn start(&mut self, bus: &EventBus) {
        if !self.run_proxy || self.is_running() {
            return;
        }
        if Instant::now() < self.next_allowed {
            return;
        }

        let mut command = Command::new(&self.binary);
        command.args(&self.argv);
        command.stdout(stdio_for(&self.stdout_path));
        command.stderr(stdio_for(&self.stderr_path));

        unsafe {
            command.pre_exec(|| {
                process::own_process_group().map_err(|_| ::std::io::Error::last_os_error())?;
                #[cfg(target_os = "linux")]
                {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                }
                Ok(())
            });
        }

        match command.spawn() {
            Ok(child) => {
                self.pid = child.id() as Pid;
                self.child = Some(child);
                self.launch_outstanding = true;
                outputln!("launched server pid {}", self.pid);
            }
            Err(err) => {
                error!("failed to spawn server binary '{}': {}", self.binary, err);
                bus.post(AlarmId::ProxyConfigError, &format!("spawn failed: {}", err));
                self.arm_backoff();
            }
        }
    }

    /// Consume the child's exit status if it has exited. Classifies
    /// the exit, posts the appropriate alarm, arms back-off, and
    /// clears `pid`/`child`.
    pub fn poll(&mut self, bus: &EventBus) {
        let pid = match self.child {
            Some(_) => self.pid,
            None => return,
        };
        let status = match process::try_wait(pid) {
            Ok(Some(status)) => status,
            Ok(None) => return,
            Err(err) => {
                warn!("waitpid on server pid {} failed: {}", pid, err);
                return;
            }
        };

        self.child = None;
        self.pid = -1;

        let class = classify(status);
        self.last_exit = Some(class);
        match class {
            ExitClass::Normal(code) if exitcode::is_no_retry(code) => {
                outputln!("server exited with no-retry code {}, marking unrecoverable", code);
                self.mark_unrecoverable(bus);
                return;
            }
            ExitClass::Normal(code) => {
                outputln!("server exited normally with code {}", code);
                bus.post(AlarmId::ProxyProcessDied, &format!("exited with code {}", code));
            }
            ExitClass::Signalled(sig) => {
                outputln!("server was killed by signal {}", sig);
                bus.post(AlarmId::ProxyProcessDied, &format!("killed by signal {}", sig));
            }
        }
        self.arm_backoff();
    }

    fn arm_backoff(&mut self) {
        self.backoff_ms = if self.backoff_ms == 0 {
            BACKOFF_INITIAL_MS
        } else {
            (self.backoff_ms * 2).min(BACKOFF_MAX_MS)
        };
        self.next_allowed = Instant::now() + Duration::from_millis(self.backoff_ms);
    }

    /// Mark the proxy unrecoverable: stop attempting restarts until
    /// the manager is reconfigured, per §4.9's
    /// `MGMT_ALARM_PROXY_CONFIG_ERROR` note.
    pub fn mark_unrecoverable(&mut self, bus: &EventBus) {
        self.run_proxy = false;
        bus.post(AlarmId::ProxyConfigError, "server marked unrecoverable, restart attempts stopped");
    }

    /// Send `signal` to the server's process group. Used by Bounce
    /// (C11) and by a forced kill from the control plane.
    pub fn stop(&mut self, signal: Signal) {
        if !self.is_running() {
            return;
        }
        let target = process::pid_to_signal_target(self.pid);
        if let Err(err) = process::kill(target, signal) {
            warn!("failed to signal server pid {}: {}", self.pid, err);
        }
    }
}

fn classify(status: i32) -> ExitClass {
    if libc::WIFSIGNALED(status) {
        ExitClass::Signalled(libc::WTERMSIG(status))
    } else {
        ExitClass::Normal(libc::WEXITSTATUS(status))
    }
}

fn stdio_for(path: &Option<String>) -> Stdio {
    match *path {
        Some(ref p) => ::std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(p)
            .map(Stdio::from)
            .unwrap_or_else(|_| Stdio::null()),
        None => Stdio::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_supervisor_is_not_running() {
        let sup = ChildSupervisor::new("/bin/true".to_string(), vec![], None, None);
        assert!(!sup.is_running());
        assert_eq!(sup.pid(), -1);
    }

    #[test]
    fn start_and_poll_observes_a_normal_exit() {
        let bus = EventBus::new(16);
        let mut sup = ChildSupervisor::new("/bin/true".to_string(), vec![], None, None);
        sup.start(&bus);
        assert!(sup.is_running());

        // Give the child a moment to actually exit.
        for _ in 0..50 {
            sup.poll(&bus);
            if !sup.is_running() {
                break;
            }
            ::std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!sup.is_running());
    }

    #[test]
    fn spawn_failure_arms_backoff_and_posts_alarm() {
        let bus = EventBus::new(16);
        let mut sup = ChildSupervisor::new("/no/such/binary-ts-test".to_string(), vec![], None, None);
        sup.start(&bus);
        assert!(!sup.is_running());
        assert!(!bus.drain_for_delivery().is_empty());
    }
}

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

//! §4.10: the Watchdog's one iteration, `check_programs()` plus
//! `check_memory()`, wired to real locks, probes, and signals. The
//! branch-selection itself lives in `decision.rs`; this module is the
//! OS-facing glue around it -- acquiring/releasing lock files,
//! spawning the manager, and calling `safe_kill`.

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Instant;

use libc;

use ts_core::config::ConfigStore;
use ts_core::fs::Layout;
use ts_core::health::{self, ControlChannelProbe, Outcome};
use ts_core::lockfile::{self, Acquire, LockFile};
use ts_core::os::process::{self, Signal};
use ts_core::os::signals;

use ts_ctl_client::probe::ControlProbe;
use ts_ctl_client::Client;

use decision::{self, Action, StrikeCounter};
use error::Result;
use flap::FlapState;
#[cfg(target_os = "linux")]
use memcheck;

static LOGKEY: &'static str = "COP";

pub struct Watchdog {
    layout: Layout,
    config: ConfigStore,
    manager_binary: String,
    manager_argv: Vec<String>,
    manager_stdout: Option<String>,
    manager_stderr: Option<String>,
    flap: FlapState,
    manager_probe_strikes: StrikeCounter,
    server_absent_strikes: StrikeCounter,
    server_probe_strikes: StrikeCounter,
    /// `-s/--stop`: suspend rather than kill, for debugging.
    debug_stop: bool,
}

impl Watchdog {
    pub fn new(
        layout: Layout,
        config: ConfigStore,
        manager_binary: String,
        manager_argv: Vec<String>,
        manager_stdout: Option<String>,
        manager_stderr: Option<String>,
    ) -> Result<Watchdog> {
        let threshold = config.get_int("proxy.config.restart.stop_threshold", true)? as u32;
        let threshold = if threshold == 0 { decision::DEFAULT_STRIKE_THRESHOLD } else { threshold };
        Ok(Watchdog {
            layout,
            config,
            manager_binary,
            manager_argv,
            manager_stdout,
            manager_stderr,
            flap: FlapState::new(),
            manager_probe_strikes: StrikeCounter::new(threshold),
            server_absent_strikes: StrikeCounter::new(threshold),
            server_probe_strikes: StrikeCounter::new(threshold),
            debug_stop: false,
        })
    }

    pub fn set_debug_stop(&mut self, on: bool) {
        self.debug_stop = on;
    }

    fn final_kill_signal(&self) -> Signal {
        if self.debug_stop {
            Signal::STOP
        } else {
            Signal::KILL
        }
    }

    pub fn sleep_time_secs(&self) -> u64 {
        self.config.get_int("proxy.config.cop.sleep_time", true).unwrap_or(10).max(1) as u64
    }

    pub fn alarm_deadline_secs(&self) -> u32 {
        let sleep = self.sleep_time_secs() as u32;
        let manager_timeout = self.config.get_int("proxy.config.cop.manager_timeout", true).unwrap_or(2) as u32;
        let server_timeout = self.config.get_int("proxy.config.cop.server_timeout", true).unwrap_or(2) as u32;
        2 * (sleep + 2 * manager_timeout + server_timeout)
    }

    /// Step 1: `no_cop` marker present means stand down permanently.
    pub fn should_stand_down(&self) -> bool {
        ts_core::fs::no_cop_marker_present(self.layout.runtime_dir())
    }

    /// Step 2, delegated to the shared signal latch.
    pub fn log_reaped_children(&self) {
        signals::log_reaped_if_any();
    }

    /// Step 3.
    pub fn reload_config_if_changed(&self, records_path: &::std::path::Path) {
        match self.config.reload_if_changed(records_path) {
            Ok(true) => outputln!("records config re-read"),
            Ok(false) => {}
            Err(err) => warn!("records re-read failed: {}", err),
        }
    }

    /// Step 4.
    pub fn check_programs(&mut self) -> Result<()> {
        match LockFile::open(self.layout.manager_lock_path())? {
            Acquire::Acquired(lock) => {
                lock.close();
                self.clear_stray_server()?;
                self.maybe_spawn_manager();
            }
            Acquire::HeldBy(_manager_pid) => {
                self.check_running_manager()?;
            }
        }
        Ok(())
    }

    fn clear_stray_server(&self) -> Result<()> {
        match LockFile::open(self.layout.server_lock_path())? {
            Acquire::Acquired(lock) => {
                lock.close();
            }
            Acquire::HeldBy(_) => {
                self.safe_kill_server_group()?;
            }
        }
        Ok(())
    }

    fn maybe_spawn_manager(&mut self) {
        if self.flap.should_spawn(Instant::now()) {
            self.spawn_manager();
        } else if self.flap.is_flapping() {
            warn!("manager is flapping, withholding spawn (count={})", self.flap.count());
        }
    }

    fn spawn_manager(&self) {
        let mut command = Command::new(&self.manager_binary);
        command.args(&self.manager_argv);
        command.stdout(stdio_for(&self.manager_stdout));
        command.stderr(stdio_for(&self.manager_stderr));

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
            Ok(child) => outputln!("spawned manager pid {}", child.id()),
            Err(err) => error!("failed to spawn manager binary '{}': {}", self.manager_binary, err),
        }
    }

    fn check_running_manager(&mut self) -> Result<()> {
        let timeout_ms = self.config.get_int("proxy.config.cop.manager_timeout", true)? as u64 * 1000;
        let admin_user = self.config.get_string("proxy.config.admin.user_id", true)?;
        let probe = ControlProbe {
            socket_path: self.layout.control_socket_path(),
            record_name: "proxy.config.admin.user_id".to_string(),
            expected_value: admin_user,
        };
        let outcome = probe.probe_control(timeout_ms);

        match decision::evaluate_manager_probe(&mut self.manager_probe_strikes, outcome == Outcome::Ok) {
            Action::KillManagerGroup => {
                warn!("manager control probe failed twice, killing manager group");
                self.safe_kill_manager_group()?;
                return Ok(());
            }
            _ => {}
        }

        if outcome != Outcome::Ok {
            // First strike: nothing further to do this iteration.
            return Ok(());
        }

        let proxy_running = match Client::connect_with_timeout(self.layout.control_socket_path(), timeout_ms) {
            Ok(mut client) => client.proxy_state_get().unwrap_or(0),
            Err(_) => 0,
        };
        if proxy_running != 1 {
            return Ok(());
        }

        self.check_server()
    }

    fn check_server(&mut self) -> Result<()> {
        match LockFile::open(self.layout.server_lock_path())? {
            Acquire::Acquired(lock) => {
                lock.close();
                if let Action::KillManagerForMissingServer =
                    decision::evaluate_server_presence(&mut self.server_absent_strikes, true)
                {
                    warn!("server lock acquirable twice under a healthy manager, killing manager");
                    self.safe_kill_manager_group()?;
                }
            }
            Acquire::HeldBy(_) => {
                decision::evaluate_server_presence(&mut self.server_absent_strikes, false);
                self.probe_server()?;
            }
        }
        Ok(())
    }

    fn probe_server(&mut self) -> Result<()> {
        let timeout_ms = self.config.get_int("proxy.config.cop.server_timeout", true)? as u64 * 1000;
        let port = self.config.get_int("proxy.config.synthetic.port", true)? as u16;
        let outcome = health::probe_http(port, timeout_ms, None);

        if let Action::KillServer = decision::evaluate_server_probe(&mut self.server_probe_strikes, outcome == Outcome::Ok) {
            warn!("server health probe failed twice, killing server");
            self.safe_kill_server_group()?;
            let init_sleep = self.config.get_int("proxy.config.cop.init_sleep_time", true)? as u64;
            process::nanosleep_ms(init_sleep * 1000);
        }
        Ok(())
    }

    /// Step 5, Linux only.
    #[cfg(target_os = "linux")]
    pub fn check_memory(&mut self) -> Result<()> {
        let enabled = self.config.get_int("proxy.config.cop.linux.only_on_memory_limit", true)? != 0;
        if !enabled {
            return Ok(());
        }
        let text = match ::std::fs::read_to_string("/proc/meminfo") {
            Ok(t) => t,
            Err(err) => {
                warn!("could not read /proc/meminfo: {}", err);
                return Ok(());
            }
        };
        let info = memcheck::parse(&text);
        let min_memfree = self.config.get_int("proxy.config.cop.linux.min_memfree_kb", true)? as u64;
        let min_swapfree = self.config.get_int("proxy.config.cop.linux.min_swapfree_kb", true)? as u64;

        if !memcheck::is_low_memory(&info, min_memfree, min_swapfree) {
            return Ok(());
        }

        let mask = self.config.get_int("proxy.config.cop.linux.memory_kill_mask", true)?;
        warn!("low memory detected ({:?}), applying kill mask {}", info, mask);
        if mask & 0x1 != 0 {
            self.safe_kill_manager_group()?;
        }
        if mask & 0x2 != 0 {
            self.safe_kill_server_group()?;
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn check_memory(&mut self) -> Result<()> {
        Ok(())
    }

    fn core_signal(&self) -> Result<Signal> {
        use std::str::FromStr;
        let name = self.config.get_string("proxy.config.cop.core_signal", true)?;
        Ok(Signal::from_str(&name).unwrap_or(Signal::SEGV))
    }

    fn kill_timeout_secs(&self) -> u32 {
        self.config.get_int("proxy.config.cop.kill_timeout", true).unwrap_or(10) as u32
    }

    fn safe_kill_manager_group(&self) -> Result<()> {
        let core_signal = self.core_signal()?;
        let final_signal = self.final_kill_signal();
        self.safe_kill(|| lockfile::kill_group(self.layout.manager_lock_path(), final_signal, Some(core_signal)))
    }

    fn safe_kill_server_group(&self) -> Result<()> {
        let core_signal = self.core_signal()?;
        let final_signal = self.final_kill_signal();
        self.safe_kill(|| lockfile::kill_group(self.layout.server_lock_path(), final_signal, Some(core_signal)))
    }

    /// Kill semantics per §4.10: SIGALRM is warn-only for the
    /// duration, bounded by `cop_kill_timeout`, then restored.
    fn safe_kill<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> ::ts_core::Result<()>,
    {
        signals::set_kill_wait_active(true);
        signals::arm_alarm(self.kill_timeout_secs());
        let result = f();
        signals::arm_alarm(0);
        signals::set_kill_wait_active(false);
        result.map_err(::error::Error::from)
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

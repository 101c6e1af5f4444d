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

//! `ts-cop`: the outermost supervisor. Forks and watches the manager,
//! flap-detects it, force-kills whichever of manager/server stops
//! answering. Never supervised by anything but an init system.

extern crate ansi_term;
#[macro_use]
extern crate clap;
extern crate env_logger;
extern crate lazy_static;
extern crate libc;
#[macro_use]
extern crate log;
#[macro_use]
extern crate ts_core;
extern crate ts_ctl_client;

mod decision;
mod error;
mod flap;
mod memcheck;
mod records;
mod watchdog;

use std::process;
use std::thread;
use std::time::Duration;

use clap::App;

use ts_core::bootstrap::{self, BootstrapConfig};
use ts_core::config::ConfigStore;
use ts_core::fs::Layout;
use ts_core::os::signals;

use error::{Error, Result};
use watchdog::Watchdog;

static LOGKEY: &'static str = "COP";

fn main() {
    env_logger::init().unwrap();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            println!("{}", err);
            match err {
                Error::FatalConfig(_) => process::exit(1),
                _ => process::exit(1),
            }
        }
    }
}

fn cli() -> App<'static, 'static> {
    clap_app!(("ts-cop") =>
        (version: "0.1.0")
        (about: "Watchdog for the proxy's manager and server processes")
        (@arg DEBUG: -d --debug "Enable debug-level logging")
        (@arg STDOUT: -o --stdout "Log to stdout instead of the configured log file")
        (@arg STOP: -s --stop "Suspend (SIGSTOP) rather than kill unresponsive children, for debugging")
        (@arg PATH: --path +takes_value "Runtime directory for lock files and sockets")
        (@arg RECORDS_CONF: --recordsConf +takes_value "Path to records.config, overriding the layout default")
        (@arg MGR_ARGS: --managerArgs +takes_value "Extra arguments appended to the manager child's argv")
    )
}

fn run() -> Result<i32> {
    let matches = cli().get_matches();

    let layout = Layout::resolve(matches.value_of("PATH"));
    let records_path = layout.records_config_path(matches.value_of("RECORDS_CONF"));

    let config = ConfigStore::new();
    config.load_defaults(records::defaults());
    if let Err(err) = config.load_file(&records_path) {
        warn!("could not load {}: {}, continuing with compiled-in defaults", records_path.display(), err);
    }

    let admin_user = config.get_string("proxy.config.admin.user_id", true).ok().filter(|s| !s.is_empty());

    let bootstrap_cfg = BootstrapConfig {
        layout: layout.clone(),
        lock_path: &layout.cop_lock_path(),
        admin_user,
        // `-o/--stdout` is honored by env_logger's own target selection
        // above; bootstrap's stdio detachment always redirects to
        // /dev/null here since the watchdog has no per-run log file of
        // its own to bind instead.
        stdout_path: None,
        stderr_path: None,
        file_max_pct: 0.9,
        nofile_throttle: None,
    };
    let _lock = bootstrap::run(&bootstrap_cfg)?;

    signals::install();

    let mut manager_argv: Vec<String> = vec![
        "--path".to_string(),
        layout.prefix.to_string_lossy().into_owned(),
    ];
    if let Some(extra) = matches.value_of("MGR_ARGS") {
        manager_argv.extend(extra.split_whitespace().map(String::from));
    }
    let manager_binary = layout.bindir().join("ts-manager").to_string_lossy().into_owned();

    let mut watchdog = Watchdog::new(layout.clone(), config, manager_binary, manager_argv, None, None)?;
    watchdog.set_debug_stop(matches.is_present("STOP"));

    main_loop(&mut watchdog, &records_path)
}

/// §4.10's per-iteration state machine. Runs until the `no_cop`
/// marker appears, at which point it exits 0 per the CLI contract.
fn main_loop(watchdog: &mut Watchdog, records_path: &::std::path::Path) -> Result<i32> {
    loop {
        if watchdog.should_stand_down() {
            outputln!("no_cop marker present, standing down");
            return Ok(0);
        }

        watchdog.log_reaped_children();
        watchdog.reload_config_if_changed(records_path);

        if let Err(err) = watchdog.check_programs() {
            warn!("check_programs failed: {}", err);
        }
        if let Err(err) = watchdog.check_memory() {
            warn!("check_memory failed: {}", err);
        }

        signals::arm_alarm(watchdog.alarm_deadline_secs());
        thread::sleep(Duration::from_secs(watchdog.sleep_time_secs()));
        signals::arm_alarm(0);
    }
}

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

//! `ts-manager`: bootstraps, owns the manager lock, supervises the
//! server child, and serves the control/event sockets. Spawned and
//! watched by `ts-cop`; never spawns itself.

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
extern crate ts_ctl_protocol;

mod context;
mod control;
mod error;
mod event_bus;
mod records;
mod shutdown;
mod supervisor;
mod synthetic;

use std::fs;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::App;

use ts_core::bootstrap::{self, BootstrapConfig};
use ts_core::config::ConfigStore;
use ts_core::exitcode;
use ts_core::fs::Layout;
use ts_core::os::process::Signal;
use ts_core::os::signals;

use context::Context;
use control::{ControlServer, EventServer};
use error::{Error, Result};
use shutdown::Action;
use supervisor::ChildSupervisor;
use synthetic::SyntheticServer;

static LOGKEY: &'static str = "MGR";

const MAIN_LOOP_SLEEP_MS: u64 = 250;
const FILE_MAX_PCT: f64 = 0.9;

fn main() {
    env_logger::init().unwrap();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            println!("{}", err);
            match err {
                Error::FatalConfig(_) => process::exit(exitcode::ERR_NO_RETRY_EXCODE),
                _ => process::exit(1),
            }
        }
    }
}

fn cli() -> App<'static, 'static> {
    clap_app!(("ts-manager") =>
        (version: "0.1.0")
        (about: "Process manager for the proxy's control and health-probing core")
        (@arg PROXY_OFF: --proxyOff "Do not launch the server child at startup")
        (@arg LISTEN_OFF: --listenOff "Do not bind the control, event, or synthetic-health sockets")
        (@arg PATH: --path +takes_value "Runtime directory for lock files and sockets")
        (@arg RECORDS_CONF: --recordsConf +takes_value "Path to records.config, overriding the layout default")
        (@arg TS_ARGS: --tsArgs +takes_value "Extra arguments appended to the server child's argv")
        (@arg PROXY_PORT: --proxyPort +takes_value "Listen-socket descriptor passed through to the server child")
        (@arg BIND_STDOUT: --bind_stdout +takes_value "Redirect the server child's stdout to this file")
        (@arg BIND_STDERR: --bind_stderr +takes_value "Redirect the server child's stderr to this file")
        (@arg DEBUG: --debug +takes_value "Debug tag filter, '|'-separated")
        (@arg ACTION: --action +takes_value "One-shot action tag, '|'-separated")
        (@arg NOSYSLOG: --nosyslog "Do not mirror log output to syslog")
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
        lock_path: &layout.manager_lock_path(),
        admin_user,
        stdout_path: matches
            .value_of("BIND_STDOUT")
            .map(String::from)
            .or_else(ts_core::env::bind_stdout_override),
        stderr_path: matches
            .value_of("BIND_STDERR")
            .map(String::from)
            .or_else(ts_core::env::bind_stderr_override),
        file_max_pct: FILE_MAX_PCT,
        nofile_throttle: None,
    };
    let _lock = bootstrap::run(&bootstrap_cfg)?;

    signals::install();

    let mut argv: Vec<String> = Vec::new();
    if let Some(port) = matches.value_of("PROXY_PORT") {
        argv.push("--proxyPort".to_string());
        argv.push(port.to_string());
    }
    if let Some(extra) = matches.value_of("TS_ARGS") {
        argv.extend(extra.split_whitespace().map(String::from));
    }
    let server_binary = layout.bindir().join("ts-server").to_string_lossy().into_owned();
    let supervisor = ChildSupervisor::new(server_binary, argv, None, None);

    let shutdown_timeout =
        Duration::from_secs(config.get_int("proxy.config.restart.shutdown_timeout", true)? as u64);
    let active_client_threshold = config.get_int("proxy.config.restart.active_client_threshold", true)? as usize;

    let ctx = Arc::new(Context::new(config, layout.clone(), supervisor, shutdown_timeout));

    if !matches.is_present("PROXY_OFF") {
        ctx.supervisor.lock().expect("supervisor mutex poisoned").start(&ctx.events);
    }

    let synthetic = if !matches.is_present("LISTEN_OFF") {
        let restricted = ctx
            .config
            .get_string("proxy.config.process_manager.control_socket_mode", true)?
            == "restricted";

        let control_server = ControlServer::bind(layout.control_socket_path(), restricted)?;
        control_server.spawn_dispatch_loop(ctx.clone());

        let event_server = EventServer::bind(layout.event_socket_path(), restricted)?;
        event_server.spawn(ctx.clone());

        let synth_port = ctx.config.get_int("proxy.config.synthetic.port", true)? as u16;
        Some(SyntheticServer::bind(synth_port)?)
    } else {
        None
    };

    main_loop(&ctx, &records_path, active_client_threshold, synthetic.as_ref())
}

/// Runs until a `Restart` or `Stop` action fires, returning the exit
/// code the Watchdog should observe. `Restart` exits plainly so the
/// Watchdog relaunches it subject to flap; `Stop` additionally drops
/// the `no_cop` marker so the Watchdog's own step 1 stands down
/// instead of relaunching.
fn main_loop(
    ctx: &Arc<Context>,
    records_path: &::std::path::Path,
    active_client_threshold: usize,
    synthetic: Option<&SyntheticServer>,
) -> Result<i32> {
    loop {
        signals::log_reaped_if_any();

        if signals::reread_requested() {
            match ctx.config.reload_if_changed(records_path) {
                Ok(true) => outputln!("records config re-read after SIGHUP"),
                Ok(false) => {}
                Err(err) => warn!("records re-read failed: {}", err),
            }
        }

        {
            let mut sup = ctx.supervisor.lock().expect("supervisor mutex poisoned");
            sup.poll(&ctx.events);
            sup.start(&ctx.events);
        }

        if let Some(synth) = synthetic {
            synth.accept_one();
        }

        let action = {
            let mut sd = ctx.shutdown.lock().expect("shutdown mutex poisoned");
            sd.evaluate(ctx.is_idle(active_client_threshold))
        };

        match action {
            Action::None | Action::AwaitIdle => {}
            Action::SetDrainFlag(on) => ctx.set_draining(on),
            Action::BounceServer => {
                ctx.supervisor.lock().expect("supervisor mutex poisoned").stop(Signal::TERM);
            }
            Action::RestartManager => {
                outputln!("manager restarting");
                return Ok(0);
            }
            Action::StopManager => {
                outputln!("manager stopping");
                let _ = fs::File::create(ctx.layout.no_cop_marker_path());
                return Ok(0);
            }
        }

        thread::sleep(Duration::from_millis(MAIN_LOOP_SLEEP_MS));
    }
}

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

//! Stand-in for `ts-manager` in end-to-end Watchdog tests: acquires
//! `manager.lock` and writes its own pid the way the real bootstrap
//! sequence does, then either exits immediately (flap-trip scenarios)
//! or sleeps forever (clean-boot / manager-dies scenarios). Never binds
//! the control socket, so a Watchdog probing it sees `ConnectFailed`
//! every time -- equivalent for strike-counting purposes to a control
//! channel that always times out.

extern crate libc;
extern crate ts_core;

use std::env;
use std::process;
use std::thread;
use std::time::Duration;

use ts_core::fs::Layout;
use ts_core::lockfile::{Acquire, LockFile};

fn main() {
    let args: Vec<String> = env::args().collect();
    let path = arg_value(&args, "--path");
    let exit_immediately = args.iter().any(|a| a == "--exit-immediately");

    let layout = Layout::resolve(path.as_ref().map(String::as_str));

    let mut lock = match LockFile::open(layout.manager_lock_path()) {
        Ok(Acquire::Acquired(lock)) => lock,
        Ok(Acquire::HeldBy(pid)) => {
            eprintln!("fake-manager: manager.lock already held by pid {}", pid);
            process::exit(1);
        }
        Err(err) => {
            eprintln!("fake-manager: could not open manager.lock: {}", err);
            process::exit(1);
        }
    };
    lock.write_pid().expect("fake-manager: failed to write pid to manager.lock");

    if exit_immediately {
        process::exit(0);
    }

    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned()
}

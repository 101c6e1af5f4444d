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

//! Stand-in for the proxy data-plane binary in end-to-end Watchdog
//! tests: acquires `server.lock`, writes its own pid, and answers the
//! synthetic health probe on a loopback TCP port the way the real
//! manager's `SyntheticServer` does. Used both as a live, healthy
//! server and, when left running after its supervising fake-manager
//! has been killed, as the "stray server" `clear_stray_server` is
//! expected to force-kill.

extern crate libc;
extern crate ts_core;

use std::env;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process;
use std::thread;
use std::time::Duration;

use ts_core::fs::Layout;
use ts_core::lockfile::{Acquire, LockFile};

const ALPHABET: &'static str = "abcdefghijklmnopqrstuvwxyz";

fn main() {
    let args: Vec<String> = env::args().collect();
    let path = arg_value(&args, "--path");
    let port: u16 = arg_value(&args, "--port").and_then(|s| s.parse().ok()).unwrap_or(8083);

    let layout = Layout::resolve(path.as_ref().map(String::as_str));

    let mut lock = match LockFile::open(layout.server_lock_path()) {
        Ok(Acquire::Acquired(lock)) => lock,
        Ok(Acquire::HeldBy(pid)) => {
            eprintln!("fake-server: server.lock already held by pid {}", pid);
            process::exit(1);
        }
        Err(err) => {
            eprintln!("fake-server: could not open server.lock: {}", err);
            process::exit(1);
        }
    };
    lock.write_pid().expect("fake-server: failed to write pid to server.lock");

    if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
        thread::spawn(move || serve(listener));
    } else {
        eprintln!("fake-server: could not bind synthetic port {}, running lock-only", port);
    }

    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}

fn serve(listener: TcpListener) {
    for conn in listener.incoming() {
        if let Ok(stream) = conn {
            thread::spawn(move || handle(stream));
        }
    }
}

fn handle(mut stream: TcpStream) {
    let mut buf = [0u8; 256];
    if stream.read(&mut buf).is_err() {
        return;
    }
    let body = format!("{}\r\n{}\r\n{}", ALPHABET, ALPHABET, ALPHABET);
    let response = format!(
        "HTTP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned()
}

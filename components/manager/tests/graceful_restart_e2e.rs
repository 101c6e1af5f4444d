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

//! §8.6 "Graceful idle restart" run against the real `ts-manager`
//! binary and a real control socket: a `RESTART` with the idle option
//! set must not fire while client connections are open, and must fire
//! before `shutdown_timeout` once they all close.

extern crate tempdir;
extern crate ts_ctl_client;
extern crate ts_core;

use std::fs;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use ts_ctl_client::Client;

fn workspace_target_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .expect("components/manager has a workspace root two levels up")
        .join("target")
        .join("debug")
}

fn setup_prefix(dir: &Path) {
    fs::create_dir_all(dir.join("bin")).unwrap();
    fs::create_dir_all(dir.join("etc")).unwrap();
    fs::create_dir_all(dir.join("var/run")).unwrap();
    fs::create_dir_all(dir.join("var/log")).unwrap();

    fs::write(
        dir.join("etc/records.config"),
        "CONFIG proxy.config.restart.active_client_threshold INT 0\n\
         CONFIG proxy.config.restart.shutdown_timeout INT 4\n",
    )
    .unwrap();
}

fn spawn_manager(dir: &Path) -> Child {
    Command::new(workspace_target_dir().join("ts-manager"))
        .arg("--path")
        .arg(dir.as_os_str())
        .arg("--proxyOff")
        .env("RUST_LOG", "warn")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn ts-manager")
}

fn control_socket_path(dir: &Path) -> PathBuf {
    dir.join("var/run/ts_control")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !path.exists() {
        if Instant::now() >= deadline {
            panic!("control socket {} never appeared", path.display());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// A process that exits on its own schedule; `None` once `wait`
/// observes it, so a second `wait_exited` call doesn't hang on an
/// already-reaped child.
fn exited_within(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(Some(_)) = child.try_wait() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn restart_waits_for_idle_then_fires_before_the_timeout() {
    let dir = tempdir::TempDir::new("ts-manager-e2e").unwrap();
    setup_prefix(dir.path());
    let mut manager = spawn_manager(dir.path());

    let sock = control_socket_path(dir.path());
    wait_for_socket(&sock, Duration::from_secs(5));

    // Five held-open connections keep active_client_count above the
    // configured threshold of zero.
    let holders: Vec<UnixStream> = (0..5).map(|_| UnixStream::connect(&sock).unwrap()).collect();

    let mut client = Client::connect(&sock).unwrap();
    client.restart(1 /* IDLE */).expect("RESTART request failed");
    drop(client);

    assert!(
        !exited_within(&mut manager, Duration::from_secs(2)),
        "manager exited while client connections were still open"
    );

    drop(holders);

    assert!(
        exited_within(&mut manager, Duration::from_secs(4)),
        "manager did not exit within shutdown_timeout once it went idle"
    );

    let status = manager.wait().expect("manager process already reaped");
    assert_eq!(status.code(), Some(0));
}

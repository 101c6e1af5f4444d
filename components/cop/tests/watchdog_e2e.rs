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

//! Black-box seed scenarios for the watchdog, run against the real
//! `ts-cop` binary with `fake-manager` standing in for `ts-manager`.
//! Unlike `watchdog.rs`'s in-process unit tests, these exercise real
//! `fork`/`exec`, real `fcntl` locks across process boundaries, and
//! real signal delivery.

extern crate libc;
extern crate tempdir;
extern crate ts_core;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use ts_core::lockfile::{Acquire, LockFile};
use ts_core::os::process::Pid;

fn workspace_target_dir() -> PathBuf {
    // CARGO_MANIFEST_DIR is .../components/cop; the shared workspace
    // target directory is two levels up.
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .expect("components/cop has a workspace root two levels up")
        .join("target")
        .join("debug")
}

fn fixture_bin(name: &str) -> PathBuf {
    workspace_target_dir().join(name)
}

/// Lay out a runtime prefix with `bin/ts-manager` symlinked to
/// `fake-manager` and a `records.config` tuned for fast iteration, so
/// these tests don't spend real minutes waiting on the default
/// `cop.sleep_time`.
fn setup_prefix(dir: &Path) {
    fs::create_dir_all(dir.join("bin")).unwrap();
    fs::create_dir_all(dir.join("etc")).unwrap();
    fs::create_dir_all(dir.join("var/run")).unwrap();
    fs::create_dir_all(dir.join("var/log")).unwrap();

    let fake_manager = fixture_bin("fake-manager");
    assert!(fake_manager.exists(), "fake-manager fixture not built at {}", fake_manager.display());

    #[cfg(unix)]
    std::os::unix::fs::symlink(&fake_manager, dir.join("bin/ts-manager")).unwrap();

    fs::write(
        dir.join("etc/records.config"),
        "CONFIG proxy.config.cop.sleep_time INT 1\n\
         CONFIG proxy.config.cop.manager_timeout INT 1\n\
         CONFIG proxy.config.cop.server_timeout INT 1\n\
         CONFIG proxy.config.cop.kill_timeout INT 2\n\
         CONFIG proxy.config.cop.init_sleep_time INT 0\n",
    )
    .unwrap();
}

fn spawn_cop(dir: &Path, extra_manager_args: Option<&str>) -> Child {
    let mut cmd = Command::new(fixture_bin("ts-cop"));
    cmd.arg("--path").arg(dir.as_os_str());
    if let Some(args) = extra_manager_args {
        cmd.arg("--managerArgs").arg(args);
    }
    cmd.env("RUST_LOG", "warn");
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    cmd.spawn().expect("failed to spawn ts-cop")
}

fn manager_lock_path(dir: &Path) -> PathBuf {
    dir.join("var/run/manager.lock")
}

/// Poll `manager.lock` until it reports a holder pid, or panic after
/// `timeout`.
fn wait_for_manager_pid(dir: &Path, timeout: Duration) -> Pid {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(Acquire::HeldBy(pid)) = LockFile::open(manager_lock_path(dir)) {
            return pid;
        }
        if Instant::now() >= deadline {
            panic!("manager.lock never got a holder within {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn manager_pid(dir: &Path) -> Option<Pid> {
    match LockFile::open(manager_lock_path(dir)) {
        Ok(Acquire::HeldBy(pid)) => Some(pid),
        _ => None,
    }
}

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn clean_boot_spawns_exactly_one_manager_and_does_not_double_spawn() {
    let dir = tempdir::TempDir::new("ts-cop-e2e").unwrap();
    setup_prefix(dir.path());
    let cop = KillOnDrop(spawn_cop(dir.path(), None));

    let first_pid = wait_for_manager_pid(dir.path(), Duration::from_secs(5));

    // Give the watchdog a few more ticks; a free manager.lock check
    // that never double-spawns means the pid stays the same.
    std::thread::sleep(Duration::from_secs(3));
    let still_pid = manager_pid(dir.path()).expect("manager.lock should still have a holder");
    assert_eq!(first_pid, still_pid, "watchdog must not spawn a second manager while one is already running");

    drop(cop);
}

#[test]
fn manager_death_triggers_exactly_one_respawn() {
    let dir = tempdir::TempDir::new("ts-cop-e2e").unwrap();
    setup_prefix(dir.path());
    let cop = KillOnDrop(spawn_cop(dir.path(), None));

    let first_pid = wait_for_manager_pid(dir.path(), Duration::from_secs(5));

    unsafe {
        libc::kill(first_pid, libc::SIGKILL);
    }

    // cop.sleep_time=1s: within a couple of ticks the watchdog should
    // observe the freed lock and relaunch.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut second_pid = None;
    while Instant::now() < deadline {
        if let Some(pid) = manager_pid(dir.path()) {
            if pid != first_pid {
                second_pid = Some(pid);
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(second_pid.is_some(), "watchdog did not respawn the manager after it was killed");

    drop(cop);
}

#[test]
fn a_manager_that_exits_immediately_trips_the_flap_limiter() {
    let dir = tempdir::TempDir::new("ts-cop-e2e").unwrap();
    setup_prefix(dir.path());
    let mut cop = spawn_cop(dir.path(), Some("--exit-immediately"));

    let mut stderr = cop.stderr.take().unwrap();

    // Read on a background thread so the test can bound its wait with
    // `recv_timeout` rather than blocking forever on a read that may
    // never see more bytes if the flap message already shipped in an
    // earlier chunk.
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(String::from_utf8_lossy(&buf[..n]).into_owned()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    // MAX_FLAP_COUNT is 5 relaunches inside a 60s window; at
    // cop.sleep_time=1s that trips in well under this deadline.
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut output = String::new();
    let mut flapped = false;
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => {
                output.push_str(&chunk);
                if output.contains("flapping") {
                    flapped = true;
                    break;
                }
            }
            Err(_) => break,
        }
    }

    let _ = cop.kill();
    let _ = cop.wait();
    assert!(flapped, "expected a 'flapping' warning in ts-cop's stderr, got:\n{}", output);
}

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

//! The sequence every long-lived process in the core runs through
//! before it does real work: `setsid`, stdio detachment, supplementary
//! groups, rlimit tuning, privilege drop + capability restoration, and
//! the fail-fast lock check. CLI parsing (Bootstrapper step 1) lives
//! in each binary's own `main.rs` via `clap`; everything after layout
//! resolution (steps 2-7) lives here so `cop` and `manager` share one
//! implementation.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

use libc;

use error::{Error, Result};
use fs::Layout;
use lockfile::{Acquire, LockFile};
use os::{privilege, process, rlimit};

static LOGKEY: &'static str = "BOOT";

/// What a binary knows about itself before bootstrap: which lock it
/// must hold, and where to send stdio if not explicitly bound.
pub struct BootstrapConfig<'a> {
    pub layout: Layout,
    pub lock_path: &'a ::std::path::Path,
    pub admin_user: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub file_max_pct: f64,
    pub nofile_throttle: Option<u64>,
}

/// Run steps 3 through 7. Returns the lock file this process now
/// holds (with its own pid already written), or an error describing
/// exactly why bootstrap failed -- including "a live holder already
/// has this lock", which is a fail-fast, not a retry.
pub fn run(cfg: &BootstrapConfig) -> Result<LockFile> {
    process::setsid()?;
    process::own_process_group()?;
    detach_stdio(cfg.stdout_path.as_ref().map(String::as_str), cfg.stderr_path.as_ref().map(String::as_str))?;

    if let Some(ref user) = cfg.admin_user {
        let uid = privilege::uid_by_name(user)?;
        privilege::init_supplementary_groups(uid)?;
    }

    rlimit::raise_nofile(cfg.file_max_pct, cfg.nofile_throttle, 1024)?;
    rlimit::raise_to_hard(rlimit::Resource::Data)?;
    rlimit::raise_to_hard(rlimit::Resource::Stack)?;
    rlimit::raise_to_hard(rlimit::Resource::FSize)?;
    rlimit::raise_to_hard(rlimit::Resource::Rss)?;

    if privilege::is_root() {
        if let Some(ref user) = cfg.admin_user {
            let uid = privilege::uid_by_name(user)?;
            let gid = privilege::gid_by_name(user).unwrap_or(uid as libc::gid_t);
            privilege::drop_privileges(uid, gid)?;
            ::os::caps::restore_after_setuid()?;
        }
    }

    check_lockfile(cfg.lock_path)
}

/// `setsid()`, new process group, and stdio detachment already ran by
/// the time this is called in `run()`; kept separate so tests can
/// exercise the descriptor-redirection logic without a real session
/// change.
fn detach_stdio(stdout_path: Option<&str>, stderr_path: Option<&str>) -> Result<()> {
    let devnull = || OpenOptions::new().write(true).open("/dev/null");

    let stdout = match stdout_path {
        Some(p) => File::create(p).map_err(Error::from)?,
        None => devnull().map_err(Error::from)?,
    };
    dup_onto(&stdout, libc::STDOUT_FILENO)?;

    let stderr = match stderr_path {
        Some(p) => File::create(p).map_err(Error::from)?,
        None => devnull().map_err(Error::from)?,
    };
    dup_onto(&stderr, libc::STDERR_FILENO)?;

    let devnull_in = OpenOptions::new().read(true).open("/dev/null").map_err(Error::from)?;
    dup_onto(&devnull_in, libc::STDIN_FILENO)?;

    Ok(())
}

fn dup_onto(file: &File, target_fd: libc::c_int) -> Result<()> {
    let ret = unsafe { libc::dup2(file.as_raw_fd(), target_fd) };
    if ret < 0 {
        return Err(Error::SysCall(::std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Take the process's own lock, failing fast with a clear message if
/// a live holder already exists.
pub fn check_lockfile(path: &::std::path::Path) -> Result<LockFile> {
    match LockFile::open(path)? {
        Acquire::Acquired(mut lock) => {
            lock.write_pid()?;
            outputln!("acquired lock {}", path.display());
            Ok(lock)
        }
        Acquire::HeldBy(pid) => Err(Error::LockHeld(path.to_path_buf(), pid)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate tempdir;

    #[test]
    fn check_lockfile_fails_fast_against_a_live_holder() {
        let dir = tempdir::TempDir::new("ts-bootstrap").unwrap();
        let path = dir.path().join("test.lock");

        let mut first = match LockFile::open(&path).unwrap() {
            Acquire::Acquired(lf) => lf,
            Acquire::HeldBy(_) => panic!("expected a fresh lock"),
        };
        first.write_pid().unwrap();

        match check_lockfile(&path) {
            Err(Error::LockHeld(_, pid)) => assert_eq!(pid, unsafe { libc::getpid() }),
            other => panic!("expected LockHeld, got {:?}", other.is_ok()),
        }
    }
}

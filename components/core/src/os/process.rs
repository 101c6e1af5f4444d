// Copyright (c) 2016-2017 Chef Software Inc. and/or applicable contributors
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

//! Low-level pid/signal primitives shared by every supervised-process
//! codepath: the Lockfile's `kill_holder`/`kill_group`, the
//! ChildSupervisor's spawn/reap, and the Watchdog's `safe_kill`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::{io, thread, time};

use libc::{self, pid_t};

use error::{Error, Result};

pub type Pid = pid_t;

#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    INT,
    ILL,
    ABRT,
    FPE,
    KILL,
    SEGV,
    TERM,
    HUP,
    QUIT,
    ALRM,
    USR1,
    USR2,
    /// Not delivered by the core's own fatal-signal handling; used by
    /// the Watchdog's `-s/--stop` debug flag to suspend rather than
    /// kill a stuck child, so an operator can attach and inspect it.
    STOP,
}

impl From<i32> for Signal {
    fn from(val: i32) -> Signal {
        match val {
            1 => Signal::HUP,
            2 => Signal::INT,
            3 => Signal::QUIT,
            4 => Signal::ILL,
            6 => Signal::ABRT,
            8 => Signal::FPE,
            9 => Signal::KILL,
            10 => Signal::USR1,
            11 => Signal::SEGV,
            12 => Signal::USR2,
            14 => Signal::ALRM,
            15 => Signal::TERM,
            19 => Signal::STOP,
            _ => Signal::KILL,
        }
    }
}

impl From<Signal> for i32 {
    fn from(value: Signal) -> i32 {
        match value {
            Signal::HUP => 1,
            Signal::INT => 2,
            Signal::QUIT => 3,
            Signal::ILL => 4,
            Signal::ABRT => 6,
            Signal::FPE => 8,
            Signal::KILL => 9,
            Signal::USR1 => 10,
            Signal::SEGV => 11,
            Signal::USR2 => 12,
            Signal::ALRM => 14,
            Signal::TERM => 15,
            Signal::STOP => 19,
        }
    }
}

impl FromStr for Signal {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ABRT" => Ok(Signal::ABRT),
            "ALRM" => Ok(Signal::ALRM),
            "FPE" => Ok(Signal::FPE),
            "HUP" => Ok(Signal::HUP),
            "ILL" => Ok(Signal::ILL),
            "INT" => Ok(Signal::INT),
            "KILL" => Ok(Signal::KILL),
            "QUIT" => Ok(Signal::QUIT),
            "SEGV" => Ok(Signal::SEGV),
            "TERM" => Ok(Signal::TERM),
            "USR1" => Ok(Signal::USR1),
            "USR2" => Ok(Signal::USR2),
            "STOP" => Ok(Signal::STOP),
            _ => Ok(Signal::KILL),
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match *self {
            Signal::ABRT => "ABRT",
            Signal::ALRM => "ALRM",
            Signal::FPE => "FPE",
            Signal::HUP => "HUP",
            Signal::ILL => "ILL",
            Signal::INT => "INT",
            Signal::KILL => "KILL",
            Signal::QUIT => "QUIT",
            Signal::SEGV => "SEGV",
            Signal::TERM => "TERM",
            Signal::USR1 => "USR1",
            Signal::USR2 => "USR2",
            Signal::STOP => "STOP",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a single `kill(2)` call as distinguished by
/// `kill_signal`: whether the signal was merely accepted by a still-
/// living target, or whether the target is confirmed gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillOutcome {
    /// `kill(2)` returned 0: the signal was delivered/queued. This
    /// says nothing about whether the target has since exited -- only
    /// that it existed and was signalable at the moment of the call.
    StillAlive,
    /// `kill(2)` failed with `ESRCH` (no such process) or `EPERM`
    /// (not ours to signal, e.g. a pid reused by an unrelated
    /// process): the original holder is gone.
    Gone,
}

/// Deliver `signal` to `pid` once and report whether the target is
/// still alive or confirmed gone. A negative `pid` signals the whole
/// process group, which is how group-kill is expressed to `kill(2)`.
pub fn kill_signal(pid: Pid, signal: Signal) -> Result<KillOutcome> {
    let sig: i32 = signal.into();
    let ret = unsafe { libc::kill(pid, sig) };
    if ret == 0 {
        return Ok(KillOutcome::StillAlive);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) | Some(libc::EPERM) => Ok(KillOutcome::Gone),
        Some(libc::EINTR) => kill_signal(pid, signal),
        _ => Err(Error::Signal(err)),
    }
}

/// Deliver `signal` to `pid`. A negative `pid` signals the whole
/// process group, which is how group-kill is expressed to `kill(2)`.
/// Fire-and-forget: callers that need to confirm the target actually
/// exited (rather than just accepted the signal) should use
/// `kill_signal` directly, as `Lockfile::kill_holder`/`kill_group` do.
pub fn kill(pid: Pid, signal: Signal) -> Result<()> {
    match kill_signal(pid, signal)? {
        KillOutcome::StillAlive | KillOutcome::Gone => Ok(()),
    }
}

/// Negate a pid into its process-group signal target, the way the
/// group-kill paths in Lockfile and ChildSupervisor do: a process that
/// is its own group leader (`pid == pgid`) is signaled as `-pid`, which
/// `kill(2)` interprets as "every process in the group".
pub fn pid_to_signal_target(pid: Pid) -> Pid {
    match unsafe { libc::getpgid(pid) } {
        pgid if pgid == pid => -pid,
        _ => pid,
    }
}

/// Non-blocking `waitpid`. Returns `Ok(None)` when the child has not
/// yet exited, matching the `WNOHANG` contract consumed by
/// SignalRouter's main-loop drain.
pub fn try_wait(pid: Pid) -> Result<Option<i32>> {
    let mut status: i32 = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if ret == 0 {
        return Ok(None);
    }
    if ret == pid {
        return Ok(Some(status));
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ECHILD) => Ok(Some(status)),
        Some(libc::EINTR) => try_wait(pid),
        _ => Err(Error::Wait(err)),
    }
}

/// Put the calling process into its own new process group, the way a
/// forked server child does right after `fork()` and before `exec()`
/// so it does not share its supervisor's group.
pub fn own_process_group() -> Result<()> {
    let ret = unsafe { libc::setpgid(0, 0) };
    if ret != 0 {
        return Err(Error::Spawn(io::Error::last_os_error()));
    }
    Ok(())
}

/// `setsid()` — detach from the controlling terminal and become a
/// session (and process-group) leader. Part of Bootstrapper step 3.
pub fn setsid() -> Result<()> {
    let ret = unsafe { libc::setsid() };
    if ret == -1 {
        return Err(Error::SysCall(io::Error::last_os_error()));
    }
    Ok(())
}

/// Sleep for a short interval without regard to pending signals,
/// matching the teacher's use of `nanosleep`-backed millisecond sleeps
/// in poll/retry loops that must not be disturbed the way `sleep(3)`
/// can be.
pub fn nanosleep_ms(ms: u64) {
    thread::sleep(time::Duration::from_millis(ms));
}

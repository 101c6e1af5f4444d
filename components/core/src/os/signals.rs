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

//! Process-wide signal disposition. Handlers only latch state into
//! atomics; all logging, formatting, and reaping-adjacent work happens
//! on the main loop that drains those atomics. Nothing in this module
//! may be called from inside a handler except `libc` calls and
//! `write(2)` on a pre-formatted buffer.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use libc;

use os::process::{try_wait, Pid};

static LAST_REAPED_PID: AtomicI32 = AtomicI32::new(0);
static LAST_REAPED_STATUS: AtomicI32 = AtomicI32::new(0);
static REREAD_REQUESTED: AtomicBool = AtomicBool::new(false);
static ALARM_FIRED: AtomicBool = AtomicBool::new(false);
static KILL_WAIT_ACTIVE: AtomicBool = AtomicBool::new(false);
static FATAL_PENDING: AtomicBool = AtomicBool::new(false);

/// Install the process-wide signal disposition described by the
/// supervision core: SIGCHLD/SIGTERM reap and latch, fatal signals
/// dump-and-abort, SIGALRM is dual purpose, SIGHUP sets a re-read
/// flag, SIGPIPE is ignored.
pub fn install() {
    unsafe {
        install_handler(libc::SIGCHLD, handle_chld);
        install_handler(libc::SIGTERM, handle_term);
        install_handler(libc::SIGHUP, handle_hup);
        install_handler(libc::SIGALRM, handle_alrm);
        install_handler(libc::SIGSEGV, handle_fatal);
        install_handler(libc::SIGBUS, handle_fatal);
        install_handler(libc::SIGILL, handle_fatal);
        install_handler(libc::SIGFPE, handle_fatal);
        install_handler(libc::SIGSYS, handle_fatal);
        install_handler(libc::SIGQUIT, handle_fatal);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

unsafe fn install_handler(signum: i32, handler: extern "C" fn(i32)) {
    let mut sa: libc::sigaction = std::mem::zeroed();
    sa.sa_sigaction = handler as usize;
    libc::sigemptyset(&mut sa.sa_mask);
    sa.sa_flags = libc::SA_RESTART;
    libc::sigaction(signum, &sa, std::ptr::null_mut());
}

extern "C" fn handle_chld(_signum: i32) {
    reap_latch();
}

extern "C" fn handle_term(_signum: i32) {
    reap_latch();
}

fn reap_latch() {
    // Non-blocking: drain every zombie currently reapable, keep only
    // the last one, matching "store the last reaped (pid, status)".
    loop {
        let mut status: i32 = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        LAST_REAPED_PID.store(pid, Ordering::SeqCst);
        LAST_REAPED_STATUS.store(status, Ordering::SeqCst);
    }
}

extern "C" fn handle_hup(_signum: i32) {
    REREAD_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_alrm(_signum: i32) {
    if KILL_WAIT_ACTIVE.load(Ordering::SeqCst) {
        // Warn-only: re-arm and keep going. The actual log line is
        // emitted by the main loop, which polls `alarm_fired()`.
        ALARM_FIRED.store(true, Ordering::SeqCst);
        unsafe {
            libc::alarm(1);
        }
        return;
    }
    FATAL_PENDING.store(true, Ordering::SeqCst);
    let msg = b"fatal: SIGALRM deadline fired outside a safe-kill region\n";
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}

extern "C" fn handle_fatal(signum: i32) {
    let mut buf = [0u8; 64];
    let prefix = b"fatal signal received: ";
    buf[..prefix.len()].copy_from_slice(prefix);
    let mut n = prefix.len();
    n += write_decimal(&mut buf[n..], signum);
    buf[n] = b'\n';
    n += 1;
    unsafe {
        libc::write(2, buf.as_ptr() as *const libc::c_void, n);
        libc::abort();
    }
}

/// Format a non-negative integer into `buf` without allocating,
/// returning the number of bytes written. Async-signal-safe.
fn write_decimal(buf: &mut [u8], mut val: i32) -> usize {
    if val == 0 {
        buf[0] = b'0';
        return 1;
    }
    let mut digits = [0u8; 10];
    let mut i = 0;
    while val > 0 {
        digits[i] = b'0' + (val % 10) as u8;
        val /= 10;
        i += 1;
    }
    for j in 0..i {
        buf[j] = digits[i - 1 - j];
    }
    i
}

/// Consume the last-reaped `(pid, status)` pair, clearing it so it is
/// not observed twice by the main loop.
pub fn take_reaped() -> Option<(Pid, i32)> {
    let pid = LAST_REAPED_PID.swap(0, Ordering::SeqCst);
    if pid == 0 {
        return None;
    }
    let status = LAST_REAPED_STATUS.load(Ordering::SeqCst);
    Some((pid, status))
}

/// Re-export for callers that want a non-latched poll of a specific
/// pid rather than "whatever the handler last reaped".
pub fn poll_child(pid: Pid) -> ::error::Result<Option<i32>> {
    try_wait(pid)
}

pub fn reread_requested() -> bool {
    REREAD_REQUESTED.swap(false, Ordering::SeqCst)
}

/// Toggle the dual-purpose behavior of SIGALRM: while a kill/lock-wait
/// region is active, an alarm firing is a warning that re-arms itself;
/// otherwise it is fatal.
pub fn set_kill_wait_active(active: bool) {
    KILL_WAIT_ACTIVE.store(active, Ordering::SeqCst);
}

pub fn alarm_warning_fired() -> bool {
    ALARM_FIRED.swap(false, Ordering::SeqCst)
}

/// Arm a deadline of `secs` seconds. A value of 0 disarms.
pub fn arm_alarm(secs: u32) {
    unsafe {
        libc::alarm(secs);
    }
}

pub fn log_reaped_if_any() {
    if let Some((pid, status)) = take_reaped() {
        info!("reaped child pid {} status {}", pid, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_formatting_matches_display() {
        let mut buf = [0u8; 16];
        let n = write_decimal(&mut buf, 1234);
        assert_eq!(&buf[..n], b"1234");
    }

    #[test]
    fn decimal_formatting_zero() {
        let mut buf = [0u8; 16];
        let n = write_decimal(&mut buf, 0);
        assert_eq!(&buf[..n], b"0");
    }

    #[test]
    fn take_reaped_is_empty_until_latched() {
        assert!(take_reaped().is_none());
    }
}

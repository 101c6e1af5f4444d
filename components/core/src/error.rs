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

use std::error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use os::process::Pid;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A lock file is currently held by another, live, process.
    LockHeld(PathBuf, Pid),
    /// A lock file's contents could not be parsed as a decimal pid.
    LockCorrupt(PathBuf),
    /// Opening or locking a lock file failed for a reason other than
    /// it already being held.
    LockIO(PathBuf, io::Error),
    /// `fork`/`exec` of a supervised child failed.
    Spawn(io::Error),
    /// `waitpid` failed in a way other than "no child yet".
    Wait(io::Error),
    /// A `kill(2)` call failed for a reason other than ESRCH/EPERM.
    Signal(io::Error),
    /// A named system user does not exist.
    UserNotFound(String),
    /// A named system group does not exist.
    GroupNotFound(String),
    /// `setresuid`/`setresgid`/`setgroups` failed.
    PrivilegeDrop(io::Error),
    /// `setrlimit` failed.
    Rlimit(io::Error),
    /// Restoring a POSIX capability into the effective set failed.
    Capability(String),
    /// A config file line could not be parsed.
    ConfigParse(PathBuf, usize, String),
    /// A config record was read with a type that did not match its
    /// declared `RecordDataType`.
    ConfigTypeMismatch(String),
    /// A config record was read that does not exist and `missing_ok`
    /// was false.
    ConfigMissing(String),
    /// A mandatory configuration value was missing or malformed badly
    /// enough that the owning process cannot continue.
    FatalConfig(String),
    /// The underlying I/O for the config file could not be read.
    ConfigIO(PathBuf, io::Error),
    /// A network operation failed while establishing a connection.
    NetEstablish(io::Error),
    /// A network read failed or the peer closed mid-message.
    NetRead(io::Error),
    /// A network write failed.
    NetWrite(io::Error),
    /// The peer closed the connection in an orderly way.
    NetEof,
    /// A bounded operation (I/O or kill) exceeded its deadline.
    Timeout,
    /// A generic OS call failed in a way not otherwise classified.
    SysCall(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::LockHeld(ref path, pid) => {
                write!(f, "lock file {} is held by pid {}", path.display(), pid)
            }
            Error::LockCorrupt(ref path) => {
                write!(f, "lock file {} does not contain a valid pid", path.display())
            }
            Error::LockIO(ref path, ref err) => {
                write!(f, "could not open/lock {}: {}", path.display(), err)
            }
            Error::Spawn(ref err) => write!(f, "could not spawn child process: {}", err),
            Error::Wait(ref err) => write!(f, "waitpid failed: {}", err),
            Error::Signal(ref err) => write!(f, "kill(2) failed: {}", err),
            Error::UserNotFound(ref name) => write!(f, "no such user: {}", name),
            Error::GroupNotFound(ref name) => write!(f, "no such group: {}", name),
            Error::PrivilegeDrop(ref err) => write!(f, "could not drop privileges: {}", err),
            Error::Rlimit(ref err) => write!(f, "setrlimit failed: {}", err),
            Error::Capability(ref cap) => write!(f, "could not restore capability {}", cap),
            Error::ConfigParse(ref path, line, ref msg) => {
                write!(f, "{}:{}: {}", path.display(), line, msg)
            }
            Error::ConfigTypeMismatch(ref name) => {
                write!(f, "config record '{}' read at the wrong type", name)
            }
            Error::ConfigMissing(ref name) => write!(f, "config record '{}' not found", name),
            Error::FatalConfig(ref msg) => write!(f, "fatal configuration error: {}", msg),
            Error::ConfigIO(ref path, ref err) => {
                write!(f, "could not read config file {}: {}", path.display(), err)
            }
            Error::NetEstablish(ref err) => write!(f, "could not establish connection: {}", err),
            Error::NetRead(ref err) => write!(f, "read failed: {}", err),
            Error::NetWrite(ref err) => write!(f, "write failed: {}", err),
            Error::NetEof => write!(f, "peer closed the connection"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::SysCall(ref err) => write!(f, "system call failed: {}", err),
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "ts_core error"
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::SysCall(err)
    }
}

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

use ts_core;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Core(ts_core::Error),
    Protocol(ts_ctl_protocol::Error),
    Io(io::Error),
    /// A mandatory configuration value was missing or malformed badly
    /// enough that the manager cannot continue; per §7 this is
    /// surfaced to the Watchdog as "unrecoverable."
    FatalConfig(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Core(ref e) => write!(f, "{}", e),
            Error::Protocol(ref e) => write!(f, "{}", e),
            Error::Io(ref e) => write!(f, "{}", e),
            Error::FatalConfig(ref msg) => write!(f, "fatal configuration error: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "manager error"
    }
}

impl From<ts_core::Error> for Error {
    fn from(err: ts_core::Error) -> Error {
        Error::Core(err)
    }
}

impl From<ts_ctl_protocol::Error> for Error {
    fn from(err: ts_ctl_protocol::Error) -> Error {
        Error::Protocol(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

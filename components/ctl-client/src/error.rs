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

use ts_ctl_protocol::ErrCode;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Could not connect to the control socket at all.
    Connect(io::Error),
    /// Framing or decoding of a request/response failed.
    Protocol(::ts_ctl_protocol::Error),
    /// The connection was replied to with a response whose op-type
    /// does not match what this client sent, which should never
    /// happen given the no-pipelining contract, but is checked anyway.
    Mismatch,
    /// The server responded with a non-`Okay` error code.
    Remote(ErrCode),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Connect(ref e) => write!(f, "could not connect to control socket: {}", e),
            Error::Protocol(ref e) => write!(f, "control protocol error: {}", e),
            Error::Mismatch => write!(f, "response did not match the request that was sent"),
            Error::Remote(code) => write!(f, "control server returned error {:?}", code),
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "control client error"
    }
}

impl From<::ts_ctl_protocol::Error> for Error {
    fn from(err: ::ts_ctl_protocol::Error) -> Error {
        Error::Protocol(err)
    }
}

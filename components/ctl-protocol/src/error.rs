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

pub type Result<T> = ::std::result::Result<T, Error>;

/// Errors encountered while framing or decoding a control message.
/// Distinct from `op::ErrCode`, which is the wire-level error code
/// carried *inside* a decoded response.
#[derive(Debug)]
pub enum Error {
    /// Frame declared a length the peer never finished sending.
    NetRead(io::Error),
    NetWrite(io::Error),
    NetEstablish(io::Error),
    NetEof,
    /// A read/write deadline elapsed.
    Timeout,
    /// Could not parse the field vector per the declared schema.
    Params(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::NetRead(ref e) => write!(f, "control socket read failed: {}", e),
            Error::NetWrite(ref e) => write!(f, "control socket write failed: {}", e),
            Error::NetEstablish(ref e) => write!(f, "could not connect to control socket: {}", e),
            Error::NetEof => write!(f, "peer closed mid-message"),
            Error::Timeout => write!(f, "control protocol deadline exceeded"),
            Error::Params(ref msg) => write!(f, "malformed control frame: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "control protocol error"
    }
}

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

//! A hand-rolled length-prefixed, typed-field wire protocol for the
//! local control socket: no protobuf, no IDL compiler, just the
//! primitive field encoders every op's fixed schema is built from.

extern crate log;
extern crate ts_core;

pub mod error;
pub mod frame;
pub mod op;
pub mod schema;
pub mod wire;

pub use error::{Error, Result};
pub use op::{ErrCode, OpType};

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

//! A thin synchronous client over `ts_ctl_protocol`'s wire codec: one
//! request per connected stream, sequential, no pipelining. Used by
//! the Watchdog's control-channel health probe and by any external
//! operator tool that wants to talk to a running manager without
//! going through the `ts_cop` binary.

extern crate libc;
#[macro_use]
extern crate log;
extern crate ts_core;
extern crate ts_ctl_protocol;

pub mod client;
pub mod error;
pub mod probe;

pub use client::Client;
pub use error::{Error, Result};
pub use probe::ControlProbe;

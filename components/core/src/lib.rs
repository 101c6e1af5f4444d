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

//! Shared OS-level primitives used by every long-lived process in the
//! supervision core: lock files, signal latching, the in-memory config
//! store, the loopback health prober, and the bootstrap sequence every
//! binary runs through before it does real work.

extern crate ansi_term;
#[macro_use]
extern crate lazy_static;
extern crate libc;
#[macro_use]
extern crate log;
extern crate regex;

#[cfg(unix)]
extern crate users;

#[cfg(target_os = "linux")]
extern crate caps;

#[macro_use]
pub mod macros;

pub mod bootstrap;
pub mod config;
pub mod env;
pub mod error;
pub mod exitcode;
pub mod fs;
pub mod health;
pub mod lockfile;
pub mod os;

pub use error::{Error, Result};

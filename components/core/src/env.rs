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

//! Environment-variable overrides. Every `ConfigRecord` name maps to
//! an override variable by replacing `.` with `_` and upper-casing;
//! `TS_ROOT` overrides the install prefix; `PROXY_BIND_STDOUT`/
//! `PROXY_BIND_STDERR` are alternate paths to the bind flags.

use std::env;

pub const ROOT_OVERRIDE_VAR: &'static str = "TS_ROOT";
pub const BIND_STDOUT_VAR: &'static str = "PROXY_BIND_STDOUT";
pub const BIND_STDERR_VAR: &'static str = "PROXY_BIND_STDERR";

/// Derive a record's override variable name, e.g.
/// `proxy.config.admin.user_id` -> `PROXY_CONFIG_ADMIN_USER_ID`.
pub fn override_var_name(record_name: &str) -> String {
    record_name.replace('.', "_").to_uppercase()
}

/// Look up a record's override, if any is set in the environment.
pub fn record_override(record_name: &str) -> Option<String> {
    env::var(override_var_name(record_name)).ok()
}

pub fn root_override() -> Option<String> {
    env::var(ROOT_OVERRIDE_VAR).ok()
}

pub fn bind_stdout_override() -> Option<String> {
    env::var(BIND_STDOUT_VAR).ok()
}

pub fn bind_stderr_override() -> Option<String> {
    env::var(BIND_STDERR_VAR).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_var_name_replaces_dots_and_upcases() {
        assert_eq!(
            override_var_name("proxy.config.admin.user_id"),
            "PROXY_CONFIG_ADMIN_USER_ID"
        );
    }

    #[test]
    fn override_var_name_is_noop_on_plain_names() {
        assert_eq!(override_var_name("synthetic_port"), "SYNTHETIC_PORT");
    }
}

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

//! The control-channel variant of §4.4's health probe: a minimum
//! `RECORD_GET` of a known record, compared against its expected
//! value, classified exactly like the HTTP variant. This is what
//! fills in `ts_core::health::ControlChannelProbe`, kept in this crate
//! rather than `ts_core` so that crate does not need to depend on the
//! wire protocol.

use std::path::PathBuf;

use ts_core::health::Outcome;

use client::Client;

pub struct ControlProbe {
    pub socket_path: PathBuf,
    pub record_name: String,
    pub expected_value: String,
}

impl ts_core::health::ControlChannelProbe for ControlProbe {
    fn probe_control(&self, timeout_ms: u64) -> Outcome {
        let mut client = match Client::connect_with_timeout(&self.socket_path, timeout_ms) {
            Ok(c) => c,
            Err(_) => return Outcome::ConnectFailed,
        };
        match client.record_get_string(&self.record_name) {
            Ok(ref v) if *v == self.expected_value => Outcome::Ok,
            Ok(_) => Outcome::MalformedBody,
            Err(_) => Outcome::BadStatus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_core::health::ControlChannelProbe;

    #[test]
    fn connect_failure_classifies_as_connect_failed() {
        let probe = ControlProbe {
            socket_path: PathBuf::from("/nonexistent/ts-ctl-probe-test.sock"),
            record_name: "proxy.config.admin.user_id".to_string(),
            expected_value: "nobody".to_string(),
        };
        assert_eq!(probe.probe_control(200), Outcome::ConnectFailed);
    }
}

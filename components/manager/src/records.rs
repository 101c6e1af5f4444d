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

//! The compiled-in defaults iterator that seeds `ConfigStore` at
//! bootstrap, per §3's `ConfigRecord` lifecycle ("seeded from a
//! compiled-in defaults iterator"). Every record named elsewhere in
//! this crate or in `ts_cop` has its default declared here.

use ts_core::config::{RecordKind, RecordType, Value};

pub fn defaults() -> Vec<(String, RecordKind, RecordType, Value)> {
    vec![
        rec("proxy.config.admin.user_id", RecordType::String, Value::String("nobody".to_string())),
        rec("proxy.config.process_manager.mgmt_port", RecordType::Int, Value::Int(8084)),
        rec("proxy.config.synthetic.port", RecordType::Int, Value::Int(8083)),
        rec("proxy.config.restart.active_client_threshold", RecordType::Int, Value::Int(0)),
        rec("proxy.config.restart.shutdown_timeout", RecordType::Int, Value::Int(60)),
        rec("proxy.config.process_manager.control_socket_mode", RecordType::String, Value::String("restricted".to_string())),
        rec("proxy.node.proxy_running", RecordType::Int, Value::Int(0)),
        rec("proxy.node.config.reconfigure_required", RecordType::Int, Value::Int(0)),
        rec("proxy.node.config.draining", RecordType::Int, Value::Int(0)),
        rec("proxy.config.cop.core_signal", RecordType::String, Value::String("SEGV".to_string())),
        rec("proxy.config.cop.linux.only_on_memory_limit", RecordType::Int, Value::Int(1)),
        rec("proxy.config.cop.server.stop_script", RecordType::String, Value::String("".to_string())),
        rec("proxy.config.restart.stop_threshold", RecordType::Int, Value::Int(2)),
    ]
}

fn rec(name: &str, ty: RecordType, value: Value) -> (String, RecordKind, RecordType, Value) {
    (name.to_string(), RecordKind::Config, ty, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_has_a_matching_type_and_value() {
        for (name, _, ty, value) in defaults() {
            match (ty, &value) {
                (RecordType::Int, &Value::Int(_)) => {}
                (RecordType::String, &Value::String(_)) => {}
                _ => panic!("default for '{}' has mismatched type/value", name),
            }
        }
    }
}

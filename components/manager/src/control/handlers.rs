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

//! Per-op handler bodies invoked by `ControlServer`'s dispatch loop,
//! per §4.7 step 5. Each handler parses the remaining request fields
//! from `r` and calls through to `Context`.

use ts_core::config::{RecordKind, RecordType, Value};
use ts_ctl_protocol::op::{ErrCode, OpType};
use ts_ctl_protocol::schema::{Request, Response};
use ts_ctl_protocol::wire::Reader;
use ts_ctl_protocol::Result as ProtocolResult;

use context::Context;
use event_bus::{AlarmId, ClientId};
use shutdown::Pending;

/// Decode the request body for `op` and run its handler, producing
/// the response to write back (`None` for ops with no response
/// frame). Unknown fields or a short buffer surface as `Params`
/// through the `?` in `Request::decode`.
pub fn dispatch(ctx: &Context, client: ClientId, op: OpType, r: &mut Reader) -> ProtocolResult<Option<Response>> {
    let req = Request::decode(op, r)?;
    Ok(handle(ctx, client, req))
}

fn handle(ctx: &Context, client: ClientId, req: Request) -> Option<Response> {
    match req {
        Request::RecordSet { name, value } => Some(record_set(ctx, &name, &value)),
        Request::RecordGet { name } => Some(record_get(ctx, &name)),
        Request::RecordMatchGet { pattern } => {
            // `ControlServer` intercepts this op before it ever reaches
            // `dispatch` so it can stream every match; this arm only
            // exists so `Request`'s match stays exhaustive and is hit
            // for callers that bypass that interception (e.g. tests).
            record_match_get_all(ctx, &pattern).into_iter().next().or_else(|| Some(Response::error_only(OpType::RecordMatchGet, ErrCode::Fail)))
        }
        Request::RecordDescribeConfig { name, .. } => Some(record_describe_config(ctx, &name)),
        Request::ProxyStateGet => Some(proxy_state_get(ctx)),
        Request::ProxyStateSet { state, .. } => Some(proxy_state_set(ctx, state)),
        Request::Reconfigure => Some(reconfigure(ctx)),
        Request::Restart { .. } => Some(request_shutdown(ctx, Pending::IdleRestart)),
        Request::Bounce { .. } => Some(request_shutdown(ctx, Pending::IdleBounce)),
        Request::Stop { .. } => Some(request_shutdown(ctx, Pending::IdleStop)),
        Request::Drain { .. } => Some(request_shutdown(ctx, Pending::Drain)),
        Request::EventResolve { name } => Some(event_resolve(ctx, &name)),
        Request::EventGetMlt => Some(Response::EventGetMlt { err: ErrCode::Okay, list: ctx.events.active_list() }),
        Request::EventActive { name } => Some(event_active(ctx, &name)),
        Request::EventRegCallback { name } => {
            ctx.events.register(client, alarm_by_name(&name));
            None
        }
        Request::EventUnregCallback { name } => {
            ctx.events.unregister(client, alarm_by_name(&name));
            None
        }
        Request::StatsResetNode { .. } => Some(Response::Err(ErrCode::Okay)),
        Request::StorageDeviceCmdOffline { .. } => Some(Response::Err(ErrCode::Okay)),
        Request::ApiPing { .. } => None,
        Request::HostStatusUp { .. } | Request::HostStatusDown { .. } => Some(Response::Err(ErrCode::Okay)),
        Request::LifecycleMessage { .. } => Some(Response::Err(ErrCode::Okay)),
        Request::ServerBacktrace { .. } => Some(Response::ServerBacktrace { err: ErrCode::Fail, trace: String::new() }),
    }
}

fn alarm_by_name(name: &str) -> Option<AlarmId> {
    if name.is_empty() {
        return None;
    }
    [
        AlarmId::ProxyConfigError,
        AlarmId::ProxyProcessDied,
        AlarmId::ProxyProcessBorn,
        AlarmId::ConfigUpdateFailed,
        AlarmId::ConfigReloaded,
        AlarmId::ProxyRestarting,
        AlarmId::ProxyCoreSignalled,
        AlarmId::LowMemory,
    ]
    .iter()
    .find(|id| id.name() == name)
    .cloned()
}

fn record_set(ctx: &Context, name: &str, value: &str) -> Response {
    let existing_ty = record_snapshot(ctx, name).map(|(_, ty, _)| ty);
    let result = match existing_ty {
        Some(RecordType::Int) | Some(RecordType::Counter) => value
            .parse::<i64>()
            .map_err(|_| ())
            .and_then(|n| ctx.config.set_int(name, n).map_err(|_| ())),
        Some(RecordType::Float) => value
            .parse::<f64>()
            .map_err(|_| ())
            .and_then(|f| ctx.config.set(name, RecordType::Float, Value::Float(f)).map_err(|_| ())),
        _ => ctx.config.set_string(name, value).map_err(|_| ()),
    };
    match result {
        Ok(()) => Response::RecordSet { err: ErrCode::Okay, action_needed: 0 },
        Err(()) => Response::RecordSet { err: ErrCode::Fail, action_needed: 0 },
    }
}

fn record_get(ctx: &Context, name: &str) -> Response {
    match record_snapshot(ctx, name) {
        Some((kind, ty, bytes)) => Response::RecordGet {
            err: ErrCode::Okay,
            class: kind_to_i32(kind),
            ty: type_to_i32(ty),
            name: name.to_string(),
            value: bytes,
        },
        None => Response::error_only(OpType::RecordGet, ErrCode::Fail),
    }
}

/// §4.6: `RECORD_MATCH_GET` streams one `RECORD_GET`-shaped frame per
/// match, in match order, with no trailing sentinel of its own --
/// `ControlServer` appends the null-name terminator after writing
/// every element this returns, per §4.7's "streams multiple response
/// records ... and finish with a sentinel".
pub fn record_match_get_all(ctx: &Context, pattern: &str) -> Vec<Response> {
    match ctx.config.matching(pattern) {
        Ok(records) => records
            .iter()
            .map(|rec| Response::RecordGet {
                err: ErrCode::Okay,
                class: kind_to_i32(rec.kind),
                ty: type_to_i32(rec.ty),
                name: rec.name.clone(),
                value: value_to_bytes(&rec.value),
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn record_describe_config(ctx: &Context, name: &str) -> Response {
    match record_snapshot(ctx, name) {
        Some((kind, ty, bytes)) => {
            let value = String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string();
            Response::RecordDescribeConfig {
                err: ErrCode::Okay,
                ints: vec![type_to_i32(ty), kind_to_i32(kind), 0, 0, 0, 0, 0, 0, 0, 0],
                check_expr: String::new(),
                value: value.clone(),
                default: value,
            }
        }
        None => Response::error_only(OpType::RecordDescribeConfig, ErrCode::Fail),
    }
}

fn record_snapshot(ctx: &Context, name: &str) -> Option<(RecordKind, RecordType, Vec<u8>)> {
    match ctx.config.matching(&format!("^{}$", regex_escape(name))) {
        Ok(ref records) if !records.is_empty() => {
            let rec = &records[0];
            Some((rec.kind, rec.ty, value_to_bytes(&rec.value)))
        }
        _ => None,
    }
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if ".^$|()[]{}*+?\\".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn value_to_bytes(value: &Value) -> Vec<u8> {
    match *value {
        Value::Int(n) | Value::Counter(n) => {
            let mut s = n.to_string().into_bytes();
            s.push(0);
            s
        }
        Value::Float(f) => {
            let mut s = f.to_string().into_bytes();
            s.push(0);
            s
        }
        Value::String(ref s) => {
            let mut b = s.clone().into_bytes();
            b.push(0);
            b
        }
        Value::Null => Vec::new(),
    }
}

fn kind_to_i32(kind: RecordKind) -> i32 {
    match kind {
        RecordKind::Config => 0,
        RecordKind::Local => 1,
        RecordKind::Process => 2,
        RecordKind::Node => 3,
        RecordKind::Cluster => 4,
    }
}

fn type_to_i32(ty: RecordType) -> i32 {
    match ty {
        RecordType::Int => 0,
        RecordType::Counter => 1,
        RecordType::Float => 2,
        RecordType::String => 3,
        RecordType::Null => 4,
    }
}

fn proxy_state_get(ctx: &Context) -> Response {
    match ctx.config.get_int("proxy.node.proxy_running", true) {
        Ok(state) => Response::ProxyStateGet { err: ErrCode::Okay, state: state as i32 },
        Err(_) => Response::error_only(OpType::ProxyStateGet, ErrCode::Fail),
    }
}

fn proxy_state_set(ctx: &Context, state: i32) -> Response {
    ctx.supervisor.lock().expect("supervisor poisoned").set_run_proxy(state != 0);
    match ctx.config.set_int("proxy.node.proxy_running", state as i64) {
        Ok(()) => Response::Err(ErrCode::Okay),
        Err(_) => Response::Err(ErrCode::Fail),
    }
}

fn reconfigure(ctx: &Context) -> Response {
    let _ = ctx.config.set_int("proxy.node.config.reconfigure_required", 1);
    ctx.events.post(AlarmId::ConfigReloaded, "reconfigure requested via control channel");
    Response::Err(ErrCode::Okay)
}

fn request_shutdown(ctx: &Context, pending: Pending) -> Response {
    ctx.shutdown.lock().expect("shutdown state poisoned").request(pending);
    Response::Err(ErrCode::Okay)
}

fn event_resolve(ctx: &Context, name: &str) -> Response {
    match alarm_by_name(name) {
        Some(id) => {
            ctx.events.resolve(id);
            Response::Err(ErrCode::Okay)
        }
        None => Response::Err(ErrCode::Fail),
    }
}

fn event_active(ctx: &Context, name: &str) -> Response {
    match alarm_by_name(name) {
        Some(id) => Response::EventActive { err: ErrCode::Okay, active: ctx.events.is_active(id) },
        None => Response::error_only(OpType::EventActive, ErrCode::Fail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ts_core::config::ConfigStore;
    use ts_core::fs::Layout;

    use records;
    use supervisor::ChildSupervisor;

    fn test_context() -> Context {
        let config = ConfigStore::new();
        config.load_defaults(records::defaults());
        let layout = Layout::resolve(None);
        let sup = ChildSupervisor::new("/bin/true".to_string(), vec![], None, None);
        Context::new(config, layout, sup, Duration::from_secs(60))
    }

    #[test]
    fn record_get_returns_the_seeded_default() {
        let ctx = test_context();
        match record_get(&ctx, "proxy.config.admin.user_id") {
            Response::RecordGet { err: ErrCode::Okay, value, .. } => {
                assert_eq!(value, b"nobody\0".to_vec());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn record_get_on_unknown_name_fails() {
        let ctx = test_context();
        match record_get(&ctx, "proxy.config.nonexistent") {
            Response::RecordGet { err, .. } => assert_eq!(err, ErrCode::Fail),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn record_set_then_get_observes_the_new_value() {
        let ctx = test_context();
        record_set(&ctx, "proxy.config.admin.user_id", "ts_runtime");
        match record_get(&ctx, "proxy.config.admin.user_id") {
            Response::RecordGet { value, .. } => assert_eq!(value, b"ts_runtime\0".to_vec()),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn reconfigure_posts_a_config_reloaded_alarm() {
        let ctx = test_context();
        ctx.events.register(1, None);
        reconfigure(&ctx);
        let delivered = ctx.events.drain_for_delivery();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0.id, AlarmId::ConfigReloaded);
    }

    #[test]
    fn drain_request_sets_pending_shutdown_state() {
        let ctx = test_context();
        request_shutdown(&ctx, Pending::Drain);
        assert_eq!(ctx.shutdown.lock().unwrap().pending(), Pending::Drain);
    }

    #[test]
    fn event_reg_callback_has_no_response() {
        let ctx = test_context();
        let resp = handle(&ctx, 7, Request::EventRegCallback { name: String::new() });
        assert!(resp.is_none());
        assert_eq!(ctx.events.subscriber_count(), 1);
    }

    #[test]
    fn event_active_reflects_real_alarm_state() {
        let ctx = test_context();
        let name = AlarmId::ProxyProcessDied.name().to_string();
        match event_active(&ctx, &name) {
            Response::EventActive { err: ErrCode::Okay, active } => assert!(!active),
            other => panic!("unexpected response: {:?}", other),
        }

        ctx.events.post(AlarmId::ProxyProcessDied, "server exited");
        match event_active(&ctx, &name) {
            Response::EventActive { err: ErrCode::Okay, active } => assert!(active),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn event_resolve_clears_the_active_alarm() {
        let ctx = test_context();
        let name = AlarmId::ConfigUpdateFailed.name().to_string();
        ctx.events.post(AlarmId::ConfigUpdateFailed, "bad record");
        assert!(ctx.events.is_active(AlarmId::ConfigUpdateFailed));

        match event_resolve(&ctx, &name) {
            Response::Err(ErrCode::Okay) => {}
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(!ctx.events.is_active(AlarmId::ConfigUpdateFailed));
    }

    #[test]
    fn event_get_mlt_lists_active_alarms() {
        let ctx = test_context();
        ctx.events.post(AlarmId::LowMemory, "swap low");
        match handle(&ctx, 1, Request::EventGetMlt) {
            Some(Response::EventGetMlt { err: ErrCode::Okay, list }) => {
                assert_eq!(list, AlarmId::LowMemory.name());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}

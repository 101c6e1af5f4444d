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

//! Fixed per-op request/response field schemas from the §4.6 table.
//! Every request begins with its `OpType`; the recipient peeks at
//! that field to pick the right variant before decoding the rest.
//! Error-only responses substitute zero-valued placeholders for every
//! other field in the schema, per §4.6's encoding rules.

use error::{Error, Result};
use op::{ErrCode, OpType};
use wire::{put_bytes, put_i32, put_i64, put_string, Reader};

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    RecordSet { name: String, value: String },
    RecordGet { name: String },
    RecordMatchGet { pattern: String },
    RecordDescribeConfig { name: String, flags: i32 },
    ProxyStateGet,
    ProxyStateSet { state: i32, cache_clear: i32 },
    Reconfigure,
    Restart { options: i32 },
    Bounce { options: i32 },
    Stop { options: i32 },
    Drain { options: i32 },
    EventResolve { name: String },
    EventGetMlt,
    EventActive { name: String },
    EventRegCallback { name: String },
    EventUnregCallback { name: String },
    StatsResetNode { node: String },
    StorageDeviceCmdOffline { device: String },
    ApiPing { stamp: i32 },
    HostStatusUp { host: String, reason: String, down_time: i32 },
    HostStatusDown { host: String, reason: String, down_time: i32 },
    LifecycleMessage { tag: String, data: Vec<u8> },
    ServerBacktrace { options: i32 },
}

impl Request {
    pub fn op_type(&self) -> OpType {
        match *self {
            Request::RecordSet { .. } => OpType::RecordSet,
            Request::RecordGet { .. } => OpType::RecordGet,
            Request::RecordMatchGet { .. } => OpType::RecordMatchGet,
            Request::RecordDescribeConfig { .. } => OpType::RecordDescribeConfig,
            Request::ProxyStateGet => OpType::ProxyStateGet,
            Request::ProxyStateSet { .. } => OpType::ProxyStateSet,
            Request::Reconfigure => OpType::Reconfigure,
            Request::Restart { .. } => OpType::Restart,
            Request::Bounce { .. } => OpType::Bounce,
            Request::Stop { .. } => OpType::Stop,
            Request::Drain { .. } => OpType::Drain,
            Request::EventResolve { .. } => OpType::EventResolve,
            Request::EventGetMlt => OpType::EventGetMlt,
            Request::EventActive { .. } => OpType::EventActive,
            Request::EventRegCallback { .. } => OpType::EventRegCallback,
            Request::EventUnregCallback { .. } => OpType::EventUnregCallback,
            Request::StatsResetNode { .. } => OpType::StatsResetNode,
            Request::StorageDeviceCmdOffline { .. } => OpType::StorageDeviceCmdOffline,
            Request::ApiPing { .. } => OpType::ApiPing,
            Request::HostStatusUp { .. } => OpType::HostStatusUp,
            Request::HostStatusDown { .. } => OpType::HostStatusDown,
            Request::LifecycleMessage { .. } => OpType::LifecycleMessage,
            Request::ServerBacktrace { .. } => OpType::ServerBacktrace,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_i32(&mut buf, self.op_type() as i32);
        match *self {
            Request::RecordSet { ref name, ref value } => {
                put_string(&mut buf, name);
                put_string(&mut buf, value);
            }
            Request::RecordGet { ref name } => put_string(&mut buf, name),
            Request::RecordMatchGet { ref pattern } => put_string(&mut buf, pattern),
            Request::RecordDescribeConfig { ref name, flags } => {
                put_string(&mut buf, name);
                put_i32(&mut buf, flags);
            }
            Request::ProxyStateGet => {}
            Request::ProxyStateSet { state, cache_clear } => {
                put_i32(&mut buf, state);
                put_i32(&mut buf, cache_clear);
            }
            Request::Reconfigure => {}
            Request::Restart { options }
            | Request::Bounce { options }
            | Request::Stop { options }
            | Request::Drain { options }
            | Request::ServerBacktrace { options } => put_i32(&mut buf, options),
            Request::EventResolve { ref name }
            | Request::EventActive { ref name }
            | Request::EventRegCallback { ref name }
            | Request::EventUnregCallback { ref name } => put_string(&mut buf, name),
            Request::EventGetMlt => {}
            Request::StatsResetNode { ref node } => put_string(&mut buf, node),
            Request::StorageDeviceCmdOffline { ref device } => put_string(&mut buf, device),
            Request::ApiPing { stamp } => put_i32(&mut buf, stamp),
            Request::HostStatusUp { ref host, ref reason, down_time }
            | Request::HostStatusDown { ref host, ref reason, down_time } => {
                put_string(&mut buf, host);
                put_string(&mut buf, reason);
                put_i32(&mut buf, down_time);
            }
            Request::LifecycleMessage { ref tag, ref data } => {
                put_string(&mut buf, tag);
                put_bytes(&mut buf, data);
            }
        }
        buf
    }

    /// Decode a request payload. The caller has already peeked the
    /// leading `OpType` `Int32` to select `op`; the remaining fields
    /// are read from `r` per that op's schema.
    pub fn decode(op: OpType, r: &mut Reader) -> Result<Request> {
        Ok(match op {
            OpType::RecordSet => Request::RecordSet { name: r.get_string()?, value: r.get_string()? },
            OpType::RecordGet => Request::RecordGet { name: r.get_string()? },
            OpType::RecordMatchGet => Request::RecordMatchGet { pattern: r.get_string()? },
            OpType::RecordDescribeConfig => Request::RecordDescribeConfig { name: r.get_string()?, flags: r.get_i32()? },
            OpType::ProxyStateGet => Request::ProxyStateGet,
            OpType::ProxyStateSet => Request::ProxyStateSet { state: r.get_i32()?, cache_clear: r.get_i32()? },
            OpType::Reconfigure => Request::Reconfigure,
            OpType::Restart => Request::Restart { options: r.get_i32()? },
            OpType::Bounce => Request::Bounce { options: r.get_i32()? },
            OpType::Stop => Request::Stop { options: r.get_i32()? },
            OpType::Drain => Request::Drain { options: r.get_i32()? },
            OpType::EventResolve => Request::EventResolve { name: r.get_string()? },
            OpType::EventGetMlt => Request::EventGetMlt,
            OpType::EventActive => Request::EventActive { name: r.get_string()? },
            OpType::EventRegCallback => Request::EventRegCallback { name: r.get_string()? },
            OpType::EventUnregCallback => Request::EventUnregCallback { name: r.get_string()? },
            OpType::EventNotify => return Err(Error::Params("EVENT_NOTIFY is server-to-client only".to_string())),
            OpType::StatsResetNode => Request::StatsResetNode { node: r.get_string()? },
            OpType::StorageDeviceCmdOffline => Request::StorageDeviceCmdOffline { device: r.get_string()? },
            OpType::ApiPing => Request::ApiPing { stamp: r.get_i32()? },
            OpType::HostStatusUp => Request::HostStatusUp { host: r.get_string()?, reason: r.get_string()?, down_time: r.get_i32()? },
            OpType::HostStatusDown => Request::HostStatusDown { host: r.get_string()?, reason: r.get_string()?, down_time: r.get_i32()? },
            OpType::LifecycleMessage => Request::LifecycleMessage { tag: r.get_string()?, data: r.get_bytes()? },
            OpType::ServerBacktrace => Request::ServerBacktrace { options: r.get_i32()? },
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Err(ErrCode),
    RecordSet { err: ErrCode, action_needed: i32 },
    RecordGet { err: ErrCode, class: i32, ty: i32, name: String, value: Vec<u8> },
    /// `ints` carries, in order: type, class, version, rsb-id, order,
    /// access, update, update-type, check-type, source.
    RecordDescribeConfig { err: ErrCode, ints: Vec<i32>, check_expr: String, value: String, default: String },
    ProxyStateGet { err: ErrCode, state: i32 },
    EventGetMlt { err: ErrCode, list: String },
    EventActive { err: ErrCode, active: bool },
    ServerBacktrace { err: ErrCode, trace: String },
}

impl Response {
    pub fn err(&self) -> ErrCode {
        match *self {
            Response::Err(e) => e,
            Response::RecordSet { err, .. }
            | Response::RecordGet { err, .. }
            | Response::RecordDescribeConfig { err, .. }
            | Response::ProxyStateGet { err, .. }
            | Response::EventGetMlt { err, .. }
            | Response::EventActive { err, .. }
            | Response::ServerBacktrace { err, .. } => err,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_i32(&mut buf, self.err() as i32);
        match *self {
            Response::Err(_) => {}
            Response::RecordSet { action_needed, .. } => put_i32(&mut buf, action_needed),
            Response::RecordGet { class, ty, ref name, ref value, .. } => {
                put_i32(&mut buf, class);
                put_i32(&mut buf, ty);
                put_string(&mut buf, name);
                put_bytes(&mut buf, value);
            }
            Response::RecordDescribeConfig { ref ints, ref check_expr, ref value, ref default, .. } => {
                for f in ints {
                    put_i32(&mut buf, *f);
                }
                put_string(&mut buf, check_expr);
                put_string(&mut buf, value);
                put_string(&mut buf, default);
            }
            Response::ProxyStateGet { state, .. } => put_i32(&mut buf, state),
            Response::EventGetMlt { ref list, .. } => put_string(&mut buf, list),
            Response::EventActive { active, .. } => put_i32(&mut buf, if active { 1 } else { 0 }),
            Response::ServerBacktrace { ref trace, .. } => put_string(&mut buf, trace),
        }
        buf
    }

    /// Build the error-only response for `op`: the error code
    /// followed by zero-valued placeholders for the rest of that op's
    /// response schema, per §4.6/§7.
    pub fn error_only(op: OpType, err: ErrCode) -> Response {
        match op {
            OpType::RecordSet => Response::RecordSet { err, action_needed: 0 },
            OpType::RecordGet | OpType::RecordMatchGet => Response::RecordGet {
                err,
                class: 0,
                ty: 0,
                name: String::new(),
                value: Vec::new(),
            },
            OpType::RecordDescribeConfig => Response::RecordDescribeConfig {
                err,
                ints: vec![0; 10],
                check_expr: String::new(),
                value: String::new(),
                default: String::new(),
            },
            OpType::ProxyStateGet => Response::ProxyStateGet { err, state: 0 },
            OpType::EventGetMlt => Response::EventGetMlt { err, list: String::new() },
            OpType::EventActive => Response::EventActive { err, active: false },
            OpType::ServerBacktrace => Response::ServerBacktrace { err, trace: String::new() },
            _ => Response::Err(err),
        }
    }

    /// Decode a response payload for `op`. The caller has already read
    /// the leading `Int32` error code (`err`); the remaining fields
    /// are read from `r` per that op's response schema. Ops with no
    /// response schema beyond the error code (`RECONFIGURE`,
    /// `RESTART`, ...) decode to `Response::Err`.
    pub fn decode(op: OpType, err: ErrCode, r: &mut Reader) -> Result<Response> {
        Ok(match op {
            OpType::RecordSet => Response::RecordSet { err, action_needed: r.get_i32()? },
            OpType::RecordGet | OpType::RecordMatchGet => Response::RecordGet {
                err,
                class: r.get_i32()?,
                ty: r.get_i32()?,
                name: r.get_string()?,
                value: r.get_bytes()?,
            },
            OpType::RecordDescribeConfig => {
                let mut ints = Vec::with_capacity(10);
                for _ in 0..10 {
                    ints.push(r.get_i32()?);
                }
                Response::RecordDescribeConfig {
                    err,
                    ints,
                    check_expr: r.get_string()?,
                    value: r.get_string()?,
                    default: r.get_string()?,
                }
            }
            OpType::ProxyStateGet => Response::ProxyStateGet { err, state: r.get_i32()? },
            OpType::EventGetMlt => Response::EventGetMlt { err, list: r.get_string()? },
            OpType::EventActive => Response::EventActive { err, active: r.get_i32()? != 0 },
            OpType::ServerBacktrace => Response::ServerBacktrace { err, trace: r.get_string()? },
            _ => Response::Err(err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_get_request_round_trips() {
        let req = Request::RecordGet { name: "proxy.config.admin.user_id".to_string() };
        let encoded = req.encode();
        let mut r = Reader::new(&encoded[4..]); // skip the leading OpType peek
        let op = OpType::from_i32(i32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]])).unwrap();
        assert_eq!(op, OpType::RecordGet);
        assert_eq!(Request::decode(op, &mut r).unwrap(), req);
    }

    #[test]
    fn error_only_record_get_has_zeroed_fields() {
        let resp = Response::error_only(OpType::RecordGet, ErrCode::Fail);
        match resp {
            Response::RecordGet { err, class, ty, name, value } => {
                assert_eq!(err, ErrCode::Fail);
                assert_eq!(class, 0);
                assert_eq!(ty, 0);
                assert!(name.is_empty());
                assert!(value.is_empty());
            }
            _ => panic!("wrong response variant"),
        }
    }

    #[test]
    fn restart_request_round_trips_options_field() {
        let req = Request::Restart { options: 1 };
        let encoded = req.encode();
        let op = OpType::from_i32(i32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]])).unwrap();
        let mut r = Reader::new(&encoded[4..]);
        assert_eq!(Request::decode(op, &mut r).unwrap(), req);
    }

    #[test]
    fn record_get_response_round_trips() {
        let resp = Response::RecordGet {
            err: ErrCode::Okay,
            class: 1,
            ty: 3,
            name: "proxy.config.admin.user_id".to_string(),
            value: b"nobody\0".to_vec(),
        };
        let encoded = resp.encode();
        let mut r = Reader::new(&encoded[4..]);
        let decoded = Response::decode(OpType::RecordGet, ErrCode::Okay, &mut r).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn proxy_state_get_response_round_trips() {
        let resp = Response::ProxyStateGet { err: ErrCode::Okay, state: 1 };
        let encoded = resp.encode();
        let mut r = Reader::new(&encoded[4..]);
        assert_eq!(Response::decode(OpType::ProxyStateGet, ErrCode::Okay, &mut r).unwrap(), resp);
    }
}

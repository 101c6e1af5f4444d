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

//! The stable `OpType` and error-code enumerations from §4.6/§6/§7.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpType {
    RecordSet = 1,
    RecordGet = 2,
    RecordMatchGet = 3,
    RecordDescribeConfig = 4,
    ProxyStateGet = 5,
    ProxyStateSet = 6,
    Reconfigure = 7,
    Restart = 8,
    Bounce = 9,
    Stop = 10,
    Drain = 11,
    EventResolve = 12,
    EventGetMlt = 13,
    EventActive = 14,
    EventRegCallback = 15,
    EventUnregCallback = 16,
    EventNotify = 17,
    StatsResetNode = 18,
    StorageDeviceCmdOffline = 19,
    ApiPing = 20,
    HostStatusUp = 21,
    HostStatusDown = 22,
    LifecycleMessage = 23,
    ServerBacktrace = 24,
}

impl OpType {
    pub fn from_i32(v: i32) -> Option<OpType> {
        match v {
            1 => Some(OpType::RecordSet),
            2 => Some(OpType::RecordGet),
            3 => Some(OpType::RecordMatchGet),
            4 => Some(OpType::RecordDescribeConfig),
            5 => Some(OpType::ProxyStateGet),
            6 => Some(OpType::ProxyStateSet),
            7 => Some(OpType::Reconfigure),
            8 => Some(OpType::Restart),
            9 => Some(OpType::Bounce),
            10 => Some(OpType::Stop),
            11 => Some(OpType::Drain),
            12 => Some(OpType::EventResolve),
            13 => Some(OpType::EventGetMlt),
            14 => Some(OpType::EventActive),
            15 => Some(OpType::EventRegCallback),
            16 => Some(OpType::EventUnregCallback),
            17 => Some(OpType::EventNotify),
            18 => Some(OpType::StatsResetNode),
            19 => Some(OpType::StorageDeviceCmdOffline),
            20 => Some(OpType::ApiPing),
            21 => Some(OpType::HostStatusUp),
            22 => Some(OpType::HostStatusDown),
            23 => Some(OpType::LifecycleMessage),
            24 => Some(OpType::ServerBacktrace),
            _ => None,
        }
    }

    /// Ops that require the peer's effective uid to match the
    /// server's, or be root, per §4.7 step 4.
    pub fn is_privileged(&self) -> bool {
        match *self {
            OpType::RecordSet
            | OpType::ProxyStateSet
            | OpType::Reconfigure
            | OpType::Restart
            | OpType::Bounce
            | OpType::Stop
            | OpType::Drain
            | OpType::EventResolve
            | OpType::HostStatusUp
            | OpType::HostStatusDown
            | OpType::StorageDeviceCmdOffline
            | OpType::StatsResetNode
            | OpType::LifecycleMessage => true,
            _ => false,
        }
    }

    /// Ops that send no response frame at all (`EVENT_REG_CALLBACK`,
    /// `EVENT_UNREG_CALLBACK`, `EVENT_NOTIFY`, `API_PING`).
    pub fn has_response(&self) -> bool {
        !matches!(
            *self,
            OpType::EventRegCallback | OpType::EventUnregCallback | OpType::EventNotify | OpType::ApiPing
        )
    }
}

/// The §7 error taxonomy, carried as the first `Int32` of every
/// response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrCode {
    Okay = 0,
    Params = 1,
    PermissionDenied = 2,
    NetRead = 3,
    NetWrite = 4,
    NetEstablish = 5,
    NetEof = 6,
    Fail = 7,
    SysCall = 8,
    FatalConfig = 9,
    Timeout = 10,
}

impl ErrCode {
    pub fn from_i32(v: i32) -> ErrCode {
        match v {
            0 => ErrCode::Okay,
            1 => ErrCode::Params,
            2 => ErrCode::PermissionDenied,
            3 => ErrCode::NetRead,
            4 => ErrCode::NetWrite,
            5 => ErrCode::NetEstablish,
            6 => ErrCode::NetEof,
            7 => ErrCode::Fail,
            8 => ErrCode::SysCall,
            9 => ErrCode::FatalConfig,
            _ => ErrCode::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optype_round_trips_through_i32() {
        for code in 1..=24 {
            let op = OpType::from_i32(code).expect("known op code");
            assert_eq!(op as i32, code);
        }
    }

    #[test]
    fn unknown_optype_is_none() {
        assert!(OpType::from_i32(999).is_none());
    }

    #[test]
    fn privileged_ops_match_spec_table() {
        assert!(OpType::RecordSet.is_privileged());
        assert!(OpType::Stop.is_privileged());
        assert!(!OpType::RecordGet.is_privileged());
        assert!(!OpType::ApiPing.is_privileged());
    }
}

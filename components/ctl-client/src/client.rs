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

//! A connection to a manager's control socket: one request, one
//! response, per connected stream. A new `Client` is cheap to create
//! and is meant to be opened, used once or a few times, then dropped --
//! exactly how the Watchdog's control-channel probe and `ts-ctl`-style
//! operator tools use it.

use std::os::unix::net::UnixStream;
use std::path::Path;

use ts_ctl_protocol::frame::{self, DEFAULT_TIMEOUT_MS};
use ts_ctl_protocol::op::{ErrCode, OpType};
use ts_ctl_protocol::schema::{Request, Response};
use ts_ctl_protocol::wire::Reader;

use error::{Error, Result};

pub struct Client {
    stream: UnixStream,
    timeout_ms: u64,
}

impl Client {
    pub fn connect<P: AsRef<Path>>(socket_path: P) -> Result<Client> {
        Client::connect_with_timeout(socket_path, DEFAULT_TIMEOUT_MS)
    }

    pub fn connect_with_timeout<P: AsRef<Path>>(socket_path: P, timeout_ms: u64) -> Result<Client> {
        let stream = UnixStream::connect(socket_path.as_ref()).map_err(Error::Connect)?;
        Ok(Client { stream, timeout_ms })
    }

    /// Send one request, wait for its response. Ops with no response
    /// frame (`API_PING`, `EVENT_REG_CALLBACK`, `EVENT_UNREG_CALLBACK`)
    /// should use `send_no_reply` instead.
    pub fn call(&mut self, req: Request) -> Result<Response> {
        let op = req.op_type();
        self.send_raw(&req)?;
        self.read_response(op)
    }

    /// Send a request that the server never answers on the wire.
    pub fn send_no_reply(&mut self, req: Request) -> Result<()> {
        self.send_raw(&req)
    }

    fn send_raw(&mut self, req: &Request) -> Result<()> {
        let payload = req.encode();
        frame::write_frame(&mut self.stream, &payload, self.timeout_ms).map_err(Error::from)
    }

    fn read_response(&mut self, op: OpType) -> Result<Response> {
        let payload = frame::read_frame(&mut self.stream, self.timeout_ms).map_err(Error::from)?;
        let mut r = Reader::new(&payload);
        let err = ErrCode::from_i32(r.get_i32().map_err(Error::from)?);
        Response::decode(op, err, &mut r).map_err(Error::from)
    }

    /// `RECORD_GET`, returning the raw `err` for callers that want to
    /// distinguish `Fail` (unknown record) from other error classes.
    pub fn record_get(&mut self, name: &str) -> Result<Response> {
        self.call(Request::RecordGet { name: name.to_string() })
    }

    /// `RECORD_GET` of `name`, asserting success and returning just
    /// the string interpretation of the value, used by the health
    /// probe's control-channel variant.
    pub fn record_get_string(&mut self, name: &str) -> Result<String> {
        match self.record_get(name)? {
            Response::RecordGet { err: ErrCode::Okay, value, .. } => {
                let mut s = String::from_utf8_lossy(&value).into_owned();
                if s.ends_with('\0') {
                    s.pop();
                }
                Ok(s)
            }
            Response::RecordGet { err, .. } => Err(Error::Remote(err)),
            _ => Err(Error::Mismatch),
        }
    }

    pub fn proxy_state_get(&mut self) -> Result<i32> {
        match self.call(Request::ProxyStateGet)? {
            Response::ProxyStateGet { err: ErrCode::Okay, state } => Ok(state),
            Response::ProxyStateGet { err, .. } => Err(Error::Remote(err)),
            _ => Err(Error::Mismatch),
        }
    }

    pub fn proxy_state_set(&mut self, state: i32, cache_clear: i32) -> Result<()> {
        self.expect_ok(Request::ProxyStateSet { state, cache_clear })
    }

    pub fn reconfigure(&mut self) -> Result<()> {
        self.expect_ok(Request::Reconfigure)
    }

    pub fn restart(&mut self, options: i32) -> Result<()> {
        self.expect_ok(Request::Restart { options })
    }

    pub fn bounce(&mut self, options: i32) -> Result<()> {
        self.expect_ok(Request::Bounce { options })
    }

    pub fn stop(&mut self, options: i32) -> Result<()> {
        self.expect_ok(Request::Stop { options })
    }

    pub fn drain(&mut self, options: i32) -> Result<()> {
        self.expect_ok(Request::Drain { options })
    }

    pub fn event_resolve(&mut self, name: &str) -> Result<()> {
        self.expect_ok(Request::EventResolve { name: name.to_string() })
    }

    pub fn event_active(&mut self, name: &str) -> Result<bool> {
        match self.call(Request::EventActive { name: name.to_string() })? {
            Response::EventActive { err: ErrCode::Okay, active } => Ok(active),
            Response::EventActive { err, .. } => Err(Error::Remote(err)),
            _ => Err(Error::Mismatch),
        }
    }

    fn expect_ok(&mut self, req: Request) -> Result<()> {
        match self.call(req)?.err() {
            ErrCode::Okay => Ok(()),
            other => Err(Error::Remote(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    extern crate tempdir;

    /// Accept exactly one connection, read one frame, decode it as a
    /// `RECORD_GET` and reply with a fixed value -- enough to exercise
    /// a real round trip through `Client::record_get_string` without
    /// standing up the whole manager.
    fn spawn_fake_server(path: &Path) {
        let listener = UnixListener::bind(path).unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let payload = frame::read_frame(&mut stream, 1000).unwrap();
                let mut r = Reader::new(&payload);
                let op_code = r.get_i32().unwrap();
                assert_eq!(OpType::from_i32(op_code), Some(OpType::RecordGet));
                let _name = r.get_string().unwrap();

                let resp = Response::RecordGet {
                    err: ErrCode::Okay,
                    class: 0,
                    ty: 3,
                    name: "proxy.config.admin.user_id".to_string(),
                    value: b"nobody\0".to_vec(),
                };
                frame::write_frame(&mut stream, &resp.encode(), 1000).unwrap();
            }
        });
    }

    #[test]
    fn record_get_string_round_trips_over_a_real_socket() {
        let dir = tempdir::TempDir::new("ts-ctl-client").unwrap();
        let path = dir.path().join("control");
        spawn_fake_server(&path);

        // Give the listener a moment to bind before connecting.
        thread::sleep(::std::time::Duration::from_millis(50));

        let mut client = Client::connect(&path).unwrap();
        let value = client.record_get_string("proxy.config.admin.user_id").unwrap();
        assert_eq!(value, "nobody");
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let dir = tempdir::TempDir::new("ts-ctl-client").unwrap();
        let path = dir.path().join("absent");
        assert!(Client::connect(&path).is_err());
    }
}

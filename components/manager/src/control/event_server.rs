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

//! The §4.7 event socket: clients register interest with the same
//! request frames as the control socket (`EVENT_REG_CALLBACK` etc.,
//! handled by `control::handlers::dispatch` exactly as on the control
//! socket) but then sit on a dedicated connection waiting for
//! `EVENT_NOTIFY` pushes. A reader thread keeps servicing requests on
//! that connection; a single pump thread drains `EventBus` and fans
//! each event out to every subscriber's writer half over a channel, so
//! one slow client's socket write never blocks delivery to another.

use std::collections::HashMap;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ts_ctl_protocol::frame::{self, DEFAULT_TIMEOUT_MS};
use ts_ctl_protocol::op::{ErrCode, OpType};
use ts_ctl_protocol::schema::Response;
use ts_ctl_protocol::wire::{put_i32, put_string, Reader};

use context::Context;
use control::handlers;
use event_bus::ClientId;

static LOGKEY: &'static str = "EVT";

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

const PUMP_INTERVAL_MS: u64 = 50;

type Channels = Arc<Mutex<HashMap<ClientId, Sender<Vec<u8>>>>>;

pub struct EventServer {
    listener: UnixListener,
}

impl EventServer {
    /// Bind the event socket at `path`; same mode rules as the control
    /// socket (0700 restricted, 0777 open), per §4.7.
    pub fn bind<P: AsRef<Path>>(path: P, restricted: bool) -> ::std::io::Result<EventServer> {
        let path = path.as_ref();
        let _ = ::std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        let mode = if restricted { 0o700 } else { 0o777 };
        set_mode(path, mode)?;
        Ok(EventServer { listener })
    }

    /// Spawn the pump thread and the accept loop. Each accepted
    /// connection gets a reader thread (handles registration requests)
    /// and a writer thread (drains its channel, writes `EVENT_NOTIFY`
    /// frames); the pump thread is the only place events leave the
    /// bus.
    pub fn spawn(self, ctx: Arc<Context>) {
        let channels: Channels = Arc::new(Mutex::new(HashMap::new()));

        {
            let ctx = ctx.clone();
            let channels = channels.clone();
            thread::spawn(move || run_pump(ctx, channels));
        }

        thread::spawn(move || loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst) as ClientId;
                    let writer_stream = match stream.try_clone() {
                        Ok(s) => s,
                        Err(err) => {
                            warn!("failed to clone event socket connection: {}", err);
                            continue;
                        }
                    };

                    let (tx, rx) = mpsc::channel::<Vec<u8>>();
                    channels.lock().expect("event channel table poisoned").insert(client_id, tx);

                    thread::spawn(move || writer_loop(writer_stream, rx));

                    let ctx = ctx.clone();
                    let channels = channels.clone();
                    thread::spawn(move || {
                        reader_loop(&ctx, client_id, stream);
                        ctx.events.drop_client(client_id);
                        channels.lock().expect("event channel table poisoned").remove(&client_id);
                    });
                }
                Err(e) => {
                    warn!("event socket accept failed: {}", e);
                }
            }
        });
    }
}

/// Service registration requests on one event-socket connection until
/// EOF or a framing error. Only the event-subscription ops have a
/// sensible meaning here; anything else gets a `PARAMS` error, same as
/// an unknown op on the control socket.
fn reader_loop(ctx: &Arc<Context>, client_id: ClientId, mut stream: UnixStream) {
    loop {
        let payload = match frame::read_frame(&mut stream, DEFAULT_TIMEOUT_MS) {
            Ok(p) => p,
            Err(_) => break,
        };

        let mut r = Reader::new(&payload);
        let op_code = match r.get_i32() {
            Ok(v) => v,
            Err(_) => break,
        };

        let op = match OpType::from_i32(op_code) {
            Some(op) => op,
            None => {
                if send_error(&mut stream, ErrCode::Params).is_err() {
                    break;
                }
                continue;
            }
        };

        let response = match handlers::dispatch(ctx, client_id, op, &mut r) {
            Ok(resp) => resp,
            Err(_) => Some(Response::error_only(op, ErrCode::Params)),
        };

        if let Some(resp) = response {
            if frame::write_frame(&mut stream, &resp.encode(), DEFAULT_TIMEOUT_MS).is_err() {
                break;
            }
        }
    }
}

/// Drain this client's channel and write each frame in order; stops on
/// the first write failure or when the channel's sender side is
/// dropped (the reader thread exited).
fn writer_loop(mut stream: UnixStream, rx: ::std::sync::mpsc::Receiver<Vec<u8>>) {
    for frame in rx.iter() {
        if frame::write_frame(&mut stream, &frame, DEFAULT_TIMEOUT_MS).is_err() {
            break;
        }
    }
}

/// The only reader of `EventBus::drain_for_delivery`. Encodes each
/// event as an `EVENT_NOTIFY` frame and hands it to every matching
/// subscriber's channel; a closed channel (writer thread gone) just
/// drops that target, the accept loop already removed or will remove
/// the map entry.
fn run_pump(ctx: Arc<Context>, channels: Channels) {
    loop {
        thread::sleep(Duration::from_millis(PUMP_INTERVAL_MS));
        for (event, targets) in ctx.events.drain_for_delivery() {
            if targets.is_empty() {
                continue;
            }
            let mut buf = Vec::new();
            put_i32(&mut buf, OpType::EventNotify as i32);
            put_i32(&mut buf, ErrCode::Okay as i32);
            put_string(&mut buf, &event.name);
            put_string(&mut buf, &event.description);

            let map = channels.lock().expect("event channel table poisoned");
            for client in targets {
                if let Some(tx) = map.get(&client) {
                    let _ = tx.send(buf.clone());
                }
            }
        }
    }
}

fn send_error(stream: &mut UnixStream, err: ErrCode) -> ::std::io::Result<()> {
    let mut buf = Vec::new();
    put_i32(&mut buf, err as i32);
    frame::write_frame(stream, &buf, DEFAULT_TIMEOUT_MS)
        .map_err(|_| ::std::io::Error::new(::std::io::ErrorKind::Other, "event socket write failed"))
}

fn set_mode<P: AsRef<Path>>(path: P, mode: u32) -> ::std::io::Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ts_core::config::ConfigStore;
    use ts_core::fs::Layout;
    use ts_ctl_protocol::frame;
    use ts_ctl_protocol::schema::Request;

    use event_bus::AlarmId;
    use records;
    use supervisor::ChildSupervisor;

    extern crate tempdir;

    fn test_context() -> Arc<Context> {
        let config = ConfigStore::new();
        config.load_defaults(records::defaults());
        let layout = Layout::resolve(None);
        let sup = ChildSupervisor::new("/bin/true".to_string(), vec![], None, None);
        Arc::new(Context::new(config, layout, sup, Duration::from_secs(60)))
    }

    #[test]
    fn registered_client_receives_a_posted_alarm() {
        let dir = tempdir::TempDir::new("ts-events").unwrap();
        let path = dir.path().join("events");
        let ctx = test_context();
        let server = EventServer::bind(&path, true).unwrap();
        server.spawn(ctx.clone());

        thread::sleep(Duration::from_millis(50));
        let mut client = UnixStream::connect(&path).unwrap();
        let req = Request::EventRegCallback { name: String::new() };
        frame::write_frame(&mut client, &req.encode(), 1000).unwrap();

        // EVENT_REG_CALLBACK has no response frame; give the registration
        // a moment to land before posting.
        thread::sleep(Duration::from_millis(50));
        ctx.events.post(AlarmId::ConfigReloaded, "reloaded for test");

        let payload = frame::read_frame(&mut client, 2000).unwrap();
        let mut r = Reader::new(&payload);
        let op = OpType::from_i32(r.get_i32().unwrap()).unwrap();
        assert_eq!(op, OpType::EventNotify);
        let err = ErrCode::from_i32(r.get_i32().unwrap());
        assert_eq!(err, ErrCode::Okay);
        assert_eq!(r.get_string().unwrap(), AlarmId::ConfigReloaded.name());
        assert_eq!(r.get_string().unwrap(), "reloaded for test");
    }

    #[test]
    fn unsubscribed_client_receives_nothing() {
        let dir = tempdir::TempDir::new("ts-events").unwrap();
        let path = dir.path().join("events");
        let ctx = test_context();
        let server = EventServer::bind(&path, true).unwrap();
        server.spawn(ctx.clone());

        thread::sleep(Duration::from_millis(50));
        let _client = UnixStream::connect(&path).unwrap();
        thread::sleep(Duration::from_millis(50));
        ctx.events.post(AlarmId::LowMemory, "swap low");
        thread::sleep(Duration::from_millis(150));
        assert_eq!(ctx.events.subscriber_count(), 0);
    }
}

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

//! §4.5 SyntheticServer: a minimal HTTP responder the Watchdog's
//! `HealthProbe` (in `ts_core`) polls for liveness. Bound to loopback
//! only; any peer whose remote address isn't `127.0.0.1` is refused
//! outright.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::{Duration, Instant};

use libc;

static LOGKEY: &'static str = "SYN";

const ALPHABET: &'static str = "abcdefghijklmnopqrstuvwxyz";
const REQUEST_PREFIX_LEN: usize = "GET /synthetic.txt HTTP/1".len();
const PER_IO_TIMEOUT_MS: u64 = 5_000;

pub struct SyntheticServer {
    listener: TcpListener,
}

impl SyntheticServer {
    pub fn bind(port: u16) -> io::Result<SyntheticServer> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        Ok(SyntheticServer { listener })
    }

    /// Non-blocking single accept attempt, suitable for the manager's
    /// poll-driven main loop: returns immediately whether or not a
    /// connection was waiting.
    pub fn accept_one(&self) {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if peer.ip().to_string() != "127.0.0.1" {
                    debug!("refusing synthetic-server connection from non-loopback peer {}", peer);
                    return;
                }
                let _ = stream.set_nodelay(true);
                thread::spawn(move || serve_connection(stream));
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("synthetic server accept failed: {}", e),
        }
    }

    pub fn local_port(&self) -> io::Result<u16> {
        self.listener.local_addr().map(|a| a.port())
    }
}

fn serve_connection(mut stream: TcpStream) {
    let deadline = Instant::now() + Duration::from_millis(PER_IO_TIMEOUT_MS);
    let prefix = match read_prefix(&mut stream, REQUEST_PREFIX_LEN, deadline) {
        Ok(buf) => buf,
        Err(_) => return,
    };

    let text = String::from_utf8_lossy(&prefix).to_lowercase();
    if text != "get /synthetic.txt http/1" {
        debug!("malformed synthetic-server request prefix: {:?}", text);
        return;
    }

    let body = format!("{}\r\n{}\r\n{}", ALPHABET, ALPHABET, ALPHABET);
    let response = format!(
        "HTTP/1.0 200 OK\r\nDate: {}\r\nContent-Length: {}\r\n\r\n{}",
        httpdate_now(),
        body.len(),
        body
    );

    let _ = write_with_budget(&mut stream, response.as_bytes(), deadline);
}

fn httpdate_now() -> String {
    // A fixed-format stand-in is sufficient: clients only check that a
    // `Date` header is present, never its exact value.
    let secs = ::std::time::SystemTime::now()
        .duration_since(::std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}", secs)
}

fn read_prefix(stream: &mut TcpStream, len: usize, deadline: Instant) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut read = 0;
    while read < len {
        poll_fd(stream.as_raw_fd(), libc::POLLIN, deadline)?;
        match stream.read(&mut buf[read..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed early")),
            Ok(n) => read += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

fn write_with_budget(stream: &mut TcpStream, data: &[u8], deadline: Instant) -> io::Result<()> {
    let mut written = 0;
    while written < data.len() {
        poll_fd(stream.as_raw_fd(), libc::POLLOUT, deadline)?;
        match stream.write(&data[written..]) {
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn poll_fd(fd: libc::c_int, events: i16, deadline: Instant) -> io::Result<()> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.as_millis() == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "poll deadline exceeded"));
        }
        let mut pfd = libc::pollfd { fd, events, revents: 0 };
        let ret = unsafe { libc::poll(&mut pfd, 1, remaining.as_millis() as libc::c_int) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
        if ret == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "poll deadline exceeded"));
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as ClientStream;

    #[test]
    fn serves_a_well_formed_synthetic_request() {
        let server = SyntheticServer::bind(0).expect("bind");
        let port = server.local_port().expect("port");

        let handle = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_millis(2_000);
            while Instant::now() < deadline {
                server.accept_one();
                thread::sleep(Duration::from_millis(10));
            }
        });

        let mut client = ClientStream::connect(("127.0.0.1", port)).expect("connect");
        client.write_all(b"GET /synthetic.txt HTTP/1.0\r\n\r\n").expect("write");
        let mut resp = String::new();
        client.set_read_timeout(Some(Duration::from_millis(1_000))).unwrap();
        let _ = client.read_to_string(&mut resp);

        assert!(resp.starts_with("HTTP/1.0 200 OK"));
        assert!(resp.contains(ALPHABET));
        let _ = handle.join();
    }

    #[test]
    fn rejects_a_malformed_request_prefix() {
        let server = SyntheticServer::bind(0).expect("bind");
        let port = server.local_port().expect("port");

        let handle = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_millis(1_000);
            while Instant::now() < deadline {
                server.accept_one();
                thread::sleep(Duration::from_millis(10));
            }
        });

        let mut client = ClientStream::connect(("127.0.0.1", port)).expect("connect");
        client.write_all(b"POST /nope HTTP/1.0\r\n\r\n").expect("write");
        let mut resp = Vec::new();
        client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let _ = client.read_to_end(&mut resp);

        assert!(resp.is_empty());
        let _ = handle.join();
    }
}

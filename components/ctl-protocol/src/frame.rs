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

//! `len:u32 LE` + payload framing with polled, deadline-bounded I/O.
//! There is no multiplexing: a connection carries requests strictly
//! in receive order, one response per request.

use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use libc;

use error::{Error, Result};

/// Default control-protocol I/O deadline, per §4.6.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub fn read_frame<S: Read + AsRawFd>(stream: &mut S, timeout_ms: u64) -> Result<Vec<u8>> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    let mut len_buf = [0u8; 4];
    read_exact_with_budget(stream, &mut len_buf, deadline, 0)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::Params(format!("frame length {} exceeds maximum", len)));
    }

    let mut payload = vec![0u8; len as usize];
    // Bytes already received (the length prefix) count against "part
    // of a message already delivered"; a peer close from here on is a
    // read error, not a clean EOF.
    read_exact_with_budget(stream, &mut payload, deadline, 1)?;
    Ok(payload)
}

pub fn write_frame<S: Write + AsRawFd>(stream: &mut S, payload: &[u8], timeout_ms: u64) -> Result<()> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let len = payload.len() as u32;
    write_all_with_budget(stream, &len.to_le_bytes(), deadline)?;
    write_all_with_budget(stream, payload, deadline)?;
    Ok(())
}

fn read_exact_with_budget<S: Read + AsRawFd>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: Instant,
    bytes_already_in_message: usize,
) -> Result<()> {
    let mut got = 0;
    while got < buf.len() {
        poll(stream.as_raw_fd(), libc::POLLIN, deadline)?;
        match stream.read(&mut buf[got..]) {
            Ok(0) => {
                if got > 0 || bytes_already_in_message > 0 {
                    return Err(Error::NetRead(::std::io::Error::new(
                        ::std::io::ErrorKind::UnexpectedEof,
                        "peer closed mid-message",
                    )));
                }
                return Err(Error::NetEof);
            }
            Ok(n) => got += n,
            Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock || e.kind() == ::std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::NetRead(e)),
        }
    }
    Ok(())
}

fn write_all_with_budget<S: Write + AsRawFd>(stream: &mut S, buf: &[u8], deadline: Instant) -> Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        poll(stream.as_raw_fd(), libc::POLLOUT, deadline)?;
        match stream.write(&buf[sent..]) {
            Ok(n) => sent += n,
            Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock || e.kind() == ::std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::NetWrite(e)),
        }
    }
    Ok(())
}

fn poll(fd: libc::c_int, events: i16, deadline: Instant) -> Result<()> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.as_millis() == 0 {
            return Err(Error::Timeout);
        }
        let mut pfd = libc::pollfd { fd, events, revents: 0 };
        let ret = unsafe { libc::poll(&mut pfd, 1, remaining.as_millis() as libc::c_int) };
        if ret < 0 {
            let err = ::std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(Error::NetRead(err));
        }
        if ret == 0 {
            return Err(Error::Timeout);
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn round_trips_a_frame_over_a_socketpair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        write_frame(&mut a, b"hello", 1000).unwrap();
        let payload = read_frame(&mut b, 1000).unwrap();
        assert_eq!(payload, b"hello".to_vec());
    }

    #[test]
    fn read_times_out_when_nothing_arrives() {
        let (_a, mut b) = UnixStream::pair().unwrap();
        let res = read_frame(&mut b, 50);
        assert!(matches!(res, Err(Error::Timeout)));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(&(MAX_FRAME_LEN + 1).to_le_bytes()).unwrap();
        let res = read_frame(&mut b, 1000);
        assert!(res.is_err());
    }
}

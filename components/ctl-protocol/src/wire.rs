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

//! Primitive typed-field encoders/decoders. Every op's request and
//! response is a fixed, ordered vector of these four field kinds.

use error::{Error, Result};

/// Zero-length strings are transmitted as this exact 5-byte sequence:
/// a `u32` length of 1 followed by a single NUL, per §4.6.
const EMPTY_STRING_WIRE: [u8; 5] = [0x00, 0x00, 0x00, 0x01, 0x00];

pub fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Strings include their terminating NUL in both the byte count and
/// the payload.
pub fn put_string(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() {
        buf.extend_from_slice(&EMPTY_STRING_WIRE);
        return;
    }
    let len = (s.len() + 1) as u32;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

pub fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    let len = data.len() as u32;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(data);
}

/// A cursor over a fully-received frame payload used to decode its
/// field vector in order.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        if self.remaining() < 4 {
            return Err(Error::Params("truncated Int32 field".to_string()));
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(i32::from_le_bytes(arr))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        if self.remaining() < 8 {
            return Err(Error::Params("truncated Int64 field".to_string()));
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(i64::from_le_bytes(arr))
    }

    pub fn get_string(&mut self) -> Result<String> {
        let len = self.get_u32_len()?;
        if len == 0 {
            return Err(Error::Params("String field declared zero length (must be >= 1 for the NUL)".to_string()));
        }
        if self.remaining() < len {
            return Err(Error::Params("truncated String field".to_string()));
        }
        let raw = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        if raw.last() != Some(&0) {
            return Err(Error::Params("String field missing terminating NUL".to_string()));
        }
        let s = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
        Ok(s)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32_len()?;
        if self.remaining() < len {
            return Err(Error::Params("truncated Bytes field".to_string()));
        }
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    fn get_u32_len(&mut self) -> Result<usize> {
        if self.remaining() < 4 {
            return Err(Error::Params("truncated length prefix".to_string()));
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(arr) as usize)
    }
}

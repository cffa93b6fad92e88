// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::io;
use std::io::Cursor;
use std::io::Read;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;

/// A simple wrapper around a `Vec<u8>` that provides methods for writing the
/// wire representation of a sketch.
pub(crate) struct SketchBytes {
    bytes: Vec<u8>,
}

impl SketchBytes {
    /// Constructs an empty `SketchBytes` with at least the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Consumes the `SketchBytes` and returns the underlying `Vec<u8>`.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Writes the given byte slice to the `SketchBytes`.
    pub fn write(&mut self, buf: &[u8]) {
        self.bytes.extend_from_slice(buf);
    }

    /// Writes a single byte to the `SketchBytes`.
    pub fn write_u8(&mut self, n: u8) {
        self.bytes.push(n);
    }

    /// Writes a 32-bit unsigned integer to the `SketchBytes` in little-endian
    /// byte order.
    pub fn write_u32_le(&mut self, n: u32) {
        self.write(&n.to_le_bytes());
    }

    /// Writes an unsigned integer as a LEB128 varint.
    pub fn write_varint_u64(&mut self, mut n: u64) {
        loop {
            let mut byte = (n & 0x7F) as u8;
            n >>= 7;
            if n != 0 {
                byte |= 0x80;
            }
            self.bytes.push(byte);
            if n == 0 {
                break;
            }
        }
    }
}

/// Positioned reader over a serialized sketch payload.
pub(crate) struct SketchSlice<'a> {
    slice: Cursor<&'a [u8]>,
}

impl SketchSlice<'_> {
    pub fn new(slice: &[u8]) -> SketchSlice<'_> {
        SketchSlice {
            slice: Cursor::new(slice),
        }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        let len = self.slice.get_ref().len() as u64;
        (len - self.slice.position().min(len)) as usize
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.slice.read_exact(buf)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        self.slice.read_u8()
    }

    pub fn read_u32_le(&mut self) -> io::Result<u32> {
        self.slice.read_u32::<LittleEndian>()
    }

    /// Reads a LEB128 varint written by [`SketchBytes::write_varint_u64`].
    pub fn read_varint_u64(&mut self) -> io::Result<u64> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.slice.read_u8()?;
            let payload = (byte & 0x7F) as u64;
            if shift >= 63 && payload > 1 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "varint overflows u64",
                ));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_varint(value: u64) {
        let mut bytes = SketchBytes::with_capacity(10);
        bytes.write_varint_u64(value);
        let buf = bytes.into_bytes();
        let mut slice = SketchSlice::new(&buf);
        assert_eq!(slice.read_varint_u64().unwrap(), value);
        assert_eq!(slice.remaining(), 0);
    }

    #[test]
    fn test_varint_round_trip() {
        for value in [0, 1, 127, 128, 300, 16383, 16384, u32::MAX as u64, u64::MAX] {
            round_trip_varint(value);
        }
    }

    #[test]
    fn test_varint_truncated() {
        // Continuation bit set with no following byte.
        let mut slice = SketchSlice::new(&[0x80]);
        assert!(slice.read_varint_u64().is_err());
    }

    #[test]
    fn test_varint_overflow() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut slice = SketchSlice::new(&buf);
        assert!(slice.read_varint_u64().is_err());
    }

    #[test]
    fn test_u32_round_trip() {
        let mut bytes = SketchBytes::with_capacity(8);
        bytes.write_u32_le(0xDEAD_BEEF);
        bytes.write_u8(7);
        let buf = bytes.into_bytes();
        assert_eq!(buf.len(), 5);
        let mut slice = SketchSlice::new(&buf);
        assert_eq!(slice.read_u32_le().unwrap(), 0xDEAD_BEEF);
        assert_eq!(slice.read_u8().unwrap(), 7);
    }
}

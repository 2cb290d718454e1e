// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The ISO BMFF box model: four-character codes, per-box metadata, and the
//! 8/16-byte header codec.

use std::fmt;
use std::io::Write;

use crate::error::Result;

/// The magic bytes for a bare JPEG XL codestream.
pub const CODESTREAM_SIGNATURE: [u8; 2] = [0xff, 0x0a];
/// The magic bytes for a file using the JPEG XL container format.
pub const CONTAINER_SIGNATURE: [u8; 12] =
    [0, 0, 0, 0xc, b'J', b'X', b'L', b' ', 0xd, 0xa, 0x87, 0xa];

/// A four-character box type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const BROB: BoxType = BoxType(*b"brob");
    pub const FTYP: BoxType = BoxType(*b"ftyp");
    pub const JBRD: BoxType = BoxType(*b"jbrd");
    pub const CODESTREAM: BoxType = BoxType(*b"jxlc");
    pub const PARTIAL_CODESTREAM: BoxType = BoxType(*b"jxlp");
    pub const LEVEL: BoxType = BoxType(*b"jxll");

    /// A type is valid iff all four bytes are printable ASCII.
    pub fn is_printable(self) -> bool {
        self.0.iter().all(|&b| (0x20..=0x7e).contains(&b))
    }

    pub fn to_ascii_lowercase(self) -> BoxType {
        BoxType(self.0.map(|b| b.to_ascii_lowercase()))
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if (0x20..=0x7e).contains(&b) {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxType({self})")
    }
}

/// Metadata for one box frame, as decoded from its header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoxInfo {
    /// Byte distance from the start of the input stream to the first header
    /// byte.
    pub offset: u64,
    /// Total size in bytes including the header. `0` means the box extends
    /// to the end of the file; only the last box may do that.
    pub length: u64,
    pub boxtype: BoxType,
    /// Whether the header used the 16-byte extended-size form.
    pub has_extended_size: bool,
}

impl BoxInfo {
    pub fn header_len(&self) -> u64 {
        if self.has_extended_size { 16 } else { 8 }
    }

    pub fn extends_to_eof(&self) -> bool {
        self.length == 0
    }

    /// Extended size is only necessary above `u32::MAX`; using it for a
    /// smaller, explicit size wastes 8 bytes.
    pub fn has_unnecessary_extended_size(&self) -> bool {
        self.has_extended_size && self.length > 0 && self.length <= u32::MAX as u64
    }
}

/// Write a box header for a payload of `payload_size` bytes (`None` for a
/// final box that extends to EOF). Picks the 8-byte form whenever the total
/// size fits 32 bits, the 16-byte extended form otherwise. Returns the
/// number of header bytes written.
pub fn write_box_header<W: Write + ?Sized>(
    sink: &mut W,
    boxtype: BoxType,
    payload_size: Option<u64>,
) -> Result<usize> {
    match payload_size {
        None => {
            sink.write_all(&0u32.to_be_bytes())?;
            sink.write_all(&boxtype.0)?;
            Ok(8)
        }
        Some(n) if n <= u32::MAX as u64 - 8 => {
            sink.write_all(&((n as u32 + 8).to_be_bytes()))?;
            sink.write_all(&boxtype.0)?;
            Ok(8)
        }
        Some(n) => {
            sink.write_all(&1u32.to_be_bytes())?;
            sink.write_all(&boxtype.0)?;
            sink.write_all(&(n + 16).to_be_bytes())?;
            Ok(16)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemSource;
    use crate::reader::BoxReader;

    fn parse_one(bytes: Vec<u8>) -> BoxInfo {
        let mut reader = BoxReader::new(MemSource::new(bytes));
        reader.next_box().unwrap().unwrap()
    }

    #[test]
    fn small_header_roundtrip() {
        let mut buf = Vec::new();
        let written = write_box_header(&mut buf, BoxType(*b"abcd"), Some(5)).unwrap();
        assert_eq!(written, 8);
        assert_eq!(buf, b"\0\0\0\x0dabcd");
        buf.extend_from_slice(b"hello");
        let info = parse_one(buf);
        assert_eq!(info.boxtype, BoxType(*b"abcd"));
        assert_eq!(info.length, 13);
        assert!(!info.has_extended_size);
    }

    #[test]
    fn to_eof_header() {
        let mut buf = Vec::new();
        assert_eq!(
            write_box_header(&mut buf, BoxType(*b"last"), None).unwrap(),
            8
        );
        assert_eq!(buf, b"\0\0\0\0last");
        let info = parse_one(buf);
        assert_eq!(info.length, 0);
        assert!(info.extends_to_eof());
    }

    #[test]
    fn extended_header_for_large_payloads() {
        let payload = u32::MAX as u64;
        let mut buf = Vec::new();
        assert_eq!(
            write_box_header(&mut buf, BoxType(*b"huge"), Some(payload)).unwrap(),
            16
        );
        assert_eq!(&buf[..4], &1u32.to_be_bytes());
        assert_eq!(&buf[4..8], b"huge");
        assert_eq!(&buf[8..16], &(payload + 16).to_be_bytes());
    }

    #[test]
    fn boundary_between_forms() {
        // The largest payload that still fits the 8-byte form.
        let mut buf = Vec::new();
        assert_eq!(
            write_box_header(&mut buf, BoxType(*b"maxi"), Some(u32::MAX as u64 - 8)).unwrap(),
            8
        );
        assert_eq!(&buf[..4], &u32::MAX.to_be_bytes());
        let mut buf = Vec::new();
        assert_eq!(
            write_box_header(&mut buf, BoxType(*b"maxi"), Some(u32::MAX as u64 - 7)).unwrap(),
            16
        );
    }

    #[test]
    fn printable_types() {
        assert!(BoxType(*b"jxl ").is_printable());
        assert!(BoxType(*b"*?[]").is_printable());
        assert!(!BoxType([0x4a, 0x58, 0x4c, 0x1f]).is_printable());
        assert!(!BoxType([0xff, 0x0a, 0x00, 0x11]).is_printable());
    }

    #[test]
    fn display_escapes_unprintable_bytes() {
        assert_eq!(BoxType(*b"ftyp").to_string(), "ftyp");
        assert_eq!(BoxType([b'a', 0x01, b'c', b'd']).to_string(), "a\\x01cd");
    }

    #[test]
    fn unnecessary_extended_size_flag() {
        let small_ext = BoxInfo {
            offset: 0,
            length: 24,
            boxtype: BoxType(*b"abcd"),
            has_extended_size: true,
        };
        assert!(small_ext.has_unnecessary_extended_size());
        let to_eof_ext = BoxInfo {
            length: 0,
            ..small_ext.clone()
        };
        assert!(!to_eof_ext.has_unnecessary_extended_size());
        let large_ext = BoxInfo {
            length: u32::MAX as u64 + 1,
            ..small_ext
        };
        assert!(!large_ext.has_unnecessary_extended_size());
    }
}

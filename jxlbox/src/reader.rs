// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Frame-by-frame box reader.
//!
//! [`BoxReader`] is a single-use cursor over a [`ByteSource`]: each call to
//! [`BoxReader::next_box`] decodes one header and hands back its metadata,
//! skipping whatever the caller left unread of the previous box. The bytes
//! of the current box can then be consumed either *in full* (header
//! included) or as *payload* (header excluded) — mixing the two flavours on
//! one box is a programming bug and panics.

use byteorder::{BigEndian, ByteOrder};

use crate::box_header::{BoxInfo, BoxType, CODESTREAM_SIGNATURE};
use crate::error::{Error, Result};
use crate::io::{copy_limited, read_exact_or_eof, ByteSource};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ReadMode {
    Untouched,
    Full,
    Payload,
}

pub struct BoxReader<S: ByteSource> {
    src: S,
    current: Option<BoxInfo>,
    /// Raw bytes of the current box header (8 or 16), kept for replay.
    header: Vec<u8>,
    /// Where the next header starts; `None` after a to-EOF box.
    next_box_offset: Option<u64>,
    /// Bytes of the current box already handed to the caller, counted in the
    /// coordinate space of the active read mode.
    given: u64,
    mode: ReadMode,
    eof: bool,
}

impl<S: ByteSource> BoxReader<S> {
    pub fn new(src: S) -> Self {
        Self {
            src,
            current: None,
            header: Vec::with_capacity(16),
            next_box_offset: Some(0),
            given: 0,
            mode: ReadMode::Untouched,
            eof: false,
        }
    }

    /// Advance to the next box and decode its header. Returns `None` once
    /// the stream is exhausted.
    pub fn next_box(&mut self) -> Result<Option<BoxInfo>> {
        if self.eof {
            return Ok(None);
        }

        // Skip whatever the caller left unread of the previous box.
        if let Some(next) = self.next_box_offset {
            let pos = self.src.tell();
            debug_assert!(pos <= next);
            if pos < next {
                let want = next - pos;
                let did = self.src.seek_forward(want)?;
                if did != want {
                    return Err(Error::InvalidBmff(format!(
                        "file ends {} bytes into a declared box of the previous frame",
                        want - did
                    )));
                }
            }
        }

        self.mode = ReadMode::Untouched;
        self.given = 0;

        let offset = self.src.tell();
        let mut head = [0u8; 8];
        let got = read_exact_or_eof(&mut self.src, &mut head)?;
        if got == 0 {
            self.eof = true;
            return Ok(None);
        }
        if got < 8 {
            return Err(Error::InvalidBmff(format!(
                "truncated box header ({got} of 8 bytes)"
            )));
        }
        self.header.clear();
        self.header.extend_from_slice(&head);

        let mut length = BigEndian::read_u32(&head[..4]) as u64;
        let boxtype = BoxType([head[4], head[5], head[6], head[7]]);
        let mut has_extended_size = false;
        if length == 1 {
            let mut ext = [0u8; 8];
            let got = read_exact_or_eof(&mut self.src, &mut ext)?;
            if got < 8 {
                return Err(Error::InvalidBmff("truncated extended box header".into()));
            }
            self.header.extend_from_slice(&ext);
            length = BigEndian::read_u64(&ext);
            has_extended_size = true;
        }

        if !boxtype.is_printable() {
            // A stream that opens with the codestream magic and garbage where
            // the 4CC belongs is a bare codestream, not a box stream.
            if offset == 0 && head[..2] == CODESTREAM_SIGNATURE {
                return Err(Error::RawCodestream);
            }
            return Err(Error::InvalidBmff(format!(
                "box type {boxtype} is not printable ASCII"
            )));
        }
        if length > 0 && length < self.header.len() as u64 {
            return Err(Error::InvalidBmff(format!(
                "`{boxtype}` box with a declared length of {length} has {} bytes in its header",
                self.header.len()
            )));
        }

        if length == 0 {
            // Implicit final box; there is nothing after it.
            self.eof = true;
            self.next_box_offset = None;
        } else {
            self.next_box_offset = Some(offset + length);
        }
        let info = BoxInfo {
            offset,
            length,
            boxtype,
            has_extended_size,
        };
        self.current = Some(info.clone());
        Ok(Some(info))
    }

    fn current_info(&self) -> &BoxInfo {
        self.current.as_ref().expect("no box available")
    }

    /// The raw header bytes (8 or 16) of the current box.
    pub fn current_header_bytes(&self) -> &[u8] {
        self.current_info();
        &self.header
    }

    /// Size hint of the underlying stream, when it has one.
    pub fn source_total_size(&self) -> Option<u64> {
        self.src.total_size()
    }

    /// Copy up to `n` bytes (`None` for all remaining) of the current box,
    /// *including its header*, into `dst`. Returns the number of bytes
    /// copied.
    ///
    /// # Panics
    ///
    /// Panics if payload-flavoured reads were already used on this box, or
    /// if no box is current.
    pub fn copy_current<W: std::io::Write + ?Sized>(
        &mut self,
        n: Option<u64>,
        dst: &mut W,
    ) -> Result<u64> {
        assert!(
            self.mode != ReadMode::Payload,
            "can't read the full box after starting to read the payload"
        );
        let cur = self.current_info().clone();
        self.mode = ReadMode::Full;

        let header_len = self.header.len() as u64;
        let mut total = 0u64;

        // Replay unread header bytes from the buffer.
        if self.given < header_len {
            let avail = header_len - self.given;
            let want = n.map_or(avail, |n| n.min(avail));
            let start = self.given as usize;
            dst.write_all(&self.header[start..start + want as usize])?;
            self.given += want;
            total += want;
            if Some(total) == n {
                return Ok(total);
            }
        }

        // Body bytes straight from the source.
        let want = if cur.length > 0 {
            let avail = cur.length - self.given;
            Some(n.map_or(avail, |n| (n - total).min(avail)))
        } else {
            n.map(|n| n - total)
        };
        let copied = copy_limited(&mut self.src, dst, want)?;
        self.given += copied;
        total += copied;
        if cur.length > 0 {
            if let Some(want) = want {
                if copied != want {
                    return Err(Error::InvalidBmff(format!(
                        "tried to copy {want} bytes of box content, but only copied {copied}"
                    )));
                }
            }
        }
        Ok(total)
    }

    /// Like [`BoxReader::copy_current`], returning the bytes instead.
    pub fn read_current(&mut self, n: Option<u64>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_current(n, &mut out)?;
        Ok(out)
    }

    /// Copy up to `n` bytes (`None` for all remaining) of the current box's
    /// *payload* — everything after the header — into `dst`. Returns the
    /// number of bytes copied. The result is short only when the payload
    /// (or, for a to-EOF box, the stream) ends first.
    ///
    /// # Panics
    ///
    /// Panics if full-box reads were already used on this box, or if no box
    /// is current.
    pub fn copy_payload<W: std::io::Write + ?Sized>(
        &mut self,
        n: Option<u64>,
        dst: &mut W,
    ) -> Result<u64> {
        assert!(
            self.mode != ReadMode::Full,
            "can't read the payload after starting to read the full box"
        );
        let cur = self.current_info().clone();
        self.mode = ReadMode::Payload;

        let (limit, must_be_exact) = if cur.length == 0 {
            (n, false)
        } else {
            let avail = cur.length - self.header.len() as u64 - self.given;
            match n {
                // A request capped by the box bounds must be satisfied
                // exactly; anything else tolerates a short stream.
                Some(n) => (Some(n.min(avail)), n > avail),
                None => (Some(avail), false),
            }
        };
        let copied = copy_limited(&mut self.src, dst, limit)?;
        self.given += copied;
        if must_be_exact {
            if let Some(limit) = limit {
                if copied != limit {
                    return Err(Error::InvalidBmff(format!(
                        "tried to copy {limit} bytes of box content, but only copied {copied}"
                    )));
                }
            }
        }
        Ok(copied)
    }

    /// Like [`BoxReader::copy_payload`], returning the bytes instead.
    pub fn read_payload(&mut self, n: Option<u64>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_payload(n, &mut out)?;
        Ok(out)
    }

    /// Discard up to `n` bytes of payload, returning the number actually
    /// discarded.
    pub fn seek_payload(&mut self, n: u64) -> Result<u64> {
        self.copy_payload(Some(n), &mut std::io::sink())
    }

    /// Size of the final box. Callable only once the box list is exhausted;
    /// for an implicit-size last box this finds the end of the stream, which
    /// may consume the remaining box data.
    ///
    /// # Panics
    ///
    /// Panics when called before the final box has been reached.
    pub fn final_box_size(&mut self) -> Result<u64> {
        assert!(
            self.eof,
            "can't determine the final box size before the final box has been reached"
        );
        let cur = self.current_info().clone();
        if cur.length > 0 {
            return Ok(cur.length);
        }
        if let Some(total) = self.src.total_size() {
            let length = total.saturating_sub(cur.offset);
            if let Some(info) = self.current.as_mut() {
                info.length = length;
            }
            return Ok(length);
        }
        loop {
            let did = self.src.seek_forward(u32::MAX as u64)?;
            if did < u32::MAX as u64 {
                break;
            }
        }
        let length = self.src.tell() - cur.offset;
        if let Some(info) = self.current.as_mut() {
            info.length = length;
        }
        Ok(length)
    }

    /// Copy the remaining on-the-wire bytes of the current box, bypassing
    /// the full/payload bookkeeping. Internal plumbing for the scan
    /// pipeline, which replays consumed prefixes itself.
    pub(crate) fn copy_rest<W: std::io::Write + ?Sized>(&mut self, dst: &mut W) -> Result<u64> {
        let cur = self.current_info().clone();
        let limit = if cur.length > 0 {
            Some(cur.offset + cur.length - self.src.tell())
        } else {
            None
        };
        let copied = copy_limited(&mut self.src, dst, limit)?;
        if let Some(limit) = limit {
            if copied != limit {
                return Err(Error::InvalidBmff(format!(
                    "file ends {} bytes into a `{}` box",
                    limit - copied,
                    cur.boxtype
                )));
            }
        }
        self.given += copied;
        Ok(copied)
    }

    /// Single bounded read of the current box's remaining on-the-wire
    /// bytes; `Ok(0)` at the end of the box.
    pub(crate) fn read_rest_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let cur = self.current_info().clone();
        let remaining = if cur.length > 0 {
            cur.offset + cur.length - self.src.tell()
        } else {
            u64::MAX
        };
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = loop {
            match self.src.read(&mut buf[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        };
        if n == 0 && cur.length > 0 {
            return Err(Error::InvalidBmff(format!(
                "file ends {remaining} bytes into a `{}` box",
                cur.boxtype
            )));
        }
        self.given += n as u64;
        Ok(n)
    }
}

/// Adapts the remaining bytes of the current box as a [`std::io::Read`],
/// for feeding the streaming Brotli decoder. Errors from the box layer are
/// smuggled through `std::io::Error` and unwrapped on the other side.
pub(crate) struct BoxBodyReader<'a, S: ByteSource> {
    reader: &'a mut BoxReader<S>,
}

impl<'a, S: ByteSource> BoxBodyReader<'a, S> {
    pub(crate) fn new(reader: &'a mut BoxReader<S>) -> Self {
        Self { reader }
    }
}

impl<S: ByteSource> std::io::Read for BoxBodyReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader
            .read_rest_into(buf)
            .map_err(std::io::Error::other)
    }
}

// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Byte stream capability interfaces and their concrete implementations.
//!
//! A [`ByteSource`] is a forward-only reader that additionally knows its
//! position, whether it can seek, and (for regular files) its total size.
//! A [`ByteSink`] is a writer that can optionally patch already-written
//! bytes, which the box engine uses for deferred size fixups.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Unit for block-wise copies and for the Brotli streaming transforms.
pub(crate) const COPY_BLOCK: usize = 16384;

/// A forward-only byte stream with position tracking and capability hints.
pub trait ByteSource: Read {
    /// Current position, measured from where this source started.
    fn tell(&self) -> u64;

    /// Whether the underlying stream supports real (backward) seeks.
    fn is_seekable(&self) -> bool;

    /// Skip up to `n` bytes forward, returning the number of bytes actually
    /// skipped. A short result means end of stream.
    fn seek_forward(&mut self, n: u64) -> Result<u64>;

    /// Total size of the stream from its start, when known (regular files).
    fn total_size(&self) -> Option<u64>;

    /// Seek to an absolute position. The default implementation only moves
    /// forward; seeking backwards fails with [`Error::UnseekableInput`].
    fn seek_to(&mut self, pos: u64) -> Result<()> {
        let cur = self.tell();
        if pos < cur {
            return Err(Error::UnseekableInput);
        }
        let want = pos - cur;
        let did = self.seek_forward(want)?;
        if did != want {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("tried to seek {want} bytes forward but the stream ended after {did}"),
            )));
        }
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn tell(&self) -> u64 {
        (**self).tell()
    }
    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }
    fn seek_forward(&mut self, n: u64) -> Result<u64> {
        (**self).seek_forward(n)
    }
    fn total_size(&self) -> Option<u64> {
        (**self).total_size()
    }
    fn seek_to(&mut self, pos: u64) -> Result<()> {
        (**self).seek_to(pos)
    }
}

/// A writer with position tracking and optional in-place patching.
pub trait ByteSink: Write {
    /// Number of bytes written so far.
    fn tell(&self) -> u64;

    /// Whether [`ByteSink::patch`] is available.
    fn is_seekable(&self) -> bool;

    /// Overwrite `data.len()` bytes at absolute position `pos`, leaving the
    /// write position unchanged. Fails with [`Error::UnseekableOutput`] on
    /// streams that cannot seek.
    fn patch(&mut self, pos: u64, data: &[u8]) -> Result<()>;
}

impl<K: ByteSink + ?Sized> ByteSink for Box<K> {
    fn tell(&self) -> u64 {
        (**self).tell()
    }
    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }
    fn patch(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        (**self).patch(pos, data)
    }
}

/// Reads into `buf` until it is full or the stream ends. Returns the number
/// of bytes read.
pub(crate) fn read_exact_or_eof(src: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match src.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(got)
}

/// Copy up to `limit` bytes (all remaining when `None`) from `src` to `dst`
/// in [`COPY_BLOCK`]-sized blocks. Returns the number of bytes copied; a
/// short count means `src` ended early.
pub(crate) fn copy_limited<W: Write + ?Sized>(
    src: &mut impl Read,
    dst: &mut W,
    limit: Option<u64>,
) -> Result<u64> {
    let mut buf = [0u8; COPY_BLOCK];
    let mut done = 0u64;
    loop {
        let want = match limit {
            Some(limit) if done >= limit => break,
            Some(limit) => ((limit - done).min(COPY_BLOCK as u64)) as usize,
            None => COPY_BLOCK,
        };
        let n = match src.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        };
        dst.write_all(&buf[..n])?;
        done += n as u64;
    }
    Ok(done)
}

fn skip_by_reading(src: &mut impl Read, n: u64) -> Result<u64> {
    let mut buf = [0u8; COPY_BLOCK];
    let mut done = 0u64;
    while done < n {
        let want = ((n - done).min(COPY_BLOCK as u64)) as usize;
        match src.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(got) => done += got as u64,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(done)
}

/// A regular file. Seekable, with a stat-derived total size.
pub struct FileSource {
    file: File,
    off: u64,
    size: Option<u64>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        let size = meta.is_file().then(|| meta.len());
        Ok(Self { file, off: 0, size })
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.file.read(buf)?;
        self.off += n as u64;
        Ok(n)
    }
}

impl ByteSource for FileSource {
    fn tell(&self) -> u64 {
        self.off
    }

    fn is_seekable(&self) -> bool {
        self.size.is_some()
    }

    fn seek_forward(&mut self, n: u64) -> Result<u64> {
        match self.size {
            Some(size) => {
                let skip = n.min(size.saturating_sub(self.off));
                self.file.seek(SeekFrom::Current(skip as i64))?;
                self.off += skip;
                Ok(skip)
            }
            None => {
                let did = skip_by_reading(&mut self.file, n)?;
                self.off += did;
                Ok(did)
            }
        }
    }

    fn total_size(&self) -> Option<u64> {
        self.size
    }

    fn seek_to(&mut self, pos: u64) -> Result<()> {
        match self.size {
            Some(_) => {
                self.file.seek(SeekFrom::Start(pos))?;
                self.off = pos;
                Ok(())
            }
            None if pos >= self.off => {
                let want = pos - self.off;
                let did = self.seek_forward(want)?;
                if did != want {
                    return Err(Error::Io(std::io::Error::from(
                        std::io::ErrorKind::UnexpectedEof,
                    )));
                }
                Ok(())
            }
            None => Err(Error::UnseekableInput),
        }
    }
}

/// A live stream such as stdin: forward-only, size unknown.
pub struct StreamSource<R: Read> {
    inner: R,
    off: u64,
}

impl<R: Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, off: 0 }
    }
}

impl<R: Read> Read for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.off += n as u64;
        Ok(n)
    }
}

impl<R: Read> ByteSource for StreamSource<R> {
    fn tell(&self) -> u64 {
        self.off
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek_forward(&mut self, n: u64) -> Result<u64> {
        let did = skip_by_reading(&mut self.inner, n)?;
        self.off += did;
        Ok(did)
    }

    fn total_size(&self) -> Option<u64> {
        None
    }
}

/// An in-memory byte buffer source.
pub struct MemSource {
    data: Vec<u8>,
    off: u64,
}

impl MemSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, off: 0 }
    }
}

impl Read for MemSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.data[self.off.min(self.data.len() as u64) as usize..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.off += n as u64;
        Ok(n)
    }
}

impl ByteSource for MemSource {
    fn tell(&self) -> u64 {
        self.off
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek_forward(&mut self, n: u64) -> Result<u64> {
        let skip = n.min((self.data.len() as u64).saturating_sub(self.off));
        self.off += skip;
        Ok(skip)
    }

    fn total_size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.off = pos;
        Ok(())
    }
}

/// Presents a list of in-memory buffers followed by a live stream as one
/// logical stream, consuming the buffers first. Used to put "peeked" bytes
/// (magic numbers, signatures) back in front of a stream that cannot seek.
///
/// The composed stream is forward-only: [`ByteSource::seek_to`] refuses to
/// move backwards even when the tail could.
pub struct CatSource<S: ByteSource> {
    buffers: Vec<Vec<u8>>,
    current: usize,
    buf_pos: usize,
    tail: S,
    off: u64,
    size: Option<u64>,
}

impl<S: ByteSource> CatSource<S> {
    pub fn new(buffers: Vec<Vec<u8>>, tail: S) -> Self {
        let buffered: u64 = buffers.iter().map(|b| b.len() as u64).sum();
        let size = tail
            .total_size()
            .map(|total| buffered + total.saturating_sub(tail.tell()));
        Self {
            buffers,
            current: 0,
            buf_pos: 0,
            tail,
            off: 0,
            size,
        }
    }
}

impl<S: ByteSource> Read for CatSource<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.current < self.buffers.len() {
            let chunk = &self.buffers[self.current][self.buf_pos..];
            if chunk.is_empty() {
                self.current += 1;
                self.buf_pos = 0;
                continue;
            }
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            self.buf_pos += n;
            self.off += n as u64;
            return Ok(n);
        }
        let n = self.tail.read(buf)?;
        self.off += n as u64;
        Ok(n)
    }
}

impl<S: ByteSource> ByteSource for CatSource<S> {
    fn tell(&self) -> u64 {
        self.off
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek_forward(&mut self, n: u64) -> Result<u64> {
        let mut left = n;
        while left > 0 && self.current < self.buffers.len() {
            let chunk = self.buffers[self.current].len() - self.buf_pos;
            if chunk == 0 {
                self.current += 1;
                self.buf_pos = 0;
                continue;
            }
            let skip = (chunk as u64).min(left) as usize;
            self.buf_pos += skip;
            self.off += skip as u64;
            left -= skip as u64;
        }
        if left > 0 {
            let did = self.tail.seek_forward(left)?;
            self.off += did;
            left -= did;
        }
        Ok(n - left)
    }

    fn total_size(&self) -> Option<u64> {
        self.size
    }
}

/// A regular file sink. Patching seeks back, overwrites, and restores the
/// write position.
pub struct FileSink {
    file: File,
    off: u64,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { file, off: 0 })
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.off += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl ByteSink for FileSink {
    fn tell(&self) -> u64 {
        self.off
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn patch(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(data)?;
        self.file.seek(SeekFrom::Start(self.off))?;
        Ok(())
    }
}

/// A write-only live stream such as stdout. Cannot patch.
pub struct StreamSink<W: Write> {
    inner: W,
    off: u64,
}

impl<W: Write> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, off: 0 }
    }
}

impl<W: Write> Write for StreamSink<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.off += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> ByteSink for StreamSink<W> {
    fn tell(&self) -> u64 {
        self.off
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn patch(&mut self, _pos: u64, _data: &[u8]) -> Result<()> {
        Err(Error::UnseekableOutput)
    }
}

/// An in-memory sink, mostly for tests and for building boxes to insert.
#[derive(Default)]
pub struct MemSink {
    data: Vec<u8>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Write for MemSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ByteSink for MemSink {
    fn tell(&self) -> u64 {
        self.data.len() as u64
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn patch(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let pos = pos as usize;
        let end = pos + data.len();
        if end > self.data.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "patch range is beyond the written data",
            )));
        }
        self.data[pos..end].copy_from_slice(data);
        Ok(())
    }
}

// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Brotli (de)compression of `brob` box payloads.
//!
//! A `brob` box wraps another box: its payload is the wrapped box's 4CC
//! followed by the Brotli-compressed payload. [`CompressionOpts`] decides,
//! per box, whether the scan pipeline copies, compresses or decompresses,
//! and the streaming helpers here move the bytes in bounded blocks.

use std::io::{Read, Write};

use crate::box_header::{BoxInfo, BoxType};
use crate::error::{Error, Result};
use crate::io::COPY_BLOCK;
use crate::spec::{spec_list_matches, BoxSpec};

/// Brotli window size used for all encodes.
const LG_WINDOW_SIZE: u32 = 22;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompressWhen {
    Never,
    /// Compress only when a quick estimate says it pays off.
    Auto,
    Always,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecompressWhen {
    Never,
    Always,
}

/// What to do with one box, as decided by [`CompressionOpts::action`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BoxAction {
    /// Copy the box verbatim.
    Copy,
    /// Wrap the box in a `brob` box.
    Compress { auto: bool },
    /// Unwrap a `brob` box.
    Decompress,
}

#[derive(Clone, Debug)]
pub struct CompressionOpts {
    /// Brotli quality, 0..=11.
    pub effort: u32,
    pub compress_when: CompressWhen,
    /// Restricts which boxes are compression candidates; `None` means all.
    pub compress_boxes: Option<Vec<BoxSpec>>,
    pub decompress_when: DecompressWhen,
    /// Restricts which `brob` boxes are decompressed; `None` means all.
    pub decompress_boxes: Option<Vec<BoxSpec>>,
    /// Cap on the decompressed size of any single box. `None` disables the
    /// cap; `Some(0)` disables decompression entirely.
    pub decompress_max: Option<u64>,
    /// Never compress the box types a JXL decoder must be able to read
    /// directly: anything whose lowercase type starts with `jxl`, plus
    /// `ftyp` and `jbrd`.
    pub protect_jxl: bool,
    /// Whether existing `brob` boxes are candidates for re-compression.
    pub recompress: bool,
}

impl Default for CompressionOpts {
    fn default() -> Self {
        Self {
            effort: 11,
            compress_when: CompressWhen::Never,
            compress_boxes: None,
            decompress_when: DecompressWhen::Never,
            decompress_boxes: None,
            decompress_max: None,
            protect_jxl: true,
            recompress: false,
        }
    }
}

fn is_protected(ty: BoxType) -> bool {
    ty.to_ascii_lowercase().0.starts_with(b"jxl") || ty == BoxType::FTYP || ty == BoxType::JBRD
}

impl CompressionOpts {
    /// Decide the action for the box at `index`. Compression wins over
    /// decompression when both would apply.
    pub fn action(
        &self,
        index: u64,
        info: &BoxInfo,
        inner_type: Option<BoxType>,
        instance: u64,
    ) -> BoxAction {
        let outer = info.boxtype;
        if self.compress_when != CompressWhen::Never
            && ((!self.protect_jxl && self.compress_when != CompressWhen::Auto)
                || !is_protected(outer))
            && (self.recompress || outer != BoxType::BROB)
            && spec_list_matches(self.compress_boxes.as_deref(), index, info, inner_type, instance)
        {
            return BoxAction::Compress {
                auto: self.compress_when == CompressWhen::Auto,
            };
        }
        if self.decompress_when == DecompressWhen::Always
            && outer == BoxType::BROB
            && self.decompress_max != Some(0)
            && spec_list_matches(
                self.decompress_boxes.as_deref(),
                index,
                info,
                inner_type,
                instance,
            )
        {
            return BoxAction::Decompress;
        }
        BoxAction::Copy
    }

    /// Whether a matching `brob` box should be decompressed on extraction.
    pub fn wants_decompression(&self) -> bool {
        self.decompress_when == DecompressWhen::Always && self.decompress_max != Some(0)
    }
}

/// Compress `data` to a fresh buffer. Used for the auto-mode estimate and
/// for building boxes in memory.
pub fn compress_to_vec(data: &[u8], effort: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut enc = brotli::CompressorWriter::new(&mut out, COPY_BLOCK, effort, LG_WINDOW_SIZE);
    enc.write_all(data)?;
    drop(enc);
    Ok(out)
}

/// Stream-compress everything `src` yields into `dst` at the given effort.
pub fn compress_stream<W: Write>(src: &mut impl Read, dst: W, effort: u32) -> Result<()> {
    let mut enc = brotli::CompressorWriter::new(dst, COPY_BLOCK, effort, LG_WINDOW_SIZE);
    let mut buf = [0u8; COPY_BLOCK];
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(unwrap_source_error(e)),
        };
        enc.write_all(&buf[..n])?;
    }
    Ok(())
}

/// Stream-decompress a Brotli stream from `src` into `dst`, enforcing the
/// cumulative `max` cap on the decoded size when given.
pub fn decompress_stream<W: Write + ?Sized>(
    src: impl Read,
    dst: &mut W,
    max: Option<u64>,
) -> Result<u64> {
    let mut dec = brotli::Decompressor::new(src, COPY_BLOCK);
    let mut buf = [0u8; COPY_BLOCK];
    let mut total = 0u64;
    loop {
        let n = match dec.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(decode_error(e)),
        };
        total += n as u64;
        if let Some(max) = max {
            if total > max {
                return Err(Error::TooMuchData { limit: max });
            }
        }
        dst.write_all(&buf[..n])?;
    }
    Ok(total)
}

/// Decode a Brotli stream from `src` and re-encode it into `dst` at the
/// given effort, with the same decoded-size cap as plain decompression.
pub fn recompress_stream<W: Write>(
    src: impl Read,
    dst: W,
    effort: u32,
    max: Option<u64>,
) -> Result<u64> {
    let mut enc = brotli::CompressorWriter::new(dst, COPY_BLOCK, effort, LG_WINDOW_SIZE);
    decompress_stream(src, &mut enc, max)
}

/// Errors surfaced by the decoder either originate in the underlying box
/// source (smuggled through `std::io::Error`) or mean the Brotli stream
/// itself is corrupt.
fn decode_error(e: std::io::Error) -> Error {
    if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        if let Some(ours) = e.into_inner().and_then(|b| b.downcast::<Error>().ok()) {
            return *ours;
        }
        return Error::BrotliDecode(std::io::Error::other(
            "source error lost while decoding",
        ));
    }
    Error::BrotliDecode(e)
}

/// Same unwrapping for the encode path, where a read error is a plain I/O
/// problem rather than decoder corruption.
fn unwrap_source_error(e: std::io::Error) -> Error {
    if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        if let Some(ours) = e.into_inner().and_then(|b| b.downcast::<Error>().ok()) {
            return *ours;
        }
        return Error::Io(std::io::Error::other("source error lost while encoding"));
    }
    Error::Io(e)
}

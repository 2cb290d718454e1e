// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The scan pipeline: iterate boxes, match them against selectors, and
//! keep, drop, extract, count or probe them, applying the compression
//! transform along the way.
//!
//! Output sizes are deferred where they cannot be known up front: the
//! pipeline writes a zero size, streams the body, and patches the real size
//! afterwards when the sink can seek. On a non-seekable sink a deferred-size
//! box is only legal as the very last box written; any later write fails
//! with [`Error::UnseekableOutput`].

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::box_header::{write_box_header, BoxInfo, BoxType};
use crate::compress::{
    compress_stream, compress_to_vec, decompress_stream, recompress_stream, BoxAction,
    CompressionOpts,
};
use crate::error::{Error, Result};
use crate::io::{ByteSink, ByteSource, COPY_BLOCK};
use crate::reader::{BoxBodyReader, BoxReader};
use crate::spec::{spec_list_matches, BoxSpec};

/// What a scan does with the boxes the selector list accepts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScanMode {
    /// Emit matching boxes, drop the rest.
    Keep,
    /// Drop matching boxes, emit the rest.
    Drop,
    /// Emit the payload of the first matching box and stop.
    ExtractFirst,
    /// Count matching boxes; nothing is written.
    Count,
    /// Stop at the first matching box; nothing is written.
    Has,
}

/// Run one scan over `src`. `sink` may be `None` for the read-only modes.
/// Returns the number of selector matches seen (for [`ScanMode::Has`], 1 as
/// soon as anything matches).
///
/// # Panics
///
/// Panics if `sink` is `None` for a mode that writes.
pub fn scan<S: ByteSource>(
    src: S,
    mut sink: Option<&mut dyn ByteSink>,
    mode: ScanMode,
    specs: Option<&[BoxSpec]>,
    opts: &CompressionOpts,
) -> Result<u64> {
    let mut reader = BoxReader::new(src);
    let mut seen: HashMap<BoxType, u64> = HashMap::new();
    let mut matched = 0u64;
    let mut index = 0u64;
    let mut output_finalized = false;

    while let Some(info) = reader.next_box()? {
        // For a `brob` box, peek at the wrapped type. The peeked bytes are
        // kept for replay; everything before the last four is the header.
        let peek = if info.boxtype == BoxType::BROB {
            let header_len = reader.current_header_bytes().len() as u64;
            let buf = reader.read_current(Some(header_len + 4))?;
            if (buf.len() as u64) < header_len + 4 {
                return Err(Error::InvalidBmff(
                    "`brob` box too short to hold an inner type".into(),
                ));
            }
            Some(buf)
        } else {
            None
        };
        let inner_type = match &peek {
            Some(buf) => {
                let ty = BoxType(buf[buf.len() - 4..].try_into().unwrap());
                if !ty.is_printable() {
                    return Err(Error::InvalidBmff(format!(
                        "`brob` box wraps invalid inner type {ty}"
                    )));
                }
                Some(ty)
            }
            None => None,
        };
        let consumed_body: &[u8] = peek.as_ref().map_or(&[], |buf| &buf[buf.len() - 4..]);
        let effective_type = inner_type.unwrap_or(info.boxtype);
        let instance = seen.get(&effective_type).copied().unwrap_or(0);

        let m = spec_list_matches(specs, index, &info, inner_type, instance);
        if m {
            matched += 1;
        }

        match mode {
            ScanMode::Count => {}
            ScanMode::Has => {
                if m {
                    return Ok(1);
                }
            }
            ScanMode::ExtractFirst => {
                if m {
                    let sink = sink.as_deref_mut().expect("extraction requires a sink");
                    if info.boxtype == BoxType::BROB && opts.wants_decompression() {
                        decompress_stream(
                            BoxBodyReader::new(&mut reader),
                            sink,
                            opts.decompress_max,
                        )?;
                    } else if !consumed_body.is_empty() {
                        sink.write_all(consumed_body)?;
                        reader.copy_rest(sink)?;
                    } else {
                        reader.copy_payload(None, sink)?;
                    }
                    return Ok(matched);
                }
            }
            ScanMode::Keep | ScanMode::Drop => {
                let keep = (mode == ScanMode::Keep) == m;
                if keep {
                    let sink = sink.as_deref_mut().expect("filtering requires a sink");
                    if output_finalized {
                        return Err(Error::UnseekableOutput);
                    }
                    let action = opts.action(index, &info, inner_type, instance);
                    emit_box(
                        &mut reader,
                        sink,
                        &info,
                        consumed_body,
                        inner_type,
                        action,
                        opts,
                        &mut output_finalized,
                    )?;
                }
            }
        }

        *seen.entry(effective_type).or_insert(0) += 1;
        index += 1;
    }
    Ok(matched)
}

/// Copy the current box to `sink` unchanged, except that an implicit-size
/// final box is rewritten with an explicit size when the input size is
/// known or the output can be patched.
pub fn copy_box<S: ByteSource>(
    reader: &mut BoxReader<S>,
    sink: &mut dyn ByteSink,
    info: &BoxInfo,
) -> Result<()> {
    emit_verbatim(reader, sink, info, &[])
}

#[allow(clippy::too_many_arguments)]
fn emit_box<S: ByteSource>(
    reader: &mut BoxReader<S>,
    sink: &mut dyn ByteSink,
    info: &BoxInfo,
    consumed_body: &[u8],
    inner_type: Option<BoxType>,
    action: BoxAction,
    opts: &CompressionOpts,
    output_finalized: &mut bool,
) -> Result<()> {
    match action {
        BoxAction::Copy => emit_verbatim(reader, sink, info, consumed_body),
        BoxAction::Decompress => {
            let inner = inner_type.expect("decompression only applies to `brob` boxes");
            emit_deferred(reader, sink, info, inner, output_finalized, |reader, sink| {
                decompress_stream(BoxBodyReader::new(reader), sink, opts.decompress_max)?;
                Ok(())
            })
        }
        BoxAction::Compress { auto } => {
            if info.boxtype == BoxType::BROB {
                // Re-encode at the configured effort; the wrapped type and
                // box stay the same.
                let inner = inner_type.expect("`brob` peek always yields an inner type");
                emit_deferred(reader, sink, info, BoxType::BROB, output_finalized, |reader, sink| {
                    sink.write_all(&inner.0)?;
                    recompress_stream(
                        BoxBodyReader::new(reader),
                        &mut *sink,
                        opts.effort,
                        opts.decompress_max,
                    )?;
                    Ok(())
                })
            } else if auto {
                // Quick estimate: compress the first block, keep the result
                // only if it pays for the 4-byte inner type.
                let block = reader.read_payload(Some(COPY_BLOCK as u64))?;
                let compressed = compress_to_vec(&block, opts.effort)?;
                if compressed.len() as u64 + 4 < block.len() as u64 {
                    emit_deferred(reader, sink, info, BoxType::BROB, output_finalized, |reader, sink| {
                        sink.write_all(&info.boxtype.0)?;
                        let mut body = (&block[..]).chain(BoxBodyReader::new(reader));
                        compress_stream(&mut body, &mut *sink, opts.effort)
                    })
                } else {
                    emit_verbatim(reader, sink, info, &block)
                }
            } else {
                emit_deferred(reader, sink, info, BoxType::BROB, output_finalized, |reader, sink| {
                    sink.write_all(&info.boxtype.0)?;
                    compress_stream(&mut BoxBodyReader::new(reader), &mut *sink, opts.effort)
                })
            }
        }
    }
}

fn emit_verbatim<S: ByteSource>(
    reader: &mut BoxReader<S>,
    sink: &mut dyn ByteSink,
    info: &BoxInfo,
    consumed_body: &[u8],
) -> Result<()> {
    let header = reader.current_header_bytes().to_vec();
    if info.length > 0 {
        sink.write_all(&header)?;
        sink.write_all(consumed_body)?;
        reader.copy_rest(sink)?;
        return Ok(());
    }

    // Implicit-size final box: rewrite it with an explicit size when the
    // input size is known or the output can be patched; otherwise keep the
    // zero size, which remains valid for the last box.
    if let Some(total) = reader.source_total_size() {
        let box_len = total.saturating_sub(info.offset);
        write_rewritten_header(sink, info, box_len)?;
        sink.write_all(consumed_body)?;
        reader.copy_rest(sink)?;
    } else if sink.is_seekable() {
        let header_pos = sink.tell();
        sink.write_all(&header)?;
        sink.write_all(consumed_body)?;
        reader.copy_rest(sink)?;
        let box_len = sink.tell() - header_pos;
        patch_box_size(sink, header_pos, info.has_extended_size, box_len)?;
    } else {
        sink.write_all(&header)?;
        sink.write_all(consumed_body)?;
        reader.copy_rest(sink)?;
    }
    Ok(())
}

/// Emit a recoded box whose size is unknowable up front: write a zero size,
/// stream the body, then patch the real size, or leave the zero size when
/// the sink cannot seek (legal only for the last box written).
fn emit_deferred<S: ByteSource>(
    reader: &mut BoxReader<S>,
    sink: &mut dyn ByteSink,
    info: &BoxInfo,
    out_type: BoxType,
    output_finalized: &mut bool,
    body: impl FnOnce(&mut BoxReader<S>, &mut dyn ByteSink) -> Result<()>,
) -> Result<()> {
    let header_pos = sink.tell();
    write_box_header(sink, out_type, None)?;
    body(reader, sink)?;
    let box_len = sink.tell() - header_pos;
    if sink.is_seekable() {
        if box_len <= u32::MAX as u64 {
            sink.patch(header_pos, &(box_len as u32).to_be_bytes())?;
        } else if !info.extends_to_eof() {
            return Err(Error::BoxTooLarge(box_len));
        }
        // An oversized final box keeps the implicit zero size.
    } else {
        *output_finalized = true;
    }
    Ok(())
}

fn write_rewritten_header(
    sink: &mut dyn ByteSink,
    info: &BoxInfo,
    box_len: u64,
) -> Result<()> {
    if info.has_extended_size {
        sink.write_all(&1u32.to_be_bytes())?;
        sink.write_all(&info.boxtype.0)?;
        sink.write_all(&box_len.to_be_bytes())?;
    } else if box_len <= u32::MAX as u64 {
        sink.write_all(&(box_len as u32).to_be_bytes())?;
        sink.write_all(&info.boxtype.0)?;
    } else {
        // The 8-byte form cannot hold the size; switching to the extended
        // form grows the box by the extra header bytes.
        sink.write_all(&1u32.to_be_bytes())?;
        sink.write_all(&info.boxtype.0)?;
        sink.write_all(&(box_len + 8).to_be_bytes())?;
    }
    Ok(())
}

fn patch_box_size(
    sink: &mut dyn ByteSink,
    header_pos: u64,
    has_extended_size: bool,
    box_len: u64,
) -> Result<()> {
    if has_extended_size {
        sink.patch(header_pos + 8, &box_len.to_be_bytes())
    } else if box_len <= u32::MAX as u64 {
        sink.patch(header_pos, &(box_len as u32).to_be_bytes())
    } else {
        // Can't grow an already-written 8-byte header; the implicit zero
        // stays, which is valid for the final box.
        Ok(())
    }
}

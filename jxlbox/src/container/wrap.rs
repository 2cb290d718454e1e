// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::box_header::{write_box_header, BoxType, CODESTREAM_SIGNATURE, CONTAINER_SIGNATURE};
use crate::error::{Error, Result};
use crate::io::{copy_limited, read_exact_or_eof, ByteSink, ByteSource, CatSource};

/// The `ftyp` box every wrapped file starts with: brand `jxl `, minor
/// version 0, compatible brand `jxl `.
pub const FTYP_BOX: [u8; 20] = [
    0, 0, 0, 0x14, b'f', b't', b'y', b'p', b'j', b'x', b'l', b' ', 0, 0, 0, 0, b'j', b'x', b'l',
    b' ',
];

/// Wrap the raw codestream from `src` in a minimal container: signature,
/// `ftyp`, an optional `jxll` level declaration, then either a single
/// `jxlc` box or one `jxlp` box per `splits` segment.
///
/// `splits` are byte offsets into the codestream, measured from its first
/// byte; they are sorted before use. The final box gets an explicit size
/// when the input size is known, is patched in after the fact when `dst`
/// can seek, and otherwise keeps the implicit zero size.
pub fn wrap_codestream<S: ByteSource>(
    mut src: S,
    dst: &mut dyn ByteSink,
    level: Option<u8>,
    splits: Option<&[u64]>,
) -> Result<()> {
    let mut magic = [0u8; 2];
    let got = read_exact_or_eof(&mut src, &mut magic)?;
    if got < 2 || magic != CODESTREAM_SIGNATURE {
        if got == 2 && magic == CONTAINER_SIGNATURE[..2] {
            let mut rest = [0u8; 10];
            let got = read_exact_or_eof(&mut src, &mut rest)?;
            if got == 10 && rest == CONTAINER_SIGNATURE[2..] {
                return Err(Error::AlreadyContainer);
            }
        }
        return Err(Error::NotACodestream);
    }

    dst.write_all(&CONTAINER_SIGNATURE)?;
    dst.write_all(&FTYP_BOX)?;
    if let Some(level) = level {
        dst.write_all(&[0, 0, 0, 9])?;
        dst.write_all(b"jxll")?;
        dst.write_all(&[level])?;
    }

    // Put the signature bytes back in front of the codestream.
    let mut src = CatSource::new(vec![magic.to_vec()], src);

    match splits {
        None => emit_last_box(dst, BoxType::CODESTREAM, None, &mut src),
        Some(splits) => {
            let mut splits = splits.to_vec();
            splits.sort_unstable();
            let mut last_off = 0u64;
            for (i, &off) in splits.iter().enumerate() {
                let part = off - last_off;
                write_box_header(dst, BoxType::PARTIAL_CODESTREAM, Some(4 + part))?;
                dst.write_all(&(i as u32).to_be_bytes())?;
                let copied = copy_limited(&mut src, dst, Some(part))?;
                if copied != part {
                    return Err(Error::SplitOutOfRange(off));
                }
                last_off = off;
            }
            let final_seq = splits.len() as u32 | 0x8000_0000;
            emit_last_box(dst, BoxType::PARTIAL_CODESTREAM, Some(final_seq), &mut src)
        }
    }
}

/// Emit the final codestream box, holding everything `src` still has.
fn emit_last_box<S: ByteSource>(
    dst: &mut dyn ByteSink,
    boxtype: BoxType,
    seq: Option<u32>,
    src: &mut S,
) -> Result<()> {
    let prefix_len = if seq.is_some() { 4u64 } else { 0 };
    let remaining = src.total_size().map(|t| t.saturating_sub(src.tell()));

    if let Some(remaining) = remaining {
        write_box_header(dst, boxtype, Some(prefix_len + remaining))?;
        if let Some(seq) = seq {
            dst.write_all(&seq.to_be_bytes())?;
        }
        let copied = copy_limited(src, dst, Some(remaining))?;
        if copied != remaining {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("input shrank while wrapping: expected {remaining} bytes, got {copied}"),
            )));
        }
        Ok(())
    } else if dst.is_seekable() {
        let header_pos = dst.tell();
        write_box_header(dst, boxtype, None)?;
        if let Some(seq) = seq {
            dst.write_all(&seq.to_be_bytes())?;
        }
        copy_limited(src, dst, None)?;
        let box_len = dst.tell() - header_pos;
        if box_len <= u32::MAX as u64 {
            dst.patch(header_pos, &(box_len as u32).to_be_bytes())?;
        }
        // An oversized final box keeps the implicit zero size.
        Ok(())
    } else {
        write_box_header(dst, boxtype, None)?;
        if let Some(seq) = seq {
            dst.write_all(&seq.to_be_bytes())?;
        }
        copy_limited(src, dst, None)?;
        Ok(())
    }
}

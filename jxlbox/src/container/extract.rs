// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::io::Write;

use tracing::warn;

use crate::box_header::{BoxType, CODESTREAM_SIGNATURE, CONTAINER_SIGNATURE};
use crate::error::{Error, Result};
use crate::io::{read_exact_or_eof, ByteSource, CatSource};
use crate::reader::BoxReader;

/// Tracks where we are in the `jxlc`/`jxlp` sequencing rules: either a
/// single `jxlc` box, or a run of `jxlp` boxes with consecutive sequence
/// numbers whose last one has its MSB set.
#[derive(Debug, PartialEq, Eq)]
enum JxlpIndexState {
    Initial,
    SingleJxlc,
    Jxlp(u32),
    JxlpFinished,
}

/// What extraction observed besides the codestream itself.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    /// The container carried JPEG reconstruction data, which the raw
    /// codestream cannot represent.
    pub jbrd_seen: bool,
    /// Declared conformance level, when a `jxll` box was present.
    pub jxll_level: Option<u8>,
    /// The final `jxlp` box was not marked as terminal.
    pub unterminated_jxlp: bool,
}

/// Read a JPEG XL container from `src` and write the bare codestream to
/// `dst`, concatenating `jxlp` parts in sequence order.
pub fn extract_codestream<S: ByteSource, W: Write + ?Sized>(
    mut src: S,
    dst: &mut W,
) -> Result<ExtractSummary> {
    let mut sig = [0u8; 12];
    let got = read_exact_or_eof(&mut src, &mut sig)?;
    if got < 12 || sig != CONTAINER_SIGNATURE {
        if got >= 2 && sig[..2] == CODESTREAM_SIGNATURE {
            return Err(Error::RawCodestream);
        }
        return Err(Error::InvalidContainer(
            "input does not start with the JPEG XL container signature".into(),
        ));
    }

    // Put the signature back so box offsets stay file-relative; its `JXL `
    // box then flows through the loop like any other unhandled box.
    let mut reader = BoxReader::new(CatSource::new(vec![sig.to_vec()], src));
    let mut state = JxlpIndexState::Initial;
    let mut summary = ExtractSummary::default();

    while let Some(info) = reader.next_box()? {
        match info.boxtype {
            BoxType::CODESTREAM => {
                match state {
                    JxlpIndexState::Initial => state = JxlpIndexState::SingleJxlc,
                    JxlpIndexState::SingleJxlc => {
                        return Err(Error::InvalidContainer(
                            "duplicate `jxlc` box".into(),
                        ));
                    }
                    JxlpIndexState::Jxlp(_) | JxlpIndexState::JxlpFinished => {
                        return Err(Error::InvalidContainer(
                            "found `jxlc` box in a `jxlp` sequence".into(),
                        ));
                    }
                }
                reader.copy_payload(None, dst)?;
            }
            BoxType::PARTIAL_CODESTREAM => {
                let expected = match state {
                    JxlpIndexState::Initial => 0,
                    JxlpIndexState::Jxlp(next) => next,
                    JxlpIndexState::SingleJxlc => {
                        return Err(Error::InvalidContainer(
                            "found `jxlp` box after a `jxlc` box".into(),
                        ));
                    }
                    JxlpIndexState::JxlpFinished => {
                        return Err(Error::InvalidContainer(
                            "found another `jxlp` box after the final one".into(),
                        ));
                    }
                };
                let seq_bytes = reader.read_payload(Some(4))?;
                if seq_bytes.len() != 4 {
                    return Err(Error::InvalidContainer(
                        "`jxlp` box too short to hold a sequence number".into(),
                    ));
                }
                let seq = u32::from_be_bytes(seq_bytes.try_into().unwrap());
                let is_last = seq & 0x8000_0000 != 0;
                let index = seq & 0x7fff_ffff;
                if index != expected {
                    return Err(Error::InvalidContainer(format!(
                        "`jxlp` box out of sequence: expected {expected}, got {index}{}",
                        if is_last { " (last)" } else { "" }
                    )));
                }
                state = if is_last {
                    JxlpIndexState::JxlpFinished
                } else {
                    JxlpIndexState::Jxlp(expected + 1)
                };
                reader.copy_payload(None, dst)?;
            }
            BoxType::JBRD => {
                if !summary.jbrd_seen {
                    warn!(
                        "input contains JPEG reconstruction data; a JPEG cannot be \
                         losslessly reconstructed from the raw codestream"
                    );
                    summary.jbrd_seen = true;
                }
            }
            BoxType::LEVEL => {
                let level = reader.read_payload(Some(1))?;
                if level.len() != 1 {
                    return Err(Error::InvalidContainer("empty `jxll` box".into()));
                }
                if level[0] > 5 {
                    warn!(
                        level = level[0],
                        "the input declares a codestream level that a raw codestream \
                         should not use (level > 5)"
                    );
                }
                summary.jxll_level = Some(level[0]);
            }
            _ => {}
        }
    }

    match state {
        JxlpIndexState::Initial => Err(Error::InvalidContainer(
            "no `jxlc` or `jxlp` boxes found".into(),
        )),
        JxlpIndexState::Jxlp(_) => {
            warn!("the last `jxlp` box was not marked as being the last one");
            summary.unterminated_jxlp = true;
            Ok(summary)
        }
        _ => Ok(summary),
    }
}

// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use tracing::warn;

use crate::box_header::{write_box_header, BoxType, CODESTREAM_SIGNATURE, CONTAINER_SIGNATURE};
use crate::error::{Error, Result};
use crate::io::{read_exact_or_eof, ByteSink, ByteSource, CatSource};
use crate::reader::BoxReader;

/// An open merged `jxlp` box in the output: its header and sequence number
/// still hold placeholders until the run ends.
struct OpenRun {
    header_pos: u64,
    seq_pos: u64,
}

/// Merge each run of consecutive `jxlp` boxes into a single `jxlp` box,
/// renumbering the merged boxes from zero and keeping the terminal MSB of
/// each run's last member. Other boxes pass through unchanged. The merged
/// sizes are only known after the fact, so `dst` must be able to seek.
pub fn merge_jxlp<S: ByteSource>(src: S, dst: &mut dyn ByteSink) -> Result<()> {
    if !dst.is_seekable() {
        return Err(Error::UnseekableOutput);
    }

    let mut sig = [0u8; 12];
    let mut src = src;
    let got = read_exact_or_eof(&mut src, &mut sig)?;
    if got < 12 || sig != CONTAINER_SIGNATURE {
        if got >= 2 && sig[..2] == CODESTREAM_SIGNATURE {
            return Err(Error::RawCodestream);
        }
        return Err(Error::InvalidContainer(
            "input does not start with the JPEG XL container signature".into(),
        ));
    }

    let mut reader = BoxReader::new(CatSource::new(vec![sig.to_vec()], src));
    let mut run: Option<OpenRun> = None;
    let mut out_seq: u32 = 0;
    // Validation state for the input sequence numbers.
    let mut expected_in: u32 = 0;
    let mut input_finished = false;

    while let Some(info) = reader.next_box()? {
        if info.boxtype == BoxType::PARTIAL_CODESTREAM {
            if input_finished {
                return Err(Error::InvalidContainer(
                    "found another `jxlp` box after the final one".into(),
                ));
            }
            let seq_bytes = reader.read_payload(Some(4))?;
            if seq_bytes.len() != 4 {
                return Err(Error::InvalidContainer(
                    "`jxlp` box too short to hold a sequence number".into(),
                ));
            }
            let seq = u32::from_be_bytes(seq_bytes.try_into().unwrap());
            let is_last = seq & 0x8000_0000 != 0;
            let index = seq & 0x7fff_ffff;
            if index != expected_in {
                return Err(Error::InvalidContainer(format!(
                    "`jxlp` box out of sequence: expected {expected_in}, got {index}"
                )));
            }
            expected_in += 1;
            input_finished = is_last;

            if run.is_none() {
                let header_pos = dst.tell();
                write_box_header(dst, BoxType::PARTIAL_CODESTREAM, None)?;
                let seq_pos = dst.tell();
                dst.write_all(&0u32.to_be_bytes())?;
                run = Some(OpenRun {
                    header_pos,
                    seq_pos,
                });
            }
            reader.copy_payload(None, dst)?;
            if is_last {
                if let Some(open) = run.take() {
                    close_run(dst, open, out_seq, true, false)?;
                    out_seq += 1;
                }
            }
        } else {
            if let Some(open) = run.take() {
                close_run(dst, open, out_seq, false, false)?;
                out_seq += 1;
            }
            reader.copy_current(None, dst)?;
        }
    }

    if let Some(open) = run.take() {
        // The input never marked a terminal jxlp; the output stays
        // unterminated the same way. The input is exhausted, so this run is
        // by construction the last box written.
        warn!("the last `jxlp` box was not marked as being the last one");
        close_run(dst, open, out_seq, false, true)?;
    }
    Ok(())
}

fn close_run(
    dst: &mut dyn ByteSink,
    open: OpenRun,
    seq: u32,
    terminal: bool,
    is_final: bool,
) -> Result<()> {
    let box_len = dst.tell() - open.header_pos;
    if box_len <= u32::MAX as u64 {
        dst.patch(open.header_pos, &(box_len as u32).to_be_bytes())?;
    } else if !is_final {
        return Err(Error::BoxTooLarge(box_len));
    }
    // An oversized final run keeps the implicit zero size.
    let seq = if terminal { seq | 0x8000_0000 } else { seq };
    dst.patch(open.seq_pos, &seq.to_be_bytes())?;
    Ok(())
}

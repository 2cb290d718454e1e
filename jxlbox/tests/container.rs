// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::io::{Read, Write};

use jxlbox::box_header::{CONTAINER_SIGNATURE, CODESTREAM_SIGNATURE};
use jxlbox::container::{extract_codestream, merge_jxlp, wrap_codestream, FTYP_BOX};
use jxlbox::error::{Error, Result};
use jxlbox::io::{ByteSink, ByteSource, MemSink, MemSource, StreamSink, StreamSource};

fn boxed(ty: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(ty);
    out.extend_from_slice(payload);
    out
}

fn jxlp_boxed(seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = seq.to_be_bytes().to_vec();
    body.extend_from_slice(payload);
    boxed(b"jxlp", &body)
}

fn container_with(boxes: &[Vec<u8>]) -> Vec<u8> {
    let mut out = CONTAINER_SIGNATURE.to_vec();
    out.extend_from_slice(&FTYP_BOX);
    for b in boxes {
        out.extend_from_slice(b);
    }
    out
}

fn codestream(len: usize) -> Vec<u8> {
    let mut cs = CODESTREAM_SIGNATURE.to_vec();
    cs.extend((0..len.saturating_sub(2)).map(|i| (i * 7 + 1) as u8));
    cs
}

fn wrap_to_vec(input: &[u8], level: Option<u8>, splits: Option<&[u64]>) -> Vec<u8> {
    let mut sink = MemSink::new();
    wrap_codestream(MemSource::new(input.to_vec()), &mut sink, level, splits).unwrap();
    sink.into_inner()
}

fn extract_to_vec(input: &[u8]) -> (Vec<u8>, jxlbox::container::ExtractSummary) {
    let mut out = Vec::new();
    let summary = extract_codestream(MemSource::new(input.to_vec()), &mut out).unwrap();
    (out, summary)
}

#[test]
fn wrapping_emits_signature_ftyp_and_a_sized_jxlc() {
    let cs = [0xff, 0x0a, 0x00, 0x11];
    let out = wrap_to_vec(&cs, None, None);
    let mut expected = CONTAINER_SIGNATURE.to_vec();
    expected.extend_from_slice(&FTYP_BOX);
    expected.extend_from_slice(&12u32.to_be_bytes());
    expected.extend_from_slice(b"jxlc");
    expected.extend_from_slice(&cs);
    assert_eq!(out, expected);
}

#[test]
fn wrapping_with_a_level_adds_a_jxll_box() {
    let cs = [0xff, 0x0a, 0x77];
    let out = wrap_to_vec(&cs, Some(10), None);
    let sig_ftyp = CONTAINER_SIGNATURE.len() + FTYP_BOX.len();
    assert_eq!(
        &out[sig_ftyp..sig_ftyp + 9],
        &[0, 0, 0, 9, b'j', b'x', b'l', b'l', 10]
    );
    assert_eq!(&out[sig_ftyp + 9..sig_ftyp + 13], &11u32.to_be_bytes()[..]);
}

#[test]
fn wrapping_with_splits_numbers_the_parts() {
    // A codestream that opens FF 0A 00 11 and continues past the split.
    let mut cs = vec![0xff, 0x0a, 0x00, 0x11];
    cs.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0x01, 0x02, 0x03, 0x04]);
    let out = wrap_to_vec(&cs, None, Some(&[8]));

    let mut expected = CONTAINER_SIGNATURE.to_vec();
    expected.extend_from_slice(&FTYP_BOX);
    // First part: 8 codestream bytes behind sequence number 0.
    expected.extend_from_slice(&20u32.to_be_bytes());
    expected.extend_from_slice(b"jxlp");
    expected.extend_from_slice(&0u32.to_be_bytes());
    expected.extend_from_slice(&cs[..8]);
    // Terminal part: the rest behind sequence number 1 with the MSB set.
    expected.extend_from_slice(&16u32.to_be_bytes());
    expected.extend_from_slice(b"jxlp");
    expected.extend_from_slice(&0x8000_0001u32.to_be_bytes());
    expected.extend_from_slice(&cs[8..]);
    assert_eq!(out, expected);
}

#[test]
fn split_offsets_are_sorted_first() {
    let cs = codestream(32);
    let sorted = wrap_to_vec(&cs, None, Some(&[4, 9, 20]));
    let shuffled = wrap_to_vec(&cs, None, Some(&[20, 4, 9]));
    assert_eq!(sorted, shuffled);
}

#[test]
fn split_beyond_the_codestream_fails() {
    let cs = codestream(10);
    let mut sink = MemSink::new();
    let err =
        wrap_codestream(MemSource::new(cs), &mut sink, None, Some(&[100])).unwrap_err();
    assert!(matches!(err, Error::SplitOutOfRange(100)));
}

#[test]
fn wrapping_a_live_stream_patches_the_final_size() {
    let cs = codestream(40);
    let mut sink = MemSink::new();
    wrap_codestream(StreamSource::new(&cs[..]), &mut sink, None, None).unwrap();
    let out = sink.into_inner();
    let known = wrap_to_vec(&cs, None, None);
    assert_eq!(out, known);
}

#[test]
fn wrapping_to_a_live_stream_keeps_the_implicit_size() {
    let cs = codestream(40);
    let mut out = Vec::new();
    let mut sink = StreamSink::new(&mut out);
    wrap_codestream(StreamSource::new(&cs[..]), &mut sink, None, None).unwrap();
    drop(sink);
    let tail = &out[CONTAINER_SIGNATURE.len() + FTYP_BOX.len()..];
    assert_eq!(&tail[..4], &0u32.to_be_bytes());
    assert_eq!(&tail[4..8], b"jxlc");
    assert_eq!(&tail[8..], &cs[..]);
}

#[test]
fn wrapping_rejects_containers_and_garbage() {
    let container = container_with(&[boxed(b"jxlc", &codestream(4))]);
    let mut sink = MemSink::new();
    let err = wrap_codestream(MemSource::new(container), &mut sink, None, None).unwrap_err();
    assert!(matches!(err, Error::AlreadyContainer));

    let mut sink = MemSink::new();
    let err = wrap_codestream(
        MemSource::new(b"not a codestream".to_vec()),
        &mut sink,
        None,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotACodestream));

    let mut sink = MemSink::new();
    let err = wrap_codestream(MemSource::new(Vec::new()), &mut sink, None, None).unwrap_err();
    assert!(matches!(err, Error::NotACodestream));
}

#[test]
fn extracting_a_jxlc_container() {
    let cs = codestream(25);
    let input = container_with(&[boxed(b"jxlc", &cs)]);
    let (out, summary) = extract_to_vec(&input);
    assert_eq!(out, cs);
    assert_eq!(summary, Default::default());
}

#[test]
fn extracting_concatenates_jxlp_parts() {
    // Two parts with sequence numbers 0 and 1 with the terminal MSB set.
    let input = container_with(&[
        jxlp_boxed(0, &[0xff, 0x0a, 0x00, 0x11]),
        jxlp_boxed(0x8000_0001, &[0x22, 0x33]),
    ]);
    let (out, summary) = extract_to_vec(&input);
    assert_eq!(out, &[0xff, 0x0a, 0x00, 0x11, 0x22, 0x33]);
    assert!(!summary.unterminated_jxlp);
}

#[test]
fn extract_reports_jbrd_and_level() {
    let cs = codestream(10);
    let input = container_with(&[
        boxed(b"jxll", &[10]),
        boxed(b"jbrd", b"recon data"),
        boxed(b"jxlc", &cs),
    ]);
    let (out, summary) = extract_to_vec(&input);
    assert_eq!(out, cs);
    assert!(summary.jbrd_seen);
    assert_eq!(summary.jxll_level, Some(10));
}

#[test]
fn extract_warns_about_an_unterminated_jxlp_sequence() {
    let input = container_with(&[jxlp_boxed(0, &codestream(6)), jxlp_boxed(1, b"xy")]);
    let (out, summary) = extract_to_vec(&input);
    assert_eq!(out.len(), 8);
    assert!(summary.unterminated_jxlp);
}

#[test]
fn extract_rejects_container_rule_violations() {
    let extract_err = |input: Vec<u8>| {
        let mut out = Vec::new();
        extract_codestream(MemSource::new(input), &mut out).unwrap_err()
    };

    // Duplicate jxlc.
    let input = container_with(&[boxed(b"jxlc", b"\xff\x0a"), boxed(b"jxlc", b"\xff\x0a")]);
    assert!(matches!(extract_err(input), Error::InvalidContainer(_)));

    // jxlp after jxlc.
    let input = container_with(&[boxed(b"jxlc", b"\xff\x0a"), jxlp_boxed(0x8000_0000, b"")]);
    assert!(matches!(extract_err(input), Error::InvalidContainer(_)));

    // jxlc inside a jxlp run.
    let input = container_with(&[jxlp_boxed(0, b"\xff\x0a"), boxed(b"jxlc", b"xx")]);
    assert!(matches!(extract_err(input), Error::InvalidContainer(_)));

    // Out-of-sequence jxlp.
    let input = container_with(&[jxlp_boxed(0, b"\xff\x0a"), jxlp_boxed(0x8000_0002, b"")]);
    assert!(matches!(extract_err(input), Error::InvalidContainer(_)));

    // Another jxlp after the terminal one.
    let input = container_with(&[
        jxlp_boxed(0, b"\xff\x0a"),
        jxlp_boxed(0x8000_0001, b""),
        jxlp_boxed(2, b""),
    ]);
    assert!(matches!(extract_err(input), Error::InvalidContainer(_)));

    // No codestream boxes at all.
    let input = container_with(&[boxed(b"Exif", b"meta")]);
    assert!(matches!(extract_err(input), Error::InvalidContainer(_)));

    // Raw codestream instead of a container.
    assert!(matches!(extract_err(codestream(20)), Error::RawCodestream));

    // Not a JXL file at all.
    assert!(matches!(
        extract_err(b"RIFFxxxx".to_vec()),
        Error::InvalidContainer(_)
    ));
}

#[test]
fn extract_inverts_wrap() {
    let cs = codestream(100);
    for (level, splits) in [
        (None, None),
        (Some(5), None),
        (None, Some(&[0u64, 10, 50][..])),
        (Some(10), Some(&[98][..])),
        (None, Some(&[][..])),
    ] {
        let wrapped = wrap_to_vec(&cs, level, splits);
        let (out, summary) = extract_to_vec(&wrapped);
        assert_eq!(out, cs, "level {level:?} splits {splits:?}");
        assert_eq!(summary.jxll_level, level);
    }
}

#[test]
fn merging_joins_runs_and_renumbers() {
    let input = container_with(&[
        jxlp_boxed(0, b"part0 "),
        jxlp_boxed(1, b"part1 "),
        boxed(b"Exif", b"meta"),
        jxlp_boxed(2, b"part2 "),
        jxlp_boxed(0x8000_0003, b"part3"),
    ]);
    let mut sink = MemSink::new();
    merge_jxlp(MemSource::new(input.clone()), &mut sink).unwrap();
    let out = sink.into_inner();

    let expected = container_with(&[
        jxlp_boxed(0, b"part0 part1 "),
        boxed(b"Exif", b"meta"),
        jxlp_boxed(0x8000_0001, b"part2 part3"),
    ]);
    assert_eq!(out, expected);

    // The merged container extracts to the same codestream.
    let (merged_cs, _) = extract_to_vec(&out);
    let (original_cs, _) = extract_to_vec(&input);
    assert_eq!(merged_cs, original_cs);
}

#[test]
fn merging_preserves_a_single_box_stream() {
    let input = container_with(&[boxed(b"jxlc", &codestream(16))]);
    let mut sink = MemSink::new();
    merge_jxlp(MemSource::new(input.clone()), &mut sink).unwrap();
    assert_eq!(sink.into_inner(), input);
}

#[test]
fn merging_requires_a_seekable_output() {
    let input = container_with(&[jxlp_boxed(0x8000_0000, b"x")]);
    let mut out = Vec::new();
    let mut sink = StreamSink::new(&mut out);
    let err = merge_jxlp(MemSource::new(input), &mut sink).unwrap_err();
    assert!(matches!(err, Error::UnseekableOutput));
}

#[test]
fn merging_validates_the_input_sequence() {
    let input = container_with(&[jxlp_boxed(0, b"a"), jxlp_boxed(5, b"b")]);
    let mut sink = MemSink::new();
    let err = merge_jxlp(MemSource::new(input), &mut sink).unwrap_err();
    assert!(matches!(err, Error::InvalidContainer(_)));
}

/// Streams some literal bytes followed by zeros, so multi-gigabyte box
/// payloads don't have to exist in memory.
struct ZeroTailSource {
    prefix: Vec<u8>,
    total: u64,
    off: u64,
}

impl Read for ZeroTailSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.off >= self.total {
            return Ok(0);
        }
        let prefix_len = self.prefix.len() as u64;
        if self.off < prefix_len {
            let chunk = &self.prefix[self.off as usize..];
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            self.off += n as u64;
            return Ok(n);
        }
        let n = (self.total - self.off).min(buf.len() as u64) as usize;
        buf[..n].fill(0);
        self.off += n as u64;
        Ok(n)
    }
}

impl ByteSource for ZeroTailSource {
    fn tell(&self) -> u64 {
        self.off
    }
    fn is_seekable(&self) -> bool {
        false
    }
    fn seek_forward(&mut self, n: u64) -> Result<u64> {
        let did = n.min(self.total - self.off);
        self.off += did;
        Ok(did)
    }
    fn total_size(&self) -> Option<u64> {
        None
    }
}

/// Discards everything written to it, keeping only the write position and
/// the patches that were requested.
#[derive(Default)]
struct NullSink {
    len: u64,
    patches: Vec<(u64, Vec<u8>)>,
}

impl Write for NullSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.len += buf.len() as u64;
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ByteSink for NullSink {
    fn tell(&self) -> u64 {
        self.len
    }
    fn is_seekable(&self) -> bool {
        true
    }
    fn patch(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.patches.push((pos, data.to_vec()));
        Ok(())
    }
}

#[test]
fn merging_an_oversized_final_run_keeps_the_implicit_size() {
    // A single unterminated jxlp box whose payload is big enough that the
    // merged size cannot fit a 32-bit field.
    let part = u32::MAX as u64;
    let mut prefix = CONTAINER_SIGNATURE.to_vec();
    prefix.extend_from_slice(&1u32.to_be_bytes());
    prefix.extend_from_slice(b"jxlp");
    prefix.extend_from_slice(&(16 + 4 + part).to_be_bytes());
    prefix.extend_from_slice(&0u32.to_be_bytes());
    let total = prefix.len() as u64 + part;
    let src = ZeroTailSource {
        prefix,
        total,
        off: 0,
    };
    let mut sink = NullSink::default();
    merge_jxlp(src, &mut sink).unwrap();

    // Signature box, then the merged 8-byte header, sequence number, and
    // the concatenated payload.
    assert_eq!(sink.len, 12 + 8 + 4 + part);
    // Only the sequence number was patched; the zero size written at
    // offset 12 stays, which is valid for the final box.
    assert_eq!(sink.patches, vec![(20, 0u32.to_be_bytes().to_vec())]);
}

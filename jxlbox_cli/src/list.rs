// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! `list`-mode inspection: per-box detail strings and the column layout.

use std::io::Write;

use jxlbox::box_header::{BoxInfo, BoxType};
use jxlbox::error::Result;
use jxlbox::io::ByteSource;
use jxlbox::reader::BoxReader;

const INVALID: &str = "invalid?";

pub struct BoxRow {
    pub info: BoxInfo,
    pub detail: Option<String>,
}

/// Walk all boxes, probing the handful of types whose payload has a short,
/// human-readable summary. The final box's length is resolved to its real
/// size when it was implicit.
pub fn collect_rows<S: ByteSource>(reader: &mut BoxReader<S>) -> Result<Vec<BoxRow>> {
    let mut rows = Vec::new();
    while let Some(info) = reader.next_box()? {
        let detail = match info.boxtype {
            BoxType::BROB => {
                let inner = reader.read_payload(Some(4))?;
                Some(if inner.len() == 4 {
                    format!(
                        "Compressed {} box.",
                        BoxType(inner.try_into().unwrap())
                    )
                } else {
                    INVALID.to_string()
                })
            }
            BoxType(ref t) if t == b"Exif" => Some(exif_detail(reader)?),
            BoxType::JBRD => Some("JPEG reconstruction data.".to_string()),
            BoxType::LEVEL => {
                let level = reader.read_payload(Some(1))?;
                Some(match level.first() {
                    Some(&level) => format!("JPEG XL conformance level {level}."),
                    None => INVALID.to_string(),
                })
            }
            BoxType(ref t) if t == b"uuid" => {
                let bytes = reader.read_payload(Some(16))?;
                Some(match <[u8; 16]>::try_from(bytes.as_slice()) {
                    Ok(bytes) => uuid::Uuid::from_bytes(bytes).to_string(),
                    Err(_) => INVALID.to_string(),
                })
            }
            _ => None,
        };
        rows.push(BoxRow { info, detail });
    }
    if let Some(last) = rows.last_mut() {
        last.info.length = reader.final_box_size()?;
    }
    Ok(rows)
}

/// An `Exif` box starts with a 4-byte offset to the TIFF header inside the
/// remaining payload; report the header's endianness when it checks out.
fn exif_detail<S: ByteSource>(reader: &mut BoxReader<S>) -> Result<String> {
    let offset_bytes = reader.read_payload(Some(4))?;
    let Ok(offset_bytes) = <[u8; 4]>::try_from(offset_bytes.as_slice()) else {
        return Ok(INVALID.to_string());
    };
    let tiff_offset = u32::from_be_bytes(offset_bytes) as u64;
    let moved = reader.seek_payload(tiff_offset)?;
    if moved != tiff_offset {
        return Ok(format!("TIFF offset is invalid ({tiff_offset})."));
    }
    let header = reader.read_payload(Some(4))?;
    if header != b"II\x2a\0" && header != b"MM\0\x2a" {
        return Ok(format!("TIFF header at 0x{tiff_offset:x} is invalid."));
    }
    let endian = if header[0] == b'M' { "Big" } else { "Little" };
    Ok(format!(
        "{endian}-endian TIFF header at 0x{tiff_offset:x}."
    ))
}

/// Render the table: index, hex offset, decimal length, type, detail, plus
/// a flag for boxes that waste 8 bytes on an unneeded extended size.
pub fn render(out: &mut impl Write, heading: Option<&str>, rows: &[BoxRow]) -> std::io::Result<()> {
    // Forced minimums keep the "0x" prefix and the column titles fitting.
    let largest_offset = rows.iter().map(|r| r.info.offset).max().unwrap_or(0).max(0x100);
    let largest_length = rows.iter().map(|r| r.info.length).max().unwrap_or(0).max(100);
    let index_width = decimal_width(rows.len() as u64);
    let offset_width = hex_width(largest_offset);
    let length_width = decimal_width(largest_length);

    if let Some(heading) = heading {
        writeln!(out, "{heading}:")?;
    }
    let headings = format!(
        "seq{}{:<offset_width$}   {:>length_width$} type",
        " ".repeat(index_width),
        "off",
        "len",
    );
    writeln!(out, "{headings}")?;
    writeln!(out, "{}", "-".repeat(headings.len()))?;

    let mut unnecessary = false;
    for (i, row) in rows.iter().enumerate() {
        write!(
            out,
            "[{i:0index_width$}] 0x{:0offset_width$x} {:length_width$} {}",
            row.info.offset, row.info.length, row.info.boxtype,
        )?;
        if let Some(detail) = &row.detail {
            write!(out, " : {detail}")?;
        }
        // The diagnostic only applies to non-final boxes; a final box may
        // carry the extended form it was read with.
        if i + 1 < rows.len() && row.info.has_unnecessary_extended_size() {
            write!(out, " *")?;
            unnecessary = true;
        }
        writeln!(out)?;
    }
    if unnecessary {
        writeln!(out, "\n  *Unnecessary use of extended box size wastes 8 bytes.")?;
    }
    Ok(())
}

fn decimal_width(value: u64) -> usize {
    value.max(1).to_string().len()
}

fn hex_width(value: u64) -> usize {
    format!("{:x}", value.max(1)).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jxlbox::io::MemSource;

    fn boxed(ty: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
        out.extend_from_slice(ty);
        out.extend_from_slice(payload);
        out
    }

    fn rows_for(data: Vec<u8>) -> Vec<BoxRow> {
        let mut reader = BoxReader::new(MemSource::new(data));
        collect_rows(&mut reader).unwrap()
    }

    #[test]
    fn details_for_known_types() {
        let mut data = boxed(b"jxll", &[5]);
        data.extend(boxed(b"brob", b"Exifxxxx"));
        data.extend(boxed(b"jbrd", b"x"));
        let mut exif = b"\0\0\0\0II\x2a\0".to_vec();
        exif.extend_from_slice(&[0; 4]);
        data.extend(boxed(b"Exif", &exif));
        data.extend(boxed(b"uuid", &[0xab; 16]));

        let rows = rows_for(data);
        let details: Vec<_> = rows.iter().map(|r| r.detail.as_deref()).collect();
        assert_eq!(details[0], Some("JPEG XL conformance level 5."));
        assert_eq!(details[1], Some("Compressed Exif box."));
        assert_eq!(details[2], Some("JPEG reconstruction data."));
        assert_eq!(details[3], Some("Little-endian TIFF header at 0x0."));
        assert_eq!(
            details[4],
            Some("abababab-abab-abab-abab-abababababab")
        );
    }

    #[test]
    fn exif_detail_flags_bad_offsets() {
        let exif = b"\0\0\0\x40II\x2a\0".to_vec();
        let rows = rows_for(boxed(b"Exif", &exif));
        assert_eq!(
            rows[0].detail.as_deref(),
            Some("TIFF offset is invalid (64).")
        );

        let mut exif = b"\0\0\0\x04".to_vec();
        exif.extend_from_slice(b"QQ\x2a\0");
        let mut data = exif.clone();
        data.extend_from_slice(&[0; 4]);
        let rows = rows_for(boxed(b"Exif", &data));
        assert_eq!(
            rows[0].detail.as_deref(),
            Some("TIFF header at 0x4 is invalid.")
        );
    }

    #[test]
    fn implicit_final_length_is_resolved() {
        let mut data = boxed(b"AAAA", b"");
        data.extend_from_slice(b"\0\0\0\0DDDD");
        data.extend_from_slice(&[0u8; 40]);
        let rows = rows_for(data);
        assert_eq!(rows[1].info.length, 48);
    }

    #[test]
    fn renders_columns_and_extended_size_flag() {
        let mut data = boxed(b"AAAA", b"aa");
        // Unnecessary extended size on a non-final box.
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"BBBB");
        data.extend_from_slice(&17u64.to_be_bytes());
        data.push(b'b');
        data.extend(boxed(b"CCCC", b""));
        let rows = rows_for(data);

        let mut out = Vec::new();
        render(&mut out, None, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "seq off   len type");
        assert_eq!(lines[1], "------------------");
        assert_eq!(lines[2], "[0] 0x000  10 AAAA");
        assert_eq!(lines[3], "[1] 0x00a  17 BBBB *");
        assert_eq!(lines[4], "[2] 0x01b   8 CCCC");
        assert!(text.ends_with("*Unnecessary use of extended box size wastes 8 bytes.\n"));
    }
}

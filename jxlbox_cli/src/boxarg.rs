// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Parsing of `--box TYPE=TEXT` / `--box TYPE@FILE` arguments.

use std::path::PathBuf;

use clap::ValueEnum;
use jxlbox::box_header::BoxType;

/// Text encoding for `--box TYPE=TEXT` payloads.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

/// Where an added box's payload comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadArg {
    Text(String),
    File(PathBuf),
}

/// Split a `--box` argument into the box type and its payload source. The
/// first `=` introduces inline text, the first `@` a file path; the type
/// before it is 1 to 4 printable-ASCII characters, padded with spaces.
pub fn parse_box_arg(arg: &str) -> Result<(BoxType, PayloadArg), String> {
    let Some(split) = arg.find(['=', '@']) else {
        return Err(format!(
            "`{arg}`: expected TYPE=TEXT or TYPE@FILE"
        ));
    };
    let (type_str, rest) = arg.split_at(split);
    let payload = match rest.as_bytes()[0] {
        b'=' => PayloadArg::Text(rest[1..].to_string()),
        _ => PayloadArg::File(PathBuf::from(&rest[1..])),
    };

    let type_bytes = type_str.as_bytes();
    if type_bytes.is_empty() || type_bytes.len() > 4 {
        return Err(format!(
            "`{arg}`: box types are 1 to 4 characters"
        ));
    }
    let mut ty = [b' '; 4];
    ty[..type_bytes.len()].copy_from_slice(type_bytes);
    let ty = BoxType(ty);
    if !ty.is_printable() {
        return Err(format!("`{arg}`: box types must be printable ASCII"));
    }
    Ok((ty, payload))
}

/// Encode inline text with the requested encoding.
pub fn encode_text(text: &str, encoding: Encoding) -> Result<Vec<u8>, String> {
    match encoding {
        Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
        Encoding::Ascii => {
            if !text.is_ascii() {
                return Err(format!("`{text}` is not pure ASCII"));
            }
            Ok(text.as_bytes().to_vec())
        }
        Encoding::Latin1 => text
            .chars()
            .map(|c| {
                let cp = c as u32;
                u8::try_from(cp).map_err(|_| format!("`{c}` has no Latin-1 encoding"))
            })
            .collect(),
    }
}

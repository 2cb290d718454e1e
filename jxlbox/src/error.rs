// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid ISO BMFF structure: {0}")]
    InvalidBmff(String),
    #[error("Input is a raw JPEG XL codestream, not a container")]
    RawCodestream,
    #[error("Input is already a JPEG XL container")]
    AlreadyContainer,
    #[error("Input is not a raw JPEG XL codestream")]
    NotACodestream,
    #[error("Invalid JPEG XL container: {0}")]
    InvalidContainer(String),
    #[error("Invalid box selector: {0}")]
    InvalidBoxSpec(String),
    #[error("Seeking backwards in a non-seekable input")]
    UnseekableInput,
    #[error("A box with a deferred size was already written to a non-seekable output")]
    UnseekableOutput,
    #[error("Decompressed data exceeds the configured limit of {limit} bytes")]
    TooMuchData { limit: u64 },
    #[error("Split offset {0} is beyond the end of the codestream")]
    SplitOutOfRange(u64),
    #[error("A non-final box of {0} bytes does not fit a 32-bit size field (not supported yet)")]
    BoxTooLarge(u64),
    #[error("Brotli stream is corrupt: {0}")]
    BrotliDecode(io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

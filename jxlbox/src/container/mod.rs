// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! JPEG XL container assembly and disassembly: wrapping a raw codestream
//! in boxes, extracting the codestream back out of `jxlc`/`jxlp` sequences,
//! and merging `jxlp` runs.

mod extract;
mod merge;
mod wrap;

pub use extract::{extract_codestream, ExtractSummary};
pub use merge::merge_jxlp;
pub use wrap::{wrap_codestream, FTYP_BOX};

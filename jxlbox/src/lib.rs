// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Streaming engine for ISO BMFF box streams, with special support for the
//! JPEG XL container format (ISO/IEC 18181-2).
//!
//! The engine is a pull-pipeline: a [`io::ByteSource`] feeds a
//! [`reader::BoxReader`], which hands one box at a time to the
//! [`scan`] pipeline, which matches each box against [`spec::BoxSpec`]
//! selectors and copies, drops, extracts or (de)compresses it into a
//! [`io::ByteSink`]. Both ends work on non-seekable streams; seekability is
//! only ever exploited, never required, except where a deferred box size
//! cannot be fixed up any other way.

pub mod box_header;
pub mod compress;
pub mod container;
pub mod error;
pub mod io;
pub mod reader;
pub mod scan;
pub mod spec;

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # kiln-export
//!
//! Bulk export/import codec for archived data points: a self-describing
//! binary file of length-prefixed JSON blocks with an index trailer,
//! optionally zstd-compressed. Files conventionally carry a `.plc`
//! extension, though nothing enforces it.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod point;
pub mod reader;
pub mod writer;

pub use point::{BlockIndex, Point};
pub use reader::ArchiveReader;
pub use writer::{ArchiveWriter, BLOCK_SIZE, MAGIC_COMPRESSED, MAGIC_RAW};

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Archive writer.
//!
//! Packs an ordered stream of [`Point`]s into a self-describing file:
//!
//! ```text
//! ┌──────────┬───────────────────────────────────────────────┬───────────────┬───────────┐
//! │ 8-byte   │ repeated blocks: [u32 len BE][len bytes body] │ index-json    │ u32 len BE│
//! │ magic    │                                               │ (utf-8)       │           │
//! └──────────┴───────────────────────────────────────────────┴───────────────┴───────────┘
//! ```
//!
//! Block bodies are JSON point arrays, zstd-compressed when the writer was
//! opened with compression. Blocks hold exactly [`BLOCK_SIZE`] points
//! except for the tail block flushed by [`ArchiveWriter::close`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use kiln_core::error::ExportResult;

use crate::point::{BlockIndex, Point};

/// Magic header of compressed archives.
pub const MAGIC_COMPRESSED: &[u8; 8] = b"PLCEXP1 ";

/// Magic header of uncompressed archives.
pub const MAGIC_RAW: &[u8; 8] = b"PLCRAW1 ";

/// Points per block. Fixed: it keeps the index small while giving
/// compression a useful window.
pub const BLOCK_SIZE: usize = 1000;

/// zstd compression level for block bodies.
const ZSTD_LEVEL: i32 = 3;

// =============================================================================
// ArchiveWriter
// =============================================================================

/// Writes points into the block-indexed archive format.
///
/// Methods take `&mut self`; callers that share one file across tasks wrap
/// the writer in a mutex.
pub struct ArchiveWriter<W: Write> {
    sink: W,
    compression: bool,
    current_block: Vec<Point>,
    index: Vec<BlockIndex>,
    offset: u64,
    points_written: u64,
}

impl ArchiveWriter<BufWriter<File>> {
    /// Creates an archive file at `path`.
    pub fn create(path: impl AsRef<Path>, compression: bool) -> ExportResult<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), compression)
    }
}

impl<W: Write> ArchiveWriter<W> {
    /// Starts an archive on an arbitrary sink, writing the magic header.
    pub fn new(mut sink: W, compression: bool) -> ExportResult<Self> {
        let magic = if compression {
            MAGIC_COMPRESSED
        } else {
            MAGIC_RAW
        };
        sink.write_all(magic)?;

        Ok(Self {
            sink,
            compression,
            current_block: Vec::with_capacity(BLOCK_SIZE),
            index: Vec::new(),
            offset: magic.len() as u64,
            points_written: 0,
        })
    }

    /// Appends points, flushing a block each time it fills.
    pub fn write_batch(&mut self, points: impl IntoIterator<Item = Point>) -> ExportResult<()> {
        for point in points {
            self.current_block.push(point);
            if self.current_block.len() >= BLOCK_SIZE {
                self.flush_block()?;
            }
        }
        Ok(())
    }

    /// Number of complete blocks written so far.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Number of points accepted so far (flushed or pending).
    pub fn point_count(&self) -> u64 {
        self.points_written + self.current_block.len() as u64
    }

    /// Flushes the partial tail block, writes the index trailer and flushes
    /// the sink.
    pub fn close(mut self) -> ExportResult<()> {
        self.flush_block()?;

        let index_json = serde_json::to_vec(&self.index).map_err(std::io::Error::from)?;
        self.sink.write_all(&index_json)?;
        self.sink
            .write_all(&(index_json.len() as u32).to_be_bytes())?;
        self.sink.flush()?;
        Ok(())
    }

    fn flush_block(&mut self) -> ExportResult<()> {
        if self.current_block.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&self.current_block).map_err(std::io::Error::from)?;
        let encoded = if self.compression {
            zstd::encode_all(body.as_slice(), ZSTD_LEVEL)?
        } else {
            body
        };

        self.sink
            .write_all(&(encoded.len() as u32).to_be_bytes())?;
        self.sink.write_all(&encoded)?;

        // The index records the offset of the length prefix, not the body.
        self.index.push(BlockIndex {
            offset: self.offset,
            length: 4 + encoded.len() as u64,
            point_count: self.current_block.len(),
            start_time: self.current_block[0].timestamp,
            end_time: self.current_block[self.current_block.len() - 1].timestamp,
        });

        self.offset += 4 + encoded.len() as u64;
        self.points_written += self.current_block.len() as u64;
        self.current_block.clear();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kiln_core::types::{ChamberId, MachineId, SymbolPath, Value};

    fn point(n: i64) -> Point {
        Point {
            timestamp: Utc::now(),
            machine: MachineId::new("m1"),
            chamber: ChamberId::new("c1"),
            symbol: SymbolPath::new("GVL.x"),
            value: Value::Int64(n),
        }
    }

    #[test]
    fn magic_selects_compression_mode() {
        let mut raw = Vec::new();
        ArchiveWriter::new(&mut raw, false).unwrap().close().unwrap();
        assert_eq!(&raw[..8], MAGIC_RAW);

        let mut compressed = Vec::new();
        ArchiveWriter::new(&mut compressed, true)
            .unwrap()
            .close()
            .unwrap();
        assert_eq!(&compressed[..8], MAGIC_COMPRESSED);
    }

    #[test]
    fn blocks_flush_at_block_size() {
        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf, false).unwrap();

        writer
            .write_batch((0..BLOCK_SIZE as i64).map(point))
            .unwrap();
        assert_eq!(writer.block_count(), 1);

        // A partial block stays pending until close.
        writer.write_batch((0..3).map(point)).unwrap();
        assert_eq!(writer.block_count(), 1);
        assert_eq!(writer.point_count(), BLOCK_SIZE as u64 + 3);
        writer.close().unwrap();
    }

    #[test]
    fn index_offsets_ascend() {
        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf, true).unwrap();
        writer
            .write_batch((0..2500).map(point))
            .unwrap();
        assert_eq!(writer.block_count(), 2);

        let offsets: Vec<u64> = writer.index.iter().map(|b| b.offset).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(offsets[0], 8);
        writer.close().unwrap();
    }
}

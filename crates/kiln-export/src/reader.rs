// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Archive reader.
//!
//! Opens a file produced by [`ArchiveWriter`](crate::writer::ArchiveWriter),
//! derives the compression mode from the magic header, loads the trailing
//! block index and serves random access to individual blocks.
//!
//! Decoding is strict: a record whose value does not match a supported
//! shape fails the whole block instead of defaulting to zero.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use kiln_core::error::{ExportError, ExportResult};

use crate::point::{BlockIndex, Point};
use crate::writer::{MAGIC_COMPRESSED, MAGIC_RAW};

// =============================================================================
// ArchiveReader
// =============================================================================

/// Reads a block-indexed archive.
#[derive(Debug)]
pub struct ArchiveReader<R: Read + Seek> {
    source: R,
    index: Vec<BlockIndex>,
    compression: bool,
}

impl ArchiveReader<BufReader<File>> {
    /// Opens an archive file.
    pub fn open(path: impl AsRef<Path>) -> ExportResult<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Opens an archive on an arbitrary seekable source.
    pub fn new(mut source: R) -> ExportResult<Self> {
        let mut magic = [0u8; 8];
        source.read_exact(&mut magic).map_err(|_| {
            ExportError::bad_format("file too short for magic header")
        })?;

        let compression = if &magic == MAGIC_COMPRESSED {
            true
        } else if &magic == MAGIC_RAW {
            false
        } else {
            return Err(ExportError::bad_format(format!(
                "unrecognised magic {:?}",
                String::from_utf8_lossy(&magic)
            )));
        };

        let index = read_index(&mut source)?;

        Ok(Self {
            source,
            index,
            compression,
        })
    }

    /// Returns `true` if block bodies are zstd-compressed.
    pub fn is_compressed(&self) -> bool {
        self.compression
    }

    /// Number of blocks in the archive.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Returns the block index entries.
    pub fn index(&self) -> &[BlockIndex] {
        &self.index
    }

    /// Reads and decodes the `i`-th block.
    pub fn read_block(&mut self, i: usize) -> ExportResult<Vec<Point>> {
        let entry = self
            .index
            .get(i)
            .ok_or_else(|| {
                ExportError::bad_index(format!(
                    "block {} out of range ({} blocks)",
                    i,
                    self.index.len()
                ))
            })?
            .clone();

        self.source.seek(SeekFrom::Start(entry.offset))?;

        let mut len_buf = [0u8; 4];
        self.source.read_exact(&mut len_buf)?;
        let body_len = u32::from_be_bytes(len_buf) as u64;

        if body_len + 4 != entry.length {
            return Err(ExportError::bad_block(
                i,
                format!(
                    "length prefix {} disagrees with index length {}",
                    body_len, entry.length
                ),
            ));
        }

        let mut body = vec![0u8; body_len as usize];
        self.source.read_exact(&mut body)?;

        let decoded = if self.compression {
            zstd::decode_all(body.as_slice())
                .map_err(|e| ExportError::bad_block(i, format!("decompression failed: {}", e)))?
        } else {
            body
        };

        let points: Vec<Point> = serde_json::from_slice(&decoded)
            .map_err(|e| ExportError::bad_block(i, e.to_string()))?;

        if points.len() != entry.point_count {
            return Err(ExportError::bad_block(
                i,
                format!(
                    "decoded {} points, index says {}",
                    points.len(),
                    entry.point_count
                ),
            ));
        }

        Ok(points)
    }
}

/// Loads the trailing index: seek to end-4, read the index length, seek
/// back by `4 + length` and parse.
fn read_index<R: Read + Seek>(source: &mut R) -> ExportResult<Vec<BlockIndex>> {
    let file_len = source.seek(SeekFrom::End(0))?;
    if file_len < 12 {
        return Err(ExportError::bad_index("file too short for index trailer"));
    }

    source.seek(SeekFrom::End(-4))?;
    let mut len_buf = [0u8; 4];
    source.read_exact(&mut len_buf)?;
    let index_len = u32::from_be_bytes(len_buf) as u64;

    if index_len + 4 + 8 > file_len {
        return Err(ExportError::bad_index(format!(
            "index length {} exceeds file size {}",
            index_len, file_len
        )));
    }

    source.seek(SeekFrom::End(-(4 + index_len as i64)))?;
    let mut index_json = vec![0u8; index_len as usize];
    source.read_exact(&mut index_json)?;

    let index: Vec<BlockIndex> = serde_json::from_slice(&index_json)
        .map_err(|e| ExportError::bad_index(e.to_string()))?;

    // Offsets ascend strictly; a violation means the trailer is lying.
    for pair in index.windows(2) {
        if pair[1].offset <= pair[0].offset {
            return Err(ExportError::bad_index("block offsets are not ascending"));
        }
    }

    Ok(index)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ArchiveWriter;
    use chrono::Utc;
    use kiln_core::types::{ChamberId, MachineId, SymbolPath, Value};
    use std::io::Cursor;

    fn point(n: i64) -> Point {
        Point {
            timestamp: Utc::now(),
            machine: MachineId::new("m1"),
            chamber: ChamberId::new("c1"),
            symbol: SymbolPath::new("GVL.x"),
            value: Value::Int64(n),
        }
    }

    fn archive(points: usize, compression: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf, compression).unwrap();
        writer.write_batch((0..points as i64).map(point)).unwrap();
        writer.close().unwrap();
        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let err = ArchiveReader::new(Cursor::new(b"NOTMAGIC everything else".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ExportError::BadFormat(_)));
    }

    #[test]
    fn rejects_truncated_file() {
        let err = ArchiveReader::new(Cursor::new(b"PLC".to_vec())).unwrap_err();
        assert!(matches!(err, ExportError::BadFormat(_)));
    }

    #[test]
    fn rejects_corrupt_index() {
        let mut bytes = archive(10, false);
        // Blow away the index length trailer.
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&u32::MAX.to_be_bytes());

        let err = ArchiveReader::new(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ExportError::BadIndex(_)));
    }

    #[test]
    fn rejects_corrupt_block_payload() {
        let mut bytes = archive(10, false);
        // Flip bytes inside the (uncompressed) block body.
        bytes[14] = b'!';
        bytes[15] = b'!';

        let mut reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();
        let err = reader.read_block(0).unwrap_err();
        assert!(matches!(err, ExportError::BadBlock { .. }));
    }

    #[test]
    fn reads_back_raw_blocks() {
        let bytes = archive(2500, false);
        let mut reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();
        assert!(!reader.is_compressed());
        assert_eq!(reader.block_count(), 3);

        let mut all = Vec::new();
        for i in 0..reader.block_count() {
            all.extend(reader.read_block(i).unwrap());
        }
        assert_eq!(all.len(), 2500);
        assert_eq!(all[0].value, Value::Int64(0));
        assert_eq!(all[2499].value, Value::Int64(2499));
    }

    #[test]
    fn out_of_range_block_is_bad_index() {
        let bytes = archive(10, false);
        let mut reader = ArchiveReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.read_block(5),
            Err(ExportError::BadIndex(_))
        ));
    }
}

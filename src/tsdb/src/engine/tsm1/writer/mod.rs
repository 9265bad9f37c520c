//! A TSM file is composed of four sections: header, blocks, index and
//! footer.
//!
//! ┌────────┬────────────────────────────────────┬─────────────┬──────────────┐
//! │ Header │               Blocks               │    Index    │    Footer    │
//! │5 bytes │              N bytes               │   N bytes   │   8 bytes    │
//! └────────┴────────────────────────────────────┴─────────────┴──────────────┘
//!
//! The header holds a magic number identifying the file type and a format
//! version.
//!
//! ┌───────────────────┐
//! │      Header       │
//! ├─────────┬─────────┤
//! │  Magic  │ Version │
//! │ 4 bytes │ 1 byte  │
//! └─────────┴─────────┘
//!
//! Blocks are pairs of a CRC32 checksum and opaque block data; the block
//! lengths live in the index.
//!
//! ┌───────────────────────────────────────────────────────────┐
//! │                          Blocks                           │
//! ├───────────────────┬───────────────────┬───────────────────┤
//! │      Block 1      │      Block 2      │      Block N      │
//! ├─────────┬─────────┼─────────┬─────────┼─────────┬─────────┤
//! │  CRC    │  Data   │  CRC    │  Data   │  CRC    │  Data   │
//! │ 4 bytes │ N bytes │ 4 bytes │ N bytes │ 4 bytes │ N bytes │
//! └─────────┴─────────┴─────────┴─────────┴─────────┴─────────┘
//!
//! The index lists, per ascending series key, the count of its blocks and
//! one entry per block with the block's time range, file offset and size.
//! Entries of a key are ordered by their minimum time.
//!
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Index                             │
//! ├─────────┬───────┬─────────┬─────────┬────────┬────────┬───┤
//! │   Key   │ Count │Min Time │Max Time │ Offset │  Size  │...│
//! │ 4 bytes │2 bytes│ 8 bytes │ 8 bytes │8 bytes │4 bytes │   │
//! └─────────┴───────┴─────────┴─────────┴────────┴────────┴───┘
//!
//! The footer stores the offset of the start of the index.
//!
//! ┌─────────┐
//! │ Footer  │
//! ├─────────┤
//! │Index Ofs│
//! │ 8 bytes │
//! └─────────┘

pub mod index_writer;
pub mod tsm_writer;

/// MAGIC_NUMBER identifies a TSM formatted file.
pub const MAGIC_NUMBER: u32 = 0x16D116D0;

/// VERSION is the TSM file format version.
pub const VERSION: u8 = 1;

/// Size in bytes of a series key in the index.
pub(crate) const INDEX_KEY_SIZE: usize = 4;

/// Size in bytes of the per-key entry count in the index.
pub(crate) const INDEX_COUNT_SIZE: usize = 2;

/// Size in bytes of one encoded index entry.
pub(crate) const INDEX_ENTRY_SIZE: usize = 28;

/// Max number of blocks a single key can have in one file.
pub(crate) const MAX_INDEX_ENTRIES: usize = (1 << (INDEX_COUNT_SIZE * 8)) - 1;

/// Bytes written between forced fsyncs, keeping the final fsync of a very
/// large file from stalling the writer.
pub(crate) const FSYNC_EVERY: u64 = 25 * 1024 * 1024;

//! # vaultfs — encrypted single-file virtual archive
//!
//! Format guarantees:
//! - All numeric fields are big-endian; never negotiated
//! - Every block is sealed with AES-256-GCM and carries a SHA-1 digest of
//!   its plaintext as a secondary consistency check
//! - Streams are doubly-linked block chains identified by a UUID, never by
//!   offset; the head block of a stream can move without invalidating
//!   anything that refers to the stream by id
//! - The first eight blocks are reserved for the archive header and the
//!   three internal streams (stream registry index, trash, registry
//!   journal); user data never lives there
//! - The stream registry and the entry/path trees are on-disk ordered maps
//!   replayed from a main snapshot plus an append-only journal; a crash
//!   between writes loses at most the unreplayed journal tail
//! - Opening an archive takes an exclusive advisory lock on the underlying
//!   file; a second concurrent open fails with [`error::Error::Locked`]

pub mod error;
pub mod crypto;
pub mod codec;
pub mod block;
pub mod stream;
pub mod vfile;
pub mod btree;
pub mod registry;
pub mod fs;
pub mod header;
pub mod archive;
pub mod fsck;

pub use archive::{Archive, ArchiveStats, File};
pub use codec::{Compression, CodecError};
pub use crypto::{derive_key, CryptoError};
pub use error::{Error, Result};
pub use fsck::{scan, scan_file, BlockHealth, FsckReport, ScanQuality};
pub use fs::{EntryRecord, EntryType};
pub use vfile::{OpenMode, Whence};

//! Archive header & bootstrap — the first eight reserved blocks.
//!
//! | Slot | Role |
//! |---|---|
//! | 0 | Header/data (serialized metadata of streams 0-2) |
//! | 1 | Operations block (reserved for future atomic op-log) |
//! | 2 | Swap block |
//! | 3-4 | Reserved |
//! | 5 | Head block of stream-registry index |
//! | 6 | Head block of trash stream |
//! | 7 | Head block of stream-registry journal |
//!
//! Block 0's payload holds the archive header record (magic `"archive7"`,
//! version 2.0, identity/owner/domain/node UUIDs, created timestamp, title)
//! followed by the three internal streams' metadata records concatenated.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::block::{Block, BlockDevice};
use crate::error::{Error, Result};
use crate::stream::{StreamMeta, STREAM_META_SIZE};

pub const MAGIC: &[u8; 8] = b"archive7";
pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 0;
pub const TITLE_LEN: usize = 256;

pub const RESERVED_BLOCKS: u64 = 8;
pub const BLOCK_HEADER: u64 = 0;
pub const BLOCK_OPERATIONS: u64 = 1;
pub const BLOCK_SWAP: u64 = 2;
pub const BLOCK_INDEX_HEAD: u64 = 5;
pub const BLOCK_TRASH_HEAD: u64 = 6;
pub const BLOCK_JOURNAL_HEAD: u64 = 7;

const HEADER_RECORD_SIZE: usize = 8 + 2 + 2 + 16 * 4 + 8 + TITLE_LEN;

#[derive(Debug, Clone)]
pub struct ArchiveHeader {
    pub identity: Uuid,
    pub owner: Uuid,
    pub domain: Uuid,
    pub node: Uuid,
    pub created: i64,
    pub title: String,
}

impl ArchiveHeader {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_RECORD_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION_MAJOR.to_be_bytes());
        buf.extend_from_slice(&VERSION_MINOR.to_be_bytes());
        buf.extend_from_slice(self.identity.as_bytes());
        buf.extend_from_slice(self.owner.as_bytes());
        buf.extend_from_slice(self.domain.as_bytes());
        buf.extend_from_slice(self.node.as_bytes());
        buf.extend_from_slice(&self.created.to_be_bytes());
        let title_bytes = self.title.as_bytes();
        let n = title_bytes.len().min(TITLE_LEN);
        buf.extend_from_slice(&title_bytes[..n]);
        buf.extend(std::iter::repeat(0u8).take(TITLE_LEN - n));
        debug_assert_eq!(buf.len(), HEADER_RECORD_SIZE);
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_RECORD_SIZE {
            return Err(Error::InvalidFormat("block 0 too short for header".into()));
        }
        if &buf[0..8] != MAGIC {
            return Err(Error::InvalidFormat("bad magic — not a valid archive".into()));
        }
        let mut r = Cursor::new(&buf[8..]);
        let major = r.read_u16::<BigEndian>()?;
        let _minor = r.read_u16::<BigEndian>()?;
        if major != VERSION_MAJOR {
            return Err(Error::InvalidFormat(format!(
                "unsupported archive version {major}"
            )));
        }
        let mut read_uuid = |r: &mut Cursor<&[u8]>| -> std::io::Result<Uuid> {
            let mut b = [0u8; 16];
            r.read_exact(&mut b)?;
            Ok(Uuid::from_bytes(b))
        };
        let identity = read_uuid(&mut r)?;
        let owner = read_uuid(&mut r)?;
        let domain = read_uuid(&mut r)?;
        let node = read_uuid(&mut r)?;
        let created = r.read_i64::<BigEndian>()?;
        let mut title_buf = [0u8; TITLE_LEN];
        r.read_exact(&mut title_buf)?;
        let end = title_buf.iter().position(|&b| b == 0).unwrap_or(TITLE_LEN);
        let title = String::from_utf8_lossy(&title_buf[..end]).into_owned();

        Ok(ArchiveHeader {
            identity,
            owner,
            domain,
            node,
            created,
            title,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub header: ArchiveHeader,
    pub index_meta: StreamMeta,
    pub trash_meta: StreamMeta,
    pub journal_meta: StreamMeta,
}

impl Bootstrap {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.header.to_bytes();
        buf.extend(self.index_meta.to_bytes());
        buf.extend(self.trash_meta.to_bytes());
        buf.extend(self.journal_meta.to_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = ArchiveHeader::from_bytes(buf)?;
        let mut offset = HEADER_RECORD_SIZE;
        let index_meta = StreamMeta::from_bytes(&buf[offset..offset + STREAM_META_SIZE])?;
        offset += STREAM_META_SIZE;
        let trash_meta = StreamMeta::from_bytes(&buf[offset..offset + STREAM_META_SIZE])?;
        offset += STREAM_META_SIZE;
        let journal_meta = StreamMeta::from_bytes(&buf[offset..offset + STREAM_META_SIZE])?;
        Ok(Bootstrap {
            header,
            index_meta,
            trash_meta,
            journal_meta,
        })
    }
}

/// Allocate the eight reserved blocks and the three internal streams
/// (index, trash, journal), and write the header into block 0.
pub fn create(
    dev: &mut BlockDevice,
    identity: Uuid,
    owner: Uuid,
    domain: Uuid,
    node: Uuid,
    created: i64,
    title: String,
) -> Result<Bootstrap> {
    if dev.size() != 0 {
        return Err(Error::InvalidFormat(
            "cannot bootstrap a non-empty archive".into(),
        ));
    }

    dev.new_block(Uuid::nil())?; // 0: header
    dev.new_block(Uuid::nil())?; // 1: operations
    dev.new_block(Uuid::nil())?; // 2: swap
    dev.new_block(Uuid::nil())?; // 3: reserved
    dev.new_block(Uuid::nil())?; // 4: reserved

    let index_id = Uuid::new_v4();
    let index_block = dev.new_block(index_id)?;
    debug_assert_eq!(index_block, BLOCK_INDEX_HEAD);

    let trash_id = Uuid::new_v4();
    let trash_block = dev.new_block(trash_id)?;
    debug_assert_eq!(trash_block, BLOCK_TRASH_HEAD);

    let journal_id = Uuid::new_v4();
    let journal_block = dev.new_block(journal_id)?;
    debug_assert_eq!(journal_block, BLOCK_JOURNAL_HEAD);

    let bootstrap = Bootstrap {
        header: ArchiveHeader {
            identity,
            owner,
            domain,
            node,
            created,
            title,
        },
        index_meta: StreamMeta {
            identity: index_id,
            begin: BLOCK_INDEX_HEAD as i32,
            end: BLOCK_INDEX_HEAD as i32,
            count: 1,
            length: 0,
            compression: crate::codec::Compression::None,
        },
        trash_meta: StreamMeta {
            identity: trash_id,
            begin: BLOCK_TRASH_HEAD as i32,
            end: BLOCK_TRASH_HEAD as i32,
            count: 1,
            length: 0,
            compression: crate::codec::Compression::None,
        },
        journal_meta: StreamMeta {
            identity: journal_id,
            begin: BLOCK_JOURNAL_HEAD as i32,
            end: BLOCK_JOURNAL_HEAD as i32,
            count: 1,
            length: 0,
            compression: crate::codec::Compression::None,
        },
    };
    write(dev, &bootstrap)?;
    Ok(bootstrap)
}

/// Re-serialize and persist the bootstrap record into block 0. Called on
/// every flush of the internal streams' metadata.
pub fn write(dev: &mut BlockDevice, bootstrap: &Bootstrap) -> Result<()> {
    let mut block = Block::new_empty(Uuid::nil(), 0);
    let payload = bootstrap.to_bytes();
    block.payload[..payload.len()].copy_from_slice(&payload);
    block.refresh_digest();
    dev.save_block(BLOCK_HEADER, &block)
}

/// Read and validate the bootstrap record from block 0.
pub fn read(dev: &mut BlockDevice) -> Result<Bootstrap> {
    if dev.size() < RESERVED_BLOCKS {
        return Err(Error::InvalidFormat(
            "archive is shorter than the reserved block region".into(),
        ));
    }
    let block = dev.load_block(BLOCK_HEADER)?;
    Bootstrap::from_bytes(&block.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.vlt");
        let mut dev = BlockDevice::open(&path, [2u8; 32]).unwrap();
        let identity = Uuid::new_v4();
        let bootstrap = create(
            &mut dev,
            identity,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            1_700_000_000,
            "my archive".into(),
        )
        .unwrap();
        assert_eq!(dev.size(), RESERVED_BLOCKS);

        let back = read(&mut dev).unwrap();
        assert_eq!(back.header.identity, identity);
        assert_eq!(back.header.title, "my archive");
        assert_eq!(back.index_meta.identity, bootstrap.index_meta.identity);
    }

    #[test]
    fn bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h2.vlt");
        let mut dev = BlockDevice::open(&path, [2u8; 32]).unwrap();
        for _ in 0..RESERVED_BLOCKS {
            dev.new_block(Uuid::nil()).unwrap();
        }
        assert!(read(&mut dev).is_err());
    }
}

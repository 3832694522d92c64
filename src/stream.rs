//! Stream layer — chains blocks into doubly-linked streams identified by a
//! UUID. A stream is a cursor over the block device: it keeps one "current"
//! block loaded, a dirty flag, and its own fixed-size metadata record.
//!
//! The block device is shared by every open stream and the registries
//! layered over it (entry tree, path tree, stream registry, user files can
//! all be open at once), so `Stream` holds a reference-counted handle to it
//! rather than borrowing it for its own lifetime — the same reason a
//! compound-file reader keeps its sector table behind a shared handle
//! instead of threading a borrow through every open stream.

use std::cell::RefCell;
use std::io::{Cursor, Read, Write};
use std::rc::Rc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::block::{Block, BlockDevice, DATA_SIZE};
use crate::codec::Compression;
use crate::error::{Error, Result};

pub type Device = Rc<RefCell<BlockDevice>>;

/// Fixed-size (42 bytes, big-endian) stream metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMeta {
    pub identity: Uuid,
    pub begin: i32,
    pub end: i32,
    pub count: u32,
    pub length: u64,
    pub compression: Compression,
}

pub const STREAM_META_SIZE: usize = 16 + 4 + 4 + 4 + 8 + 2;

impl StreamMeta {
    pub fn new_empty(identity: Uuid) -> Self {
        StreamMeta {
            identity,
            begin: -1,
            end: -1,
            count: 0,
            length: 0,
            compression: Compression::None,
        }
    }

    pub fn to_bytes(&self) -> [u8; STREAM_META_SIZE] {
        let mut buf = [0u8; STREAM_META_SIZE];
        {
            let mut w = Cursor::new(&mut buf[..]);
            w.write_all(self.identity.as_bytes()).unwrap();
            w.write_i32::<BigEndian>(self.begin).unwrap();
            w.write_i32::<BigEndian>(self.end).unwrap();
            w.write_u32::<BigEndian>(self.count).unwrap();
            w.write_u64::<BigEndian>(self.length).unwrap();
            w.write_u16::<BigEndian>(self.compression.as_u16()).unwrap();
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != STREAM_META_SIZE {
            return Err(Error::InvalidFormat(format!(
                "stream metadata record is {} bytes, expected {}",
                buf.len(),
                STREAM_META_SIZE
            )));
        }
        let mut r = Cursor::new(buf);
        let mut identity_bytes = [0u8; 16];
        r.read_exact(&mut identity_bytes)?;
        let begin = r.read_i32::<BigEndian>()?;
        let end = r.read_i32::<BigEndian>()?;
        let count = r.read_u32::<BigEndian>()?;
        let length = r.read_u64::<BigEndian>()?;
        let compression_raw = r.read_u16::<BigEndian>()?;
        let compression = Compression::from_u16(compression_raw).ok_or_else(|| {
            Error::InvalidFormat(format!("unknown compression id {compression_raw}"))
        })?;
        Ok(StreamMeta {
            identity: Uuid::from_bytes(identity_bytes),
            begin,
            end,
            count,
            length,
            compression,
        })
    }
}

impl crate::btree::Record for StreamMeta {
    const SIZE: usize = STREAM_META_SIZE;
    fn to_bytes(&self) -> Vec<u8> {
        StreamMeta::to_bytes(self).to_vec()
    }
    fn from_bytes(buf: &[u8]) -> Result<Self> {
        StreamMeta::from_bytes(buf)
    }
}

/// Cursor over a stream's block chain. Holds the currently loaded block and
/// whether it has unsaved local edits.
pub struct Stream {
    dev: Device,
    pub meta: StreamMeta,
    current: Option<Block>,
    current_index: Option<u64>,
    dirty: bool,
}

impl Stream {
    /// Open a cursor positioned at the stream's first block (or empty, if
    /// the stream has no blocks yet).
    pub fn open(dev: Device, meta: StreamMeta) -> Result<Self> {
        let (current, current_index) = if meta.begin >= 0 {
            let idx = meta.begin as u64;
            (Some(dev.borrow_mut().load_block(idx)?), Some(idx))
        } else {
            (None, None)
        };
        Ok(Stream {
            dev,
            meta,
            current,
            current_index,
            dirty: false,
        })
    }

    /// Create a brand new, empty stream: allocates no blocks until the first
    /// `extend()`.
    pub fn create(dev: Device, identity: Uuid) -> Self {
        Stream {
            dev,
            meta: StreamMeta::new_empty(identity),
            current: None,
            current_index: None,
            dirty: false,
        }
    }

    pub fn current_block_index(&self) -> Option<u64> {
        self.current_index
    }

    pub fn current(&self) -> Option<&Block> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut Block> {
        self.current.as_mut()
    }

    /// Mark the in-memory current block dirty, requiring a save before any
    /// other block becomes current.
    pub fn changed(&mut self) {
        self.dirty = true;
    }

    /// Persist the current block if dirty (or `enforce`d).
    pub fn save(&mut self, enforce: bool) -> Result<()> {
        if let (Some(block), Some(idx)) = (self.current.as_ref(), self.current_index) {
            if self.dirty || enforce {
                self.dev.borrow_mut().save_block(idx, block)?;
                self.dirty = false;
            }
        }
        Ok(())
    }

    /// Step forward one block. Returns `false` at the tail (no movement).
    pub fn next(&mut self) -> Result<bool> {
        let next_idx = match &self.current {
            Some(b) if b.next >= 0 => b.next as u64,
            _ => return Ok(false),
        };
        self.save(false)?;
        let block = self.dev.borrow_mut().load_block(next_idx)?;
        self.current = Some(block);
        self.current_index = Some(next_idx);
        Ok(true)
    }

    /// Step backward one block. Returns `false` at the head.
    pub fn previous(&mut self) -> Result<bool> {
        let prev_idx = match &self.current {
            Some(b) if b.previous >= 0 => b.previous as u64,
            _ => return Ok(false),
        };
        self.save(false)?;
        let block = self.dev.borrow_mut().load_block(prev_idx)?;
        self.current = Some(block);
        self.current_index = Some(prev_idx);
        Ok(true)
    }

    /// Move forward or backward until `current.index == target_index`.
    /// On failure (target does not exist in this stream), restores the
    /// prior position and returns `Ok(None)`; on success returns the
    /// previous ordinal position.
    pub fn wind(&mut self, target_index: u32) -> Result<Option<u32>> {
        let prior_ordinal = self.current.as_ref().map(|b| b.index);
        let prior_block_index = self.current_index;

        loop {
            let current_ordinal = match &self.current {
                Some(b) => b.index,
                None => break,
            };
            if current_ordinal == target_index {
                return Ok(prior_ordinal);
            }
            let moved = if current_ordinal < target_index {
                self.next()?
            } else {
                self.previous()?
            };
            if !moved {
                break;
            }
        }

        // Did not land on target — restore prior position.
        if let Some(idx) = prior_block_index {
            self.save(false)?;
            self.current = Some(self.dev.borrow_mut().load_block(idx)?);
            self.current_index = Some(idx);
        }
        Ok(None)
    }

    /// Allocate a block at the tail and make it current, reusing a block
    /// recycled into `trash` before appending a fresh one at EOF. Fails
    /// (returns `Ok(false)`) if the current block is not the tail.
    pub fn extend(&mut self, trash: &mut Stream) -> Result<bool> {
        if let Some(b) = &self.current {
            if b.next != -1 {
                return Ok(false);
            }
        }

        self.save(false)?;
        let new_index = self.reclaim_or_allocate(trash)?;
        let mut new_block = self.dev.borrow_mut().load_block(new_index)?;
        new_block.index = self.meta.count;
        new_block.stream = self.meta.identity;
        new_block.previous = -1;
        new_block.next = -1;

        if let (Some(prev_block), Some(prev_disk_index)) =
            (self.current.as_mut(), self.current_index)
        {
            prev_block.next = new_index as i32;
            new_block.previous = prev_disk_index as i32;
            self.dev
                .borrow_mut()
                .save_block(prev_disk_index, prev_block)?;
        } else {
            self.meta.begin = new_index as i32;
        }

        self.meta.end = new_index as i32;
        self.meta.count += 1;
        self.dev.borrow_mut().save_block(new_index, &new_block)?;

        self.current = Some(new_block);
        self.current_index = Some(new_index);
        self.dirty = false;
        Ok(true)
    }

    /// Pop the trash chain's head for reuse if one is available, otherwise
    /// allocate a fresh block at the tail of the device. A reclaimed block's
    /// payload is zeroed and its chain linkage reset so it reads back
    /// exactly like a block `new_block` would have produced.
    fn reclaim_or_allocate(&mut self, trash: &mut Stream) -> Result<u64> {
        if trash.meta.begin < 0 {
            return self.dev.borrow_mut().new_block(self.meta.identity);
        }

        let head_index = trash.meta.begin as u64;
        let mut head = self.dev.borrow_mut().load_block(head_index)?;
        let next = head.next;

        trash.meta.begin = next;
        trash.meta.count -= 1;
        if trash.meta.count == 0 {
            trash.meta.end = -1;
        }
        if trash.current_index == Some(head_index) {
            trash.current = None;
            trash.current_index = None;
        }

        if next >= 0 {
            let mut new_head = self.dev.borrow_mut().load_block(next as u64)?;
            new_head.previous = -1;
            self.dev.borrow_mut().save_block(next as u64, &new_head)?;
        }

        for b in head.payload.iter_mut() {
            *b = 0;
        }
        head.refresh_digest();
        self.dev.borrow_mut().save_block(head_index, &head)?;
        Ok(head_index)
    }

    /// Truncate the stream to `length` bytes: navigate to the block holding
    /// that offset, zero the trailing bytes, mark it the new tail, and
    /// recycle the remainder of the chain into `trash`.
    pub fn truncate(&mut self, trash: &mut Stream, length: u64) -> Result<()> {
        if length == 0 {
            self.recycle_from(trash, self.meta.begin)?;
            self.meta.begin = -1;
            self.meta.end = -1;
            self.meta.count = 0;
            self.meta.length = 0;
            self.current = None;
            self.current_index = None;
            self.dirty = false;
            return Ok(());
        }

        let last_block_ordinal = ((length - 1) / DATA_SIZE as u64) as u32;
        self.wind(last_block_ordinal)?;

        let tail_next = {
            let block = self
                .current
                .as_mut()
                .ok_or_else(|| Error::OutOfBounds("truncate target block not found".into()))?;
            let offset_in_block = (length - last_block_ordinal as u64 * DATA_SIZE as u64) as usize;
            for b in block.payload[offset_in_block..].iter_mut() {
                *b = 0;
            }
            block.refresh_digest();
            let tail_next = block.next;
            block.next = -1;
            tail_next
        };
        self.changed();
        self.save(true)?;

        if tail_next >= 0 {
            self.recycle_from(trash, tail_next)?;
        }

        self.meta.end = self.current_index.unwrap() as i32;
        self.meta.count = last_block_ordinal + 1;
        self.meta.length = length;
        Ok(())
    }

    /// Move the chain starting at `start` (a block-device index, or -1 for
    /// nothing to do) to the tail of `trash`, preserving block contents —
    /// blocks are never physically erased, only re-owned.
    fn recycle_from(&self, trash: &mut Stream, start: i32) -> Result<()> {
        if start < 0 {
            return Ok(());
        }
        let mut idx = start as u64;
        loop {
            let mut block = self.dev.borrow_mut().load_block(idx)?;
            let next = block.next;
            block.stream = trash.meta.identity;
            block.previous = trash.meta.end;
            block.next = -1;
            block.index = trash.meta.count;
            self.dev.borrow_mut().save_block(idx, &block)?;

            if trash.meta.end >= 0 {
                let mut tail = self.dev.borrow_mut().load_block(trash.meta.end as u64)?;
                tail.next = idx as i32;
                self.dev
                    .borrow_mut()
                    .save_block(trash.meta.end as u64, &tail)?;
            } else {
                trash.meta.begin = idx as i32;
            }
            trash.meta.end = idx as i32;
            trash.meta.count += 1;

            if next < 0 {
                break;
            }
            idx = next as u64;
        }
        Ok(())
    }

    /// Collect every block's payload, in chain order, as immutable copies.
    pub fn payloads(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(self.meta.count as usize);
        if self.meta.begin < 0 {
            return Ok(out);
        }
        self.wind(0)?;
        loop {
            let payload = self
                .current
                .as_ref()
                .map(|b| b.payload.clone())
                .unwrap_or_default();
            out.push(payload);
            if !self.next()? {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockDevice;

    fn dev() -> (tempfile::TempDir, Device) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.vlt");
        let b = BlockDevice::open(&path, [3u8; 32]).unwrap();
        (dir, Rc::new(RefCell::new(b)))
    }

    #[test]
    fn extend_chain_and_wind() {
        let (_dir, dev) = dev();
        let id = Uuid::new_v4();
        let trash_id = Uuid::new_v4();
        let mut s = Stream::create(dev.clone(), id);
        let mut trash = Stream::create(dev, trash_id);
        for _ in 0..5 {
            assert!(s.extend(&mut trash).unwrap());
        }
        assert_eq!(s.meta.count, 5);
        let prior = s.wind(2).unwrap();
        assert_eq!(prior, Some(4));
        assert_eq!(s.current().unwrap().index, 2);
    }

    #[test]
    fn wind_failure_restores_position() {
        let (_dir, dev) = dev();
        let id = Uuid::new_v4();
        let trash_id = Uuid::new_v4();
        let mut s = Stream::create(dev.clone(), id);
        let mut trash = Stream::create(dev, trash_id);
        s.extend(&mut trash).unwrap();
        s.extend(&mut trash).unwrap();
        s.wind(0).unwrap();
        let result = s.wind(99).unwrap();
        assert_eq!(result, None);
        assert_eq!(s.current().unwrap().index, 0);
    }

    #[test]
    fn truncate_recycles_tail_into_trash() {
        let (_dir, dev) = dev();
        let data_id = Uuid::new_v4();
        let trash_id = Uuid::new_v4();
        let mut s = Stream::create(dev.clone(), data_id);
        let mut trash = Stream::create(dev, trash_id);
        for _ in 0..4 {
            s.extend(&mut trash).unwrap();
        }
        s.meta.length = 4 * DATA_SIZE as u64;
        s.truncate(&mut trash, DATA_SIZE as u64).unwrap();
        assert_eq!(s.meta.count, 1);
        assert_eq!(trash.meta.count, 3);
    }

    #[test]
    fn extend_reuses_recycled_block_before_growing_device() {
        let (_dir, dev) = dev();
        let data_id = Uuid::new_v4();
        let trash_id = Uuid::new_v4();
        let mut s = Stream::create(dev.clone(), data_id);
        let mut trash = Stream::create(dev.clone(), trash_id);
        for _ in 0..3 {
            s.extend(&mut trash).unwrap();
        }
        s.meta.length = 3 * DATA_SIZE as u64;
        s.truncate(&mut trash, DATA_SIZE as u64).unwrap();
        assert_eq!(trash.meta.count, 2);
        let size_before = dev.borrow().size();

        assert!(s.extend(&mut trash).unwrap());

        assert_eq!(dev.borrow().size(), size_before);
        assert_eq!(trash.meta.count, 1);
        assert_eq!(s.meta.count, 2);
    }
}

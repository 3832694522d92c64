//! Persistent ordered B+Tree-style registry: a fixed-size key -> fixed-size
//! value map whose contents live inside two streams (main + write-ahead
//! journal), with crash recovery by journal replay on open.
//!
//! # Design note
//! The full map is kept in memory as a [`std::collections::BTreeMap`],
//! which is what actually serves `get`/`insert`/`remove` in O(log n) — the
//! two on-disk streams exist for persistence and crash recovery, not as a
//! second indexing structure callers walk directly. `checkpoint()` writes
//! the entire sorted map to the main stream in one pass and clears the
//! journal; `open()` reads the main stream back and then replays any
//! journal records left over from a checkpoint that did not complete.
//! Paging happens for free at the block layer beneath — every write here
//! already travels through fixed `DATA_SIZE` blocks, so no separate page
//! format is layered on top of the stream's own chain.
//!
//! Keys compare as 128-bit big-endian unsigned integers: `Uuid`'s `Ord`
//! impl already compares the raw 16-byte array lexicographically, which is
//! exactly big-endian numeric order.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::vfile::{VFile, Whence};

/// A fixed-size record storable as a B+Tree value.
pub trait Record: Clone {
    const SIZE: usize;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(buf: &[u8]) -> Result<Self>;
}

const JOURNAL_OP_INSERT: u8 = 1;
const JOURNAL_OP_REMOVE: u8 = 2;

pub struct BTree<V: Record> {
    main: VFile,
    journal: VFile,
    map: BTreeMap<Uuid, V>,
}

impl<V: Record> BTree<V> {
    /// Open (or initialize, if both streams are empty) a registry backed by
    /// `main` and `journal`. Replays the journal against the main tree's
    /// contents if the journal is non-empty.
    pub fn open(mut main: VFile, mut journal: VFile) -> Result<Self> {
        let mut map = Self::load_main(&mut main)?;
        Self::replay_journal(&mut journal, &mut map)?;
        Ok(BTree { main, journal, map })
    }

    fn load_main(main: &mut VFile) -> Result<BTreeMap<Uuid, V>> {
        let mut map = BTreeMap::new();
        main.seek(0, Whence::Start)?;
        let bytes = main.read_to_end()?;
        if bytes.len() < 8 {
            return Ok(map);
        }
        let count = (&bytes[0..8]).read_u64::<BigEndian>().map_err(Error::Io)? as usize;
        let record_size = 16 + V::SIZE;
        let mut offset = 8;
        for _ in 0..count {
            if offset + record_size > bytes.len() {
                return Err(Error::IntegrityError(
                    "registry main stream truncated mid-record".into(),
                ));
            }
            let key = Uuid::from_bytes(bytes[offset..offset + 16].try_into().unwrap());
            let value = V::from_bytes(&bytes[offset + 16..offset + record_size])?;
            map.insert(key, value);
            offset += record_size;
        }
        Ok(map)
    }

    fn replay_journal(journal: &mut VFile, map: &mut BTreeMap<Uuid, V>) -> Result<()> {
        journal.seek(0, Whence::Start)?;
        let bytes = journal.read_to_end()?;
        let record_size = 1 + 16 + V::SIZE;
        if bytes.is_empty() {
            return Ok(());
        }
        let count = bytes.len() / record_size;
        for i in 0..count {
            let offset = i * record_size;
            let op = bytes[offset];
            let key = Uuid::from_bytes(bytes[offset + 1..offset + 17].try_into().unwrap());
            match op {
                JOURNAL_OP_INSERT => {
                    let value = V::from_bytes(&bytes[offset + 17..offset + record_size])?;
                    map.insert(key, value);
                }
                JOURNAL_OP_REMOVE => {
                    map.remove(&key);
                }
                other => {
                    return Err(Error::IntegrityError(format!(
                        "unknown journal op byte {other} during replay"
                    )))
                }
            }
        }
        Ok(())
    }

    fn append_journal(&mut self, op: u8, key: Uuid, value: Option<&V>) -> Result<()> {
        self.journal.seek(0, Whence::End)?;
        let mut rec = Vec::with_capacity(1 + 16 + V::SIZE);
        rec.push(op);
        rec.extend_from_slice(key.as_bytes());
        match value {
            Some(v) => rec.extend(v.to_bytes()),
            None => rec.extend(std::iter::repeat(0u8).take(V::SIZE)),
        }
        self.journal.write(&rec)?;
        self.journal.flush()?;
        Ok(())
    }

    /// Insert `key -> value`. Fails with `DuplicateKey` if `key` already
    /// exists and `replace` is false.
    pub fn insert(&mut self, key: Uuid, value: V, replace: bool) -> Result<()> {
        if !replace && self.map.contains_key(&key) {
            return Err(Error::DuplicateKey(key));
        }
        self.append_journal(JOURNAL_OP_INSERT, key, Some(&value))?;
        self.map.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &Uuid) -> Option<&V> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &Uuid) -> bool {
        self.map.contains_key(key)
    }

    pub fn remove(&mut self, key: &Uuid) -> Result<Option<V>> {
        self.append_journal(JOURNAL_OP_REMOVE, *key, None)?;
        Ok(self.map.remove(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &V)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Current metadata of the backing main/journal streams, for the owner
    /// to persist wherever it tracks its own streams (bootstrap block,
    /// stream registry, ...).
    pub fn main_meta(&self) -> crate::stream::StreamMeta {
        self.main.stream().meta.clone()
    }

    pub fn journal_meta(&self) -> crate::stream::StreamMeta {
        self.journal.stream().meta.clone()
    }

    /// Flush the in-memory state to the main stream and clear the journal.
    /// After this returns, every insert/remove since the last checkpoint is
    /// durable even if the journal is subsequently lost.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.main.truncate(Some(0))?;
        self.main.seek(0, Whence::Start)?;

        let mut buf = Vec::with_capacity(8 + self.map.len() * (16 + V::SIZE));
        buf.write_u64::<BigEndian>(self.map.len() as u64).map_err(Error::Io)?;
        for (key, value) in self.map.iter() {
            buf.extend_from_slice(key.as_bytes());
            buf.extend(value.to_bytes());
        }
        self.main.write(&buf)?;
        self.main.flush()?;

        self.journal.truncate(Some(0))?;
        self.journal.flush()?;
        tracing::debug!(records = self.map.len(), "registry checkpoint complete");
        Ok(())
    }

    /// Checkpoint, then close both backing streams.
    pub fn close(mut self) -> Result<()> {
        self.checkpoint()?;
        self.main.close()?;
        self.journal.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockDevice;
    use crate::stream::Stream;
    use crate::vfile::OpenMode;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct TestVal(u64);

    impl Record for TestVal {
        const SIZE: usize = 8;
        fn to_bytes(&self) -> Vec<u8> {
            self.0.to_be_bytes().to_vec()
        }
        fn from_bytes(buf: &[u8]) -> Result<Self> {
            Ok(TestVal(u64::from_be_bytes(buf.try_into().unwrap())))
        }
    }

    fn fresh_tree() -> (tempfile::TempDir, BTree<TestVal>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.vlt");
        let dev = Rc::new(RefCell::new(BlockDevice::open(&path, [5u8; 32]).unwrap()));
        let trash = Rc::new(RefCell::new(Stream::create(dev.clone(), Uuid::new_v4())));
        let main = VFile::new(
            "main".into(),
            OpenMode::parse("w+").unwrap(),
            Stream::create(dev.clone(), Uuid::new_v4()),
            trash.clone(),
        )
        .unwrap();
        let journal = VFile::new(
            "journal".into(),
            OpenMode::parse("w+").unwrap(),
            Stream::create(dev, Uuid::new_v4()),
            trash,
        )
        .unwrap();
        (dir, BTree::open(main, journal).unwrap())
    }

    #[test]
    fn insert_get_duplicate() {
        let (_dir, mut t) = fresh_tree();
        let k = Uuid::new_v4();
        t.insert(k, TestVal(1), false).unwrap();
        assert_eq!(t.get(&k), Some(&TestVal(1)));
        assert!(t.insert(k, TestVal(2), false).is_err());
        t.insert(k, TestVal(2), true).unwrap();
        assert_eq!(t.get(&k), Some(&TestVal(2)));
    }

    #[test]
    fn remove_and_checkpoint() {
        let (_dir, mut t) = fresh_tree();
        let k = Uuid::new_v4();
        t.insert(k, TestVal(9), false).unwrap();
        t.checkpoint().unwrap();
        assert_eq!(t.get(&k), Some(&TestVal(9)));
        t.remove(&k).unwrap();
        assert!(t.get(&k).is_none());
    }
}

//! Stream registry — maps stream UUID to stream metadata, and owns the
//! trash stream that recycled block chains get appended to.

use std::cell::RefCell;
use std::rc::Rc;

use uuid::Uuid;

use crate::btree::BTree;
use crate::error::{Error, Result};
use crate::stream::{Device, Stream, StreamMeta};
use crate::vfile::VFile;

pub struct StreamRegistry {
    tree: BTree<StreamMeta>,
    trash: Rc<RefCell<Stream>>,
    dev: Device,
}

impl StreamRegistry {
    pub fn open(dev: Device, main: VFile, journal: VFile, trash: Rc<RefCell<Stream>>) -> Result<Self> {
        let tree = BTree::open(main, journal)?;
        Ok(StreamRegistry { tree, trash, dev })
    }

    /// Register a brand new stream. Fails with `AlreadyExists` if the
    /// identity is already registered.
    pub fn register(&mut self, meta: StreamMeta) -> Result<()> {
        self.tree
            .insert(meta.identity, meta, false)
            .map_err(|e| match e {
                Error::DuplicateKey(id) => Error::AlreadyExists(format!("stream {id}")),
                other => other,
            })?;
        self.tree.checkpoint()
    }

    /// Upsert a stream's metadata (called whenever a stream's chain changes
    /// shape: extend, truncate).
    pub fn update(&mut self, meta: StreamMeta) -> Result<()> {
        self.tree.insert(meta.identity, meta, true)
    }

    pub fn search(&self, id: &Uuid) -> Option<StreamMeta> {
        self.tree.get(id).cloned()
    }

    /// Remove a stream's registration and move its entire block chain to
    /// the trash stream. Blocks are never erased, only re-owned.
    pub fn unregister(&mut self, id: &Uuid) -> Result<()> {
        let meta = self
            .tree
            .remove(id)?
            .ok_or_else(|| Error::NotFound(format!("stream {id}")))?;
        let mut stream = Stream::open(self.dev.clone(), meta)?;
        {
            let mut trash = self.trash.borrow_mut();
            stream.truncate(&mut trash, 0)?;
        }
        self.tree.checkpoint()
    }

    pub fn open_stream(&self, id: &Uuid) -> Result<Stream> {
        let meta = self
            .search(id)
            .ok_or_else(|| Error::NotFound(format!("stream {id}")))?;
        Stream::open(self.dev.clone(), meta)
    }

    pub fn checkpoint(&mut self) -> Result<()> {
        self.tree.checkpoint()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn main_meta(&self) -> StreamMeta {
        self.tree.main_meta()
    }

    pub fn journal_meta(&self) -> StreamMeta {
        self.tree.journal_meta()
    }
}

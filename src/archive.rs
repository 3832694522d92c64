//! Archive / filesystem layer — the top-level API: open/create/delete/
//! rename/list over paths, returning virtual file objects bound to payload
//! streams.
//!
//! State: two registries (entries, paths) plus the stream manager and a
//! table of currently-open entry ids, guarding against reopening a file
//! whose in-memory stream state has not yet been flushed back.

use std::cell::RefCell;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::rc::Rc;

use uuid::Uuid;

use crate::block::BlockDevice;
use crate::btree::BTree;
use crate::codec::Compression;
use crate::error::{Error, Result};
use crate::fs::path::{split_components, ROOT_ID};
use crate::fs::{path_key, root_path_key, EntryRecord, EntryType, PathValue};
use crate::header::{self, ArchiveHeader, Bootstrap};
use crate::registry::StreamRegistry;
use crate::stream::{Device, Stream, StreamMeta};
use crate::vfile::{OpenMode, VFile};

/// A file opened via [`Archive::open`]. Delegates the full virtual file
/// object surface (read/write/seek/tell/truncate/flush) to the inner
/// [`VFile`]; changes are only durably reflected in the entry/stream
/// registries once passed to [`Archive::close_file`].
pub struct File {
    pub entry_id: Uuid,
    inner: VFile,
}

impl Deref for File {
    type Target = VFile;
    fn deref(&self) -> &VFile {
        &self.inner
    }
}

impl DerefMut for File {
    fn deref_mut(&mut self) -> &mut VFile {
        &mut self.inner
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveStats {
    pub archive_type: &'static str,
    pub role: &'static str,
    pub streams_in_use: usize,
    pub id: Uuid,
    pub owner: Uuid,
    pub domain: Uuid,
    pub node: Uuid,
    pub created: i64,
    pub title: String,
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Deterministic id for one of the filesystem layer's own registry
/// streams, derived from the archive's identity so it can be found again on
/// reopen without a separate lookup table.
fn well_known_stream_id(archive_identity: Uuid, label: &str) -> Uuid {
    Uuid::new_v5(&archive_identity, label.as_bytes())
}

/// Open an existing, already-registered stream for random access without
/// truncating it — `"r+"`, never `"w+"`, is used for every internal
/// registry stream so that reopening an archive does not discard its
/// metadata.
fn open_registry_vfile(name: &str, dev: &Device, meta: StreamMeta, trash: &Rc<RefCell<Stream>>) -> Result<VFile> {
    let stream = Stream::open(dev.clone(), meta)?;
    VFile::new(name.to_string(), OpenMode::parse("r+").unwrap(), stream, trash.clone())
}

pub struct Archive {
    dev: Device,
    header: ArchiveHeader,
    trash: Rc<RefCell<Stream>>,
    stream_registry: StreamRegistry,
    entries_tree: BTree<EntryRecord>,
    paths_tree: BTree<PathValue>,
    open_entries: HashSet<Uuid>,
}

impl Archive {
    /// Create a brand-new archive at `path`, bootstrapping the reserved
    /// blocks, the three internal streams, the two filesystem registries,
    /// and a root directory entry.
    pub fn create(
        path: impl AsRef<Path>,
        key: [u8; 32],
        owner: Uuid,
        domain: Uuid,
        node: Uuid,
        title: String,
    ) -> Result<Self> {
        let mut raw_dev = BlockDevice::open(path.as_ref(), key)?;
        let identity = Uuid::new_v4();
        let now = now_ts();
        let bootstrap = header::create(&mut raw_dev, identity, owner, domain, node, now, title)?;
        let dev: Device = Rc::new(RefCell::new(raw_dev));

        let trash = Rc::new(RefCell::new(Stream::open(dev.clone(), bootstrap.trash_meta.clone())?));
        let mut stream_registry = Self::open_stream_registry(&dev, &bootstrap, &trash)?;

        let entries_main_id = well_known_stream_id(identity, "entries.main");
        let entries_journal_id = well_known_stream_id(identity, "entries.journal");
        let paths_main_id = well_known_stream_id(identity, "paths.main");
        let paths_journal_id = well_known_stream_id(identity, "paths.journal");
        for id in [entries_main_id, entries_journal_id, paths_main_id, paths_journal_id] {
            stream_registry.register(StreamMeta::new_empty(id))?;
        }

        let entries_tree = Self::open_tree(&dev, &stream_registry, &trash, entries_main_id, entries_journal_id)?;
        let paths_tree = Self::open_tree(&dev, &stream_registry, &trash, paths_main_id, paths_journal_id)?;

        let mut archive = Archive {
            dev,
            header: bootstrap.header,
            trash,
            stream_registry,
            entries_tree,
            paths_tree,
            open_entries: HashSet::new(),
        };

        let root = EntryRecord {
            entry_type: EntryType::Directory,
            id: ROOT_ID,
            parent: ROOT_ID,
            owner: Uuid::nil(),
            stream: Uuid::nil(),
            created: now,
            modified: now,
            size: 0,
            length: 0,
            compression: Compression::None,
            deleted: false,
            name: "root".into(),
            user: String::new(),
            group: String::new(),
            perms: 0o755,
        };
        archive.entries_tree.insert(ROOT_ID, root, false)?;
        archive
            .paths_tree
            .insert(root_path_key(), PathValue { entry_id: ROOT_ID }, false)?;
        archive.checkpoint_trees()?;
        Ok(archive)
    }

    /// Open an existing archive, replaying any outstanding journals.
    pub fn open(path: impl AsRef<Path>, key: [u8; 32]) -> Result<Self> {
        let mut raw_dev = BlockDevice::open(path.as_ref(), key)?;
        let bootstrap = header::read(&mut raw_dev)?;
        let dev: Device = Rc::new(RefCell::new(raw_dev));

        let trash = Rc::new(RefCell::new(Stream::open(dev.clone(), bootstrap.trash_meta.clone())?));
        let stream_registry = Self::open_stream_registry(&dev, &bootstrap, &trash)?;

        let identity = bootstrap.header.identity;
        let entries_main_id = well_known_stream_id(identity, "entries.main");
        let entries_journal_id = well_known_stream_id(identity, "entries.journal");
        let paths_main_id = well_known_stream_id(identity, "paths.main");
        let paths_journal_id = well_known_stream_id(identity, "paths.journal");

        let entries_tree = Self::open_tree(&dev, &stream_registry, &trash, entries_main_id, entries_journal_id)?;
        let paths_tree = Self::open_tree(&dev, &stream_registry, &trash, paths_main_id, paths_journal_id)?;

        Ok(Archive {
            dev,
            header: bootstrap.header,
            trash,
            stream_registry,
            entries_tree,
            paths_tree,
            open_entries: HashSet::new(),
        })
    }

    fn open_stream_registry(dev: &Device, bootstrap: &Bootstrap, trash: &Rc<RefCell<Stream>>) -> Result<StreamRegistry> {
        let main = open_registry_vfile("stream-registry.main", dev, bootstrap.index_meta.clone(), trash)?;
        let journal = open_registry_vfile("stream-registry.journal", dev, bootstrap.journal_meta.clone(), trash)?;
        StreamRegistry::open(dev.clone(), main, journal, trash.clone())
    }

    fn open_tree<V: crate::btree::Record>(
        dev: &Device,
        registry: &StreamRegistry,
        trash: &Rc<RefCell<Stream>>,
        main_id: Uuid,
        journal_id: Uuid,
    ) -> Result<BTree<V>> {
        let main_meta = registry
            .search(&main_id)
            .ok_or_else(|| Error::IntegrityError("missing well-known registry stream".into()))?;
        let journal_meta = registry
            .search(&journal_id)
            .ok_or_else(|| Error::IntegrityError("missing well-known registry stream".into()))?;
        let main = open_registry_vfile("tree.main", dev, main_meta, trash)?;
        let journal = open_registry_vfile("tree.journal", dev, journal_meta, trash)?;
        BTree::open(main, journal)
    }

    fn checkpoint_trees(&mut self) -> Result<()> {
        self.entries_tree.checkpoint()?;
        self.paths_tree.checkpoint()?;
        self.stream_registry.update(self.entries_tree.main_meta())?;
        self.stream_registry.update(self.entries_tree.journal_meta())?;
        self.stream_registry.update(self.paths_tree.main_meta())?;
        self.stream_registry.update(self.paths_tree.journal_meta())?;
        self.stream_registry.checkpoint()?;

        let bootstrap = Bootstrap {
            header: self.header.clone(),
            index_meta: self.stream_registry.main_meta(),
            trash_meta: self.trash.borrow().meta.clone(),
            journal_meta: self.stream_registry.journal_meta(),
        };
        header::write(&mut self.dev.borrow_mut(), &bootstrap)?;
        tracing::debug!("archive checkpoint complete");
        Ok(())
    }

    fn resolve_dir(&self, components: &[String]) -> Result<Uuid> {
        let mut current = ROOT_ID;
        for comp in components {
            let key = path_key(current, comp);
            let pv = self
                .paths_tree
                .get(&key)
                .ok_or_else(|| Error::NotFound(comp.clone()))?;
            let entry = self
                .entries_tree
                .get(&pv.entry_id)
                .ok_or_else(|| Error::IntegrityError("dangling path record".into()))?;
            if entry.entry_type != EntryType::Directory {
                return Err(Error::NotADirectory(comp.clone()));
            }
            current = entry.id;
        }
        Ok(current)
    }

    fn split_leaf(path: &str) -> Result<(Vec<String>, String)> {
        let mut comps = split_components(path);
        if comps.is_empty() {
            return Err(Error::IsADirectory("/".into()));
        }
        let name = comps.pop().unwrap();
        Ok((comps, name))
    }

    /// Resolve `path` and open (or create, per `mode`) its payload stream,
    /// always uncompressed. See [`Archive::open_with_compression`] to pick
    /// a codec for a newly created file.
    pub fn open(&mut self, path: &str, mode: &str) -> Result<File> {
        self.open_with_compression(path, mode, Compression::None)
    }

    /// Like [`Archive::open`], but a newly created file's stream is tagged
    /// with `compression`. Has no effect when the path already exists —
    /// compression is fixed at creation and carried on the stream's own
    /// metadata from then on.
    pub fn open_with_compression(&mut self, path: &str, mode: &str, compression: Compression) -> Result<File> {
        let open_mode = OpenMode::parse(mode)?;
        let (dir_comps, leaf_name) = Self::split_leaf(path)?;
        let dir_id = self.resolve_dir(&dir_comps)?;
        let leaf_key = path_key(dir_id, &leaf_name);
        let existing = self.paths_tree.get(&leaf_key).cloned();

        let (entry_id, stream_id, needs_checkpoint) = match existing {
            None => {
                if !open_mode.creates() {
                    return Err(Error::NotFound(path.to_string()));
                }
                let now = now_ts();
                let entry_id = Uuid::new_v4();
                let stream_id = Uuid::new_v4();
                let mut stream_meta = StreamMeta::new_empty(stream_id);
                stream_meta.compression = compression;
                self.stream_registry.register(stream_meta)?;
                let record = EntryRecord {
                    entry_type: EntryType::File,
                    id: entry_id,
                    parent: dir_id,
                    owner: Uuid::nil(),
                    stream: stream_id,
                    created: now,
                    modified: now,
                    size: 0,
                    length: 0,
                    compression,
                    deleted: false,
                    name: EntryRecord::truncate_name(&leaf_name),
                    user: String::new(),
                    group: String::new(),
                    perms: 0o644,
                };
                self.entries_tree.insert(entry_id, record, false)?;
                self.paths_tree.insert(leaf_key, PathValue { entry_id }, false)?;
                (entry_id, stream_id, true)
            }
            Some(pv) => {
                if open_mode.exclusive {
                    return Err(Error::AlreadyExists(path.to_string()));
                }
                let entry = self
                    .entries_tree
                    .get(&pv.entry_id)
                    .cloned()
                    .ok_or_else(|| Error::IntegrityError("dangling path record".into()))?;
                if entry.entry_type == EntryType::Directory {
                    return Err(Error::IsADirectory(path.to_string()));
                }
                let target = if entry.entry_type == EntryType::Link {
                    self.entries_tree
                        .get(&entry.parent)
                        .cloned()
                        .ok_or_else(|| Error::NotFound(format!("broken link: {path}")))?
                } else {
                    entry
                };
                (target.id, target.stream, false)
            }
        };

        if !self.open_entries.insert(entry_id) {
            return Err(Error::ValueError(format!(
                "entry {entry_id} already has an open file descriptor"
            )));
        }
        if needs_checkpoint {
            self.checkpoint_trees()?;
        }

        let result = (|| -> Result<VFile> {
            let stream_meta = self
                .stream_registry
                .search(&stream_id)
                .ok_or_else(|| Error::IntegrityError("entry references unknown stream".into()))?;
            let stream = Stream::open(self.dev.clone(), stream_meta)?;
            VFile::new(leaf_name, open_mode, stream, self.trash.clone())
        })();

        match result {
            Ok(inner) => Ok(File { entry_id, inner }),
            Err(e) => {
                self.open_entries.remove(&entry_id);
                Err(e)
            }
        }
    }

    /// Flush a file's stream state back into the stream and entry
    /// registries, making its mutations durable.
    pub fn close_file(&mut self, mut file: File) -> Result<()> {
        let logical_size = file.inner.logical_len()?;
        file.inner.flush()?;
        let new_meta = file.inner.stream().meta.clone();
        self.stream_registry.update(new_meta.clone())?;
        if let Some(mut entry) = self.entries_tree.get(&file.entry_id).cloned() {
            entry.size = logical_size;
            entry.length = new_meta.length;
            entry.compression = new_meta.compression;
            entry.modified = now_ts();
            self.entries_tree.insert(file.entry_id, entry, true)?;
        }
        self.open_entries.remove(&file.entry_id);
        self.checkpoint_trees()
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let (dir_comps, name) = Self::split_leaf(path)?;
        let dir_id = self.resolve_dir(&dir_comps)?;
        let key = path_key(dir_id, &name);
        if self.paths_tree.get(&key).is_some() {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let now = now_ts();
        let entry_id = Uuid::new_v4();
        let record = EntryRecord {
            entry_type: EntryType::Directory,
            id: entry_id,
            parent: dir_id,
            owner: Uuid::nil(),
            stream: Uuid::nil(),
            created: now,
            modified: now,
            size: 0,
            length: 0,
            compression: Compression::None,
            deleted: false,
            name: EntryRecord::truncate_name(&name),
            user: String::new(),
            group: String::new(),
            perms: 0o755,
        };
        self.entries_tree.insert(entry_id, record, false)?;
        self.paths_tree.insert(key, PathValue { entry_id }, false)?;
        self.checkpoint_trees()
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let (dir_comps, name) = Self::split_leaf(path)?;
        let dir_id = self.resolve_dir(&dir_comps)?;
        let key = path_key(dir_id, &name);
        let pv = self
            .paths_tree
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let entry = self
            .entries_tree
            .get(&pv.entry_id)
            .cloned()
            .ok_or_else(|| Error::IntegrityError("dangling path record".into()))?;
        if entry.entry_type != EntryType::Directory {
            return Err(Error::NotADirectory(path.to_string()));
        }
        let has_children = self
            .entries_tree
            .iter()
            .any(|(_, e)| e.parent == entry.id && e.id != entry.id && !e.deleted);
        if has_children {
            return Err(Error::DirectoryNotEmpty(path.to_string()));
        }
        self.paths_tree.remove(&key)?;
        self.entries_tree.remove(&pv.entry_id)?;
        self.checkpoint_trees()
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (dir_comps, name) = Self::split_leaf(path)?;
        let dir_id = self.resolve_dir(&dir_comps)?;
        let key = path_key(dir_id, &name);
        let pv = self
            .paths_tree
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let entry = self
            .entries_tree
            .get(&pv.entry_id)
            .cloned()
            .ok_or_else(|| Error::IntegrityError("dangling path record".into()))?;
        if entry.entry_type == EntryType::Directory {
            return Err(Error::IsADirectory(path.to_string()));
        }
        self.paths_tree.remove(&key)?;
        self.entries_tree.remove(&pv.entry_id)?;
        if entry.entry_type == EntryType::File {
            self.stream_registry.unregister(&entry.stream)?;
        }
        self.checkpoint_trees()
    }

    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        let (src_dir_comps, src_name) = Self::split_leaf(src)?;
        let src_dir_id = self.resolve_dir(&src_dir_comps)?;
        let src_key = path_key(src_dir_id, &src_name);
        let pv = self
            .paths_tree
            .get(&src_key)
            .cloned()
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        let mut entry = self
            .entries_tree
            .get(&pv.entry_id)
            .cloned()
            .ok_or_else(|| Error::IntegrityError("dangling path record".into()))?;

        let (dst_dir_comps, dst_name) = Self::split_leaf(dst)?;
        let dst_dir_id = self.resolve_dir(&dst_dir_comps)?;
        let dst_key = path_key(dst_dir_id, &dst_name);
        if self.paths_tree.get(&dst_key).is_some() {
            return Err(Error::AlreadyExists(dst.to_string()));
        }

        self.paths_tree.remove(&src_key)?;
        entry.parent = dst_dir_id;
        entry.name = EntryRecord::truncate_name(&dst_name);
        entry.modified = now_ts();
        self.entries_tree.insert(entry.id, entry.clone(), true)?;
        self.paths_tree.insert(dst_key, PathValue { entry_id: entry.id }, false)?;
        self.checkpoint_trees()
    }

    pub fn listdir(&self, path: &str) -> Result<Vec<EntryRecord>> {
        let comps = split_components(path);
        let dir_id = self.resolve_dir(&comps)?;
        Ok(self
            .entries_tree
            .iter()
            .filter(|(_, e)| e.parent == dir_id && e.id != dir_id && !e.deleted)
            .map(|(_, e)| e.clone())
            .collect())
    }

    pub fn stat(&self, path: &str) -> Result<EntryRecord> {
        let comps = split_components(path);
        if comps.is_empty() {
            return self
                .entries_tree
                .get(&ROOT_ID)
                .cloned()
                .ok_or_else(|| Error::IntegrityError("root entry missing".into()));
        }
        let mut comps = comps;
        let name = comps.pop().unwrap();
        let dir_id = self.resolve_dir(&comps)?;
        let key = path_key(dir_id, &name);
        let pv = self
            .paths_tree
            .get(&key)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        self.entries_tree
            .get(&pv.entry_id)
            .cloned()
            .ok_or_else(|| Error::IntegrityError("dangling path record".into()))
    }

    fn update_entry<F: FnOnce(&mut EntryRecord)>(&mut self, path: &str, f: F) -> Result<()> {
        let mut entry = self.stat(path)?;
        let id = entry.id;
        f(&mut entry);
        entry.modified = now_ts();
        self.entries_tree.insert(id, entry, true)?;
        self.checkpoint_trees()
    }

    pub fn chmod(&mut self, path: &str, perms: u16) -> Result<()> {
        self.update_entry(path, |e| e.perms = perms)
    }

    pub fn chown(&mut self, path: &str, owner: Uuid, user: String, group: String) -> Result<()> {
        self.update_entry(path, |e| {
            e.owner = owner;
            e.user = user;
            e.group = group;
        })
    }

    /// Create a `type=link` entry at `link_path` whose `parent` field is
    /// reused to point at `target`'s entry id (§4.6).
    pub fn symlink(&mut self, target: &str, link_path: &str) -> Result<()> {
        let target_entry = self.stat(target)?;
        let (dir_comps, name) = Self::split_leaf(link_path)?;
        let dir_id = self.resolve_dir(&dir_comps)?;
        let key = path_key(dir_id, &name);
        if self.paths_tree.get(&key).is_some() {
            return Err(Error::AlreadyExists(link_path.to_string()));
        }
        let now = now_ts();
        let entry_id = Uuid::new_v4();
        let record = EntryRecord {
            entry_type: EntryType::Link,
            id: entry_id,
            parent: target_entry.id,
            owner: Uuid::nil(),
            stream: Uuid::nil(),
            created: now,
            modified: now,
            size: 0,
            length: 0,
            compression: Compression::None,
            deleted: false,
            name: EntryRecord::truncate_name(&name),
            user: String::new(),
            group: String::new(),
            perms: 0o777,
        };
        self.entries_tree.insert(entry_id, record, false)?;
        self.paths_tree.insert(key, PathValue { entry_id }, false)?;
        self.checkpoint_trees()
    }

    /// `link` and `symlink` share the same on-disk mechanism (§9): a
    /// `type=link` entry whose `parent` is reused as the target reference.
    pub fn link(&mut self, target: &str, link_path: &str) -> Result<()> {
        self.symlink(target, link_path)
    }

    pub fn stats(&self) -> ArchiveStats {
        ArchiveStats {
            archive_type: "vaultfs",
            role: "primary",
            streams_in_use: self.stream_registry.len(),
            id: self.header.identity,
            owner: self.header.owner,
            domain: self.header.domain,
            node: self.header.node,
            created: self.header.created,
            title: self.header.title.clone(),
        }
    }

    /// Flush everything and release the exclusive lock.
    pub fn close(mut self) -> Result<()> {
        self.checkpoint_trees()?;
        let dev = self.dev.clone();
        drop(self);
        match Rc::try_unwrap(dev) {
            Ok(cell) => cell.into_inner().close(),
            Err(_) => Err(Error::IntegrityError("block device still referenced on close".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfile::Whence;
    use std::path::PathBuf;

    fn key() -> [u8; 32] {
        [4u8; 32]
    }

    fn temp_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.vlt");
        (dir, path)
    }

    #[test]
    fn create_write_reopen_read() {
        let (_dir, path) = temp_path();
        {
            let mut archive =
                Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
            archive.mkdir("/docs").unwrap();
            let mut f = archive.open("/docs/hello.txt", "w+").unwrap();
            f.write(b"hello vaultfs").unwrap();
            archive.close_file(f).unwrap();
            archive.close().unwrap();
        }
        {
            let mut archive = Archive::open(&path, key()).unwrap();
            let mut f = archive.open("/docs/hello.txt", "r").unwrap();
            let data = f.read_to_end().unwrap();
            assert_eq!(data, b"hello vaultfs");
            archive.close_file(f).unwrap();
            let listing = archive.listdir("/docs").unwrap();
            assert_eq!(listing.len(), 1);
            assert_eq!(listing[0].name, "hello.txt");
        }
    }

    #[test]
    fn mkdir_rmdir_mkdir() {
        let (_dir, path) = temp_path();
        let mut archive = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        archive.mkdir("/a").unwrap();
        archive.rmdir("/a").unwrap();
        archive.mkdir("/a").unwrap();
    }

    #[test]
    fn rmdir_non_empty_fails() {
        let (_dir, path) = temp_path();
        let mut archive = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        archive.mkdir("/a").unwrap();
        let f = archive.open("/a/f.txt", "w").unwrap();
        archive.close_file(f).unwrap();
        assert!(archive.rmdir("/a").is_err());
    }

    #[test]
    fn read_without_create_fails_not_found() {
        let (_dir, path) = temp_path();
        let mut archive = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        assert!(archive.open("/missing.txt", "r").is_err());
    }

    #[test]
    fn truncate_then_rewrite_via_archive() {
        let (_dir, path) = temp_path();
        let mut archive = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        let mut f = archive.open("/f.bin", "w+").unwrap();
        f.write(&vec![1u8; 20000]).unwrap();
        f.truncate(Some(0)).unwrap();
        f.write(b"y").unwrap();
        f.seek(0, Whence::Start).unwrap();
        assert_eq!(f.read_to_end().unwrap(), b"y");
        archive.close_file(f).unwrap();
    }

    #[test]
    fn rename_moves_entry() {
        let (_dir, path) = temp_path();
        let mut archive = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        archive.mkdir("/a").unwrap();
        archive.mkdir("/b").unwrap();
        let f = archive.open("/a/x.txt", "w").unwrap();
        archive.close_file(f).unwrap();
        archive.rename("/a/x.txt", "/b/y.txt").unwrap();
        assert!(archive.stat("/a/x.txt").is_err());
        assert!(archive.stat("/b/y.txt").is_ok());
    }

    #[test]
    fn symlink_reads_through_to_target() {
        let (_dir, path) = temp_path();
        let mut archive = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        let mut f = archive.open("/real.txt", "w+").unwrap();
        f.write(b"payload").unwrap();
        archive.close_file(f).unwrap();
        archive.symlink("/real.txt", "/alias.txt").unwrap();
        let mut via_link = archive.open("/alias.txt", "r").unwrap();
        assert_eq!(via_link.read_to_end().unwrap(), b"payload");
        archive.close_file(via_link).unwrap();
    }

    #[test]
    fn second_open_of_same_archive_fails_locked() {
        let (_dir, path) = temp_path();
        let archive = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        let second = Archive::open(&path, key());
        assert!(second.is_err());
        drop(archive);
    }
}

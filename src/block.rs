//! Block device — host file as an array of fixed-size, independently sealed
//! blocks.
//!
//! # On-disk layout (compatibility-critical, all fields big-endian)
//!
//! ```text
//! Offset  Size    Field
//!    0      4     previous   i32, index of previous block, -1 if head
//!    4      4     next       i32, index of next block, -1 if tail
//!    8      4     index      u32, ordinal within stream (0 for head)
//!   12     16     stream     UUID
//!   28     20     digest     SHA-1 of payload
//!   48   4008     payload
//! ```
//! 4056 bytes of plaintext, sealed with AES-256-GCM (12-byte nonce prefix,
//! 16-byte tag suffix) into a 4084-byte ciphertext, then zero-padded to
//! exactly `BLOCK_SIZE` = 4096 bytes on disk.
//!
//! `digest` is a secondary consistency check, not a security boundary — the
//! GCM tag is what actually proves the block was not tampered with.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use fs2::FileExt;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::crypto;
use crate::error::{Error, Result};

pub const BLOCK_SIZE: usize = 4096;
pub const DATA_SIZE: usize = 4008;

/// Size of the plaintext block record before sealing: 4+4+4+16+20+4008.
const PLAINTEXT_SIZE: usize = 4 + 4 + 4 + 16 + 20 + DATA_SIZE;
/// Sealed size: nonce(12) + plaintext(PLAINTEXT_SIZE) + tag(16).
const SEALED_SIZE: usize = crypto::NONCE_LEN + PLAINTEXT_SIZE + crypto::TAG_LEN;

const _: () = assert!(SEALED_SIZE <= BLOCK_SIZE, "sealed block must fit in BLOCK_SIZE");

/// A single block: one node of a doubly-linked chain belonging to exactly
/// one stream.
#[derive(Debug, Clone)]
pub struct Block {
    pub previous: i32,
    pub next: i32,
    pub index: u32,
    pub stream: Uuid,
    pub digest: [u8; 20],
    pub payload: Vec<u8>,
    /// Device slot this instance was loaded from, if any. Not part of the
    /// on-disk record — tracked only so `save_block` can catch a block
    /// being written back to a slot other than the one it came from. A
    /// freshly constructed block (never loaded) carries no position to
    /// disagree with, so it may be saved anywhere.
    pub device_index: Option<u64>,
}

impl Block {
    /// A fresh block with a zeroed payload, belonging to `stream`.
    pub fn new_empty(stream: Uuid, index: u32) -> Self {
        let payload = vec![0u8; DATA_SIZE];
        Block {
            previous: -1,
            next: -1,
            index,
            stream,
            digest: compute_digest(&payload),
            payload,
            device_index: None,
        }
    }

    /// Recompute `digest` from the current payload. Call after any payload
    /// mutation and before sealing.
    pub fn refresh_digest(&mut self) {
        self.digest = compute_digest(&self.payload);
    }

    fn write_plaintext<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        w.write_i32::<BigEndian>(self.previous)?;
        w.write_i32::<BigEndian>(self.next)?;
        w.write_u32::<BigEndian>(self.index)?;
        w.write_all(self.stream.as_bytes())?;
        w.write_all(&self.digest)?;
        debug_assert_eq!(self.payload.len(), DATA_SIZE);
        w.write_all(&self.payload)?;
        Ok(())
    }

    fn read_plaintext<R: Read>(mut r: R) -> std::io::Result<Self> {
        let previous = r.read_i32::<BigEndian>()?;
        let next = r.read_i32::<BigEndian>()?;
        let index = r.read_u32::<BigEndian>()?;
        let mut stream_bytes = [0u8; 16];
        r.read_exact(&mut stream_bytes)?;
        let mut digest = [0u8; 20];
        r.read_exact(&mut digest)?;
        let mut payload = vec![0u8; DATA_SIZE];
        r.read_exact(&mut payload)?;
        Ok(Block {
            previous,
            next,
            index,
            stream: Uuid::from_bytes(stream_bytes),
            digest,
            payload,
            device_index: None,
        })
    }
}

pub fn compute_digest(payload: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Seal `block` into a `BLOCK_SIZE`-byte on-disk image.
fn seal_block(key: &[u8; 32], block: &Block) -> Result<Vec<u8>> {
    let mut plaintext = Vec::with_capacity(PLAINTEXT_SIZE);
    block
        .write_plaintext(&mut plaintext)
        .map_err(Error::Io)?;
    debug_assert_eq!(plaintext.len(), PLAINTEXT_SIZE);

    let mut sealed = crypto::seal(key, &plaintext)
        .map_err(|e| Error::IntegrityError(e.to_string()))?;
    debug_assert_eq!(sealed.len(), SEALED_SIZE);
    sealed.resize(BLOCK_SIZE, 0u8);
    Ok(sealed)
}

/// Unseal a `BLOCK_SIZE`-byte on-disk image back into a [`Block`], verifying
/// the GCM tag and the secondary SHA-1 digest.
fn unseal_block(key: &[u8; 32], disk_image: &[u8]) -> Result<Block> {
    if disk_image.len() != BLOCK_SIZE {
        return Err(Error::OutOfBounds(format!(
            "block image is {} bytes, expected {}",
            disk_image.len(),
            BLOCK_SIZE
        )));
    }
    let plaintext = crypto::unseal(key, &disk_image[..SEALED_SIZE])
        .map_err(|e| Error::IntegrityError(e.to_string()))?;
    let block = Block::read_plaintext(&plaintext[..]).map_err(Error::Io)?;

    let expected = compute_digest(&block.payload);
    if expected != block.digest {
        return Err(Error::IntegrityError(
            "payload SHA-1 digest mismatch".into(),
        ));
    }
    Ok(block)
}

/// The block device: an encrypted array of fixed-size blocks backed by one
/// host file. Single-writer, exclusive advisory whole-file lock held for the
/// lifetime of the open handle.
pub struct BlockDevice {
    file: File,
    key: [u8; 32],
    block_count: u64,
}

impl BlockDevice {
    /// Open an existing archive file, or create+initialize one if absent.
    pub fn open(path: impl AsRef<Path>, key: [u8; 32]) -> Result<Self> {
        let path = path.as_ref();
        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        file.try_lock_exclusive().map_err(|_| Error::Locked)?;

        let len = file.metadata()?.len();
        if existed && len % BLOCK_SIZE as u64 != 0 {
            return Err(Error::InvalidFormat(format!(
                "file length {len} is not a multiple of BLOCK_SIZE={BLOCK_SIZE}"
            )));
        }

        let block_count = len / BLOCK_SIZE as u64;
        tracing::debug!(?path, block_count, "opened block device");
        Ok(BlockDevice {
            file,
            key,
            block_count,
        })
    }

    /// Number of blocks currently in the file.
    pub fn size(&self) -> u64 {
        self.block_count
    }

    /// Append a fresh sealed empty block belonging to `stream`, returning its
    /// index.
    pub fn new_block(&mut self, stream: Uuid) -> Result<u64> {
        let index = self.block_count;
        let block = Block::new_empty(stream, 0);
        let offset = index * BLOCK_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let sealed = seal_block(&self.key, &block)?;
        self.file.write_all(&sealed)?;
        self.block_count += 1;
        Ok(index)
    }

    /// Load and unseal the block at `index`.
    pub fn load_block(&mut self, index: u64) -> Result<Block> {
        if index >= self.block_count {
            return Err(Error::OutOfBounds(format!(
                "block index {index} >= size {}",
                self.block_count
            )));
        }
        let offset = index * BLOCK_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.file.read_exact(&mut buf)?;
        let mut block = unseal_block(&self.key, &buf).map_err(|e| {
            tracing::warn!(index, error = %e, "block integrity check failed");
            e
        })?;
        block.device_index = Some(index);
        Ok(block)
    }

    /// Re-seal and write `block` at `index`. If `block` was loaded from a
    /// different device slot, that disagreement is a programming error at
    /// the stream layer and is rejected as `PositionMismatch` rather than
    /// silently moving the block.
    pub fn save_block(&mut self, index: u64, block: &Block) -> Result<()> {
        if index >= self.block_count {
            return Err(Error::OutOfBounds(format!(
                "block index {index} >= size {}",
                self.block_count
            )));
        }
        if let Some(loaded_from) = block.device_index {
            if loaded_from != index {
                return Err(Error::PositionMismatch(format!(
                    "block was loaded from position {loaded_from}, cannot be saved at position {index}"
                )));
            }
        }
        let offset = index * BLOCK_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let sealed = seal_block(&self.key, block)?;
        self.file.write_all(&sealed)?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Flush, fsync, release the lock, and close.
    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.file.unlock()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [9u8; 32]
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let stream = Uuid::new_v4();
        let mut block = Block::new_empty(stream, 3);
        block.payload[..5].copy_from_slice(b"hello");
        block.refresh_digest();
        let sealed = seal_block(&key(), &block).unwrap();
        assert_eq!(sealed.len(), BLOCK_SIZE);
        let back = unseal_block(&key(), &sealed).unwrap();
        assert_eq!(back.index, 3);
        assert_eq!(&back.payload[..5], b"hello");
    }

    #[test]
    fn tamper_is_detected() {
        let stream = Uuid::new_v4();
        let block = Block::new_empty(stream, 0);
        let mut sealed = seal_block(&key(), &block).unwrap();
        sealed[100] ^= 0xFF;
        assert!(unseal_block(&key(), &sealed).is_err());
    }

    #[test]
    fn device_new_block_load_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.vlt");
        let mut dev = BlockDevice::open(&path, key()).unwrap();
        assert_eq!(dev.size(), 0);
        let stream = Uuid::new_v4();
        let idx = dev.new_block(stream).unwrap();
        assert_eq!(idx, 0);
        let mut block = dev.load_block(idx).unwrap();
        block.payload[0] = 42;
        block.refresh_digest();
        dev.save_block(idx, &block).unwrap();
        let back = dev.load_block(idx).unwrap();
        assert_eq!(back.payload[0], 42);
    }

    #[test]
    fn rejects_truncated_file() {
        use std::io::Write as _;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.vlt");
        let mut f = File::create(&path).unwrap();
        f.write_all(&[0u8; 100]).unwrap();
        drop(f);
        assert!(BlockDevice::open(&path, key()).is_err());
    }

    proptest::proptest! {
        #[test]
        fn seal_unseal_roundtrips_any_payload(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), DATA_SIZE..=DATA_SIZE)) {
            let stream = Uuid::new_v4();
            let mut block = Block::new_empty(stream, 0);
            block.payload.copy_from_slice(&bytes);
            block.refresh_digest();
            let sealed = seal_block(&key(), &block).unwrap();
            let back = unseal_block(&key(), &sealed).unwrap();
            prop_assert_eq!(back.payload, bytes);
        }
    }
}

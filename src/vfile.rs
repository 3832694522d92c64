//! Virtual file object — byte-level random-access view over a [`Stream`].
//!
//! Translates `(position)` into `(block ordinal, offset within block)` and
//! walks the stream's block chain accordingly, extending it on write past
//! EOF and filling any seek-gap with the zero bytes new blocks already
//! carry.
//!
//! When the stream's compression is not `None`, random access does not
//! compose with the codec: a compressed chain is one opaque blob, not
//! bytes addressable by block ordinal. Such streams are instead
//! materialized into memory in full on first access (`plain`) and
//! compressed back into the chain as a single blob on `flush`; the
//! block-addressed path above stays exactly as before for `Compression::
//! None`, which remains the common case.

use std::cell::RefCell;
use std::rc::Rc;

use crate::codec::{get_codec, Compression};
use crate::error::{Error, Result};
use crate::stream::Stream;

pub use crate::block::DATA_SIZE;

/// Origin for [`VFile::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Parsed subset of `{a,r,w,x,+}`, no repeats.
#[derive(Debug, Clone, Copy)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub exclusive: bool,
}

impl OpenMode {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        let mut base: Option<char> = None;
        let mut plus = false;

        for c in spec.chars() {
            if !seen.insert(c) {
                return Err(Error::ValueError(format!("repeated mode character '{c}'")));
            }
            match c {
                'a' | 'r' | 'w' | 'x' => {
                    if base.is_some() {
                        return Err(Error::ValueError(format!(
                            "mode '{spec}' combines multiple base modes"
                        )));
                    }
                    base = Some(c);
                }
                '+' => plus = true,
                other => {
                    return Err(Error::ValueError(format!("invalid mode character '{other}'")))
                }
            }
        }

        let base = base.ok_or_else(|| Error::ValueError(format!("mode '{spec}' has no base mode")))?;
        let (mut read, mut write, append, truncate, exclusive) = match base {
            'r' => (true, false, false, false, false),
            'w' => (false, true, false, true, false),
            'a' => (false, true, true, false, false),
            'x' => (false, true, false, false, true),
            _ => unreachable!(),
        };
        if plus {
            read = true;
            write = true;
        }
        Ok(OpenMode {
            read,
            write,
            append,
            truncate,
            exclusive,
        })
    }

    pub fn creates(&self) -> bool {
        self.write
    }
}

/// Random-access byte-level view over a payload stream.
pub struct VFile {
    pub name: String,
    mode: OpenMode,
    stream: Stream,
    trash: Rc<RefCell<Stream>>,
    position: u64,
    compression: Compression,
    /// Decompressed content, populated lazily on first access when
    /// `compression != None`. `None` means not yet loaded.
    plain: Option<Vec<u8>>,
    plain_dirty: bool,
}

impl VFile {
    pub fn new(name: String, mode: OpenMode, stream: Stream, trash: Rc<RefCell<Stream>>) -> Result<Self> {
        let compression = stream.meta.compression;
        let mut vfile = VFile {
            name,
            mode,
            stream,
            trash,
            position: 0,
            compression,
            plain: None,
            plain_dirty: false,
        };
        if mode.append {
            vfile.position = vfile.logical_len()?;
        }
        if mode.truncate {
            vfile.truncate(Some(0))?;
        }
        Ok(vfile)
    }

    pub fn readable(&self) -> bool {
        self.mode.read
    }
    pub fn writable(&self) -> bool {
        self.mode.write
    }
    pub fn seekable(&self) -> bool {
        true
    }
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Logical (uncompressed) length of the file's content.
    pub fn logical_len(&mut self) -> Result<u64> {
        if self.compression != Compression::None {
            self.ensure_plain_loaded()?;
            return Ok(self.plain.as_ref().unwrap().len() as u64);
        }
        Ok(self.stream.meta.length)
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Load the stream's stored (physical) bytes as one contiguous blob,
    /// in chain order, trimmed to `stream.meta.length`.
    fn read_raw_chain(&mut self) -> Result<Vec<u8>> {
        let len = self.stream.meta.length as usize;
        let payloads = self.stream.payloads()?;
        let mut out = Vec::with_capacity(len);
        for p in payloads {
            out.extend_from_slice(&p);
        }
        out.truncate(len);
        Ok(out)
    }

    /// Decompress the stream's stored content into `self.plain`, if not
    /// already loaded. A no-op when `compression == None`.
    fn ensure_plain_loaded(&mut self) -> Result<()> {
        if self.compression == Compression::None || self.plain.is_some() {
            return Ok(());
        }
        if self.stream.meta.length == 0 {
            self.plain = Some(Vec::new());
            return Ok(());
        }
        let compressed = self.read_raw_chain()?;
        let codec = get_codec(self.compression);
        let data = codec
            .decompress(&compressed)
            .map_err(|e| Error::IntegrityError(format!("stream decompress failed: {e}")))?;
        self.plain = Some(data);
        Ok(())
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        if self.compression != Compression::None {
            self.ensure_plain_loaded()?;
            let end = self.plain.as_ref().unwrap().len() as u64;
            let base: i64 = match whence {
                Whence::Start => 0,
                Whence::Current => self.position as i64,
                Whence::End => end as i64,
            };
            let target = base + offset;
            if target < 0 {
                return Err(Error::OutOfBounds("seek before start of stream".into()));
            }
            self.position = target as u64;
            return Ok(self.position);
        }

        let end = self.stream.meta.length;
        let base: i64 = match whence {
            Whence::Start => 0,
            Whence::Current => self.position as i64,
            Whence::End => end as i64,
        };
        let target = base + offset;
        if target < 0 {
            return Err(Error::OutOfBounds("seek before start of stream".into()));
        }
        let target = target as u64;

        if target == 0 && end == 0 {
            self.position = 0;
            return Ok(0);
        }

        let target_ordinal = if target == 0 { 0 } else { ((target.saturating_sub(1)) / DATA_SIZE as u64) as u32 };
        if target < end || target == 0 {
            let prior = self.stream.wind(target_ordinal)?;
            if prior.is_none() && self.stream.meta.count > 0 {
                // target does not exist in this chain; leave position unchanged.
                return Ok(self.position);
            }
        }
        self.position = target;
        Ok(self.position)
    }

    /// Ensure the stream's current block is positioned at `ordinal`,
    /// extending the chain (zero-filling the gap) if writing past the
    /// current end.
    fn ensure_positioned(&mut self, ordinal: u32) -> Result<()> {
        if self.stream.current().map(|b| b.index) == Some(ordinal) {
            return Ok(());
        }
        if (ordinal as u64) < self.stream.meta.count as u64 {
            self.stream.wind(ordinal)?;
            return Ok(());
        }
        if self.stream.meta.count > 0 {
            self.stream.wind(self.stream.meta.count - 1)?;
        }
        while (self.stream.meta.count as u64) <= ordinal as u64 {
            let mut trash = self.trash.borrow_mut();
            if !self.stream.extend(&mut trash)? {
                return Err(Error::IntegrityError(
                    "failed to extend stream while writing".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.mode.read {
            return Err(Error::ValueError("stream not opened for reading".into()));
        }
        if self.compression != Compression::None {
            self.ensure_plain_loaded()?;
            let plain = self.plain.as_ref().unwrap();
            let end = plain.len() as u64;
            if self.position >= end {
                return Ok(0);
            }
            let remaining = (end - self.position) as usize;
            let n = buf.len().min(remaining);
            let start = self.position as usize;
            buf[..n].copy_from_slice(&plain[start..start + n]);
            self.position += n as u64;
            return Ok(n);
        }
        self.read_direct(buf)
    }

    fn read_direct(&mut self, buf: &mut [u8]) -> Result<usize> {
        let end = self.stream.meta.length;
        let mut written = 0usize;

        while written < buf.len() && self.position < end {
            let ordinal = (self.position / DATA_SIZE as u64) as u32;
            if self.stream.current().map(|b| b.index) != Some(ordinal) {
                if self.stream.wind(ordinal)?.is_none() && self.stream.meta.count > 0 {
                    break;
                }
            }
            let offset_in_block = (self.position % DATA_SIZE as u64) as usize;
            let available_in_block = DATA_SIZE - offset_in_block;
            let remaining_in_stream = (end - self.position) as usize;
            let n = (buf.len() - written)
                .min(available_in_block)
                .min(remaining_in_stream);
            if n == 0 {
                break;
            }
            let block = self
                .stream
                .current()
                .ok_or_else(|| Error::IntegrityError("stream has no blocks but length > 0".into()))?;
            buf[written..written + n].copy_from_slice(&block.payload[offset_in_block..offset_in_block + n]);
            written += n;
            self.position += n as u64;
            if offset_in_block + n == DATA_SIZE && self.position < end {
                self.stream.next()?;
            }
        }
        Ok(written)
    }

    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let remaining = self.logical_len()?.saturating_sub(self.position);
        let mut out = vec![0u8; remaining as usize];
        let n = self.read(&mut out)?;
        out.truncate(n);
        Ok(out)
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if !self.mode.write {
            return Err(Error::ValueError("stream not opened for writing".into()));
        }
        if self.compression != Compression::None {
            self.ensure_plain_loaded()?;
            let plain = self.plain.as_mut().unwrap();
            let start = self.position as usize;
            if start + bytes.len() > plain.len() {
                plain.resize(start + bytes.len(), 0);
            }
            plain[start..start + bytes.len()].copy_from_slice(bytes);
            self.position += bytes.len() as u64;
            self.plain_dirty = true;
            return Ok(bytes.len());
        }
        self.write_direct(bytes)
    }

    fn write_direct(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut written = 0usize;
        while written < bytes.len() {
            let ordinal = (self.position / DATA_SIZE as u64) as u32;
            self.ensure_positioned(ordinal)?;
            let offset_in_block = (self.position % DATA_SIZE as u64) as usize;
            let n = (bytes.len() - written).min(DATA_SIZE - offset_in_block);
            let block = self
                .stream
                .current_mut()
                .ok_or_else(|| Error::IntegrityError("stream has no current block".into()))?;
            block.payload[offset_in_block..offset_in_block + n]
                .copy_from_slice(&bytes[written..written + n]);
            block.refresh_digest();
            self.stream.changed();

            written += n;
            self.position += n as u64;
            if self.position > self.stream.meta.length {
                self.stream.meta.length = self.position;
            }
        }
        Ok(written)
    }

    /// Truncate to `size` (or the current position if `None`).
    pub fn truncate(&mut self, size: Option<u64>) -> Result<()> {
        let target = size.unwrap_or(self.position);
        if self.compression != Compression::None {
            self.ensure_plain_loaded()?;
            self.plain.as_mut().unwrap().resize(target as usize, 0);
            self.plain_dirty = true;
            if self.position > target {
                self.position = target;
            }
            return Ok(());
        }
        let mut trash = self.trash.borrow_mut();
        self.stream.truncate(&mut trash, target)?;
        if self.position > target {
            self.position = target;
        }
        Ok(())
    }

    /// Recompress `self.plain` into the block chain wholesale, replacing
    /// whatever was stored before. Only called when `compression != None`
    /// and the in-memory content has been touched since it was loaded.
    fn flush_compressed(&mut self) -> Result<()> {
        let plain = self.plain.as_ref().cloned().unwrap_or_default();
        let codec = get_codec(self.compression);
        let compressed = codec
            .compress(&plain)
            .map_err(|e| Error::IntegrityError(format!("stream compress failed: {e}")))?;
        {
            let mut trash = self.trash.borrow_mut();
            self.stream.truncate(&mut trash, 0)?;
        }
        let saved_position = self.position;
        self.position = 0;
        self.write_direct(&compressed)?;
        self.position = saved_position;
        self.plain_dirty = false;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.compression != Compression::None && self.plain_dirty {
            self.flush_compressed()?;
        }
        self.stream.save(true)
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    pub fn into_stream(self) -> Stream {
        self.stream
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockDevice;
    use std::rc::Rc;
    use uuid::Uuid;

    fn setup() -> (tempfile::TempDir, crate::stream::Device) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.vlt");
        let dev = BlockDevice::open(&path, [1u8; 32]).unwrap();
        (dir, Rc::new(RefCell::new(dev)))
    }

    #[test]
    fn write_seek_read_roundtrip() {
        let (_dir, dev) = setup();
        let trash = Rc::new(RefCell::new(Stream::create(dev.clone(), Uuid::new_v4())));
        let stream = Stream::create(dev, Uuid::new_v4());
        let mode = OpenMode::parse("w+").unwrap();
        let mut f = VFile::new("test.bin".into(), mode, stream, trash).unwrap();

        let data = vec![7u8; DATA_SIZE * 3 + 123];
        let n = f.write(&data).unwrap();
        assert_eq!(n, data.len());
        f.seek(0, Whence::Start).unwrap();
        let back = f.read_to_end().unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn truncate_then_rewrite() {
        let (_dir, dev) = setup();
        let trash = Rc::new(RefCell::new(Stream::create(dev.clone(), Uuid::new_v4())));
        let stream = Stream::create(dev, Uuid::new_v4());
        let mode = OpenMode::parse("w+").unwrap();
        let mut f = VFile::new("t.bin".into(), mode, stream, trash).unwrap();

        f.write(b"hello world").unwrap();
        f.truncate(Some(0)).unwrap();
        f.write(b"bye").unwrap();
        f.seek(0, Whence::Start).unwrap();
        assert_eq!(f.read_to_end().unwrap(), b"bye");
    }

    #[test]
    fn invalid_mode_rejected() {
        assert!(OpenMode::parse("rw").is_err());
        assert!(OpenMode::parse("rr").is_err());
        assert!(OpenMode::parse("r+").is_ok());
    }

    #[test]
    fn compressed_stream_roundtrips_and_shrinks_on_disk() {
        let (_dir, dev) = setup();
        let trash = Rc::new(RefCell::new(Stream::create(dev.clone(), Uuid::new_v4())));
        let mut stream = Stream::create(dev, Uuid::new_v4());
        stream.meta.compression = Compression::Gzip;
        let mode = OpenMode::parse("w+").unwrap();
        let mut f = VFile::new("c.bin".into(), mode, stream, trash).unwrap();

        let data = b"repeat me repeat me repeat me ".repeat(200);
        f.write(&data).unwrap();
        assert_eq!(f.logical_len().unwrap(), data.len() as u64);
        f.flush().unwrap();

        let stored_blocks = f.stream().meta.count as usize;
        assert!(stored_blocks * DATA_SIZE < data.len());

        f.seek(0, Whence::Start).unwrap();
        let back = f.read_to_end().unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn compressed_stream_survives_reopen() {
        let (_dir, dev) = setup();
        let trash = Rc::new(RefCell::new(Stream::create(dev.clone(), Uuid::new_v4())));
        let mut stream = Stream::create(dev.clone(), Uuid::new_v4());
        stream.meta.compression = Compression::Zip;
        let mode = OpenMode::parse("w+").unwrap();
        let mut f = VFile::new("z.bin".into(), mode, stream, trash.clone()).unwrap();
        f.write(b"small payload, compressed anyway").unwrap();
        f.flush().unwrap();
        let meta = f.stream().meta.clone();

        let reopened = Stream::open(dev, meta).unwrap();
        let mut f2 = VFile::new("z.bin".into(), OpenMode::parse("r").unwrap(), reopened, trash).unwrap();
        assert_eq!(f2.read_to_end().unwrap(), b"small payload, compressed anyway");
    }
}

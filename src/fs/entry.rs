//! Directory entry record — the fixed-width row stored in the entry tree,
//! keyed by entry UUID.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::btree::Record;
use crate::codec::Compression;
use crate::error::{Error, Result};

pub const NAME_LEN: usize = 256;
pub const USER_LEN: usize = 32;
pub const GROUP_LEN: usize = 16;

pub const ENTRY_RECORD_SIZE: usize =
    1 + 16 + 16 + 16 + 16 + 8 + 8 + 8 + 8 + 4 + 1 + NAME_LEN + USER_LEN + GROUP_LEN + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    File = 0,
    Link = 1,
    Directory = 2,
}

impl EntryType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(EntryType::File),
            1 => Ok(EntryType::Link),
            2 => Ok(EntryType::Directory),
            other => Err(Error::InvalidFormat(format!("unknown entry type {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub entry_type: EntryType,
    pub id: Uuid,
    /// Containing directory's id. For links, this field is reused to point
    /// at the link's target entry id instead (§4.6).
    pub parent: Uuid,
    pub owner: Uuid,
    /// Payload stream id. Meaningless for directories.
    pub stream: Uuid,
    pub created: i64,
    pub modified: i64,
    pub size: u64,
    pub length: u64,
    pub compression: Compression,
    pub deleted: bool,
    pub name: String,
    pub user: String,
    pub group: String,
    pub perms: u16,
}

fn write_padded(buf: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width);
    buf.extend_from_slice(&bytes[..n]);
    buf.extend(std::iter::repeat(0u8).take(width - n));
}

fn read_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl EntryRecord {
    /// Names longer than `NAME_LEN` UTF-8 bytes are truncated, not
    /// rejected (§4.6 tie-breaks).
    pub fn truncate_name(name: &str) -> String {
        if name.len() <= NAME_LEN {
            return name.to_string();
        }
        let mut end = NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_string()
    }
}

impl Record for EntryRecord {
    const SIZE: usize = ENTRY_RECORD_SIZE;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENTRY_RECORD_SIZE);
        buf.push(self.entry_type as u8);
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(self.parent.as_bytes());
        buf.extend_from_slice(self.owner.as_bytes());
        buf.extend_from_slice(self.stream.as_bytes());
        buf.extend_from_slice(&self.created.to_be_bytes());
        buf.extend_from_slice(&self.modified.to_be_bytes());
        buf.extend_from_slice(&self.size.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(&(self.compression.as_u16() as u32).to_be_bytes());
        buf.push(self.deleted as u8);
        write_padded(&mut buf, &EntryRecord::truncate_name(&self.name), NAME_LEN);
        write_padded(&mut buf, &self.user, USER_LEN);
        write_padded(&mut buf, &self.group, GROUP_LEN);
        buf.extend_from_slice(&self.perms.to_be_bytes());
        debug_assert_eq!(buf.len(), ENTRY_RECORD_SIZE);
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != ENTRY_RECORD_SIZE {
            return Err(Error::InvalidFormat(format!(
                "entry record is {} bytes, expected {}",
                buf.len(),
                ENTRY_RECORD_SIZE
            )));
        }
        let mut r = Cursor::new(buf);
        let mut u8buf = [0u8; 1];
        r.read_exact(&mut u8buf)?;
        let entry_type = EntryType::from_u8(u8buf[0])?;

        let mut read_uuid = |r: &mut Cursor<&[u8]>| -> std::io::Result<Uuid> {
            let mut b = [0u8; 16];
            r.read_exact(&mut b)?;
            Ok(Uuid::from_bytes(b))
        };
        let id = read_uuid(&mut r)?;
        let parent = read_uuid(&mut r)?;
        let owner = read_uuid(&mut r)?;
        let stream = read_uuid(&mut r)?;
        let created = r.read_i64::<BigEndian>()?;
        let modified = r.read_i64::<BigEndian>()?;
        let size = r.read_u64::<BigEndian>()?;
        let length = r.read_u64::<BigEndian>()?;
        let compression_raw = r.read_u32::<BigEndian>()?;
        let compression = Compression::from_u16(compression_raw as u16).ok_or_else(|| {
            Error::InvalidFormat(format!("unknown compression id {compression_raw}"))
        })?;
        r.read_exact(&mut u8buf)?;
        let deleted = u8buf[0] != 0;

        let mut name_buf = [0u8; NAME_LEN];
        r.read_exact(&mut name_buf)?;
        let name = read_padded(&name_buf);

        let mut user_buf = [0u8; USER_LEN];
        r.read_exact(&mut user_buf)?;
        let user = read_padded(&user_buf);

        let mut group_buf = [0u8; GROUP_LEN];
        r.read_exact(&mut group_buf)?;
        let group = read_padded(&group_buf);

        let perms = r.read_u16::<BigEndian>()?;

        Ok(EntryRecord {
            entry_type,
            id,
            parent,
            owner,
            stream,
            created,
            modified,
            size,
            length,
            compression,
            deleted,
            name,
            user,
            group,
            perms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let rec = EntryRecord {
            entry_type: EntryType::File,
            id: Uuid::new_v4(),
            parent: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            stream: Uuid::new_v4(),
            created: 1234,
            modified: 5678,
            size: 10,
            length: 20,
            compression: Compression::Gzip,
            deleted: false,
            name: "hello.txt".into(),
            user: "alice".into(),
            group: "staff".into(),
            perms: 0o644,
        };
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), ENTRY_RECORD_SIZE);
        let back = EntryRecord::from_bytes(&bytes).unwrap();
        assert_eq!(back.id, rec.id);
        assert_eq!(back.name, rec.name);
        assert_eq!(back.perms, rec.perms);
    }

    #[test]
    fn long_name_truncated_not_rejected() {
        let long = "a".repeat(300);
        let truncated = EntryRecord::truncate_name(&long);
        assert_eq!(truncated.len(), NAME_LEN);
    }
}

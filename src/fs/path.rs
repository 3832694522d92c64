//! Path record — maps a deterministic path-key UUID to the entry it names
//! within its parent directory. The path key is the tree's own key
//! (`UUIDv5(namespace=parent.id, name=entry.name)`), so the stored value
//! only needs to carry the entry id it resolves to.

use uuid::Uuid;

use crate::btree::Record;
use crate::error::{Error, Result};

/// Root directory's id is the all-zero UUID, and it is its own parent.
pub const ROOT_ID: Uuid = Uuid::nil();
pub const ROOT_NAME: &str = "root";

pub fn root_entry_id() -> Uuid {
    ROOT_ID
}

/// `UUIDv5(namespace=parent, name=name)`, used as both the path tree's key
/// and the means of resolving a child name inside a directory.
pub fn path_key(parent: Uuid, name: &str) -> Uuid {
    Uuid::new_v5(&parent, name.as_bytes())
}

pub fn root_path_key() -> Uuid {
    path_key(ROOT_ID, ROOT_NAME)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathValue {
    pub entry_id: Uuid,
}

impl Record for PathValue {
    const SIZE: usize = 16;

    fn to_bytes(&self) -> Vec<u8> {
        self.entry_id.as_bytes().to_vec()
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != 16 {
            return Err(Error::InvalidFormat(format!(
                "path record is {} bytes, expected 16",
                buf.len()
            )));
        }
        let b: [u8; 16] = buf.try_into().unwrap();
        Ok(PathValue {
            entry_id: Uuid::from_bytes(b),
        })
    }
}

/// Split a slash-separated path into normalized components, discarding
/// empty segments from leading/trailing/duplicate slashes. Empty path and
/// `"/"` both resolve to zero components (the root).
pub fn split_components(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_key_deterministic() {
        let parent = Uuid::new_v4();
        let a = path_key(parent, "file.txt");
        let b = path_key(parent, "file.txt");
        assert_eq!(a, b);
        let c = path_key(parent, "other.txt");
        assert_ne!(a, c);
    }

    #[test]
    fn normalizes_slashes() {
        assert_eq!(split_components("/a/b/c/"), vec!["a", "b", "c"]);
        assert_eq!(split_components(""), Vec::<String>::new());
        assert_eq!(split_components("/"), Vec::<String>::new());
        assert_eq!(split_components("a//b"), vec!["a", "b"]);
    }
}

//! Entry/path layer — two B+Trees (entry tree, path tree) mapping names to
//! entries and entries to payload streams, plus the root-directory sentinel
//! and the path-resolution walk used by every filesystem operation.

pub mod entry;
pub mod path;

pub use entry::{EntryRecord, EntryType};
pub use path::{path_key, root_entry_id, root_path_key, PathValue};

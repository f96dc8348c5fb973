//! VikingFS: the URI-keyed, tenant-scoped filesystem facade over a
//! pluggable blob store, kept consistent with the vector index across
//! renames and deletes.

pub mod access;
pub mod decode;
pub mod fs;
pub mod relations;

pub use access::{check_uri_access, is_uri_visible};
pub use decode::decode_text;
pub use fs::{DEFAULT_CONTENT_FILENAME, TreeEntry, VikingFS, WriteContextRequest};
pub use relations::{RELATIONS_FILE, RelationEntry};

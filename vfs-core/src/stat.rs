//! File metadata (spec §3 "FileStat").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use bitflags::bitflags;

use crate::uri::Uri;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileType: u8 {
        const FILE = 1 << 0;
        const DIRECTORY = 1 << 1;
        const SYMBOLIC_LINK = 1 << 2;
    }
}

/// Sentinel that disables the etag precondition check entirely.
pub const ETAG_DISABLED: &str = "disabled";

/// `etag(mtime, size)` per spec §3.
pub fn compute_etag(mtime: i64, size: u64) -> String {
    let mut hasher = DefaultHasher::new();
    mtime.hash(&mut hasher);
    size.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub resource: Uri,
    pub name: String,
    pub file_type: FileType,
    pub mtime: i64,
    pub ctime: i64,
    pub size: u64,
    pub etag: String,
    pub children: Option<Vec<FileStat>>,
}

impl FileStat {
    pub fn new(resource: Uri, file_type: FileType, mtime: i64, ctime: i64, size: u64) -> Self {
        let name = resource.name().to_string();
        let etag = compute_etag(mtime, size);
        Self { resource, name, file_type, mtime, ctime, size, etag, children: None }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type.contains(FileType::DIRECTORY)
    }

    pub fn is_file(&self) -> bool {
        self.file_type.contains(FileType::FILE)
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.file_type.contains(FileType::SYMBOLIC_LINK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_changes_with_either_input() {
        let a = compute_etag(1, 10);
        let b = compute_etag(2, 10);
        let c = compute_etag(1, 11);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, compute_etag(1, 10));
    }
}

//! The provider capability bitset (spec §3, §6).

use bitflags::bitflags;

bitflags! {
    /// What a provider supports. Bit values are part of the remote wire
    /// contract (spec §6) and must not be renumbered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Whole-file `read_file`/`write_file`.
        const FILE_READ_WRITE = 1 << 0;
        /// Random-access `open`/`read`/`write`/`close`.
        const FILE_OPEN_READ_WRITE_CLOSE = 1 << 1;
        /// Server-side `copy` for same-provider folder/file copies.
        const FILE_FOLDER_COPY = 1 << 2;
        /// Path comparisons are case-sensitive.
        const PATH_CASE_SENSITIVE = 1 << 3;
        /// Every write fails with `FilePermissionDenied`.
        const READONLY = 1 << 4;
        /// Deletes may move to trash instead of erasing.
        const TRASH = 1 << 5;
        /// `read_file_stream` may be served without buffering the whole file.
        const FILE_READ_STREAM = 1 << 6;
    }
}

impl Capabilities {
    pub fn can_read(&self) -> bool {
        self.intersects(Capabilities::FILE_READ_WRITE | Capabilities::FILE_OPEN_READ_WRITE_CLOSE)
    }

    pub fn can_write(&self) -> bool {
        self.can_read() && !self.contains(Capabilities::READONLY)
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.contains(Capabilities::PATH_CASE_SENSITIVE)
    }
}

//! Common imports shared by the `fs` submodules, mirroring the FUSE
//! reply/type surface and the `vfs_core` engine types each operation
//! needs.

pub use fuser::{FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, ReplyXattr, Request, TimeOrNow};

#[cfg(not(target_os = "macos"))]
pub use libc::ENODATA;
#[cfg(target_os = "macos")]
pub use libc::ENOATTR;
pub use libc::{EBADF, EIO, ENOENT, ENOTEMPTY};

pub use std::collections::HashMap;
pub use std::ffi::OsStr;
pub use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use bytes::Bytes;

pub use vfs_core::file_service::{ReadFileOptions, ResolveOptions, WriteFileOptions};
pub use vfs_core::provider::DeleteOptions;
pub use vfs_core::stat::FileStat;
pub use vfs_core::Uri;

pub use super::{fuse_kind, stat_to_attr, OpenWriteFile, RemoteFS, ROOT_DIR_ATTR, TTL};

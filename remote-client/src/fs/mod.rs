//! Root of the FUSE filesystem implementation.
//!
//! `RemoteFS` holds the inode table, the attribute cache, and a
//! `vfs_core::FileService` wired to a single registered
//! `RemoteFileSystemProvider`. The `impl Filesystem` block on `FsWrapper`
//! dispatches kernel callbacks to the sibling modules, each of which talks
//! to `FileService` instead of the wire protocol directly.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use fuser::{FileAttr, FileType as FuseFileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request};

use vfs_core::stat::{FileStat, FileType as VfsFileType};
use vfs_core::{FileService, ProviderRegistry, Uri};

use crate::config::Config;
use crate::fs::cache::AttributeCache;
use crate::provider::RemoteFileSystemProvider;

pub mod cache;
pub mod prelude;
mod attr;
mod create;
mod delete;
mod read;
mod rename;
mod write;
mod xattr;

/// Scheme this client mounts under; the only scheme registered in its
/// `ProviderRegistry`.
pub const SCHEME: &str = "remote";

/// Default kernel attribute/entry cache TTL, independent of the
/// server-facing `AttributeCache` strategy.
pub const TTL: Duration = Duration::from_secs(1);

pub const ROOT_DIR_ATTR: FileAttr = FileAttr {
    ino: 1,
    size: 0,
    blocks: 0,
    atime: UNIX_EPOCH,
    mtime: UNIX_EPOCH,
    ctime: UNIX_EPOCH,
    crtime: UNIX_EPOCH,
    kind: FuseFileType::Directory,
    perm: 0o755,
    nlink: 2,
    uid: 501,
    gid: 20,
    rdev: 0,
    flags: 0,
    blksize: 512,
};

/// In-memory write-back buffer for a file opened with write access.
/// `write` calls accumulate chunks here; `release` assembles them into a
/// single read-modify-write round trip through `FileService`.
pub struct OpenWriteFile {
    pub(crate) path: String,
    pub(crate) buffer: HashMap<i64, Vec<u8>>,
}

pub struct RemoteFS {
    pub(crate) runtime: tokio::runtime::Runtime,
    pub(crate) service: Arc<FileService>,
    _registration: vfs_core::registry::RegistrationHandle,
    pub(crate) inode_to_path: HashMap<u64, String>,
    pub(crate) path_to_inode: HashMap<String, u64>,
    pub(crate) inode_to_type: HashMap<u64, FuseFileType>,
    pub(crate) next_inode: u64,
    pub(crate) attribute_cache: AttributeCache,
    pub(crate) config: Config,
    pub(crate) open_files: HashMap<u64, OpenWriteFile>,
    pub(crate) next_fh: u64,
}

impl RemoteFS {
    pub fn new(config: Config) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("failed to build client runtime");

        let registry = ProviderRegistry::new();
        let server_url = config.server_url.clone();
        let provider = runtime.block_on(async { RemoteFileSystemProvider::new(server_url) });
        let registration = registry.register(SCHEME, provider).expect("remote scheme registered twice");
        let service = FileService::new(registry);

        let mut fs = Self {
            runtime,
            service,
            _registration: registration,
            inode_to_path: HashMap::new(),
            path_to_inode: HashMap::new(),
            inode_to_type: HashMap::new(),
            next_inode: 2,
            attribute_cache: AttributeCache::new(&config),
            config,
            open_files: HashMap::new(),
            next_fh: 1,
        };

        fs.inode_to_path.insert(1, "/".to_string());
        fs.path_to_inode.insert("/".to_string(), 1);
        fs.inode_to_type.insert(1, FuseFileType::Directory);
        let ttl = Duration::from_secs(fs.config.cache_ttl_seconds);
        fs.attribute_cache.put(1, ROOT_DIR_ATTR, ttl);
        fs
    }

    /// Maps a mounted path (always starting with `/`) to the URI the
    /// registered provider understands.
    pub(crate) fn uri_for_path(&self, path: &str) -> Uri {
        Uri::new(SCHEME, path)
    }

    /// Joins a parent path and a child name, handling the root's
    /// already-present trailing slash.
    pub(crate) fn join_path(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    /// Looks up or allocates the inode for `path`, recording its kind.
    pub(crate) fn inode_for_path(&mut self, path: &str, kind: FuseFileType) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            self.inode_to_type.insert(ino, kind);
            return ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.inode_to_path.insert(ino, path.to_string());
        self.path_to_inode.insert(path.to_string(), ino);
        self.inode_to_type.insert(ino, kind);
        ino
    }

    /// Drops every bit of bookkeeping state for a deleted or renamed-away
    /// path.
    pub(crate) fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.path_to_inode.remove(path) {
            self.inode_to_path.remove(&ino);
            self.inode_to_type.remove(&ino);
            self.attribute_cache.remove(&ino);
        }
    }
}

pub(crate) fn fuse_kind(file_type: VfsFileType) -> FuseFileType {
    if file_type.contains(VfsFileType::DIRECTORY) {
        FuseFileType::Directory
    } else if file_type.contains(VfsFileType::SYMBOLIC_LINK) {
        FuseFileType::Symlink
    } else {
        FuseFileType::RegularFile
    }
}

pub(crate) fn stat_to_attr(ino: u64, stat: &FileStat) -> FileAttr {
    let kind = fuse_kind(stat.file_type);
    let mtime = UNIX_EPOCH + Duration::from_millis(stat.mtime.max(0) as u64);
    let ctime = UNIX_EPOCH + Duration::from_millis(stat.ctime.max(0) as u64);
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime,
        crtime: ctime,
        kind,
        perm: if kind == FuseFileType::Directory { 0o755 } else { 0o644 },
        nlink: if kind == FuseFileType::Directory { 2 } else { 1 },
        uid: 501,
        gid: 20,
        rdev: 0,
        flags: 0,
        blksize: 512,
    }
}

#[derive(Clone)]
pub struct FsWrapper(pub Arc<Mutex<RemoteFS>>);

impl FsWrapper {
    pub fn new(fs: RemoteFS) -> Self {
        Self(Arc::new(Mutex::new(fs)))
    }
}

impl Filesystem for FsWrapper {
    fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
        let mut fs = self.0.lock().unwrap();
        attr::getattr(&mut fs, req, ino, reply);
    }

    fn setattr(&mut self, req: &Request<'_>, ino: u64, mode: Option<u32>, uid: Option<u32>, gid: Option<u32>, size: Option<u64>, atime: Option<fuser::TimeOrNow>, mtime: Option<fuser::TimeOrNow>, ctime: Option<std::time::SystemTime>, fh: Option<u64>, crtime: Option<std::time::SystemTime>, chgtime: Option<std::time::SystemTime>, bkuptime: Option<std::time::SystemTime>, flags: Option<u32>, reply: ReplyAttr) {
        let mut fs = self.0.lock().unwrap();
        attr::setattr(&mut fs, req, ino, mode, uid, gid, size, atime, mtime, ctime, fh, crtime, chgtime, bkuptime, flags, reply);
    }

    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let mut fs = self.0.lock().unwrap();
        read::lookup(&mut fs, req, parent, name, reply);
    }

    fn readdir(&mut self, req: &Request, ino: u64, fh: u64, offset: i64, reply: ReplyDirectory) {
        let mut fs = self.0.lock().unwrap();
        read::readdir(&mut fs, req, ino, fh, offset, reply);
    }

    fn read(&mut self, req: &Request<'_>, ino: u64, fh: u64, offset: i64, size: u32, flags: i32, lock_owner: Option<u64>, reply: ReplyData) {
        let mut fs = self.0.lock().unwrap();
        read::read(&mut fs, req, ino, fh, offset, size, flags, lock_owner, reply);
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let mut fs = self.0.lock().unwrap();
        read::open(&mut fs, req, ino, flags, reply);
    }

    fn write(&mut self, req: &Request<'_>, ino: u64, fh: u64, offset: i64, data: &[u8], write_flags: u32, flags: i32, lock_owner: Option<u64>, reply: ReplyWrite) {
        let mut fs = self.0.lock().unwrap();
        write::write(&mut fs, req, ino, fh, offset, data, write_flags, flags, lock_owner, reply);
    }

    fn release(&mut self, req: &Request<'_>, ino: u64, fh: u64, flags: i32, lock_owner: Option<u64>, flush: bool, reply: ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        write::release(&mut fs, req, ino, fh, flags, lock_owner, flush, reply);
    }

    fn flush(&mut self, req: &Request<'_>, ino: u64, fh: u64, lock_owner: u64, reply: ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        write::flush(&mut fs, req, ino, fh, lock_owner, reply);
    }

    fn create(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, flags: i32, reply: ReplyCreate) {
        let mut fs = self.0.lock().unwrap();
        create::create(&mut fs, req, parent, name, mode, umask, flags, reply);
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, reply: ReplyEntry) {
        let mut fs = self.0.lock().unwrap();
        create::mkdir(&mut fs, req, parent, name, mode, umask, reply);
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        delete::unlink(&mut fs, req, parent, name, reply);
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        delete::rmdir(&mut fs, req, parent, name, reply);
    }

    fn rename(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, newparent: u64, newname: &OsStr, flags: u32, reply: ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        rename::rename(&mut fs, req, parent, name, newparent, newname, flags, reply);
    }

    fn getxattr(&mut self, req: &Request, ino: u64, name: &OsStr, size: u32, reply: fuser::ReplyXattr) {
        let mut fs = self.0.lock().unwrap();
        xattr::getxattr(&mut fs, req, ino, name, size, reply);
    }

    fn setxattr(&mut self, req: &Request, ino: u64, name: &OsStr, value: &[u8], flags: i32, position: u32, reply: ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        xattr::setxattr(&mut fs, req, ino, name, value, flags, position, reply);
    }

    fn listxattr(&mut self, req: &Request, ino: u64, size: u32, reply: fuser::ReplyXattr) {
        let mut fs = self.0.lock().unwrap();
        xattr::listxattr(&mut fs, req, ino, size, reply);
    }

    fn removexattr(&mut self, req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        xattr::removexattr(&mut fs, req, ino, name, reply);
    }
}

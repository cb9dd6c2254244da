use super::prelude::*;

/// macOS Finder compatibility: claim every extended attribute is absent
/// rather than erroring, which keeps Finder from reporting copy/paste
/// failures against a mount that has no xattr storage.
pub fn getxattr(_fs: &mut RemoteFS, _req: &Request, _ino: u64, _name: &OsStr, _size: u32, reply: ReplyXattr) {
    #[cfg(target_os = "macos")]
    reply.error(ENOATTR);
    #[cfg(not(target_os = "macos"))]
    reply.error(ENODATA);
}

pub fn setxattr(_fs: &mut RemoteFS, _req: &Request, _ino: u64, _name: &OsStr, _value: &[u8], _flags: i32, _position: u32, reply: ReplyEmpty) {
    reply.ok();
}

pub fn listxattr(_fs: &mut RemoteFS, _req: &Request, _ino: u64, size: u32, reply: ReplyXattr) {
    if size == 0 {
        reply.size(0);
    } else {
        reply.data(&[]);
    }
}

pub fn removexattr(_fs: &mut RemoteFS, _req: &Request, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
    reply.ok();
}

use super::prelude::*;

/// Resolves an inode's attributes, consulting the cache first and falling
/// back to `FileService::resolve` on a miss.
pub fn fetch_and_cache_attributes(fs: &mut RemoteFS, ino: u64) -> Option<FileAttr> {
    if ino == 1 {
        return Some(ROOT_DIR_ATTR);
    }
    if let Some(attr) = fs.attribute_cache.get(&ino) {
        return Some(attr);
    }

    let path = fs.inode_to_path.get(&ino)?.clone();
    let uri = fs.uri_for_path(&path);
    let stat = fs.runtime.block_on(fs.service.resolve(&uri, ResolveOptions { resolve_metadata: true, ..Default::default() })).ok()?;

    let attr = stat_to_attr(ino, &stat);
    let ttl = Duration::from_secs(fs.config.cache_ttl_seconds);
    fs.attribute_cache.put(ino, attr, ttl);
    Some(attr)
}

pub fn getattr(fs: &mut RemoteFS, _req: &Request, ino: u64, reply: ReplyAttr) {
    match fetch_and_cache_attributes(fs, ino) {
        Some(attr) => reply.attr(&TTL, &attr),
        None => reply.error(ENOENT),
    }
}

/// Only `size` (truncate) is honored: a read-modify-write round trip
/// through `FileService`. Mode/uid/gid/time changes are accepted and
/// silently ignored since `FileStat` carries no permission bits.
#[allow(clippy::too_many_arguments)]
pub fn setattr(
    fs: &mut RemoteFS,
    _req: &Request<'_>,
    ino: u64,
    _mode: Option<u32>,
    _uid: Option<u32>,
    _gid: Option<u32>,
    size: Option<u64>,
    _atime: Option<TimeOrNow>,
    _mtime: Option<TimeOrNow>,
    _ctime: Option<SystemTime>,
    _fh: Option<u64>,
    _crtime: Option<SystemTime>,
    _chgtime: Option<SystemTime>,
    _bkuptime: Option<SystemTime>,
    _flags: Option<u32>,
    reply: ReplyAttr,
) {
    let path = match fs.inode_to_path.get(&ino) {
        Some(p) => p.clone(),
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let uri = fs.uri_for_path(&path);

    if let Some(new_size) = size {
        let old = fs
            .runtime
            .block_on(fs.service.read_file(&uri, ReadFileOptions::default()))
            .map(|(data, _)| data.to_vec())
            .unwrap_or_default();
        let mut bytes = old;
        bytes.resize(new_size as usize, 0);

        if fs.runtime.block_on(fs.service.write_file(&uri, Bytes::from(bytes), WriteFileOptions { create: true, overwrite: true, ..Default::default() })).is_err() {
            reply.error(EIO);
            return;
        }
    }

    fs.attribute_cache.remove(&ino);
    match fetch_and_cache_attributes(fs, ino) {
        Some(attr) => reply.attr(&TTL, &attr),
        None => reply.error(ENOENT),
    }
}

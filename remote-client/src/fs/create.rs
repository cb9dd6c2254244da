use super::prelude::*;

#[allow(clippy::too_many_arguments)]
pub fn create(fs: &mut RemoteFS, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, _flags: i32, reply: ReplyCreate) {
    let parent_path = match fs.inode_to_path.get(&parent) {
        Some(p) => p.clone(),
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let filename = match name.to_str() {
        Some(s) => s,
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let full_path = RemoteFS::join_path(&parent_path, filename);
    let uri = fs.uri_for_path(&full_path);

    let stat = match fs.runtime.block_on(fs.service.create_file(&uri, Bytes::new(), WriteFileOptions { overwrite: true, ..Default::default() })) {
        Ok(stat) => stat,
        Err(e) => {
            tracing::warn!(path = %full_path, error = %e, "create failed");
            reply.error(EIO);
            return;
        }
    };

    let inode = fs.inode_for_path(&full_path, FileType::RegularFile);
    let fh = fs.next_fh;
    fs.next_fh += 1;
    fs.open_files.insert(fh, OpenWriteFile { path: full_path, buffer: HashMap::new() });

    let attr = stat_to_attr(inode, &stat);
    let ttl = Duration::from_secs(fs.config.cache_ttl_seconds);
    fs.attribute_cache.put(inode, attr, ttl);
    fs.attribute_cache.remove(&parent);

    reply.created(&TTL, &attr, 0, fh, 0);
}

pub fn mkdir(fs: &mut RemoteFS, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
    let parent_path = match fs.inode_to_path.get(&parent) {
        Some(p) => p.clone(),
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let dirname = match name.to_str() {
        Some(s) => s,
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let full_path = RemoteFS::join_path(&parent_path, dirname);
    let uri = fs.uri_for_path(&full_path);

    if let Err(e) = fs.runtime.block_on(fs.service.mkdirp(&uri)) {
        tracing::warn!(path = %full_path, error = %e, "mkdir failed");
        reply.error(EIO);
        return;
    }

    let stat = match fs.runtime.block_on(fs.service.resolve(&uri, ResolveOptions { resolve_metadata: true, ..Default::default() })) {
        Ok(stat) => stat,
        Err(_) => {
            reply.error(EIO);
            return;
        }
    };

    let inode = fs.inode_for_path(&full_path, FileType::Directory);
    let attr = stat_to_attr(inode, &stat);
    let ttl = Duration::from_secs(fs.config.cache_ttl_seconds);
    fs.attribute_cache.put(inode, attr, ttl);
    fs.attribute_cache.remove(&parent);

    reply.entry(&TTL, &attr, 0);
}

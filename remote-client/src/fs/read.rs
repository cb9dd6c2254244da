use super::prelude::*;

pub fn lookup(fs: &mut RemoteFS, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
    let parent_path = match fs.inode_to_path.get(&parent) {
        Some(p) => p.clone(),
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let name_str = match name.to_str() {
        Some(s) => s,
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let full_path = RemoteFS::join_path(&parent_path, name_str);
    let uri = fs.uri_for_path(&full_path);

    let stat = match fs.runtime.block_on(fs.service.resolve(&uri, ResolveOptions { resolve_metadata: true, ..Default::default() })) {
        Ok(stat) => stat,
        Err(_) => {
            reply.error(ENOENT);
            return;
        }
    };

    let ino = fs.inode_for_path(&full_path, fuse_kind(stat.file_type));
    let attr = stat_to_attr(ino, &stat);
    let ttl = Duration::from_secs(fs.config.cache_ttl_seconds);
    fs.attribute_cache.put(ino, attr, ttl);
    reply.entry(&TTL, &attr, 0);
}

pub fn readdir(fs: &mut RemoteFS, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
    let dir_path = match fs.inode_to_path.get(&ino) {
        Some(p) => p.clone(),
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let uri = fs.uri_for_path(&dir_path);

    let mut entries: Vec<(u64, FileType, String)> = Vec::new();
    if offset == 0 {
        entries.push((ino, FileType::Directory, ".".to_string()));
        let parent_path = if dir_path == "/" { "/".to_string() } else { dir_path.rsplit_once('/').map(|(p, _)| if p.is_empty() { "/".to_string() } else { p.to_string() }).unwrap_or_else(|| "/".to_string()) };
        let parent_ino = *fs.path_to_inode.get(&parent_path).unwrap_or(&1);
        entries.push((parent_ino, FileType::Directory, "..".to_string()));
    }

    if offset < 2 {
        let stat = match fs.runtime.block_on(fs.service.resolve(&uri, ResolveOptions { resolve_metadata: true, ..Default::default() })) {
            Ok(stat) => stat,
            Err(_) => {
                reply.ok();
                return;
            }
        };

        for child in stat.children.into_iter().flatten() {
            let full_path = RemoteFS::join_path(&dir_path, &child.name);
            let kind = fuse_kind(child.file_type);
            let child_ino = fs.inode_for_path(&full_path, kind);
            entries.push((child_ino, kind, child.name));
        }
    }

    for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
        if reply.add(ino, (i + 1) as i64, kind, &name) {
            break;
        }
    }
    reply.ok();
}

pub fn read(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
    let path = match fs.inode_to_path.get(&ino) {
        Some(p) => p.clone(),
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let uri = fs.uri_for_path(&path);
    let options = ReadFileOptions { position: Some(offset.max(0) as u64), length: Some(size as u64), ..Default::default() };

    match fs.runtime.block_on(fs.service.read_file(&uri, options)) {
        Ok((data, _stat)) => reply.data(&data),
        Err(_) => reply.error(ENOENT),
    }
}

pub fn open(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
    let write_access = (flags & libc::O_WRONLY != 0) || (flags & libc::O_RDWR != 0);

    if write_access {
        let path = match fs.inode_to_path.get(&ino) {
            Some(p) => p.clone(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let fh = fs.next_fh;
        fs.next_fh += 1;
        fs.open_files.insert(fh, OpenWriteFile { path, buffer: HashMap::new() });
        reply.opened(fh, 0);
    } else {
        reply.opened(0, 0);
    }
}

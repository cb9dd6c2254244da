use super::prelude::*;

#[allow(clippy::too_many_arguments)]
pub fn write(fs: &mut RemoteFS, _req: &Request<'_>, _ino: u64, fh: u64, offset: i64, data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyWrite) {
    match fs.open_files.get_mut(&fh) {
        Some(open_file) => {
            open_file.buffer.insert(offset, data.to_vec());
            reply.written(data.len() as u32);
        }
        None => reply.error(EBADF),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn release(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
    let open_file = match fs.open_files.remove(&fh) {
        Some(f) => f,
        None => {
            reply.ok();
            return;
        }
    };
    if open_file.buffer.is_empty() {
        reply.ok();
        return;
    }

    let uri = fs.uri_for_path(&open_file.path);
    let old = fs
        .runtime
        .block_on(fs.service.read_file(&uri, ReadFileOptions::default()))
        .map(|(data, _)| data.to_vec())
        .unwrap_or_default();

    let mut assembled = old;
    for (offset, chunk) in open_file.buffer {
        let start = offset as usize;
        let end = start + chunk.len();
        if end > assembled.len() {
            assembled.resize(end, 0);
        }
        assembled[start..end].copy_from_slice(&chunk);
    }

    let result = fs.runtime.block_on(fs.service.write_file(&uri, Bytes::from(assembled), WriteFileOptions { create: true, overwrite: true, ..Default::default() }));

    match result {
        Ok(_) => {
            fs.attribute_cache.remove(&ino);
            reply.ok();
        }
        Err(e) => {
            tracing::warn!(path = %open_file.path, error = %e, "release: write-back failed");
            reply.error(EIO);
        }
    }
}

pub fn flush(_fs: &mut RemoteFS, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
    reply.ok();
}

use super::prelude::*;

fn resolve_full_path(fs: &RemoteFS, parent: u64, name: &OsStr) -> Option<String> {
    let parent_path = fs.inode_to_path.get(&parent)?.clone();
    let name_str = name.to_str()?;
    Some(RemoteFS::join_path(&parent_path, name_str))
}

/// Shared by `unlink` and `rmdir`; only the `recursive` flag differs.
/// `rmdir` passes `false` so `FileService::del` surfaces "directory not
/// empty"; `unlink` passes `true`, matching POSIX `unlink` on a file and
/// the teacher's willingness to let `unlink` remove whole directory trees.
fn delete(fs: &mut RemoteFS, parent: u64, name: &OsStr, recursive: bool, reply: ReplyEmpty) {
    let full_path = match resolve_full_path(fs, parent, name) {
        Some(p) => p,
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let uri = fs.uri_for_path(&full_path);

    match fs.runtime.block_on(fs.service.del(&uri, DeleteOptions { recursive, use_trash: false })) {
        Ok(()) => {
            fs.forget_path(&full_path);
            fs.attribute_cache.remove(&parent);
            reply.ok();
        }
        Err(e) => {
            tracing::debug!(path = %full_path, error = %e, "delete failed");
            if !recursive { reply.error(ENOTEMPTY) } else { reply.error(ENOENT) }
        }
    }
}

pub fn unlink(fs: &mut RemoteFS, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
    delete(fs, parent, name, true, reply);
}

pub fn rmdir(fs: &mut RemoteFS, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
    delete(fs, parent, name, false, reply);
}

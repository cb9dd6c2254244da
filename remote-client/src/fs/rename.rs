use super::prelude::*;

#[allow(clippy::too_many_arguments)]
pub fn rename(fs: &mut RemoteFS, _req: &Request<'_>, parent: u64, name: &OsStr, newparent: u64, newname: &OsStr, _flags: u32, reply: ReplyEmpty) {
    let old_parent_path = match fs.inode_to_path.get(&parent) {
        Some(p) => p.clone(),
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let new_parent_path = match fs.inode_to_path.get(&newparent) {
        Some(p) => p.clone(),
        None => {
            reply.error(ENOENT);
            return;
        }
    };
    let (old_name, new_name) = match (name.to_str(), newname.to_str()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            reply.error(ENOENT);
            return;
        }
    };

    let old_full_path = RemoteFS::join_path(&old_parent_path, old_name);
    let new_full_path = RemoteFS::join_path(&new_parent_path, new_name);
    let old_uri = fs.uri_for_path(&old_full_path);
    let new_uri = fs.uri_for_path(&new_full_path);

    // `FileService::mv` already implements capability-adaptive recursive
    // move/copy; no client-side walk needed here.
    if let Err(e) = fs.runtime.block_on(fs.service.mv(&old_uri, &new_uri, true)) {
        tracing::warn!(from = %old_full_path, to = %new_full_path, error = %e, "rename failed");
        reply.error(EIO);
        return;
    }

    if let Some(ino) = fs.path_to_inode.remove(&old_full_path) {
        fs.inode_to_path.insert(ino, new_full_path.clone());
        fs.path_to_inode.insert(new_full_path, ino);
        fs.attribute_cache.remove(&ino);
    }
    fs.attribute_cache.remove(&parent);
    fs.attribute_cache.remove(&newparent);

    reply.ok();
}

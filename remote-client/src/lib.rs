//! FUSE client mounting a remote virtual filesystem service, grounded on
//! the teacher's `client` crate: same `fuser`-based mount and attribute
//! cache, rewired to route through a `vfs_core::FileService` holding one
//! `RemoteFileSystemProvider` instead of calling the wire protocol from
//! each FUSE callback directly.

pub mod config;
pub mod fs;
pub mod provider;

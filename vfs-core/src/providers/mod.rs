//! Reference provider implementations used by tests and by `remote-server`.

pub mod local_disk;
pub mod memory;

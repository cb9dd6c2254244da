//! Core of the virtual filesystem service: URI primitives, the provider
//! capability model, the provider registry, and the `FileService` engine
//! that multiplexes registered providers behind one URI-addressed API.

pub mod capabilities;
pub mod error;
pub mod file_service;
pub mod participants;
pub mod provider;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod stat;
pub mod stream;
pub mod uri;
pub mod wire;

pub use capabilities::Capabilities;
pub use error::FileSystemError;
pub use file_service::FileService;
pub use provider::{FileSystemProvider, Handle};
pub use registry::ProviderRegistry;
pub use stat::{FileStat, FileType, ETAG_DISABLED};
pub use uri::Uri;

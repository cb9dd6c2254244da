//! The operation-error taxonomy (spec §7).

use crate::uri::Uri;

/// The discriminant clients match on. Kept separate from [`FileSystemError`]
/// because some call sites (e.g. the resource façade) only care which kind
/// occurred, not the full context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperationResult {
    FileNotFound,
    FileIsADirectory,
    FileNotADirectory,
    FileExists,
    FileModifiedSince,
    FileNotModifiedSince,
    FileMoveConflict,
    FilePermissionDenied,
    FileReadOnly,
    FileInvalidPath,
    NoProvider,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum FileSystemError {
    #[error("{uri}: not found")]
    NotFound { uri: Uri },

    #[error("{uri}: is a directory")]
    IsADirectory { uri: Uri },

    #[error("{uri}: is not a directory")]
    NotADirectory { uri: Uri },

    #[error("{uri}: already exists")]
    Exists { uri: Uri },

    #[error("{uri}: modified since caller last read it")]
    ModifiedSince { uri: Uri },

    #[error("{uri}: not modified since the caller's etag")]
    NotModifiedSince { uri: Uri },

    #[error("{target}: move/copy target exists and overwrite was not requested")]
    MoveConflict { target: Uri },

    #[error("{uri}: permission denied")]
    PermissionDenied { uri: Uri },

    #[error("{uri}: read-only target")]
    ReadOnly { uri: Uri },

    #[error("path is not absolute: {uri}")]
    InvalidPath { uri: Uri },

    #[error("no provider registered for scheme {scheme:?}")]
    NoProvider { scheme: String },

    #[error("scheme {scheme:?} is already registered")]
    AlreadyRegistered { scheme: String },

    #[error("moving/copying {source} into its own descendant {target} is not allowed")]
    MoveIntoSelf { source: Uri, target: Uri },

    #[error("{uri}: unsupported operation for this provider's capabilities")]
    Unsupported { uri: Uri },

    #[error("{operation} on {source}: {message}")]
    Provider {
        operation: &'static str,
        source: Uri,
        target: Option<Uri>,
        message: String,
    },
}

impl FileSystemError {
    pub fn result_kind(&self) -> FileOperationResult {
        match self {
            FileSystemError::NotFound { .. } => FileOperationResult::FileNotFound,
            FileSystemError::IsADirectory { .. } => FileOperationResult::FileIsADirectory,
            FileSystemError::NotADirectory { .. } => FileOperationResult::FileNotADirectory,
            FileSystemError::Exists { .. } => FileOperationResult::FileExists,
            FileSystemError::ModifiedSince { .. } => FileOperationResult::FileModifiedSince,
            FileSystemError::NotModifiedSince { .. } => FileOperationResult::FileNotModifiedSince,
            FileSystemError::MoveConflict { .. } => FileOperationResult::FileMoveConflict,
            FileSystemError::PermissionDenied { .. } => FileOperationResult::FilePermissionDenied,
            FileSystemError::ReadOnly { .. } => FileOperationResult::FileReadOnly,
            FileSystemError::InvalidPath { .. } => FileOperationResult::FileInvalidPath,
            FileSystemError::NoProvider { .. } => FileOperationResult::NoProvider,
            _ => FileOperationResult::Other,
        }
    }

    /// Wraps a provider-reported error with operation context, the way
    /// spec §7's propagation policy requires for errors outside the
    /// known taxonomy.
    pub fn wrap_provider(operation: &'static str, source: Uri, target: Option<Uri>, message: impl Into<String>) -> Self {
        FileSystemError::Provider { operation, source, target, message: message.into() }
    }
}

//! Blob store gateway over any S3-compatible object store.

pub mod client;
pub mod error;
pub mod keys;

pub use client::{content_sha256, BlobConfig, BlobStore, PutOutcome, DEFAULT_PRESIGN_TTL};
pub use error::{StorageError, StorageResult};
pub use keys::{new_key, parse_key, ArtifactKind, ParsedKey};

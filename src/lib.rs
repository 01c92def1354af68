//! Concurrent in-memory key-value hash table engine.
//!
//! Keys are hashed with SipHash-2-4 under a process-wide key pair
//! ([`siphash`]); slots live in an open-addressed, linearly probed array
//! ([`bucket`]); [`Engine`] ties both together with tombstone deletion
//! and incremental, cooperative resizing.

pub mod bucket;
pub mod engine;
pub mod error;
pub mod siphash;

pub use bucket::{Bucket, BucketState};
pub use engine::{Engine, Stats};
pub use error::{Error, ErrorKind, Result};
pub use siphash::{siphash24, HashKind, KeySource, SipKeys};

//! # depot-store
//!
//! Object-storage access for the sync engine: the `{stat, list, get}`
//! capability trait, the S3 client behind it, and [`ReplicaSet`] — the
//! multi-replica freshness resolver and content fetcher.

pub mod error;
pub mod memory;
pub mod object;
pub mod replica;
pub mod s3;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use object::{ObjectInfo, ObjectReader, ObjectStore};
pub use replica::{PrefixEntry, RemoteTarget, ReplicaSet};
pub use s3::S3Store;

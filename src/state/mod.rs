pub mod cache_store;
pub mod snapshot;

pub use cache_store::CacheStore;
pub use snapshot::{CacheSnapshot, DataQuality, SnapshotMetadata};

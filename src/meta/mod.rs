//! Embedded metadata store: buckets, object versions, multipart state

mod store;

pub use store::{prefix_upper_bound, BucketRecord, MetaStore};

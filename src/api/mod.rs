//! S3 API implementation

pub mod auth;
pub mod aws_chunked;
mod cors;
mod errors;
mod extractors;
pub mod handlers;
mod xml;

pub use errors::S3Error;
pub use extractors::{ValidatedBucket, ValidatedPath};

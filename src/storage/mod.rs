pub mod chunked;

pub use chunked::{generate_storage_key, BlobStream, ChunkedStore};

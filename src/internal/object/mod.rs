//! Content-addressed object storage (component A of the design).

pub mod store;

pub use store::{CompressionAlgorithm, ObjectStore};

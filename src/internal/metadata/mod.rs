//! The durable metadata store (component B): versions, file heads, branches, tags, ignore
//! snapshots, and search terms, held in a single embedded SQLite database.

pub mod entities;
pub mod store;

pub use store::MetadataStore;

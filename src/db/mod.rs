//! MongoDB access

pub mod mongo;
pub mod schemas;

pub use mongo::{by_id, IntoIndexes, MongoClient, MongoCollection, MutMetadata};

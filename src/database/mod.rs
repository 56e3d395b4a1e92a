pub mod connection;
pub mod models;
pub mod objects;
pub mod rest;
pub mod store;

pub use connection::DatabaseManager;
pub use objects::{LocalObjectStore, SupabaseStorage};
pub use rest::RestStore;
pub use store::{ObjectStore, Store, StoreError, StoreResult};

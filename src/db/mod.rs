//! Database module: the notes store.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows and client payloads
//! - `schema.rs`: SQL DDL per dialect, applied by the out-of-band `migrate` step
//! - `store.rs`: CRUD over the `notes` table through sqlx's `Any` driver

pub mod models;
pub mod schema;
pub mod store;

pub use models::{Note, NoteFields};
pub use schema::Dialect;
pub use store::{NoteStore, StoreOptions};

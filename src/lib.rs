pub mod cli;
pub mod config;
pub mod db;
pub mod edge;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod service;
pub mod topology;

pub use db::{Note, NoteFields, NoteStore};
pub use error::StackError;
pub use topology::Topology;

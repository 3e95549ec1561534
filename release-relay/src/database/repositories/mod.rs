//! Repository layer for database access.
//!
//! Each store is a trait so the pipeline can run against fakes in tests;
//! the `Sqlx*` types are the SQLite implementations.

pub mod cursor;
pub mod event;
pub mod notification;
pub mod resource;
pub mod subscription;

pub use cursor::*;
pub use event::*;
pub use notification::*;
pub use resource::*;
pub use subscription::*;

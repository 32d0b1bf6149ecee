//! SQLite backends for Tally's two stores.
//!
//! [`SqliteRecords`] holds the relational data (schools, classrooms and
//! assessment records); [`SqliteAverages`] holds the computed class averages.
//! They may share a file or live apart. Both wrap [`tokio_rusqlite`] so all
//! database access runs on a dedicated thread without blocking the async
//! runtime.

mod averages;
mod encode;
mod records;
mod schema;

pub mod error;

pub use averages::SqliteAverages;
pub use error::{Error, Result};
pub use records::SqliteRecords;

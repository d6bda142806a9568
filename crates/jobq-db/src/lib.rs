//! SQLite store for jobq.
//!
//! The store is the only synchronization point between worker processes:
//! every state-bearing write happens inside a single statement or an
//! exclusive-write (`BEGIN IMMEDIATE`) transaction that re-checks the
//! precondition it depends on.

pub mod error;
pub mod pool;
pub mod repo;
pub mod schema;
mod store;
mod time;
mod tx;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{DbError, DbResult};
pub use pool::{create_pool, normalize_url, open_store};
pub use repo::*;
pub use schema::ensure_schema;
pub use store::Store;

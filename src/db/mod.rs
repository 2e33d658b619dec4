//! Database layer for postie
//!
//! SQLite-backed durable queue. Methods on [`Database`] are organized by
//! domain:
//! - [`migrations`] — database lifecycle, schema migrations
//! - [`queue`] — push/pop/ack/fail/extend/requeue

use sqlx::sqlite::SqlitePool;

mod migrations;
pub mod queue;

/// Database handle for postie's durable queue
pub struct Database {
    pool: SqlitePool,
}

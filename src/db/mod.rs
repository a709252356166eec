pub mod schema;
pub mod writer;
pub mod query;

use anyhow::{Context, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}

/// Build the shared connection pool. The schema is applied once through the
/// first pooled connection; every connection gets the per-connection pragmas.
pub fn create_pool<P: AsRef<Path>>(db_path: P, size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path.as_ref()).with_init(|c| {
        c.pragma_update(None, "foreign_keys", "ON")?;
        c.busy_timeout(std::time::Duration::from_secs(5))
    });
    let pool = r2d2::Pool::builder()
        .max_size(size.max(1))
        .build(manager)
        .context("Failed to build SQLite connection pool")?;
    let conn = pool.get()?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(pool)
}

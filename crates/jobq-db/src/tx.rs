//! Exclusive-write transactions.

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

use crate::DbResult;

/// A `BEGIN IMMEDIATE` transaction.
///
/// Holding one blocks every other writer on the database until it is committed
/// or rolled back. If the guard is dropped while still open (for example when
/// the surrounding future is cancelled) the connection is closed instead of
/// being returned to the pool, which makes SQLite roll the transaction back.
pub(crate) struct ImmediateTx {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl ImmediateTx {
    pub(crate) async fn begin(pool: &SqlitePool) -> DbResult<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn, open: true })
    }

    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub(crate) async fn commit(mut self) -> DbResult<()> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.open = false;
        Ok(())
    }

    pub(crate) async fn rollback(mut self) -> DbResult<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.open = false;
        Ok(())
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if self.open {
            self.conn.close_on_drop();
        }
    }
}

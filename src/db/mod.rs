//! Database connection pool, migrations, and health check.
//!
//! All queues share one Postgres pool and one `queue_messages` table;
//! a [`Collection`] scopes operations to a single queue name.

pub mod collection;

pub use collection::Collection;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared by every collection.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Handle on the named queue collection.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "collection name must not be empty".to_string(),
            ));
        }
        Ok(Collection::new(self.pool.clone(), name))
    }
}

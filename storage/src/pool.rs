use signalhub_core::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connect and run embedded migrations: initialize the pool, then load the
/// schema, against Postgres.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Configuration(format!("migration failed: {e}")))?;

    Ok(pool)
}

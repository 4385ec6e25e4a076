use crate::error::DbError;
use dotenvy::dotenv;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// Reads `DATABASE_URL` from the environment (populated from `.env` if
/// present) and returns a pool sized for the batch scheduler's worker count:
/// every worker holds at most one connection at a time.
pub async fn connect() -> Result<PgPool, DbError> {
    // A missing .env file is fine in deployments where the environment is
    // injected directly.
    let _ = dotenv();

    let database_url = env::var("DATABASE_URL")
        .map_err(|_e| DbError::ConnectionConfig("DATABASE_URL must be set.".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    Ok(pool)
}

/// Applies database migrations automatically.
///
/// Run at startup so the schema is current before the first batch, which is
/// especially important in production deployments.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

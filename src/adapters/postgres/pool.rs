//! Connection pool construction.

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::domain::foundation::DomainError;

/// Opens a pool sized and timed from configuration.
///
/// # Errors
///
/// `DatabaseError` if no connection could be established within the
/// configured timeout.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DomainError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .connect(&config.url)
        .await
        .map_err(DomainError::database)?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

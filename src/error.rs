//! Error types for the provisioning sequence.

use std::time::Duration;

use thiserror::Error;

/// Provisioning result type.
pub type Result<T> = std::result::Result<T, BoxError>;

/// Fatal provisioning errors.
///
/// Every variant is terminal for the whole provisioning call. Except for
/// `Provision`, where no container exists yet, the container has already
/// been released by the time the caller sees the error.
#[derive(Debug, Error)]
pub enum BoxError {
    /// The orchestrator could not start a container for the image.
    #[error("failed to start container for image {image}: {source}")]
    Provision {
        image: String,
        #[source]
        source: anyhow::Error,
    },

    /// The SQL port never accepted connections within the bound.
    #[error("{image} did not accept connections on port {port} within {timeout:?}")]
    ReadinessTimeout {
        image: String,
        port: String,
        timeout: Duration,
    },

    /// The maintenance connection or the create-database statement failed
    /// for a reason other than the database already existing.
    #[error("failed to ensure database {database:?} exists: {source}")]
    DatabaseCreate {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    /// The primary pool could not be opened against the target database.
    #[error("failed to open connection pool: {source}")]
    Connection {
        #[source]
        source: sqlx::Error,
    },
}

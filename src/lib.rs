//! Ephemeral CockroachDB boxes for integration tests.
//!
//! Provisions a disposable CockroachDB container, waits for it to accept
//! connections, idempotently ensures the target database exists, and hands
//! back a ready `sqlx` pool together with the container handle. Cockroach
//! speaks the Postgres wire protocol, so the pool is a plain [`sqlx::PgPool`].
//!
//! On every failure path the container is released before the error reaches
//! the caller; on success the caller owns both the pool and the handle.
//!
//! # Usage
//!
//! ```rust,ignore
//! use roachbox::{provision, BoxConfig, DockerCli};
//!
//! #[tokio::test]
//! async fn queries_against_a_real_database() {
//!     let docker = DockerCli::new().unwrap();
//!     let db = provision(&docker, BoxConfig::new("test")).await.unwrap();
//!
//!     let one: i32 = sqlx::query_scalar("SELECT 1")
//!         .fetch_one(&db.pool)
//!         .await
//!         .unwrap();
//!     assert_eq!(one, 1);
//!
//!     db.shutdown().await.unwrap();
//! }
//! ```

pub mod config;
pub mod container;
pub mod docker;
pub mod dsn;
pub mod error;
pub mod provision;

// Re-exports for convenience
pub use config::{BoxConfig, DEFAULT_IMAGE, DEFAULT_READINESS_TIMEOUT, DEFAULT_SQL_PORT};
pub use container::{ContainerHandle, Orchestrator};
pub use docker::{DockerCli, DockerContainer};
pub use dsn::ConnectTarget;
pub use error::{BoxError, Result};
pub use provision::{provision, DbBox};

//! The provisioning sequence: start, wait, ensure database, hand off.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::config::BoxConfig;
use crate::container::{ContainerHandle, Orchestrator};
use crate::dsn::ConnectTarget;
use crate::error::{BoxError, Result};

/// Pool sizing for test workloads.
const MAX_POOL_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// A provisioned database box.
///
/// The caller owns both the pool and the container handle, with
/// independent lifetimes: release each exactly once, in either order.
/// Dropping the container handle forces removal as a fallback, so a failed
/// test cannot leak its container.
#[derive(Debug)]
pub struct DbBox<H: ContainerHandle> {
    /// Pool scoped to the configured database.
    pub pool: PgPool,
    /// Handle to the container running the instance.
    pub container: H,
}

impl<H: ContainerHandle> DbBox<H> {
    /// Close the pool, then release the container.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.pool.close().await;
        self.container.release().await
    }
}

/// Provision an ephemeral instance and hand back a ready pool plus the
/// container handle.
///
/// The stages run strictly in order: container start, bounded readiness
/// wait, idempotent database creation over a maintenance connection, pool
/// open. Every failing stage releases the container before its error
/// reaches the caller, so on error there is nothing left to clean up.
pub async fn provision<O: Orchestrator>(orch: &O, config: BoxConfig) -> Result<DbBox<O::Handle>> {
    let exposed_ports = [config.sql_port.clone()];
    let container = orch
        .provision(&config.image, &config.startup_args, &exposed_ports)
        .await
        .map_err(|source| BoxError::Provision {
            image: config.image.clone(),
            source,
        })?;

    let target = ConnectTarget {
        user: config.user.clone(),
        password: config.password.clone(),
        host: container.address(),
        port: config.sql_port.clone(),
    };

    info!(
        "waiting for {} to accept connections on {}:{}",
        config.image, target.host, target.port
    );
    if container
        .wait_ready(&config.sql_port, config.readiness_timeout)
        .await
        .is_err()
    {
        release_after_failure(&container).await;
        return Err(BoxError::ReadinessTimeout {
            image: config.image,
            port: config.sql_port,
            timeout: config.readiness_timeout,
        });
    }

    if let Err(source) = ensure_database(&target, &config.database).await {
        release_after_failure(&container).await;
        return Err(BoxError::DatabaseCreate {
            database: config.database,
            source,
        });
    }

    let pool = match open_pool(&target.scoped(&config.database)).await {
        Ok(pool) => pool,
        Err(source) => {
            release_after_failure(&container).await;
            return Err(BoxError::Connection { source });
        }
    };

    info!(
        "database {:?} ready on {}:{}",
        config.database, target.host, target.port
    );

    Ok(DbBox { pool, container })
}

/// Create the target database over a maintenance connection.
///
/// SQLSTATE 42P04 (duplicate_database) counts as success; a fresh
/// container should never report it for a new name, but service databases
/// like `postgres` already exist. Anything else is fatal.
async fn ensure_database(target: &ConnectTarget, database: &str) -> sqlx::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&target.unscoped())
        .await?;

    let statement = format!("CREATE DATABASE \"{}\"", database.replace('"', "\"\""));
    let created = sqlx::query(&statement).execute(&pool).await;
    pool.close().await;

    match created {
        Ok(_) => Ok(()),
        Err(err) if is_duplicate_database(&err) => {
            debug!("database {:?} already exists", database);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// SQLSTATE 42P04: duplicate_database.
fn is_duplicate_database(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P04"),
        _ => false,
    }
}

async fn open_pool(dsn: &str) -> sqlx::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(dsn)
        .await
}

/// Single cleanup routine for every failure transition. Release failures
/// are logged so they never mask the error that triggered cleanup.
async fn release_after_failure<H: ContainerHandle>(container: &H) {
    if let Err(err) = container.release().await {
        warn!(
            "failed to release container after provisioning failure: {:#}",
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeHandle {
        address: String,
        ready: bool,
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ContainerHandle for FakeHandle {
        fn address(&self) -> String {
            self.address.clone()
        }

        async fn wait_ready(&self, _port: &str, _timeout: Duration) -> anyhow::Result<()> {
            if self.ready {
                Ok(())
            } else {
                Err(anyhow!("port never opened"))
            }
        }

        async fn release(&self) -> anyhow::Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeOrchestrator {
        address: String,
        ready: bool,
        fail_provision: bool,
        releases: Arc<AtomicUsize>,
    }

    impl FakeOrchestrator {
        fn new(ready: bool) -> (Self, Arc<AtomicUsize>) {
            let releases = Arc::new(AtomicUsize::new(0));
            let orch = Self {
                address: "127.0.0.1".to_string(),
                ready,
                fail_provision: false,
                releases: Arc::clone(&releases),
            };
            (orch, releases)
        }
    }

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        type Handle = FakeHandle;

        async fn provision(
            &self,
            _image: &str,
            _startup_args: &[String],
            _exposed_ports: &[String],
        ) -> anyhow::Result<FakeHandle> {
            if self.fail_provision {
                return Err(anyhow!("no such image"));
            }
            Ok(FakeHandle {
                address: self.address.clone(),
                ready: self.ready,
                releases: Arc::clone(&self.releases),
            })
        }
    }

    /// Config pointed at a port nothing listens on, with a short wait.
    fn config_for_port(port: &str) -> BoxConfig {
        BoxConfig {
            sql_port: port.to_string(),
            readiness_timeout: Duration::from_millis(100),
            ..BoxConfig::new("test")
        }
    }

    #[tokio::test]
    async fn provision_failure_has_nothing_to_release() {
        let (mut orch, releases) = FakeOrchestrator::new(true);
        orch.fail_provision = true;

        let err = provision(&orch, config_for_port("1")).await.unwrap_err();

        assert!(matches!(err, BoxError::Provision { .. }));
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn readiness_timeout_releases_exactly_once() {
        let (orch, releases) = FakeOrchestrator::new(false);

        let err = provision(&orch, config_for_port("1")).await.unwrap_err();

        assert!(matches!(err, BoxError::ReadinessTimeout { .. }));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn maintenance_failure_is_fatal_and_releases() {
        // The handle reports ready, but the maintenance connection to
        // 127.0.0.1:1 is refused, so the initializer stage must fail.
        let (orch, releases) = FakeOrchestrator::new(true);

        let err = provision(&orch, config_for_port("1")).await.unwrap_err();

        assert!(matches!(err, BoxError::DatabaseCreate { .. }));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_database_errors_are_not_duplicates() {
        assert!(!is_duplicate_database(&sqlx::Error::RowNotFound));
    }
}

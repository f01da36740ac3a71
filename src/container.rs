//! Narrow interface to the container runtime.
//!
//! The provisioning sequence only ever talks to the runtime through these
//! two traits, so tests can substitute a fake orchestrator and the Docker
//! specifics stay confined to [`crate::docker`].

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// Interval between readiness probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// A running container, exclusively owned by whoever holds the handle.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    /// Host under which the container is reachable from the test process.
    fn address(&self) -> String;

    /// Block until `port` accepts connections or `timeout` elapses.
    async fn wait_ready(&self, port: &str, timeout: Duration) -> Result<()>;

    /// Tear the container down.
    ///
    /// Calling this again after a successful release must be a no-op that
    /// returns Ok.
    async fn release(&self) -> Result<()>;
}

/// Starts containers. Implementations verify their runtime dependencies at
/// construction time rather than through load-time side effects.
#[async_trait]
pub trait Orchestrator {
    type Handle: ContainerHandle;

    /// Start a container for `image` with the given entrypoint arguments
    /// and exposed ports.
    async fn provision(
        &self,
        image: &str,
        startup_args: &[String],
        exposed_ports: &[String],
    ) -> Result<Self::Handle>;
}

/// Bounded poll until `host:port` accepts a TCP connection.
///
/// Each probe is itself bounded by the probe interval, so an unroutable
/// host cannot stall the wait past its deadline.
pub(crate) async fn wait_for_port(host: &str, port: &str, deadline: Duration) -> Result<()> {
    let addr = format!("{host}:{port}");
    let start = Instant::now();

    loop {
        if let Ok(Ok(_)) = timeout(PROBE_INTERVAL, TcpStream::connect(&addr)).await {
            debug!("{} accepting connections after {:?}", addr, start.elapsed());
            return Ok(());
        }

        if start.elapsed() >= deadline {
            bail!(
                "timeout waiting for {} to accept connections after {:?}",
                addr,
                deadline
            );
        }

        sleep(PROBE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_port_sees_a_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        wait_for_port("127.0.0.1", &port, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_port_times_out_when_nothing_listens() {
        // Port 1 is essentially never bound on a test host.
        let result = wait_for_port("127.0.0.1", "1", Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}

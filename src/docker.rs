//! Container orchestration via the Docker command-line client.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::container::{wait_for_port, ContainerHandle, Orchestrator};

/// Orchestrator backed by the `docker` CLI.
///
/// Construction checks that the daemon is reachable, so a missing runtime
/// surfaces before the first test provisions anything.
#[derive(Debug)]
pub struct DockerCli {
    _private: (),
}

impl DockerCli {
    /// Verify the Docker daemon is reachable and return an orchestrator.
    pub fn new() -> Result<Self> {
        let output = Command::new("docker")
            .arg("info")
            .output()
            .context("failed to run `docker info`")?;

        if !output.status.success() {
            bail!(
                "docker daemon is not available: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(Self { _private: () })
    }

    /// Prefetch an image so the first provisioning call does not pay for
    /// the pull. `docker run` pulls on demand either way.
    pub fn pull(&self, image: &str) -> Result<()> {
        info!("pulling image {}", image);

        let output = Command::new("docker")
            .args(["pull", image])
            .output()
            .context("failed to run `docker pull`")?;

        if !output.status.success() {
            bail!(
                "failed to pull {}: {}",
                image,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Orchestrator for DockerCli {
    type Handle = DockerContainer;

    async fn provision(
        &self,
        image: &str,
        startup_args: &[String],
        exposed_ports: &[String],
    ) -> Result<DockerContainer> {
        let mut cmd = Command::new("docker");
        cmd.args(["run", "--detach"]);
        for port in exposed_ports {
            cmd.args(["--expose", port]);
        }
        cmd.arg(image);
        cmd.args(startup_args);

        let output = cmd.output().context("failed to run `docker run`")?;
        if !output.status.success() {
            bail!(
                "`docker run {}` failed: {}",
                image,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            bail!("`docker run {}` produced no container id", image);
        }

        // The container is up; from here on any failure must remove it
        // before we return.
        let address = match container_address(&id) {
            Ok(address) => address,
            Err(err) => {
                if let Err(rm_err) = force_remove(&id) {
                    warn!("failed to remove container {}: {:#}", id, rm_err);
                }
                return Err(err);
            }
        };

        info!("started {} as {} at {}", image, &id[..12], address);

        Ok(DockerContainer {
            id,
            address,
            released: AtomicBool::new(false),
        })
    }
}

/// Handle to a running container.
///
/// Dropping an unreleased handle forces removal, so a panicking test does
/// not leak its container. An explicit [`ContainerHandle::release`] is
/// still preferred since it can report failures.
#[derive(Debug)]
pub struct DockerContainer {
    id: String,
    address: String,
    released: AtomicBool,
}

impl DockerContainer {
    /// Full container id, as reported by `docker run`.
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl ContainerHandle for DockerContainer {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn wait_ready(&self, port: &str, timeout: Duration) -> Result<()> {
        wait_for_port(&self.address, port, timeout).await
    }

    async fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("removing container {}", self.id);
        force_remove(&self.id)
    }
}

impl Drop for DockerContainer {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            if let Err(err) = force_remove(&self.id) {
                warn!("failed to remove container {}: {:#}", self.id, err);
            }
        }
    }
}

/// Bridge address of the container, reachable from the host on Linux.
fn container_address(id: &str) -> Result<String> {
    let output = Command::new("docker")
        .args(["inspect", "--format", "{{.NetworkSettings.IPAddress}}", id])
        .output()
        .context("failed to run `docker inspect`")?;

    if !output.status.success() {
        bail!(
            "`docker inspect {}` failed: {}",
            id,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let address = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if address.is_empty() {
        bail!("container {} has no bridge network address", id);
    }

    Ok(address)
}

fn force_remove(id: &str) -> Result<()> {
    let output = Command::new("docker")
        .args(["rm", "--force", id])
        .output()
        .context("failed to run `docker rm`")?;

    if !output.status.success() {
        bail!(
            "failed to remove container {}: {}",
            id,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_after_release_is_a_noop() {
        // A handle whose container is already gone must not invoke the
        // runtime again.
        let container = DockerContainer {
            id: "0123456789abcdef".to_string(),
            address: "127.0.0.1".to_string(),
            released: AtomicBool::new(true),
        };

        assert!(container.release().await.is_ok());
        assert!(container.release().await.is_ok());
    }
}

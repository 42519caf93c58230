/*!
 * Tailscale Mesh Client
 * Runs the mesh client inside the workload through the runtime's exec entry
 */

use super::traits::{MeshFailure, MeshNetwork, MeshPeer};
use crate::core::{AuthToken, TimeoutConfig};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const CONTAINER_CLI: &str = "nixos-container";

pub struct TailscaleCli {
    runner: Arc<dyn CommandRunner>,
    timeouts: TimeoutConfig,
}

impl TailscaleCli {
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: TimeoutConfig) -> Self {
        Self { runner, timeouts }
    }

    fn in_workload(workload: &str) -> CommandSpec {
        CommandSpec::new(CONTAINER_CLI)
            .args(["run", workload, "--", "tailscale"])
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, MeshFailure> {
        let output = self
            .runner
            .run(spec)
            .await
            .map_err(|e| MeshFailure::permanent(format!("could not run {}: {}", CONTAINER_CLI, e)))?;
        if output.timed_out {
            return Err(MeshFailure::timeout(output.duration.as_millis() as u64));
        }
        Ok(output)
    }
}

fn classify(output: &CommandOutput) -> MeshFailure {
    let failure = if output.mentions("invalid key") || output.mentions("auth key") {
        MeshFailure::permanent("mesh service rejected the auth key")
    } else {
        MeshFailure::transient(format!("mesh client exited with {:?}", output.status))
    };
    failure.with_diagnostics(output.combined())
}

/// Read the local node out of `tailscale status --json`
///
/// Any backend state other than `Running` means the node is not logged in.
fn parse_peer(stdout: &str) -> Result<Option<MeshPeer>, MeshFailure> {
    let status: Value = serde_json::from_str(stdout)
        .map_err(|e| MeshFailure::permanent(format!("unreadable mesh status: {}", e)))?;
    if status.get("BackendState").and_then(Value::as_str) != Some("Running") {
        return Ok(None);
    }
    let Some(node) = status.get("Self") else {
        return Ok(None);
    };

    let mut addresses: Vec<String> = node
        .get("TailscaleIPs")
        .and_then(Value::as_array)
        .map(|ips| ips.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    addresses.sort_by_key(|ip| ip.contains(':'));

    Ok(Some(MeshPeer {
        hostname: node
            .get("HostName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        addresses,
        online: node.get("Online").and_then(Value::as_bool).unwrap_or(false),
    }))
}

#[async_trait]
impl MeshNetwork for TailscaleCli {
    async fn enroll(
        &self,
        workload: &str,
        hostname_hint: &str,
        token: &AuthToken,
        reset: bool,
    ) -> Result<(), MeshFailure> {
        let mut spec = Self::in_workload(workload)
            .arg("up")
            .arg(format!("--auth-key={}", token.expose()))
            .arg(format!("--hostname={}", hostname_hint))
            .redact(token.expose())
            .timeout(self.timeouts.enroll);
        if reset {
            spec = spec.arg("--reset");
        }

        let output = self.run(spec).await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify(&output))
        }
    }

    async fn deregister(&self, workload: &str) -> Result<(), MeshFailure> {
        let spec = Self::in_workload(workload)
            .arg("logout")
            .timeout(self.timeouts.deregister);
        let output = self.run(spec).await?;
        if output.success() {
            Ok(())
        } else {
            debug!(workload, stderr = %output.error_text(), "Mesh logout failed");
            Err(MeshFailure::transient("mesh logout failed").with_diagnostics(output.combined()))
        }
    }

    async fn peer(&self, workload: &str) -> Result<Option<MeshPeer>, MeshFailure> {
        let spec = Self::in_workload(workload)
            .args(["status", "--json"])
            .timeout(self.timeouts.deregister);
        let output = self.run(spec).await?;
        if !output.success() {
            return Err(MeshFailure::transient("mesh status query failed").with_diagnostics(output.combined()));
        }
        parse_peer(&output.stdout)
    }
}

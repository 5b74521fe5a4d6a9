//! Address job containers use to reach services on the host.

use std::net::IpAddr;
use std::process::Command;
use std::sync::OnceLock;

/// Docker's default bridge gateway.
pub const FALLBACK_GATEWAY: &str = "172.17.0.1";

const OVERRIDE_VAR: &str = "WFKIT_DOCKER_HOST_GATEWAY";

/// Gateway of Docker's `bridge` network.
///
/// `WFKIT_DOCKER_HOST_GATEWAY` wins when set. Otherwise `docker network
/// inspect` is asked once per process, falling back to
/// [`FALLBACK_GATEWAY`] when Docker is unavailable.
pub fn docker_bridge_gateway() -> String {
    static DISCOVERED: OnceLock<String> = OnceLock::new();
    let override_value = std::env::var(OVERRIDE_VAR).ok();
    resolve_gateway(override_value, || {
        DISCOVERED.get_or_init(discover_gateway).clone()
    })
}

fn resolve_gateway(override_value: Option<String>, discover: impl FnOnce() -> String) -> String {
    match override_value {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => discover(),
    }
}

fn discover_gateway() -> String {
    let output = Command::new("docker")
        .args([
            "network",
            "inspect",
            "bridge",
            "--format",
            "{{range .IPAM.Config}}{{.Gateway}} {{end}}",
        ])
        .output();
    let gateway = match output {
        Ok(output) if output.status.success() => {
            parse_gateway(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            tracing::debug!(status = ?output.status.code(), "docker network inspect failed");
            None
        }
        Err(err) => {
            tracing::debug!(error = %err, "docker not available");
            None
        }
    };
    match gateway {
        Some(gateway) => gateway,
        None => {
            tracing::warn!(fallback = FALLBACK_GATEWAY, "could not discover Docker bridge gateway");
            FALLBACK_GATEWAY.to_string()
        }
    }
}

/// First IPv4 address in `docker network inspect` output.
fn parse_gateway(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .filter_map(|word| word.parse::<IpAddr>().ok())
        .find(IpAddr::is_ipv4)
        .map(|ip| ip.to_string())
}

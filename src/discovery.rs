use std::env;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Discovers the cluster API endpoint from the standard in-pod environment.
/// Returns `host:port`, or an error when either variable is unset or empty.
pub fn discover_api_endpoint() -> Result<String> {
    let host = env::var("KUBERNETES_SERVICE_HOST").unwrap_or_default();
    let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_default();

    if host.is_empty() || port.is_empty() {
        bail!("KUBERNETES_SERVICE_HOST or KUBERNETES_SERVICE_PORT not set");
    }

    Ok(format!("{host}:{port}"))
}

/// Extracts nameserver addresses from a resolv.conf-style file, in file
/// order. Blank lines and comments are skipped.
pub fn discover_resolvers(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("read resolver config {}", path.display()))?;

    let mut resolvers = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("nameserver") {
            if let Some(addr) = line.split_whitespace().nth(1) {
                resolvers.push(addr.to_string());
            }
        }
    }

    Ok(resolvers)
}

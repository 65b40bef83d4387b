use std::net::IpAddr;

use ipnet::IpNet;

/// Engagement scope after validation: normalized CIDR entries, clean FQDNs,
/// and one human-readable warning per rejected entry.
#[derive(Debug, Default, PartialEq)]
pub struct ValidatedScope {
    pub ips: Vec<String>,
    pub domains: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidatedScope {
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.domains.is_empty()
    }
}

/// Validates raw IP/CIDR and domain entries collected from the operator.
/// Invalid entries are dropped with a warning; warnings are never fatal.
/// Output order follows input order.
pub fn validate_scope(ips: &[String], domains: &[String]) -> ValidatedScope {
    let mut out = ValidatedScope::default();

    for entry in ips {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if entry.contains('/') {
            if entry.parse::<IpNet>().is_ok() {
                out.ips.push(entry.to_string());
            } else {
                out.warnings.push(format!("Invalid CIDR skipped: {entry}"));
            }
        } else {
            match entry.parse::<IpAddr>() {
                // bare hosts become host-only networks
                Ok(IpAddr::V4(_)) => out.ips.push(format!("{entry}/32")),
                Ok(IpAddr::V6(_)) => out.ips.push(format!("{entry}/128")),
                Err(_) => out.warnings.push(format!("Invalid IP skipped: {entry}")),
            }
        }
    }

    for entry in domains {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if entry.contains('/') || entry.starts_with('.') || entry.ends_with('.') {
            out.warnings
                .push(format!("Invalid domain skipped: {entry}"));
            continue;
        }
        if !entry.contains('.') {
            out.warnings
                .push(format!("Domain without TLD skipped: {entry}"));
            continue;
        }
        out.domains.push(entry.to_string());
    }

    out
}

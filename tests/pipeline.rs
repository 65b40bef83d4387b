// Scope pipeline: operator transcript through prompt collection, validation,
// infrastructure discovery, and three-zone policy synthesis.

use std::collections::BTreeMap;
use std::io::Write;

use assert_json_diff::assert_json_eq;
use serde_json::json;

use n_audit_sentinel::discovery::discover_resolvers;
use n_audit_sentinel::policy::build_policy;
use n_audit_sentinel::prompt::get_scope;
use n_audit_sentinel::scope::validate_scope;

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), "n-audit-sentinel".to_string())])
}

#[test]
fn transcript_to_policy() {
    // the operator types one target of each kind, plus a typo that must be
    // dropped with a warning rather than poisoning the policy
    let mut input = "10.0.0.7\n999.999.0.1\n\n\nexample.com\n\n\n".as_bytes();
    let mut output = Vec::new();
    let (raw_ips, raw_domains) = get_scope(&mut input, &mut output).unwrap();
    assert_eq!(raw_ips, vec!["10.0.0.7", "999.999.0.1"]);

    let scope = validate_scope(&raw_ips, &raw_domains);
    assert_eq!(scope.warnings, vec!["Invalid IP skipped: 999.999.0.1"]);
    assert!(!scope.is_empty());

    let mut resolv = tempfile::NamedTempFile::new().unwrap();
    writeln!(resolv, "nameserver 10.96.0.10").unwrap();
    let resolvers = discover_resolvers(resolv.path()).unwrap();

    let policy = build_policy(
        "n-audit-policy",
        "default",
        &labels(),
        &resolvers,
        "10.96.0.1:443",
        &scope.ips,
        &scope.domains,
    );

    let egress = &policy.spec.egress;
    assert_eq!(egress.len(), 5);
    assert_eq!(egress[0].to_cidr_set[0].cidr, "10.96.0.1/32");
    assert_eq!(egress[1].to_cidr_set[0].cidr, "10.96.0.10/32");
    assert_eq!(egress[3].to_cidr_set[0].cidr, "10.0.0.7/32");
    assert_eq!(
        egress[4].to_fqdns[0].match_name.as_deref(),
        Some("example.com")
    );
}

#[test]
fn empty_transcript_means_no_perimeter() {
    let mut input = "\n\n\n\n".as_bytes();
    let mut output = Vec::new();
    let (raw_ips, raw_domains) = get_scope(&mut input, &mut output).unwrap();
    assert!(raw_ips.is_empty() && raw_domains.is_empty());

    // the supervisor applies no policy for an empty validated scope
    let scope = validate_scope(&raw_ips, &raw_domains);
    assert!(scope.is_empty());
}

#[test]
fn scope_only_policy_has_exact_wire_form() {
    let policy = build_policy(
        "n-audit-policy",
        "testing",
        &labels(),
        &[],
        "",
        &["10.0.0.1/32".to_string()],
        &["example.com".to_string()],
    );

    assert_json_eq!(
        serde_json::to_value(&policy).unwrap(),
        json!({
            "apiVersion": "cilium.io/v2",
            "kind": "CiliumNetworkPolicy",
            "metadata": {
                "name": "n-audit-policy",
                "namespace": "testing"
            },
            "spec": {
                "endpointSelector": {
                    "matchLabels": { "app": "n-audit-sentinel" }
                },
                "egress": [
                    {
                        "toFQDNs": [
                            { "matchPattern": "*.kali.org" },
                            { "matchPattern": "github.com" },
                            { "matchPattern": "docker.io" },
                            { "matchPattern": "gitlab.com" },
                            { "matchPattern": "pypi.org" },
                            { "matchPattern": "crates.io" }
                        ],
                        "toPorts": [
                            {
                                "ports": [
                                    { "port": "80", "protocol": "TCP" },
                                    { "port": "443", "protocol": "TCP" }
                                ]
                            }
                        ]
                    },
                    {
                        "toCIDRSet": [ { "cidr": "10.0.0.1/32" } ]
                    },
                    {
                        "toFQDNs": [ { "matchName": "example.com" } ]
                    }
                ]
            }
        })
    );
}

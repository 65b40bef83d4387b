use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams};
use serde::{Deserialize, Serialize};

/// Fixed maintenance whitelist (Zone 2): tooling and package repositories the
/// operator may reach over HTTP/HTTPS regardless of scope.
pub const MAINTENANCE_DOMAINS: [&str; 6] = [
    "*.kali.org",
    "github.com",
    "docker.io",
    "gitlab.com",
    "pypi.org",
    "crates.io",
];

// CiliumNetworkPolicy v2 wire shape. Field order and rule order are
// significant to some policy backends, so construction below is strictly
// sequential.

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: PolicySpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub endpoint_selector: EndpointSelector,
    pub egress: Vec<EgressRule>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSelector {
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EgressRule {
    #[serde(rename = "toCIDRSet", default, skip_serializing_if = "Vec::is_empty")]
    pub to_cidr_set: Vec<CidrRule>,
    #[serde(rename = "toFQDNs", default, skip_serializing_if = "Vec::is_empty")]
    pub to_fqdns: Vec<FqdnSelector>,
    #[serde(rename = "toPorts", default, skip_serializing_if = "Vec::is_empty")]
    pub to_ports: Vec<PortRule>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CidrRule {
    pub cidr: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FqdnSelector {
    #[serde(rename = "matchPattern", default, skip_serializing_if = "Option::is_none")]
    pub match_pattern: Option<String>,
    #[serde(rename = "matchName", default, skip_serializing_if = "Option::is_none")]
    pub match_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortRule {
    pub ports: Vec<PortProtocol>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortProtocol {
    pub port: String,
    pub protocol: String,
}

fn host_only(ip: &str) -> String {
    if ip.contains('/') {
        return ip.to_string();
    }
    if ip.parse::<Ipv6Addr>().is_ok() {
        format!("{ip}/128")
    } else {
        format!("{ip}/32")
    }
}

fn tcp_ports(ports: &[&str]) -> Vec<PortRule> {
    vec![PortRule {
        ports: ports
            .iter()
            .map(|p| PortProtocol {
                port: p.to_string(),
                protocol: "TCP".to_string(),
            })
            .collect(),
    }]
}

/// Assembles the three-zone egress policy.
///
/// Zone 1 (infrastructure) rules are emitted only for non-empty discovery
/// results; Zone 2 (maintenance) is always present; Zone 3 carries the
/// operator's validated scope with no port restriction.
pub fn build_policy(
    name: &str,
    namespace: &str,
    endpoint_labels: &BTreeMap<String, String>,
    resolvers: &[String],
    api_endpoint: &str,
    target_ips: &[String],
    target_domains: &[String],
) -> NetworkPolicy {
    let mut egress = Vec::new();

    // Zone 1: cluster API
    if !api_endpoint.is_empty() {
        let parts: Vec<&str> = api_endpoint.split(':').collect();
        if parts.len() == 2 {
            egress.push(EgressRule {
                to_cidr_set: vec![CidrRule {
                    cidr: format!("{}/32", parts[0]),
                }],
                to_ports: vec![PortRule {
                    ports: vec![PortProtocol {
                        port: parts[1].to_string(),
                        protocol: "TCP".to_string(),
                    }],
                }],
                ..Default::default()
            });
        }
    }

    // Zone 1: resolvers
    if !resolvers.is_empty() {
        egress.push(EgressRule {
            to_cidr_set: resolvers
                .iter()
                .map(|r| CidrRule {
                    cidr: format!("{r}/32"),
                })
                .collect(),
            to_ports: vec![PortRule {
                ports: vec![PortProtocol {
                    port: "53".to_string(),
                    protocol: "UDP".to_string(),
                }],
            }],
            ..Default::default()
        });
    }

    // Zone 2: maintenance whitelist, always present
    egress.push(EgressRule {
        to_fqdns: MAINTENANCE_DOMAINS
            .iter()
            .map(|d| FqdnSelector {
                match_pattern: Some(d.to_string()),
                ..Default::default()
            })
            .collect(),
        to_ports: tcp_ports(&["80", "443"]),
        ..Default::default()
    });

    // Zone 3: target scope, all ports
    if !target_ips.is_empty() {
        egress.push(EgressRule {
            to_cidr_set: target_ips
                .iter()
                .map(|ip| CidrRule { cidr: host_only(ip) })
                .collect(),
            ..Default::default()
        });
    }

    if !target_domains.is_empty() {
        egress.push(EgressRule {
            to_fqdns: target_domains
                .iter()
                .map(|d| FqdnSelector {
                    match_name: Some(d.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        });
    }

    NetworkPolicy {
        api_version: "cilium.io/v2".to_string(),
        kind: "CiliumNetworkPolicy".to_string(),
        metadata: Metadata {
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        spec: PolicySpec {
            endpoint_selector: EndpointSelector {
                match_labels: endpoint_labels.clone(),
            },
            egress,
        },
    }
}

/// Create/delete seam over the cluster's policy API, injectable so tests can
/// observe the constructed object without a cluster.
#[async_trait]
pub trait PolicyApi: Send + Sync {
    async fn create(&self, namespace: &str, policy: &NetworkPolicy) -> Result<()>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

struct KubePolicyApi {
    client: kube::Client,
}

fn policy_resource() -> ApiResource {
    ApiResource {
        group: "cilium.io".to_string(),
        version: "v2".to_string(),
        api_version: "cilium.io/v2".to_string(),
        kind: "CiliumNetworkPolicy".to_string(),
        plural: "ciliumnetworkpolicies".to_string(),
    }
}

impl KubePolicyApi {
    fn namespaced(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &policy_resource())
    }
}

#[async_trait]
impl PolicyApi for KubePolicyApi {
    async fn create(&self, namespace: &str, policy: &NetworkPolicy) -> Result<()> {
        let obj: DynamicObject = serde_json::from_value(serde_json::to_value(policy)?)?;
        self.namespaced(namespace)
            .create(&PostParams::default(), &obj)
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.namespaced(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

/// Thin wrapper binding the policy builder to a `PolicyApi`. Holds no state
/// across `apply`/`delete`.
pub struct PolicyClient {
    api: Box<dyn PolicyApi>,
}

impl PolicyClient {
    /// Connects via in-cluster configuration, falling back to the local
    /// kubeconfig.
    pub async fn connect() -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .context("build cluster client")?;
        Ok(PolicyClient {
            api: Box::new(KubePolicyApi { client }),
        })
    }

    pub fn with_api(api: Box<dyn PolicyApi>) -> Self {
        PolicyClient { api }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        name: &str,
        namespace: &str,
        endpoint_labels: &BTreeMap<String, String>,
        resolvers: &[String],
        api_endpoint: &str,
        target_ips: &[String],
        target_domains: &[String],
    ) -> Result<()> {
        let policy = build_policy(
            name,
            namespace,
            endpoint_labels,
            resolvers,
            api_endpoint,
            target_ips,
            target_domains,
        );
        self.api
            .create(namespace, &policy)
            .await
            .context("apply network policy")
    }

    pub async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        self.api
            .delete(namespace, name)
            .await
            .context("delete network policy")
    }
}

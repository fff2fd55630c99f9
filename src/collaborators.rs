//! The external systems a bootstrap talks to.
//!
//! Every collaborator is an opaque "create and return what was created"
//! primitive. Calls are blocking; the provisioner runs independent ones on
//! separate workers, so implementations must be thread-safe.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::Created;
use crate::error::CommandError;

/// Cloud resource tags.
pub type Tags = BTreeMap<String, String>;

/// Canned access control of a stored object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    Private,
    PublicRead,
}

/// An object published to a bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSpec {
    pub bucket: String,
    pub key: String,
    pub content: String,
    pub content_type: String,
    pub acl: Acl,
    pub tags: Tags,
}

/// Object storage.
///
/// `create_bucket` must report the bucket name under the `bucket` output
/// and its regional domain name under `domainName`.
pub trait StorageProvider: Send + Sync {
    fn create_bucket(&self, name: &str, tags: &Tags) -> anyhow::Result<Created>;

    fn publish_object(&self, object: &ObjectSpec) -> anyhow::Result<Created>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub role: NodeRole,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubeadm_config_patches: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_address: Option<String>,
    pub nodes: Vec<NodeSpec>,
}

/// A live node of a cluster.
pub trait ClusterNode: Send + Sync {
    fn name(&self) -> &str;

    fn role(&self) -> NodeRole;

    /// Runs `executable` on the node and returns its standard output.
    fn run_command(&self, executable: &str, args: &[String]) -> Result<String, CommandError>;
}

/// Virtual cluster lifecycle.
///
/// `create_cluster` must report the cluster name under the `name` output and
/// an admin kubeconfig under `kubeconfig`.
pub trait ClusterProvider: Send + Sync {
    fn create_cluster(&self, spec: &ClusterSpec) -> anyhow::Result<Created>;

    /// Live nodes of the cluster, empty if no such cluster exists.
    fn list_nodes(&self, cluster: &str) -> anyhow::Result<Vec<Box<dyn ClusterNode>>>;
}

/// The principal the registrar acts as.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    pub url: String,
    pub client_ids: Vec<String>,
    pub thumbprints: Vec<String>,
    pub tags: Tags,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub name: String,
    pub description: String,
    pub path: String,
    pub document: Value,
    pub tags: Tags,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub name: String,
    pub description: String,
    pub path: String,
    pub assume_role_policy: Value,
    pub permissions_boundary: Option<String>,
    pub tags: Tags,
}

/// Cloud identity and access management.
///
/// Created providers, policies and roles must report their `arn` output;
/// roles additionally report their `name`.
pub trait IdentityRegistrar: Send + Sync {
    fn caller_identity(&self) -> anyhow::Result<CallerIdentity>;

    fn register_provider(&self, spec: &ProviderSpec) -> anyhow::Result<Created>;

    fn create_policy(&self, spec: &PolicySpec) -> anyhow::Result<Created>;

    fn create_role(&self, spec: &RoleSpec) -> anyhow::Result<Created>;

    fn attach_policy(&self, role: &str, policy_arn: &str) -> anyhow::Result<Created>;
}

/// A certificate of a served chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub is_ca: bool,
    pub sha1_fingerprint: String,
}

pub trait CertificateInspector: Send + Sync {
    /// Certificates served at `url`, leaf first.
    fn fetch_chain(&self, url: &str) -> anyhow::Result<Vec<CertificateInfo>>;
}

/// Applies a Kubernetes manifest to the cluster reachable through the given
/// kubeconfig.
pub trait ObjectApplier: Send + Sync {
    fn apply(&self, kubeconfig: &str, object: &Value) -> anyhow::Result<Created>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub allowed_uses: Vec<String>,
    pub validity_hours: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// Issues TLS certificates.
pub trait CertificateAuthority: Send + Sync {
    fn self_signed(&self, request: &CertificateRequest) -> anyhow::Result<Certificate>;
}

/// Every collaborator a bootstrap needs.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn StorageProvider>,
    pub clusters: Arc<dyn ClusterProvider>,
    pub identity: Arc<dyn IdentityRegistrar>,
    pub certificates: Arc<dyn CertificateInspector>,
    pub kubernetes: Arc<dyn ObjectApplier>,
    pub authority: Arc<dyn CertificateAuthority>,
}

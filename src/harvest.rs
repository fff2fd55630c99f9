//! Retrieval of the identity documents a cluster generates after boot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::{ClusterNode, ClusterProvider, NodeRole};
use crate::core::CancelHandle;
use crate::error::{CommandError, HarvestError};
use crate::oidc::{JWKS_DISCOVERY_PATH, OPENID_DISCOVERY_PATH};
use crate::retry::{Readiness, RetryError, retry_with_backoff};

const KUBECTL: &str = "kubectl";
const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";
const READYZ_PATH: &str = "/readyz";

/// The OIDC discovery document and JSON Web Key Set of a cluster, verbatim
/// as served by its API server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfigBundle {
    pub discovery_document: String,
    pub key_set: String,
}

/// Harvests [`NodeConfigBundle`]s from the control-plane node of a cluster.
#[derive(Clone)]
pub struct Harvester {
    provider: Arc<dyn ClusterProvider>,
    readiness: Readiness,
}

impl Harvester {
    pub fn new(provider: Arc<dyn ClusterProvider>) -> Self {
        Self {
            provider,
            readiness: Readiness::default(),
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    /// Waits until the control-plane of `cluster` reports ready, then reads
    /// both documents through the node's administrative credentials.
    ///
    /// Gives up with [`HarvestError::Cancelled`] as soon as `cancel` fires,
    /// including in the middle of the readiness wait.
    pub fn harvest(
        &self,
        cluster: &str,
        cancel: &CancelHandle,
    ) -> Result<NodeConfigBundle, HarvestError> {
        let nodes = self
            .provider
            .list_nodes(cluster)
            .map_err(|cause| HarvestError::ListNodes {
                cluster: cluster.to_string(),
                cause,
            })?;

        if nodes.is_empty() {
            return Err(HarvestError::ClusterNotFound(cluster.to_string()));
        }

        let node = control_plane(&nodes)
            .ok_or_else(|| HarvestError::NoControlPlaneNode(cluster.to_string()))?;

        info!(cluster, node = node.name(), "getting oidc config from cluster...");

        self.wait_ready(node, cancel)?;

        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        let key_set = fetch(node, JWKS_DISCOVERY_PATH)?;
        let discovery_document = fetch(node, OPENID_DISCOVERY_PATH)?;

        Ok(NodeConfigBundle {
            discovery_document,
            key_set,
        })
    }

    fn wait_ready(&self, node: &dyn ClusterNode, cancel: &CancelHandle) -> Result<(), HarvestError> {
        if self.readiness.is_skipped() {
            return Ok(());
        }

        let args = raw_args(READYZ_PATH);
        retry_with_backoff(&self.readiness, "control-plane readiness", cancel, || {
            node.run_command(KUBECTL, &args)
        })
        .map(|status| debug!(node = node.name(), status = status.trim(), "control-plane ready"))
        .map_err(|err| match err {
            RetryError::Cancelled { attempts } => {
                debug!(node = node.name(), attempts, "readiness wait cancelled");
                HarvestError::Cancelled
            }
            RetryError::Exhausted { attempts, error } => HarvestError::ControlPlaneNotReady {
                node: node.name().to_string(),
                attempts,
                cause: error,
            },
        })
    }
}

fn control_plane(nodes: &[Box<dyn ClusterNode>]) -> Option<&dyn ClusterNode> {
    nodes
        .iter()
        .map(Box::as_ref)
        .find(|node| node.role() == NodeRole::ControlPlane)
}

fn raw_args(path: &str) -> Vec<String> {
    ["--kubeconfig", ADMIN_KUBECONFIG, "get", "--raw", path]
        .into_iter()
        .map(String::from)
        .collect()
}

fn fetch(node: &dyn ClusterNode, path: &str) -> Result<String, HarvestError> {
    let args = raw_args(path);
    node.run_command(KUBECTL, &args)
        .map_err(|cause: CommandError| HarvestError::ConfigHarvestFailed {
            command: format!("{KUBECTL} {}", args.join(" ")),
            cause,
        })
}

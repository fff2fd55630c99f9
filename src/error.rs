use std::sync::Arc;

use thiserror::Error;

use crate::core::ArcStr;

/// Failure of an [`AsyncValue`](crate::AsyncValue) to resolve.
///
/// Cheap to clone: every value derived from a failed value observes the very
/// same failure.
#[derive(Debug, Error, Clone)]
pub enum ValueError {
    #[error("value produced by {0:?} is not resolved yet")]
    Unresolved(ArcStr),

    #[error("{request:?} failed: {cause}")]
    Failed {
        request: ArcStr,
        cause: Arc<anyhow::Error>,
    },

    #[error("key {0:?} is absent")]
    MissingKey(String),

    #[error("value produced by {request:?} is not a {expected}")]
    TypeMismatch {
        request: ArcStr,
        expected: &'static str,
    },

    #[error("couldn't decode value: {0}")]
    Decode(Arc<serde_json::Error>),

    #[error("{0}")]
    Callback(Arc<anyhow::Error>),
}

impl ValueError {
    pub(crate) fn callback(err: anyhow::Error) -> Self {
        Self::Callback(Arc::new(err))
    }
}

/// Errors surfaced by a provisioning run. The first error aborts the run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("dependency cycle through request {request:?}")]
    CyclicDependency { request: String },

    #[error("request {request:?} failed: {cause}")]
    CreationFailed {
        request: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("step {step:?} failed: {cause}")]
    StepFailed {
        step: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("inputs of {request:?} couldn't be resolved: {cause}")]
    InputUnavailable {
        request: String,
        #[source]
        cause: ValueError,
    },

    #[error("request {request:?} reads {value} which is not among its declared dependencies")]
    UndeclaredDependency { request: String, value: String },

    #[error("request {0:?} is already declared")]
    DuplicateRequest(String),

    #[error("provisioning run was cancelled")]
    Cancelled,

    #[error("couldn't build the worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Failure of a command executed on a cluster node.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("exit status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("couldn't reach node: {0}")]
    Connectivity(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors of the node config harvester.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("cluster {0:?} not found")]
    ClusterNotFound(String),

    #[error("couldn't list nodes of cluster {cluster:?}: {cause}")]
    ListNodes {
        cluster: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("cluster {0:?} has no control-plane node")]
    NoControlPlaneNode(String),

    #[error("control-plane node {node:?} not ready after {attempts} attempts: {cause}")]
    ControlPlaneNotReady {
        node: String,
        attempts: u32,
        #[source]
        cause: CommandError,
    },

    #[error("error executing command: {command}: {cause}")]
    ConfigHarvestFailed {
        command: String,
        #[source]
        cause: CommandError,
    },

    #[error("harvest cancelled")]
    Cancelled,
}

/// Errors deriving the trust configuration of the identity issuer.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("no CA certificate in the chain served at {0}")]
    NoCaCertificate(String),

    #[error("couldn't serialize kubeadm config patch")]
    Patch(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_failure_names_request() {
        let err = ProvisionError::CreationFailed {
            request: "kind-aws".into(),
            cause: anyhow::anyhow!("bucket quota exceeded"),
        };
        let msg = err.to_string();
        assert!(msg.contains("kind-aws"));
        assert!(msg.contains("bucket quota exceeded"));
    }

    #[test]
    fn test_harvest_failure_names_command() {
        let err = HarvestError::ConfigHarvestFailed {
            command: "kubectl get --raw /openid/v1/jwks".into(),
            cause: CommandError::Exit {
                code: Some(1),
                stderr: "connection refused".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("kubectl get --raw /openid/v1/jwks"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_value_errors_clone_with_shared_cause() {
        let err = ValueError::Failed {
            request: "kind-aws".into(),
            cause: Arc::new(anyhow::anyhow!("boom")),
        };
        let clone = err.clone();
        assert_eq!(err.to_string(), clone.to_string());
    }
}

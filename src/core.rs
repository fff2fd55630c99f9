use std::any::Any;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for request names.
pub(crate) type ArcStr = Arc<str>;

/// Structured outputs of a created resource, keyed by attribute name.
pub type Outputs = serde_json::Map<String, Value>;

/// Identifies a single [`Plan`](crate::Plan). Values and handles carry the id
/// of the plan that declared them, so two runs never share state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlanId(u64);

impl PlanId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for PlanId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "plan-{}", self.0)
    }
}

/// A request node inside a specific plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub(crate) plan: PlanId,
    pub(crate) index: NodeIndex,
}

/// The category of an externally created resource. Used for logging, plan
/// rendering and the ownership tree; it never influences ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Purely local grouping node.
    Component,
    Bucket,
    BucketObject,
    Cluster,
    OidcProvider,
    Policy,
    Role,
    PolicyAttachment,
    Certificate,
    /// A Kubernetes object of the given kind, e.g. `ServiceAccount`.
    Kubernetes(&'static str),
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Component => write!(f, "component"),
            ResourceKind::Bucket => write!(f, "storage:bucket"),
            ResourceKind::BucketObject => write!(f, "storage:object"),
            ResourceKind::Cluster => write!(f, "cluster"),
            ResourceKind::OidcProvider => write!(f, "iam:oidc-provider"),
            ResourceKind::Policy => write!(f, "iam:policy"),
            ResourceKind::Role => write!(f, "iam:role"),
            ResourceKind::PolicyAttachment => write!(f, "iam:policy-attachment"),
            ResourceKind::Certificate => write!(f, "tls:certificate"),
            ResourceKind::Kubernetes(kind) => write!(f, "kubernetes:{kind}"),
        }
    }
}

/// What an external collaborator hands back after creating a resource: the
/// provider-assigned identity and any number of output attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Created {
    pub identity: String,
    pub outputs: Outputs,
}

impl Created {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            outputs: Outputs::new(),
        }
    }

    /// Attach an output attribute.
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

/// Cooperative cancellation for a provisioning run.
///
/// Cancelling stops the scheduler from starting new requests. Requests that
/// are already running can observe it through
/// [`RunContext::is_cancelled`](crate::RunContext::is_cancelled). Nothing that
/// has been created is undone.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

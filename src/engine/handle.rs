use std::sync::Arc;

use serde_json::Value;

use crate::core::{ArcStr, Created, NodeRef, Outputs, ResourceKind};
use crate::engine::{AsyncValue, Slot};

/// Anything a request can declare a dependency on.
pub trait Dependency {
    fn node(&self) -> NodeRef;
}

/// Identifies a single provisioned resource.
///
/// The identity and the outputs are assigned by the external collaborator
/// that creates the resource, so both are only available as [`AsyncValue`]s.
/// The parent is a non-owning back-reference used for grouping; it never
/// implies creation order.
#[derive(Clone)]
pub struct ResourceHandle {
    node: NodeRef,
    kind: ResourceKind,
    name: ArcStr,
    parent: Option<NodeRef>,
    created: AsyncValue<Arc<Created>>,
}

impl ResourceHandle {
    pub(crate) fn new(
        kind: ResourceKind,
        parent: Option<NodeRef>,
        slot: Arc<Slot>,
    ) -> Self {
        Self {
            node: slot.node,
            kind,
            name: slot.name.clone(),
            parent,
            created: AsyncValue::from_slot(slot),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent
    }

    /// The provider-assigned identity.
    pub fn identity(&self) -> AsyncValue<String> {
        self.created.map(|created| created.identity.clone())
    }

    /// All output attributes.
    pub fn outputs(&self) -> AsyncValue<Outputs> {
        self.created.map(|created| created.outputs.clone())
    }

    /// A single output attribute.
    pub fn output(&self, key: &str) -> AsyncValue<Value> {
        self.outputs().index(key)
    }

    /// A single string output attribute.
    pub fn output_str(&self, key: &str) -> AsyncValue<String> {
        self.output(key).decode()
    }
}

impl Dependency for ResourceHandle {
    fn node(&self) -> NodeRef {
        self.node
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("node", &self.node)
            .finish()
    }
}

/// Handle to a local step of the run, such as harvesting the node config.
pub struct Step<T> {
    node: NodeRef,
    name: ArcStr,
    value: AsyncValue<T>,
}

impl<T> Clone for Step<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T> Step<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(slot: Arc<Slot>) -> Self {
        Self {
            node: slot.node,
            name: slot.name.clone(),
            value: AsyncValue::from_slot(slot),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The result of the step.
    pub fn value(&self) -> AsyncValue<T> {
        self.value.clone()
    }
}

impl<T> std::fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("node", &self.node)
            .finish()
    }
}

impl<T> Dependency for Step<T> {
    fn node(&self) -> NodeRef {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Dynamic, PlanId};
    use crate::error::ValueError;
    use petgraph::graph::NodeIndex;

    fn handle() -> (Arc<Slot>, ResourceHandle) {
        let node = NodeRef {
            plan: PlanId::next(),
            index: NodeIndex::new(0),
        };
        let slot = Arc::new(Slot::new(node, "kind-aws".into()));
        let handle = ResourceHandle::new(ResourceKind::Bucket, None, slot.clone());
        (slot, handle)
    }

    #[test]
    fn test_outputs_follow_creation() {
        let (slot, bucket) = handle();
        let domain = bucket.output_str("domainName");
        let identity = bucket.identity();

        let created = Created::new("bucket-123").with_output("domainName", "example.s3.amazonaws.com");
        slot.fill(Ok(Arc::new(Arc::new(created)) as Dynamic));

        assert_eq!(identity.resolve().unwrap(), "bucket-123");
        assert_eq!(domain.resolve().unwrap(), "example.s3.amazonaws.com");
    }

    #[test]
    fn test_missing_output() {
        let (slot, bucket) = handle();
        let arn = bucket.output("arn");

        slot.fill(Ok(Arc::new(Arc::new(Created::new("bucket-123"))) as Dynamic));

        assert!(matches!(arn.resolve(), Err(ValueError::MissingKey(_))));
    }
}

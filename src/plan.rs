use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};

use crate::core::{CancelHandle, Created, NodeRef, PlanId, ResourceKind};
use crate::engine::{
    Dependency, Inputs, ResourceHandle, ResourceTask, RunContext, Slot, Step, StepTask, Task,
};
use crate::error::ProvisionError;

/// The blueprint of a single provisioning run.
///
/// `Plan` holds the graph of requests. Requests are declared through
/// [`Plan::resource`] and [`Plan::step`], wired together with the handles the
/// earlier declarations returned, and finally executed with
/// [`Plan::execute`](crate::Plan::execute).
///
/// Every request names its dependencies explicitly. The values a request
/// reads must be produced by those dependencies or by something they
/// transitively depend on; anything else is rejected with
/// [`ProvisionError::UndeclaredDependency`] when the request is declared.
///
/// # Example
///
/// ```rust,no_run
/// use irsa_anywhere::{Created, Plan, ResourceKind, RunOptions};
///
/// let mut plan = Plan::new();
/// let bucket = plan
///     .resource(ResourceKind::Bucket, "oidc")
///     .create((), |_, ()| {
///         Ok(Created::new("bucket-1").with_output("domainName", "oidc.example.com"))
///     })?;
///
/// plan.resource(ResourceKind::BucketObject, "oidc-keys")
///     .depends_on(&bucket)
///     .create(bucket.output_str("domainName"), |_, domain| {
///         Ok(Created::new(format!("{domain}/keys.json")))
///     })?;
///
/// let report = plan.execute(&RunOptions::default())?;
/// # Ok::<(), irsa_anywhere::ProvisionError>(())
/// ```
pub struct Plan {
    pub(crate) id: PlanId,
    pub(crate) graph: Graph<Arc<dyn Task>, ()>,
    pub(crate) cancel: CancelHandle,
    names: HashSet<Arc<str>>,
}

impl Plan {
    /// Creates a new, empty plan.
    pub fn new() -> Self {
        Self {
            id: PlanId::next(),
            graph: Graph::new(),
            cancel: CancelHandle::default(),
            names: HashSet::new(),
        }
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    /// Number of declared requests.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// A handle which stops the run from starting new requests.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Starts declaring a resource creation request.
    pub fn resource(&mut self, kind: ResourceKind, name: impl Into<Cow<'static, str>>) -> RequestDef<'_> {
        RequestDef {
            plan: self,
            kind,
            name: name.into(),
            parent: None,
            depends_on: Vec::new(),
        }
    }

    /// Starts declaring a local step.
    pub fn step(&mut self, name: impl Into<Cow<'static, str>>) -> StepDef<'_> {
        StepDef {
            plan: self,
            name: name.into(),
            depends_on: Vec::new(),
        }
    }

    /// Orders `dependent` after `dependency` without any data flowing between
    /// them.
    pub fn add_dependency(
        &mut self,
        dependent: &impl Dependency,
        dependency: &impl Dependency,
    ) -> Result<(), ProvisionError> {
        let target = self.own(dependent.node(), "<foreign request>")?;
        let name = self.graph[target].name().to_string();
        let source = self.own(dependency.node(), &name)?;
        self.graph.update_edge(source, target, ());
        Ok(())
    }

    fn own(&self, node: NodeRef, request: &str) -> Result<NodeIndex, ProvisionError> {
        if node.plan != self.id || node.index.index() >= self.graph.node_count() {
            return Err(ProvisionError::UndeclaredDependency {
                request: request.to_string(),
                value: format!("a handle of {}", node.plan),
            });
        }
        Ok(node.index)
    }

    fn next_node(&self) -> NodeRef {
        NodeRef {
            plan: self.id,
            index: NodeIndex::new(self.graph.node_count()),
        }
    }

    /// Requests reachable backwards from `roots`, including the roots.
    fn ancestry(&self, roots: &[NodeIndex]) -> HashSet<NodeIndex> {
        let reversed = Reversed(&self.graph);
        let mut seen = HashSet::new();

        for &root in roots {
            if seen.contains(&root) {
                continue;
            }
            let mut dfs = Dfs::new(reversed, root);
            while let Some(index) = dfs.next(reversed) {
                seen.insert(index);
            }
        }

        seen
    }

    /// Validates and inserts a request built by one of the definition
    /// builders.
    fn insert(
        &mut self,
        name: &str,
        parent: Option<NodeRef>,
        depends_on: &[NodeRef],
        origins: &BTreeSet<NodeRef>,
        task: Arc<dyn Task>,
    ) -> Result<(), ProvisionError> {
        if self.names.contains(name) {
            return Err(ProvisionError::DuplicateRequest(name.to_string()));
        }

        if let Some(parent) = parent {
            self.own(parent, name)?;
        }

        let dependencies = depends_on
            .iter()
            .map(|node| self.own(*node, name))
            .collect::<Result<Vec<_>, _>>()?;

        let allowed = self.ancestry(&dependencies);

        for origin in origins {
            if origin.plan != self.id {
                return Err(ProvisionError::UndeclaredDependency {
                    request: name.to_string(),
                    value: format!("a value of {}", origin.plan),
                });
            }
            if !allowed.contains(&origin.index) {
                return Err(ProvisionError::UndeclaredDependency {
                    request: name.to_string(),
                    value: format!("an output of {:?}", self.graph[origin.index].name()),
                });
            }
        }

        let index = self.graph.add_node(task);
        for dependency in dependencies {
            self.graph.update_edge(dependency, index, ());
        }

        self.names.insert(name.into());
        Ok(())
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name().replace('"', "\\\"");
            match task.kind() {
                Some(kind) => writeln!(f, "    {}[\"{}: {}\"]", index.index(), kind, name)?,
                None => writeln!(f, "    {}([\"{}\"])", index.index(), name)?,
            }
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

pub struct RequestDef<'a> {
    plan: &'a mut Plan,
    kind: ResourceKind,
    name: Cow<'static, str>,
    parent: Option<NodeRef>,
    depends_on: Vec<NodeRef>,
}

impl<'a> RequestDef<'a> {
    /// Groups the resource under `parent` in the ownership tree.
    pub fn parent(mut self, parent: &ResourceHandle) -> Self {
        self.parent = Some(parent.node());
        self
    }

    pub fn depends_on(mut self, dependency: &impl Dependency) -> Self {
        self.depends_on.push(dependency.node());
        self
    }

    /// Finishes the request. Once every input resolved, `create` is invoked
    /// exactly once with the resolved inputs and must return what the
    /// external collaborator created.
    pub fn create<I, F>(self, inputs: I, create: F) -> Result<ResourceHandle, ProvisionError>
    where
        I: Inputs,
        F: Fn(&RunContext<'_>, I::Output) -> anyhow::Result<Created> + Send + Sync + 'static,
    {
        let node = self.plan.next_node();
        let slot = Arc::new(Slot::new(node, self.name.as_ref().into()));

        let mut origins = BTreeSet::new();
        inputs.origins(&mut origins);

        let task = ResourceTask {
            kind: self.kind,
            parent: self.parent.map(|parent| parent.index),
            inputs,
            create,
            slot: slot.clone(),
        };

        self.plan
            .insert(&self.name, self.parent, &self.depends_on, &origins, Arc::new(task))?;

        Ok(ResourceHandle::new(self.kind, self.parent, slot))
    }
}

pub struct StepDef<'a> {
    plan: &'a mut Plan,
    name: Cow<'static, str>,
    depends_on: Vec<NodeRef>,
}

impl<'a> StepDef<'a> {
    pub fn depends_on(mut self, dependency: &impl Dependency) -> Self {
        self.depends_on.push(dependency.node());
        self
    }

    /// Finishes the step. `callback` runs once every input resolved.
    pub fn run<I, F, T>(self, inputs: I, callback: F) -> Result<Step<T>, ProvisionError>
    where
        I: Inputs,
        F: Fn(&RunContext<'_>, I::Output) -> anyhow::Result<T> + Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let node = self.plan.next_node();
        let slot = Arc::new(Slot::new(node, self.name.as_ref().into()));

        let mut origins = BTreeSet::new();
        inputs.origins(&mut origins);

        let task = StepTask {
            inputs,
            callback,
            slot: slot.clone(),
            _phantom: PhantomData,
        };

        self.plan
            .insert(&self.name, None, &self.depends_on, &origins, Arc::new(task))?;

        Ok(Step::new(slot))
    }
}

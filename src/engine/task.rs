use std::marker::PhantomData;
use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::core::{Created, Dynamic, ResourceKind};
use crate::engine::{Inputs, RunContext, Slot};
use crate::error::ValueError;

/// Why a request did not produce an output.
pub(crate) enum Failure {
    /// One of its inputs failed to resolve.
    Input(ValueError),
    /// The creation call or step callback failed.
    Callback(anyhow::Error),
}

/// A type-erased request node stored in the plan graph.
pub(crate) trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// `None` for local steps.
    fn kind(&self) -> Option<ResourceKind>;

    fn parent(&self) -> Option<NodeIndex>;

    fn slot(&self) -> &Arc<Slot>;

    fn execute(&self, context: &RunContext<'_>) -> Result<Dynamic, Failure>;
}

/// Creates one external resource from its resolved inputs.
pub(crate) struct ResourceTask<I, F> {
    pub kind: ResourceKind,
    pub parent: Option<NodeIndex>,
    pub inputs: I,
    pub create: F,
    pub slot: Arc<Slot>,
}

impl<I, F> Task for ResourceTask<I, F>
where
    I: Inputs,
    F: Fn(&RunContext<'_>, I::Output) -> anyhow::Result<Created> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.slot.name
    }

    fn kind(&self) -> Option<ResourceKind> {
        Some(self.kind)
    }

    fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    fn slot(&self) -> &Arc<Slot> {
        &self.slot
    }

    fn execute(&self, context: &RunContext<'_>) -> Result<Dynamic, Failure> {
        let inputs = self.inputs.resolve().map_err(Failure::Input)?;
        let created = (self.create)(context, inputs).map_err(Failure::Callback)?;
        Ok(Arc::new(Arc::new(created)))
    }
}

/// Runs a local side-effecting step, e.g. harvesting documents from a node.
pub(crate) struct StepTask<I, F, T> {
    pub inputs: I,
    pub callback: F,
    pub slot: Arc<Slot>,
    pub _phantom: PhantomData<fn() -> T>,
}

impl<I, F, T> Task for StepTask<I, F, T>
where
    I: Inputs,
    F: Fn(&RunContext<'_>, I::Output) -> anyhow::Result<T> + Send + Sync,
    T: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.slot.name
    }

    fn kind(&self) -> Option<ResourceKind> {
        None
    }

    fn parent(&self) -> Option<NodeIndex> {
        None
    }

    fn slot(&self) -> &Arc<Slot> {
        &self.slot
    }

    fn execute(&self, context: &RunContext<'_>) -> Result<Dynamic, Failure> {
        let inputs = self.inputs.resolve().map_err(Failure::Input)?;
        let output = (self.callback)(context, inputs).map_err(Failure::Callback)?;
        Ok(Arc::new(output))
    }
}

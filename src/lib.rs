#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod bootstrap;
pub mod collaborators;
mod config;
mod core;
mod engine;
mod error;
mod harvest;
pub mod kind;
pub mod oidc;
mod plan;
mod retry;
mod tree;
mod utils;

pub use crate::bootstrap::{Binding, Bootstrap, Declared, SampleApp, Webhook};
pub use crate::config::{BindingConfig, BootstrapConfig};
pub use crate::core::{CancelHandle, Created, NodeRef, Outputs, PlanId, ResourceKind};
pub use crate::engine::{
    AsyncValue, Dependency, Execution, Inputs, Lookup, ResourceHandle, RunContext, RunOptions,
    RunReport, Step, combine,
};
pub use crate::error::*;
pub use crate::harvest::{Harvester, NodeConfigBundle};
pub use crate::kind::KindCli;
pub use crate::plan::{Plan, RequestDef, StepDef};
pub use crate::retry::Readiness;
pub use crate::tree::{Entry, OwnershipTree};
pub use crate::utils::init_logging;

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use console::style;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use serde::Deserialize;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{CancelHandle, Created, Dynamic};
use crate::engine::Failure;
use crate::error::{HarvestError, ProvisionError, ValueError};
use crate::tree::{Entry, OwnershipTree};
use crate::utils::{as_overhead, request_style, run_style};
use crate::Plan;

/// Tuning of the worker pool executing a plan.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Number of worker threads. `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

/// Passed to every creation call and step callback.
pub struct RunContext<'a> {
    request: &'a str,
    cancel: &'a CancelHandle,
}

impl RunContext<'_> {
    /// Name of the running request.
    pub fn request(&self) -> &str {
        self.request
    }

    /// Long-running callbacks may poll this and give up early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The cancellation of the run, for callbacks which block on something
    /// that can itself be interrupted.
    pub fn cancel_handle(&self) -> &CancelHandle {
        self.cancel
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Execution {
    pub start: Instant,
    pub duration: Duration,
}

/// The result of a successful run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Names of the requests in the order they completed.
    pub order: Vec<String>,
    pub executions: HashMap<String, Execution>,
    pub tree: OwnershipTree,
    created: BTreeMap<String, Created>,
}

impl RunReport {
    /// What the collaborator returned for the resource request `name`.
    pub fn created(&self, name: &str) -> Option<&Created> {
        self.created.get(name)
    }

    /// Position of `name` in the completion order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|item| item == name)
    }

    /// Human readable listing of everything that ran.
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let mut acc = String::new();
        for name in &self.order {
            let overhead = self
                .executions
                .get(name)
                .map(|execution| as_overhead(execution.duration).to_string())
                .unwrap_or_default();

            let _ = match self.tree.get(name) {
                Some(entry) => writeln!(
                    acc,
                    "{} {} {} {}",
                    style(entry.kind).cyan(),
                    style(name).bold(),
                    entry.identity,
                    overhead
                ),
                None => writeln!(acc, "{} {} {}", style("step").dim(), style(name).bold(), overhead),
            };
        }
        acc
    }
}

type Message = (NodeIndex, Result<Dynamic, Failure>, Instant, Duration);

impl Plan {
    /// Executes every request in the plan.
    ///
    /// Requests run as soon as all their dependencies have completed, on a
    /// rayon worker pool. The first failure stops the run: requests already
    /// executing are allowed to finish, nothing new is started, and the
    /// failure is returned. A dependency cycle is reported before anything is
    /// created.
    pub fn execute(self, options: &RunOptions) -> Result<RunReport, ProvisionError> {
        if let Err(cycle) = petgraph::algo::toposort(&self.graph, None) {
            return Err(ProvisionError::CyclicDependency {
                request: self.graph[cycle.node_id()].name().to_string(),
            });
        }

        match options.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("provision-{i}"))
                    .build()?;
                pool.install(|| run_parallel(&self))
            }
            None => run_parallel(&self),
        }
    }
}

/// Executes the plan graph as a parallel topological sort: a request is
/// spawned on the pool as soon as the count of its unfinished dependencies
/// drops to zero, and the calling thread collects results from a channel.
fn run_parallel(plan: &Plan) -> Result<RunReport, ProvisionError> {
    let graph = &plan.graph;
    let cancel = &plan.cancel;

    if cancel.is_cancelled() {
        return Err(ProvisionError::Cancelled);
    }

    let mut dependency_counts: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|index| {
            let count = graph
                .neighbors_directed(index, Direction::Incoming)
                .count();
            (index, count)
        })
        .collect();

    let total = graph.node_count();
    let mut report = RunReport::default();

    if total == 0 {
        return Ok(report);
    }

    let root_span = tracing::span!(Level::INFO, "provisioning", plan = %plan.id);
    root_span.pb_set_length(total as u64);
    root_span.pb_set_style(&run_style());
    root_span.pb_set_message("Provisioning...");
    let _enter = root_span.enter();

    let pb_style = request_style();
    let started = Instant::now();

    let first_failure = rayon::scope(|s| -> Option<ProvisionError> {
        let (sender, receiver) = channel::<Message>();

        let spawn_task = |index: NodeIndex| {
            let task = graph[index].clone();
            let sender = sender.clone();
            let pb_style = pb_style.clone();

            s.spawn(move |_| {
                let span = match task.kind() {
                    Some(kind) => tracing::span!(Level::INFO, "request", name = task.name(), %kind),
                    None => tracing::span!(Level::INFO, "step", name = task.name()),
                };
                span.pb_set_style(&pb_style);
                span.pb_set_message(&format!("Creating {}", task.name()));
                let _enter = span.enter();

                let context = RunContext {
                    request: task.name(),
                    cancel,
                };

                let start = Instant::now();

                // A panicking callback only poisons its own request; the
                // outputs of other requests live in their own slots.
                let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    task.execute(&context)
                })) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("request panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("request panicked: {s}")
                        } else {
                            String::from("request panicked with unknown payload")
                        };

                        Err(Failure::Callback(anyhow::anyhow!(msg)))
                    }
                };

                // the receiver is gone only once the run has been abandoned
                let _ = sender.send((index, result, start, start.elapsed()));
            });
        };

        let mut in_flight = 0usize;
        for index in graph.node_indices() {
            if dependency_counts[&index] == 0 {
                spawn_task(index);
                in_flight += 1;
            }
        }

        let mut failure: Option<ProvisionError> = None;

        while in_flight > 0 {
            let Some((index, result, start, duration)) = next_message(&receiver) else {
                break;
            };
            in_flight -= 1;

            let task = &graph[index];

            let output = match result {
                Ok(output) => output,
                Err(Failure::Callback(cause)) if cancel.is_cancelled() && is_cancellation(&cause) => {
                    tracing::warn!(request = task.name(), "abandoned after cancellation");
                    task.slot().fill(Err(ValueError::Failed {
                        request: task.name().into(),
                        cause: Arc::new(cause),
                    }));
                    continue;
                }
                Err(err) => {
                    let (error, value_error) = surface(task.name(), task.kind().is_some(), err);
                    tracing::error!(request = task.name(), "{error}");
                    task.slot().fill(Err(value_error));
                    if failure.is_none() {
                        failure = Some(error);
                    }
                    continue;
                }
            };

            task.slot().fill(Ok(output.clone()));
            root_span.pb_inc(1);

            let name = task.name().to_string();
            report.order.push(name.clone());
            report.executions.insert(name.clone(), Execution { start, duration });

            if let Some(kind) = task.kind()
                && let Some(created) = output.downcast_ref::<Arc<Created>>()
            {
                tracing::info!(request = %name, identity = %created.identity, "created {kind}");
                report.tree.insert(
                    index,
                    task.parent(),
                    Entry {
                        name: name.clone(),
                        kind,
                        identity: created.identity.clone(),
                    },
                );
                report.created.insert(name, created.as_ref().clone());
            }

            if failure.is_some() || cancel.is_cancelled() {
                continue;
            }

            for dependent in graph.neighbors_directed(index, Direction::Outgoing) {
                if let Some(count) = dependency_counts.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        spawn_task(dependent);
                        in_flight += 1;
                    }
                }
            }
        }

        failure
    });

    if let Some(failure) = first_failure {
        return Err(failure);
    }

    if report.order.len() < total {
        tracing::warn!(completed = report.order.len(), total, "provisioning cancelled");
        return Err(ProvisionError::Cancelled);
    }

    tracing::info!("Provisioning complete! {}", as_overhead(started.elapsed()));
    Ok(report)
}

/// Waits for the next finished request. While nothing has finished, the
/// waiting worker runs queued requests itself, so a single-threaded pool
/// still makes progress.
fn next_message(receiver: &Receiver<Message>) -> Option<Message> {
    loop {
        match receiver.try_recv() {
            Ok(message) => return Some(message),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }

        if let Some(rayon::Yield::Executed) = rayon::yield_now() {
            continue;
        }

        match receiver.recv_timeout(Duration::from_millis(10)) {
            Ok(message) => return Some(message),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

/// Maps a request failure to the error surfaced by the run and the failure
/// observed by values read from the request.
/// Whether a callback gave up because the run was cancelled.
fn is_cancellation(cause: &anyhow::Error) -> bool {
    cause.chain().any(|err| {
        matches!(err.downcast_ref::<ProvisionError>(), Some(ProvisionError::Cancelled))
            || matches!(err.downcast_ref::<HarvestError>(), Some(HarvestError::Cancelled))
    })
}

fn surface(name: &str, is_resource: bool, failure: Failure) -> (ProvisionError, ValueError) {
    match failure {
        Failure::Input(cause) => (
            ProvisionError::InputUnavailable {
                request: name.to_string(),
                cause: cause.clone(),
            },
            cause,
        ),
        Failure::Callback(cause) => {
            let observed = ValueError::Failed {
                request: name.into(),
                cause: Arc::new(anyhow::anyhow!("{cause:#}")),
            };
            let error = if is_resource {
                ProvisionError::CreationFailed {
                    request: name.to_string(),
                    cause,
                }
            } else {
                ProvisionError::StepFailed {
                    step: name.to_string(),
                    cause,
                }
            };
            (error, observed)
        }
    }
}

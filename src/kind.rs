//! Local clusters run by `kind` on top of docker.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::collaborators::{ClusterNode, ClusterProvider, ClusterSpec, NodeRole, NodeSpec};
use crate::core::Created;
use crate::error::CommandError;

const KIND_EXEC: &str = "kind";
const DOCKER_EXEC: &str = "docker";
const ROLE_LABEL: &str = "io.x-k8s.kind.role";

/// [`ClusterProvider`] driving the `kind` and `docker` executables.
#[derive(Clone, Debug)]
pub struct KindCli {
    kind: Utf8PathBuf,
    docker: Utf8PathBuf,
}

impl Default for KindCli {
    fn default() -> Self {
        Self {
            kind: KIND_EXEC.into(),
            docker: DOCKER_EXEC.into(),
        }
    }
}

impl KindCli {
    /// Uses the given executables instead of the ones found on `PATH`.
    pub fn with_executables(kind: impl Into<Utf8PathBuf>, docker: impl Into<Utf8PathBuf>) -> Self {
        Self {
            kind: kind.into(),
            docker: docker.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KindConfig<'a> {
    kind: &'static str,
    api_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    networking: Option<Networking<'a>>,
    nodes: &'a [NodeSpec],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Networking<'a> {
    api_server_address: &'a str,
}

/// The kind cluster config for `spec`. Kind reads YAML, which JSON is a
/// subset of.
fn kind_config(spec: &ClusterSpec) -> serde_json::Result<String> {
    let config = KindConfig {
        kind: "Cluster",
        api_version: "kind.x-k8s.io/v1alpha4",
        networking: spec
            .api_server_address
            .as_deref()
            .map(|api_server_address| Networking { api_server_address }),
        nodes: &spec.nodes,
    };

    serde_json::to_string(&config)
}

fn parse_nodes(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn parse_role(label: &str) -> NodeRole {
    match label.trim() {
        "control-plane" => NodeRole::ControlPlane,
        _ => NodeRole::Worker,
    }
}

fn run(exec: &Utf8Path, args: &[&str], stdin: Option<&str>) -> Result<String, CommandError> {
    debug!(%exec, ?args, "running command");

    let mut child = Command::new(exec)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())?;
    }

    let output = child.wait_with_output()?;

    if !output.status.success() {
        return Err(CommandError::Exit {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl ClusterProvider for KindCli {
    fn create_cluster(&self, spec: &ClusterSpec) -> anyhow::Result<Created> {
        let config = kind_config(spec).context("serializing kind cluster config")?;

        run(
            &self.kind,
            &["create", "cluster", "--name", &spec.name, "--config", "-"],
            Some(&config),
        )
        .with_context(|| format!("creating kind cluster {}", spec.name))?;

        let kubeconfig = run(&self.kind, &["get", "kubeconfig", "--name", &spec.name], None)
            .with_context(|| format!("reading kubeconfig of kind cluster {}", spec.name))?;

        Ok(Created::new(spec.name.clone())
            .with_output("name", spec.name.clone())
            .with_output("kubeconfig", kubeconfig))
    }

    fn list_nodes(&self, cluster: &str) -> anyhow::Result<Vec<Box<dyn ClusterNode>>> {
        let stdout = run(&self.kind, &["get", "nodes", "--name", cluster], None)
            .with_context(|| format!("unable to find a cluster: {cluster}"))?;

        let mut nodes: Vec<Box<dyn ClusterNode>> = Vec::new();
        for name in parse_nodes(&stdout) {
            let format = format!("{{{{ index .Config.Labels \"{ROLE_LABEL}\" }}}}");
            let label = run(&self.docker, &["inspect", "--format", &format, &name], None)
                .with_context(|| format!("inspecting kind node {name}"))?;

            nodes.push(Box::new(KindNode {
                role: parse_role(&label),
                name,
                docker: self.docker.clone(),
            }));
        }

        Ok(nodes)
    }
}

/// A kind node container.
#[derive(Clone, Debug)]
pub struct KindNode {
    name: String,
    role: NodeRole,
    docker: Utf8PathBuf,
}

impl ClusterNode for KindNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> NodeRole {
        self.role
    }

    fn run_command(&self, executable: &str, args: &[String]) -> Result<String, CommandError> {
        let mut argv = vec!["exec", "--privileged", self.name.as_str(), executable];
        argv.extend(args.iter().map(String::as_str));

        run(&self.docker, &argv, None).map_err(|err| match err {
            CommandError::Io(err) => CommandError::Connectivity(format!("{}: {err}", self.name)),
            other => other,
        })
    }
}

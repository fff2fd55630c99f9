use serde::{Deserialize, Serialize};

use crate::retry::Readiness;

/// Names of the service account trusted by the cloud role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BindingConfig {
    pub namespace: String,
    pub service_account: String,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            namespace: "irsa-test".into(),
            service_account: "irsa-test".into(),
        }
    }
}

/// Configuration of a trust bootstrap.
///
/// ```json
/// {
///   "name": "kind-aws",
///   "project": "irsa-anywhere",
///   "stack": "dev",
///   "createSampleApp": true,
///   "readiness": { "attempts": 60 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// Name of the cluster and prefix of every request.
    pub name: String,
    pub project: String,
    pub stack: String,
    /// Also create the demonstration workload.
    pub create_sample_app: bool,
    /// Address the kind API server binds to.
    pub api_server_address: Option<String>,
    /// Host substituted for `0.0.0.0` in the kubeconfig handed to the
    /// Kubernetes object applier.
    ///
    /// kind writes `0.0.0.0` into the kubeconfig only when
    /// [`api_server_address`](Self::api_server_address) is set to it. With the
    /// default loopback address there is nothing to replace and this option
    /// has no effect, so set both together.
    pub kubeconfig_host: Option<String>,
    pub binding: BindingConfig,
    pub readiness: Readiness,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            name: "kind-aws".into(),
            project: "irsa-anywhere".into(),
            stack: "dev".into(),
            create_sample_app: false,
            api_server_address: None,
            kubeconfig_host: None,
            binding: BindingConfig::default(),
            readiness: Readiness::default(),
        }
    }
}

impl BootstrapConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_sample_app(mut self, enabled: bool) -> Self {
        self.create_sample_app = enabled;
        self
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_kubeconfig_host(mut self, host: impl Into<String>) -> Self {
        self.kubeconfig_host = Some(host.into());
        self
    }

    /// `<stack>-<project>-<name>`, the generated name of a cloud resource.
    pub fn resource_name(&self, name: &str) -> String {
        format!("{}-{}-{}", self.stack, self.project, name)
    }
}

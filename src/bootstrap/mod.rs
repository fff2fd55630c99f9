//! The trust bootstrap: storage, cluster, issuer documents, identity provider
//! and the bindings trusting it.
//!
//! Everything here is declaration. [`Bootstrap::declare`] wires the requests
//! into a [`Plan`], and the plan decides when each of them runs.

mod binding;
mod sampleapp;
mod webhook;

use std::sync::Arc;

use crate::collaborators::{
    Acl, CallerIdentity, ClusterSpec, Collaborators, NodeRole, NodeSpec, ObjectSpec, ProviderSpec,
    Tags,
};
use crate::config::BootstrapConfig;
use crate::core::{Created, ResourceKind};
use crate::engine::{AsyncValue, ResourceHandle, RunOptions, RunReport, Step, combine};
use crate::error::ProvisionError;
use crate::harvest::{Harvester, NodeConfigBundle};
use crate::oidc;
use crate::Plan;

pub use binding::Binding;
pub use sampleapp::SampleApp;
pub use webhook::Webhook;

const CREATED_BY: &str = "irsa-anywhere";
const JSON_CONTENT: &str = "application/json";

/// Handles of everything a bootstrap declared.
#[derive(Clone, Debug)]
pub struct Declared {
    pub component: ResourceHandle,
    pub caller: Step<CallerIdentity>,
    pub bucket: ResourceHandle,
    /// The kubeadm patch handed to the cluster, derived from the bucket domain.
    pub patch: AsyncValue<String>,
    pub cluster: ResourceHandle,
    pub bundle: Step<NodeConfigBundle>,
    pub discovery: ResourceHandle,
    pub keys: ResourceHandle,
    pub thumbprint: Step<String>,
    pub provider: ResourceHandle,
    pub webhook: Webhook,
    pub binding: Binding,
    pub sample_app: Option<SampleApp>,
}

/// Sequencer of a trust bootstrap run.
pub struct Bootstrap {
    config: BootstrapConfig,
    collaborators: Collaborators,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Declares the whole bootstrap in a fresh plan and executes it.
    pub fn run(&self, options: &RunOptions) -> Result<RunReport, ProvisionError> {
        let mut plan = Plan::new();
        self.declare(&mut plan)?;
        tracing::debug!("bootstrap plan:\n{plan}");
        plan.execute(options)
    }

    /// Declares every request of the bootstrap in `plan`.
    pub fn declare(&self, plan: &mut Plan) -> Result<Declared, ProvisionError> {
        let name = self.config.name.clone();
        let storage = &self.collaborators.storage;

        let component = plan
            .resource(ResourceKind::Component, name.clone())
            .create((), {
                let name = name.clone();
                move |_, ()| Ok(Created::new(name.clone()))
            })?;

        let caller = plan.step(format!("{name}-caller-identity")).run((), {
            let identity = self.collaborators.identity.clone();
            move |_, ()| identity.caller_identity()
        })?;

        let tags = self.tags(&caller, &name);

        let bucket = plan
            .resource(ResourceKind::Bucket, format!("{name}-bucket"))
            .parent(&component)
            .depends_on(&caller)
            .create(tags.clone(), {
                let storage = storage.clone();
                let bucket_name = self.config.resource_name(&name);
                move |_, tags| storage.create_bucket(&bucket_name, &tags)
            })?;

        let domain = bucket.output_str("domainName");
        let patch = domain.try_map(|domain| Ok(oidc::kubeadm_patch(&domain)?));

        let cluster = plan
            .resource(ResourceKind::Cluster, format!("{name}-cluster"))
            .parent(&component)
            .depends_on(&bucket)
            .create(patch.clone(), {
                let clusters = self.collaborators.clusters.clone();
                let name = name.clone();
                let api_server_address = self.config.api_server_address.clone();
                move |_, patch| {
                    clusters.create_cluster(&ClusterSpec {
                        name: name.clone(),
                        api_server_address: api_server_address.clone(),
                        nodes: vec![NodeSpec {
                            role: NodeRole::ControlPlane,
                            kubeadm_config_patches: vec![patch],
                        }],
                    })
                }
            })?;

        let bundle = plan
            .step(format!("{name}-oidc-config"))
            .depends_on(&cluster)
            .run(cluster.output_str("name"), {
                let harvester = Harvester::new(self.collaborators.clusters.clone())
                    .with_readiness(self.config.readiness.clone());
                move |context, cluster| Ok(harvester.harvest(&cluster, context.cancel_handle())?)
            })?;

        let bucket_id = bucket.output_str("bucket");

        let discovery = self.publish(
            plan,
            &bucket,
            &bundle,
            format!("{name}-discovery"),
            oidc::DISCOVERY_KEY,
            combine((bucket_id.clone(), bundle.value().map(|b| b.discovery_document), tags.clone())),
        )?;

        let keys = self.publish(
            plan,
            &bucket,
            &bundle,
            format!("{name}-jwks"),
            oidc::KEYS_JSON,
            combine((bucket_id, bundle.value().map(|b| b.key_set), tags.clone())),
        )?;

        let thumbprint = plan
            .step(format!("{name}-thumbprint"))
            .depends_on(&bucket)
            .run(domain.clone(), {
                let certificates = self.collaborators.certificates.clone();
                move |_, domain| {
                    let url = oidc::issuer_url(&domain);
                    let chain = certificates.fetch_chain(&url)?;
                    Ok(oidc::ca_thumbprint(&url, &chain)?)
                }
            })?;

        let provider = plan
            .resource(ResourceKind::OidcProvider, format!("{name}-oidc-provider"))
            .parent(&component)
            .depends_on(&bucket)
            .depends_on(&thumbprint)
            .create(combine((domain.clone(), thumbprint.value(), tags)), {
                let identity = self.collaborators.identity.clone();
                move |_, (domain, thumbprint, tags)| {
                    identity.register_provider(&ProviderSpec {
                        url: oidc::issuer_url(&domain),
                        client_ids: vec![oidc::STS_AUDIENCE.to_string()],
                        thumbprints: vec![thumbprint],
                        tags,
                    })
                }
            })?;

        let kubeconfig = self.kubeconfig(&cluster);

        let webhook = webhook::declare(
            plan,
            &self.collaborators,
            &name,
            &component,
            &cluster,
            kubeconfig.clone(),
        )?;

        let binding = binding::declare(
            plan,
            self,
            &caller,
            &component,
            &cluster,
            &bucket,
            &provider,
            kubeconfig.clone(),
        )?;

        let sample_app = if self.config.create_sample_app {
            Some(sampleapp::declare(
                plan, self, &caller, &component, &cluster, &binding, &webhook, kubeconfig,
            )?)
        } else {
            None
        };

        Ok(Declared {
            component,
            caller,
            bucket,
            patch,
            cluster,
            bundle,
            discovery,
            keys,
            thumbprint,
            provider,
            webhook,
            binding,
            sample_app,
        })
    }

    /// Declares a publicly readable JSON document stored in `bucket`.
    fn publish(
        &self,
        plan: &mut Plan,
        bucket: &ResourceHandle,
        bundle: &Step<NodeConfigBundle>,
        request: String,
        key: &'static str,
        inputs: AsyncValue<(String, String, Tags)>,
    ) -> Result<ResourceHandle, ProvisionError> {
        let storage = self.collaborators.storage.clone();

        plan.resource(ResourceKind::BucketObject, request)
            .parent(bucket)
            .depends_on(bucket)
            .depends_on(bundle)
            .create(inputs, move |_, (bucket, content, tags)| {
                storage.publish_object(&ObjectSpec {
                    bucket,
                    key: key.to_string(),
                    content,
                    content_type: JSON_CONTENT.to_string(),
                    acl: Acl::PublicRead,
                    tags,
                })
            })
    }

    /// Tags of the cloud resource `name`, available once the caller identity
    /// is known.
    pub(crate) fn tags(&self, caller: &Step<CallerIdentity>, name: &str) -> AsyncValue<Tags> {
        let config = self.config.clone();
        let name = name.to_string();
        caller
            .value()
            .map(move |caller| resource_tags(&config, &caller, &name))
    }

    /// The cluster kubeconfig as seen by the Kubernetes object applier.
    fn kubeconfig(&self, cluster: &ResourceHandle) -> AsyncValue<String> {
        let host = self.config.kubeconfig_host.clone();
        cluster
            .output_str("kubeconfig")
            .map(move |kubeconfig| match &host {
                Some(host) => kubeconfig.replace("0.0.0.0", host),
                None => kubeconfig,
            })
    }

    pub(crate) fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }
}

fn resource_tags(config: &BootstrapConfig, caller: &CallerIdentity, name: &str) -> Tags {
    Tags::from([
        ("Name".to_string(), config.resource_name(name)),
        ("Owner".to_string(), caller.account_id.clone()),
        ("CreatorArn".to_string(), caller.arn.clone()),
        ("CreatedBy".to_string(), CREATED_BY.to_string()),
        ("Project".to_string(), config.project.clone()),
        ("Stack".to_string(), config.stack.clone()),
    ])
}

/// Common `app.kubernetes.io` labels.
pub(crate) fn common_labels(
    name: &str,
    instance: &str,
    version: &str,
    component: &str,
    part_of: &str,
) -> serde_json::Value {
    serde_json::json!({
        "app.kubernetes.io/name": name,
        "app.kubernetes.io/instance": instance,
        "app.kubernetes.io/version": version,
        "app.kubernetes.io/component": component,
        "app.kubernetes.io/part-of": part_of,
        "app.kubernetes.io/created-by": CREATED_BY,
    })
}

/// Declares a Kubernetes object applied with the cluster kubeconfig.
///
/// Every object depends on the cluster, plus whatever it is ordered after.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply<I, F>(
    plan: &mut Plan,
    collaborators: &Collaborators,
    cluster: &ResourceHandle,
    kubeconfig: &AsyncValue<String>,
    kind: &'static str,
    request: String,
    parent: &ResourceHandle,
    after: &[&ResourceHandle],
    inputs: I,
    manifest: F,
) -> Result<ResourceHandle, ProvisionError>
where
    I: crate::Inputs,
    F: Fn(I::Output) -> serde_json::Value + Send + Sync + 'static,
{
    let applier = Arc::clone(&collaborators.kubernetes);

    let mut def = plan
        .resource(ResourceKind::Kubernetes(kind), request)
        .parent(parent)
        .depends_on(cluster);
    for dependency in after {
        def = def.depends_on(*dependency);
    }

    def.create((kubeconfig.clone(), inputs), move |_, (kubeconfig, inputs)| {
        applier.apply(&kubeconfig, &manifest(inputs))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_name_the_creator() {
        let config = BootstrapConfig::default();
        let caller = CallerIdentity {
            account_id: "123456789012".into(),
            arn: "arn:aws:iam::123456789012:user/ci".into(),
        };

        let tags = resource_tags(&config, &caller, "kind-aws");

        assert_eq!(tags["Name"], "dev-irsa-anywhere-kind-aws");
        assert_eq!(tags["Owner"], "123456789012");
        assert_eq!(tags["CreatorArn"], "arn:aws:iam::123456789012:user/ci");
        assert_eq!(tags["CreatedBy"], "irsa-anywhere");
        assert_eq!(tags["Project"], "irsa-anywhere");
        assert_eq!(tags["Stack"], "dev");
    }

    #[test]
    fn test_labels_are_complete() {
        let labels = common_labels("irsa", "irsa-kind-aws", "ed8c41f", "iam", "aws-pod-identity");
        assert_eq!(labels.as_object().unwrap().len(), 6);
        assert_eq!(labels["app.kubernetes.io/instance"], "irsa-kind-aws");
    }
}

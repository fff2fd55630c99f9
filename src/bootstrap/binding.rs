//! The cloud role trusted through the identity provider, and the service
//! account allowed to assume it.

use serde_json::json;

use crate::bootstrap::{Bootstrap, apply};
use crate::collaborators::{CallerIdentity, PolicySpec, RoleSpec};
use crate::core::ResourceKind;
use crate::engine::{AsyncValue, ResourceHandle, Step, combine};
use crate::error::ProvisionError;
use crate::oidc::{self, STS_AUDIENCE};
use crate::Plan;

#[derive(Clone, Debug)]
pub struct Binding {
    pub namespace: ResourceHandle,
    pub boundary: ResourceHandle,
    pub role: ResourceHandle,
    pub service_account: ResourceHandle,
}

fn boundary_document() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "allowS3GetObject",
            "Effect": "Allow",
            "Action": ["s3:ListBucket", "s3:Get*"],
            "Resource": ["*"],
        }]
    })
}

/// Labels shared by the binding and the demonstration workload.
pub(super) fn labels(name: &str) -> serde_json::Value {
    crate::bootstrap::common_labels("sampleapp", &format!("sampleapp-{name}"), "0.0.1", "test", "irsa-test")
}

fn service_account(
    labels: &serde_json::Value,
    namespace: &str,
    name: &str,
    role_arn: &str,
) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": labels,
            "annotations": {
                "eks.amazonaws.com/role-arn": role_arn,
                "eks.amazonaws.com/audience": STS_AUDIENCE,
                "eks.amazonaws.com/sts-regional-endpoints": "true",
                "eks.amazonaws.com/token-expiration": "86400",
            },
        },
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn declare(
    plan: &mut Plan,
    bootstrap: &Bootstrap,
    caller: &Step<CallerIdentity>,
    component: &ResourceHandle,
    cluster: &ResourceHandle,
    bucket: &ResourceHandle,
    provider: &ResourceHandle,
    kubeconfig: AsyncValue<String>,
) -> Result<Binding, ProvisionError> {
    let config = bootstrap.config();
    let collaborators = bootstrap.collaborators();
    let name = &config.name;
    let target = config.binding.clone();
    let labels = labels(name);

    let namespace = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "Namespace",
        format!("{name}-binding-namespace"),
        component,
        &[],
        (),
        {
            let labels = labels.clone();
            let namespace = target.namespace.clone();
            move |()| {
                json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": { "name": namespace, "labels": labels },
                })
            }
        },
    )?;

    let boundary = plan
        .resource(ResourceKind::Policy, format!("{name}-permission-boundary"))
        .parent(component)
        .depends_on(caller)
        .create(bootstrap.tags(caller, "permission-boundary"), {
            let identity = collaborators.identity.clone();
            let policy_name = config.resource_name("permission-boundary");
            move |_, tags| {
                identity.create_policy(&PolicySpec {
                    name: policy_name.clone(),
                    description: "Permission boundary for the role".to_string(),
                    path: "/".to_string(),
                    document: boundary_document(),
                    tags,
                })
            }
        })?;

    let role = plan
        .resource(ResourceKind::Role, format!("{name}-role"))
        .parent(component)
        .depends_on(provider)
        .depends_on(bucket)
        .depends_on(&boundary)
        .create(
            combine((
                provider.output_str("arn"),
                bucket.output_str("domainName"),
                boundary.output_str("arn"),
                bootstrap.tags(caller, "role"),
            )),
            {
                let identity = collaborators.identity.clone();
                let role_name = config.resource_name("role");
                let target = target.clone();
                move |_, (provider_arn, domain, boundary_arn, tags)| {
                    identity.create_role(&RoleSpec {
                        name: role_name.clone(),
                        description: "Allow a local kind cluster read only access to s3".to_string(),
                        path: "/".to_string(),
                        assume_role_policy: oidc::assume_role_policy(
                            &provider_arn,
                            &domain,
                            &target.namespace,
                            &target.service_account,
                        ),
                        permissions_boundary: Some(boundary_arn),
                        tags,
                    })
                }
            },
        )?;

    let service_account = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "ServiceAccount",
        format!("{name}-binding-service-account"),
        &namespace,
        &[&namespace, &role],
        role.output_str("arn"),
        move |role_arn| service_account(&labels, &target.namespace, &target.service_account, &role_arn),
    )?;

    Ok(Binding {
        namespace,
        boundary,
        role,
        service_account,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_names_role() {
        let sa = service_account(&labels("kind-aws"), "irsa-test", "irsa-test", "arn:aws:iam::1:role/x");

        let annotations = &sa["metadata"]["annotations"];
        assert_eq!(annotations["eks.amazonaws.com/role-arn"], "arn:aws:iam::1:role/x");
        assert_eq!(annotations["eks.amazonaws.com/audience"], "sts.amazonaws.com");
        assert_eq!(sa["metadata"]["namespace"], "irsa-test");
    }

    #[test]
    fn test_boundary_allows_reads_only() {
        let actions = boundary_document()["Statement"][0]["Action"].clone();
        assert_eq!(actions, json!(["s3:ListBucket", "s3:Get*"]));
    }
}

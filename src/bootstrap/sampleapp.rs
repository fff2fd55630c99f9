//! Demonstration workload: a pod reading a private bucket with nothing but
//! the web identity token injected by the webhook.

use serde_json::json;

use crate::bootstrap::binding::labels;
use crate::bootstrap::{Binding, Bootstrap, Webhook, apply};
use crate::collaborators::{Acl, CallerIdentity, ObjectSpec, PolicySpec};
use crate::core::ResourceKind;
use crate::engine::{AsyncValue, ResourceHandle, Step, combine};
use crate::error::ProvisionError;
use crate::Plan;

const APP: &str = "sampleapp";
const MESSAGE: &str = "Hey,\n\nthis means your kind cluster is successfully able to talk to AWS\nwithout any long lived credentials, using aws pod identity webhook.\n\nHappy hacking\n";

#[derive(Clone, Debug)]
pub struct SampleApp {
    pub bucket: ResourceHandle,
    pub object: ResourceHandle,
    pub policy: ResourceHandle,
    pub attachment: ResourceHandle,
    pub pod: ResourceHandle,
}

fn read_policy(bucket: &str) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:ListBucket"],
                "Resource": [format!("arn:aws:s3:::{bucket}")],
            },
            {
                "Effect": "Allow",
                "Action": ["s3:Get*"],
                "Resource": [format!("arn:aws:s3:::{bucket}/*")],
            },
        ]
    })
}

fn pod(
    labels: &serde_json::Value,
    namespace: &str,
    service_account: &str,
    bucket: &str,
) -> serde_json::Value {
    let limits = json!({ "cpu": "100m", "memory": "100Mi" });

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": APP, "namespace": namespace, "labels": labels },
        "spec": {
            "restartPolicy": "Never",
            "serviceAccountName": service_account,
            "containers": [{
                "name": "irsa-test",
                "image": "amazon/aws-cli",
                "imagePullPolicy": "Always",
                "command": ["/bin/bash"],
                "args": [
                    "-c",
                    format!("aws s3 ls s3://{bucket} && aws s3 cp s3://{bucket}/{APP} . && echo -e $(cat {APP})"),
                ],
                "resources": { "limits": limits, "requests": limits },
            }],
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
    binding: &Binding,
    webhook: &Webhook,
    kubeconfig: AsyncValue<String>,
) -> Result<SampleApp, ProvisionError> {
    let config = bootstrap.config();
    let collaborators = bootstrap.collaborators();
    let name = &config.name;
    let tags = bootstrap.tags(caller, APP);

    let bucket = plan
        .resource(ResourceKind::Bucket, format!("{name}-{APP}-bucket"))
        .parent(component)
        .depends_on(caller)
        .create(tags.clone(), {
            let storage = collaborators.storage.clone();
            let bucket_name = config.resource_name(APP);
            move |_, tags| storage.create_bucket(&bucket_name, &tags)
        })?;

    let bucket_name = bucket.output_str("bucket");

    let object = plan
        .resource(ResourceKind::BucketObject, format!("{name}-{APP}-object"))
        .parent(&bucket)
        .depends_on(&bucket)
        .create(combine((bucket_name.clone(), tags.clone())), {
            let storage = collaborators.storage.clone();
            move |_, (bucket, tags)| {
                storage.publish_object(&ObjectSpec {
                    bucket,
                    key: APP.to_string(),
                    content: MESSAGE.to_string(),
                    content_type: "text/plain".to_string(),
                    acl: Acl::PublicRead,
                    tags,
                })
            }
        })?;

    let policy = plan
        .resource(ResourceKind::Policy, format!("{name}-{APP}-policy"))
        .parent(component)
        .depends_on(&bucket)
        .create(combine((bucket_name.clone(), tags)), {
            let identity = collaborators.identity.clone();
            let policy_name = config.resource_name(APP);
            move |_, (bucket, tags)| {
                identity.create_policy(&PolicySpec {
                    name: policy_name.clone(),
                    description: format!("Allow access to read contents of bucket {bucket}"),
                    path: "/".to_string(),
                    document: read_policy(&bucket),
                    tags,
                })
            }
        })?;

    let attachment = plan
        .resource(ResourceKind::PolicyAttachment, format!("{name}-{APP}-attachment"))
        .parent(&binding.role)
        .depends_on(&binding.role)
        .depends_on(&policy)
        .create(
            combine((binding.role.output_str("name"), policy.output_str("arn"))),
            {
                let identity = collaborators.identity.clone();
                move |_, (role, policy_arn)| identity.attach_policy(&role, &policy_arn)
            },
        )?;

    let target = config.binding.clone();
    let labels = labels(name);
    let pod = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "Pod",
        format!("{name}-{APP}-pod"),
        &binding.namespace,
        &[&binding.service_account, &attachment, &object],
        bucket_name,
        move |bucket| pod(&labels, &target.namespace, &target.service_account, &bucket),
    )?;

    // pods created before the webhook runs never receive a token
    plan.add_dependency(&pod, &webhook.deployment)?;
    plan.add_dependency(&pod, &webhook.configuration)?;

    Ok(SampleApp {
        bucket,
        object,
        policy,
        attachment,
        pod,
    })
}

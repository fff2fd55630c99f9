//! The pod identity webhook, which injects web identity tokens into pods
//! whose service account names a role.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::bootstrap::{apply, common_labels};
use crate::collaborators::{CertificateRequest, Collaborators};
use crate::core::{Created, ResourceKind};
use crate::engine::{AsyncValue, ResourceHandle};
use crate::error::ProvisionError;
use crate::oidc::STS_AUDIENCE;
use crate::Plan;

const VERSION: &str = "ed8c41f";
const NAMESPACE: &str = "irsa-system";
const WEBHOOK: &str = "pod-identity-webhook";
const PORT: u16 = 443;
const TARGET_PORT: u16 = 6443;
const VALIDITY_HOURS: u32 = 72;

/// Objects of the installed webhook.
#[derive(Clone, Debug)]
pub struct Webhook {
    pub namespace: ResourceHandle,
    pub service_account: ResourceHandle,
    pub certificate: ResourceHandle,
    pub service: ResourceHandle,
    pub deployment: ResourceHandle,
    pub configuration: ResourceHandle,
}

fn dns_names() -> Vec<String> {
    vec![
        WEBHOOK.to_string(),
        format!("{WEBHOOK}.{NAMESPACE}"),
        format!("{WEBHOOK}.{NAMESPACE}.svc"),
        format!("{WEBHOOK}.{NAMESPACE}.svc.cluster.local"),
    ]
}

fn metadata(labels: &serde_json::Value, namespaced: bool) -> serde_json::Value {
    let mut metadata = json!({ "name": WEBHOOK, "labels": labels });
    if namespaced {
        metadata["namespace"] = json!(NAMESPACE);
    }
    metadata
}

fn deployment(labels: &serde_json::Value) -> serde_json::Value {
    let limits = json!({ "cpu": "100m", "memory": "100Mi" });

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(labels, true),
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "serviceAccountName": WEBHOOK,
                    "securityContext": { "fsGroup": 10000 },
                    "containers": [{
                        "name": WEBHOOK,
                        "image": format!("amazon/amazon-eks-pod-identity-webhook:{VERSION}"),
                        "imagePullPolicy": "Always",
                        "command": ["/webhook"],
                        "args": [
                            "--in-cluster",
                            format!("--port={TARGET_PORT}"),
                            format!("--namespace={NAMESPACE}"),
                            format!("--service-name={WEBHOOK}"),
                            format!("--tls-secret={WEBHOOK}"),
                            "--annotation-prefix=eks.amazonaws.com",
                            format!("--token-audience={STS_AUDIENCE}"),
                            "--logtostderr",
                        ],
                        "ports": [{ "containerPort": TARGET_PORT, "name": "webhook-https" }],
                        "resources": { "limits": limits, "requests": limits },
                        "securityContext": {
                            "allowPrivilegeEscalation": false,
                            "capabilities": { "drop": ["ALL"] },
                            "privileged": false,
                            "readOnlyRootFilesystem": true,
                            "runAsGroup": 10000,
                            "runAsUser": 10000,
                            "runAsNonRoot": true,
                        },
                    }],
                },
            },
        },
    })
}

fn mutating_configuration(labels: &serde_json::Value, certificate_pem: &str) -> serde_json::Value {
    json!({
        "apiVersion": "admissionregistration.k8s.io/v1",
        "kind": "MutatingWebhookConfiguration",
        "metadata": metadata(labels, false),
        "webhooks": [{
            "name": "pod-identity-webhook.amazonaws.com",
            "admissionReviewVersions": ["v1beta1"],
            "sideEffects": "None",
            "clientConfig": {
                "caBundle": STANDARD.encode(certificate_pem),
                "service": {
                    "name": WEBHOOK,
                    "namespace": NAMESPACE,
                    "path": "/mutate",
                    "port": PORT,
                },
            },
            "rules": [{
                "apiGroups": [""],
                "apiVersions": ["v1"],
                "operations": ["CREATE"],
                "resources": ["pods"],
            }],
        }],
    })
}

/// Declares the webhook installation into `cluster`.
pub(crate) fn declare(
    plan: &mut Plan,
    collaborators: &Collaborators,
    name: &str,
    component: &ResourceHandle,
    cluster: &ResourceHandle,
    kubeconfig: AsyncValue<String>,
) -> Result<Webhook, ProvisionError> {
    let labels = common_labels("irsa", &format!("irsa-{name}"), VERSION, "iam", "aws-pod-identity");
    let request = |object: &str| format!("{name}-webhook-{object}");

    let namespace = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "Namespace",
        request("namespace"),
        component,
        &[],
        (),
        {
            let labels = labels.clone();
            move |()| {
                json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": { "name": NAMESPACE, "labels": labels },
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
        request("service-account"),
        &namespace,
        &[&namespace],
        (),
        {
            let labels = labels.clone();
            move |()| {
                json!({
                    "apiVersion": "v1",
                    "kind": "ServiceAccount",
                    "metadata": metadata(&labels, true),
                })
            }
        },
    )?;

    let role = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "Role",
        request("role"),
        &namespace,
        &[&namespace],
        (),
        {
            let labels = labels.clone();
            move |()| {
                json!({
                    "apiVersion": "rbac.authorization.k8s.io/v1",
                    "kind": "Role",
                    "metadata": metadata(&labels, true),
                    "rules": [{
                        "apiGroups": [""],
                        "resources": ["secrets"],
                        "verbs": ["get"],
                        "resourceNames": [WEBHOOK],
                    }],
                })
            }
        },
    )?;

    apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "RoleBinding",
        request("role-binding"),
        &namespace,
        &[&role, &service_account],
        (),
        {
            let labels = labels.clone();
            move |()| {
                json!({
                    "apiVersion": "rbac.authorization.k8s.io/v1",
                    "kind": "RoleBinding",
                    "metadata": metadata(&labels, true),
                    "roleRef": { "apiGroup": "rbac.authorization.k8s.io", "kind": "Role", "name": WEBHOOK },
                    "subjects": [{ "kind": "ServiceAccount", "name": WEBHOOK, "namespace": NAMESPACE }],
                })
            }
        },
    )?;

    let cluster_role = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "ClusterRole",
        request("cluster-role"),
        component,
        &[],
        (),
        {
            let labels = labels.clone();
            move |()| {
                json!({
                    "apiVersion": "rbac.authorization.k8s.io/v1",
                    "kind": "ClusterRole",
                    "metadata": metadata(&labels, false),
                    "rules": [{
                        "apiGroups": [""],
                        "resources": ["serviceaccounts"],
                        "verbs": ["get", "watch", "list"],
                    }],
                })
            }
        },
    )?;

    apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "ClusterRoleBinding",
        request("cluster-role-binding"),
        component,
        &[&cluster_role, &service_account],
        (),
        {
            let labels = labels.clone();
            move |()| {
                json!({
                    "apiVersion": "rbac.authorization.k8s.io/v1",
                    "kind": "ClusterRoleBinding",
                    "metadata": metadata(&labels, false),
                    "roleRef": { "apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": WEBHOOK },
                    "subjects": [{ "kind": "ServiceAccount", "name": WEBHOOK, "namespace": NAMESPACE }],
                })
            }
        },
    )?;

    let certificate = plan
        .resource(ResourceKind::Certificate, request("certificate"))
        .parent(component)
        .create((), {
            let authority = collaborators.authority.clone();
            move |_, ()| {
                let certificate = authority.self_signed(&CertificateRequest {
                    common_name: WEBHOOK.to_string(),
                    dns_names: dns_names(),
                    allowed_uses: vec![
                        "key_encipherment".to_string(),
                        "digital_signature".to_string(),
                        "server_auth".to_string(),
                    ],
                    validity_hours: VALIDITY_HOURS,
                })?;

                Ok(Created::new(WEBHOOK)
                    .with_output("certPem", certificate.certificate_pem)
                    .with_output("privateKeyPem", certificate.private_key_pem))
            }
        })?;

    let certificate_pem = certificate.output_str("certPem");

    let secret = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "Secret",
        request("secret"),
        &namespace,
        &[&namespace, &certificate],
        (certificate_pem.clone(), certificate.output_str("privateKeyPem")),
        {
            let labels = labels.clone();
            move |(certificate_pem, private_key_pem)| {
                json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": metadata(&labels, true),
                    "stringData": { "tls.key": private_key_pem, "tls.crt": certificate_pem },
                })
            }
        },
    )?;

    let service = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "Service",
        request("service"),
        &namespace,
        &[&namespace],
        (),
        {
            let labels = labels.clone();
            move |()| {
                json!({
                    "apiVersion": "v1",
                    "kind": "Service",
                    "metadata": metadata(&labels, true),
                    "spec": {
                        "type": "ClusterIP",
                        "selector": labels,
                        "ports": [{ "name": "webhook-https", "port": PORT, "targetPort": TARGET_PORT }],
                    },
                })
            }
        },
    )?;

    let deployment = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "Deployment",
        request("deployment"),
        &namespace,
        &[&service_account, &secret],
        (),
        {
            let labels = labels.clone();
            move |()| deployment(&labels)
        },
    )?;

    let configuration = apply(
        plan,
        collaborators,
        cluster,
        &kubeconfig,
        "MutatingWebhookConfiguration",
        request("configuration"),
        component,
        &[&service, &certificate],
        certificate_pem,
        move |certificate_pem| mutating_configuration(&labels, &certificate_pem),
    )?;

    Ok(Webhook {
        namespace,
        service_account,
        certificate,
        service,
        deployment,
        configuration,
    })
}

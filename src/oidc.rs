//! Where the cluster's identity issuer lives and how it is trusted.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::collaborators::CertificateInfo;
use crate::error::TrustError;

/// Path of the JSON Web Key Set served by the API server.
pub const JWKS_DISCOVERY_PATH: &str = "/openid/v1/jwks";
/// Path of the OpenID discovery document served by the API server.
pub const OPENID_DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
/// Object key of the published key set.
pub const KEYS_JSON: &str = "keys.json";
/// Object key of the published discovery document.
pub const DISCOVERY_KEY: &str = ".well-known/openid-configuration";

/// Audience of the tokens exchanged with the cloud security token service.
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";
const API_AUDIENCES: &str = "https://kubernetes.default.svc.cluster.local,sts.amazonaws.com";

pub fn issuer_url(domain: &str) -> String {
    format!("https://{domain}")
}

pub fn jwks_url(domain: &str) -> String {
    format!("https://{domain}/{KEYS_JSON}")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterConfiguration {
    kind: &'static str,
    api_server: ApiServer,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiServer {
    extra_args: BTreeMap<&'static str, String>,
}

/// Kubeadm `ClusterConfiguration` patch making the API server issue service
/// account tokens for the issuer hosted at `domain`.
pub fn kubeadm_patch(domain: &str) -> Result<String, TrustError> {
    let config = ClusterConfiguration {
        kind: "ClusterConfiguration",
        api_server: ApiServer {
            extra_args: BTreeMap::from([
                ("api-audiences", API_AUDIENCES.to_string()),
                ("service-account-issuer", issuer_url(domain)),
                ("service-account-jwks-uri", jwks_url(domain)),
            ]),
        },
    };

    Ok(serde_json::to_string(&config)?)
}

/// The thumbprint registered with the identity provider: SHA-1 fingerprint
/// of the first CA certificate of the chain, as lowercase hex.
pub fn ca_thumbprint(url: &str, chain: &[CertificateInfo]) -> Result<String, TrustError> {
    chain
        .iter()
        .find(|cert| cert.is_ca)
        .map(|cert| cert.sha1_fingerprint.replace(':', "").to_lowercase())
        .ok_or_else(|| TrustError::NoCaCertificate(url.to_string()))
}

/// Trust policy letting the given service account assume a role through the
/// identity provider `provider_arn`.
pub fn assume_role_policy(
    provider_arn: &str,
    domain: &str,
    namespace: &str,
    service_account: &str,
) -> serde_json::Value {
    let subject = format!("{domain}:sub");
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "allowK8sServiceAccount",
            "Effect": "Allow",
            "Action": ["sts:AssumeRoleWithWebIdentity"],
            "Principal": { "Federated": [provider_arn] },
            "Condition": {
                "StringEquals": {
                    (subject): [format!("system:serviceaccount:{namespace}:{service_account}")]
                }
            }
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_is_stable() {
        let expected = r#"{"kind":"ClusterConfiguration","apiServer":{"extraArgs":{"api-audiences":"https://kubernetes.default.svc.cluster.local,sts.amazonaws.com","service-account-issuer":"https://somedomain","service-account-jwks-uri":"https://somedomain/keys.json"}}}"#;
        assert_eq!(kubeadm_patch("somedomain").unwrap(), expected);
    }

    #[test]
    fn test_patch_embeds_issuer() {
        let patch = kubeadm_patch("example.s3.amazonaws.com").unwrap();
        assert!(patch.contains(r#""service-account-issuer":"https://example.s3.amazonaws.com""#));
        assert!(
            patch.contains(r#""service-account-jwks-uri":"https://example.s3.amazonaws.com/keys.json""#)
        );
    }

    #[test]
    fn test_thumbprint_of_first_ca() {
        let chain = vec![
            CertificateInfo {
                is_ca: false,
                sha1_fingerprint: "leaf".into(),
            },
            CertificateInfo {
                is_ca: true,
                sha1_fingerprint: "9E:99:A4:8A".into(),
            },
            CertificateInfo {
                is_ca: true,
                sha1_fingerprint: "root".into(),
            },
        ];

        assert_eq!(ca_thumbprint("https://x", &chain).unwrap(), "9e99a48a");
    }

    #[test]
    fn test_thumbprint_needs_ca() {
        let chain = vec![CertificateInfo {
            is_ca: false,
            sha1_fingerprint: "leaf".into(),
        }];

        let err = ca_thumbprint("https://x", &chain).unwrap_err();
        assert!(matches!(err, TrustError::NoCaCertificate(url) if url == "https://x"));
    }

    #[test]
    fn test_trust_policy_condition() {
        let policy = assume_role_policy("arn:aws:iam::1:oidc-provider/x", "x", "irsa-test", "irsa-test");
        assert_eq!(
            policy["Statement"][0]["Condition"]["StringEquals"]["x:sub"][0],
            "system:serviceaccount:irsa-test:irsa-test"
        );
    }
}

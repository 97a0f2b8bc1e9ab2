//! CA generation and per-namespace leaf issuance with rcgen.

use super::CertError;
use crate::constants::{RUNNER_LABEL, RUNNER_SUBDOMAIN, RUNNER_TLS_SECRET_BASE_NAME};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::collections::BTreeMap;
use std::time::Duration;

pub const CA_CERT_KEY: &str = "ca.crt";
pub const CA_KEY_KEY: &str = "ca.key";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

const ORGANIZATION: &str = "tf-controller";

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

fn dns_name(name: &str) -> Result<SanType, CertError> {
    Ia5String::try_from(name.to_string())
        .map(SanType::DnsName)
        .map_err(|e| CertError::Generation(format!("invalid DNS name '{}': {}", name, e)))
}

/// Self-signed root used to sign every runner and controller certificate
#[derive(Clone)]
pub struct RunnerCa {
    cert_pem: String,
    /// KeyPair isn't Clone, so the key is kept as PEM and parsed on use
    key_pem: String,
    valid_until: i64,
}

impl std::fmt::Debug for RunnerCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerCa")
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

impl RunnerCa {
    /// Generates a CA valid from one hour ago until `validity` from now
    pub fn generate(validity: Duration) -> Result<Self, CertError> {
        let now = ::time::OffsetDateTime::now_utc();
        let not_after = now + validity;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name("tf-controller runner CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = now - ::time::Duration::hours(1);
        params.not_after = not_after;

        let key_pair = KeyPair::generate()
            .map_err(|e| CertError::KeyGeneration(format!("CA key: {}", e)))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertError::Generation(format!("CA cert: {}", e)))?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            valid_until: not_after.unix_timestamp(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Expiry as a Unix timestamp
    pub fn valid_until(&self) -> i64 {
        self.valid_until
    }

    /// Valid when it does not expire within the lookahead window
    pub fn is_valid_at(&self, now_unix: i64, lookahead: Duration) -> bool {
        let lookahead = i64::try_from(lookahead.as_secs()).unwrap_or(i64::MAX);
        self.valid_until > now_unix.saturating_add(lookahead)
    }

    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        self.valid_until <= now_unix
    }

    /// Issues the TLS bundle shared by every runner in `namespace`
    pub fn issue_namespace_tls(
        &self,
        namespace: &str,
        cluster_domain: &str,
        include_localhost: bool,
    ) -> Result<NamespaceTls, CertError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&format!("tf-runner.{}", namespace));
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.not_before = ::time::OffsetDateTime::now_utc() - ::time::Duration::hours(1);
        params.not_after = ::time::OffsetDateTime::from_unix_timestamp(self.valid_until)
            .map_err(|e| CertError::Generation(format!("CA expiry: {}", e)))?;

        let mut sans = vec![
            dns_name(&format!("*.{}.pod.{}", namespace, cluster_domain))?,
            dns_name(&format!("*.{}.{}.svc.{}", RUNNER_SUBDOMAIN, namespace, cluster_domain))?,
        ];
        if include_localhost {
            sans.push(dns_name("localhost")?);
        }
        params.subject_alt_names = sans;

        let leaf_key = KeyPair::generate()
            .map_err(|e| CertError::KeyGeneration(format!("runner key: {}", e)))?;
        let ca_key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| CertError::Generation(format!("failed to load CA key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| CertError::Generation(format!("failed to create issuer: {}", e)))?;
        let leaf = params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| CertError::Generation(format!("runner cert: {}", e)))?;

        Ok(NamespaceTls {
            namespace: namespace.to_string(),
            secret_name: NamespaceTls::secret_name_for(self.valid_until),
            ca_cert_pem: self.cert_pem.clone(),
            ca_key_pem: self.key_pem.clone(),
            cert_pem: leaf.pem(),
            key_pem: leaf_key.serialize_pem(),
            valid_until: self.valid_until,
        })
    }
}

/// Runner TLS material for one namespace, persisted as a labelled secret
#[derive(Clone, PartialEq, Eq)]
pub struct NamespaceTls {
    pub namespace: String,
    pub secret_name: String,
    pub ca_cert_pem: String,
    pub ca_key_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub valid_until: i64,
}

impl std::fmt::Debug for NamespaceTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceTls")
            .field("namespace", &self.namespace)
            .field("secret_name", &self.secret_name)
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

impl NamespaceTls {
    pub fn secret_name_for(valid_until: i64) -> String {
        format!("{}-{}", RUNNER_TLS_SECRET_BASE_NAME, valid_until)
    }

    /// Expiry encoded in a runner TLS secret name
    pub fn valid_until_from_secret_name(name: &str) -> Option<i64> {
        name.strip_prefix(RUNNER_TLS_SECRET_BASE_NAME)?
            .strip_prefix('-')?
            .parse()
            .ok()
    }

    pub fn to_secret(&self) -> Secret {
        let data = BTreeMap::from([
            (CA_CERT_KEY.to_string(), ByteString(self.ca_cert_pem.clone().into_bytes())),
            (CA_KEY_KEY.to_string(), ByteString(self.ca_key_pem.clone().into_bytes())),
            (TLS_CERT_KEY.to_string(), ByteString(self.cert_pem.clone().into_bytes())),
            (TLS_KEY_KEY.to_string(), ByteString(self.key_pem.clone().into_bytes())),
        ]);
        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    RUNNER_LABEL.to_string(),
                    "true".to_string(),
                )])),
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..Secret::default()
        }
    }

    pub fn from_secret(secret: &Secret) -> Result<Self, CertError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let invalid = |reason: String| CertError::InvalidSecret {
            name: name.clone(),
            reason,
        };
        let data = secret
            .data
            .as_ref()
            .ok_or_else(|| invalid("secret has no data".to_string()))?;
        let field = |key: &str| -> Result<String, CertError> {
            let bytes = data
                .get(key)
                .ok_or_else(|| invalid(format!("missing key {}", key)))?;
            String::from_utf8(bytes.0.clone()).map_err(|e| invalid(format!("{}: {}", key, e)))
        };
        let valid_until = Self::valid_until_from_secret_name(&name)
            .ok_or_else(|| invalid("name does not encode an expiry".to_string()))?;

        Ok(Self {
            namespace: secret.metadata.namespace.clone().unwrap_or_default(),
            secret_name: name.clone(),
            ca_cert_pem: field(CA_CERT_KEY)?,
            ca_key_pem: field(CA_KEY_KEY)?,
            cert_pem: field(TLS_CERT_KEY)?,
            key_pem: field(TLS_KEY_KEY)?,
            valid_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_validity_window() {
        let ca = RunnerCa::generate(Duration::from_secs(3600)).unwrap();
        let now = chrono::Utc::now().timestamp();
        assert!(ca.valid_until() > now + 3500);
        assert!(ca.is_valid_at(now, Duration::from_secs(60)));
        assert!(!ca.is_valid_at(now, Duration::from_secs(7200)));
        assert!(!ca.is_expired_at(now));
        assert!(ca.is_expired_at(now + 3601));
        assert!(ca.cert_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_namespace_tls_secret_layout() {
        let ca = RunnerCa::generate(Duration::from_secs(3600)).unwrap();
        let tls = ca
            .issue_namespace_tls("flux-system", "cluster.local", false)
            .unwrap();

        assert_eq!(
            tls.secret_name,
            format!("terraform-runner.tls-{}", ca.valid_until())
        );
        let secret = tls.to_secret();
        let data = secret.data.as_ref().unwrap();
        for key in [CA_CERT_KEY, CA_KEY_KEY, TLS_CERT_KEY, TLS_KEY_KEY] {
            assert!(data.contains_key(key), "missing {}", key);
        }
        assert_eq!(
            secret.metadata.labels.as_ref().unwrap().get(RUNNER_LABEL),
            Some(&"true".to_string())
        );

        let parsed = NamespaceTls::from_secret(&secret).unwrap();
        assert_eq!(parsed, tls);
    }

    #[test]
    fn test_secret_name_expiry_parsing() {
        assert_eq!(
            NamespaceTls::valid_until_from_secret_name("terraform-runner.tls-1700000000"),
            Some(1_700_000_000)
        );
        assert_eq!(
            NamespaceTls::valid_until_from_secret_name("terraform-runner.tls"),
            None
        );
        assert_eq!(NamespaceTls::valid_until_from_secret_name("other-123"), None);
    }

    #[test]
    fn test_from_secret_rejects_missing_keys() {
        let mut secret = Secret::default();
        secret.metadata.name = Some("terraform-runner.tls-1".to_string());
        secret.data = Some(BTreeMap::new());
        assert!(matches!(
            NamespaceTls::from_secret(&secret),
            Err(CertError::InvalidSecret { .. })
        ));
    }
}

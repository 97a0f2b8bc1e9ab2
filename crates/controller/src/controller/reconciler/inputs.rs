//! Files generated into the runner's working directory before `terraform init`:
//! the state backend block and the input variables.

use crate::cluster::{ClusterClient, ClusterError};
use crate::crd::{Terraform, VarsReference, VarsSourceKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

const LABEL_INDENT: usize = 6;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid rename pattern {0:?}")]
    RenamePattern(String),

    #[error("{kind} {namespace}/{name} not found")]
    MissingSource {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("failed to encode variables: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// HCL for the Terraform state backend, `None` when the backend is disabled.
///
/// A custom configuration is wrapped in a `terraform` block as is. Otherwise
/// state lives in a Kubernetes secret in the object's namespace, suffixed with
/// the object name unless `secretSuffix` says otherwise.
pub fn backend_config(terraform: &Terraform) -> Option<String> {
    let spec = terraform.spec.backend_config.as_ref();
    if spec.is_some_and(|b| b.disable) {
        return None;
    }

    let mut labels: BTreeMap<String, String> =
        terraform.metadata.labels.clone().unwrap_or_default();
    let namespace = terraform.namespace_or_default();

    let body = match spec {
        Some(b) if !b.custom_configuration.is_empty() => b.custom_configuration.clone(),
        Some(b) => {
            labels.extend(b.labels.clone());
            format!(
                "backend \"kubernetes\" {{\n    secret_suffix     = {}\n    in_cluster_config = {}\n    config_path       = {}\n    namespace         = {}\n    labels            = {{\n      {}\n    }}\n  }}",
                hcl_string(&b.secret_suffix),
                b.in_cluster_config,
                hcl_string(&b.config_path),
                hcl_string(namespace),
                labels_hcl(&labels),
            )
        }
        None => format!(
            "backend \"kubernetes\" {{\n    secret_suffix     = {}\n    in_cluster_config = true\n    namespace         = {}\n    labels            = {{\n      {}\n    }}\n  }}",
            hcl_string(terraform.name()),
            hcl_string(namespace),
            labels_hcl(&labels),
        ),
    };
    Some(format!("\nterraform {{\n  {body}\n}}\n"))
}

fn hcl_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn labels_hcl(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}{} = {}", " ".repeat(LABEL_INDENT), hcl_string(k), hcl_string(v)))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Splits `old:new` into its parts; a bare key maps to itself
pub fn parse_rename_pattern(pattern: &str) -> Result<(&str, &str), InputError> {
    let Some((old, new)) = pattern.split_once(':') else {
        return Ok((pattern, pattern));
    };
    if old.is_empty() || new.is_empty() || new.contains(':') {
        return Err(InputError::RenamePattern(pattern.to_string()));
    }
    Ok((old, new))
}

/// Resolves `vars` and `varsFrom` into the JSON object written as
/// `generated.auto.tfvars.json`.
///
/// Values read from Secrets and ConfigMaps are passed as strings. Sources are
/// applied in order over `vars`, so later keys win.
pub async fn resolve_vars(
    cluster: &dyn ClusterClient,
    terraform: &Terraform,
) -> Result<Map<String, Value>, InputError> {
    let mut vars = Map::new();
    for var in &terraform.spec.vars {
        vars.insert(var.name.clone(), var.value.clone().unwrap_or(Value::Null));
    }

    let namespace = terraform.namespace_or_default();
    for reference in &terraform.spec.vars_from {
        let Some(data) = read_source(cluster, namespace, reference).await? else {
            debug!(source = %reference.name, "Optional variables source not found, skipping");
            continue;
        };
        merge_source(&mut vars, &data, reference.vars_keys.as_deref())?;
    }
    Ok(vars)
}

fn merge_source(
    vars: &mut Map<String, Value>,
    data: &BTreeMap<String, Vec<u8>>,
    keys: Option<&[String]>,
) -> Result<(), InputError> {
    let Some(keys) = keys else {
        for (key, value) in data {
            vars.insert(key.clone(), string_value(value));
        }
        return Ok(());
    };
    for pattern in keys {
        let (old, new) = parse_rename_pattern(pattern)?;
        if let Some(value) = data.get(old) {
            vars.insert(new.to_string(), string_value(value));
        }
    }
    Ok(())
}

fn string_value(bytes: &[u8]) -> Value {
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Key/value data of the referenced object, `None` for a missing optional source
async fn read_source(
    cluster: &dyn ClusterClient,
    namespace: &str,
    reference: &VarsReference,
) -> Result<Option<BTreeMap<String, Vec<u8>>>, InputError> {
    let (kind, data) = match reference.kind {
        VarsSourceKind::Secret => {
            let secret = cluster.get_secret(namespace, &reference.name).await?;
            let data = secret.map(|s| {
                s.data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, v.0))
                    .collect()
            });
            ("Secret", data)
        }
        VarsSourceKind::ConfigMap => {
            let config_map = cluster.get_config_map(namespace, &reference.name).await?;
            let data = config_map.map(|cm| {
                let mut data: BTreeMap<String, Vec<u8>> = cm
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, v.into_bytes()))
                    .collect();
                data.extend(
                    cm.binary_data
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(k, v)| (k, v.0)),
                );
                data
            });
            ("ConfigMap", data)
        }
    };
    match data {
        Some(data) => Ok(Some(data)),
        None if reference.optional => Ok(None),
        None => Err(InputError::MissingSource {
            kind,
            namespace: namespace.to_string(),
            name: reference.name.clone(),
        }),
    }
}

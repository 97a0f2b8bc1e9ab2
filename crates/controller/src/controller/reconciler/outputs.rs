//! Terraform outputs: record their names and optionally mirror them into a secret.

use super::types::{rpc_error, Pass, ReconcilerError};
use super::workspace::Workspace;
use crate::crd::{Outcome, Reason, WriteOutputsToSecretSpec};
use crate::runner::RunnerApi;
use runner_proto::{OutputMeta, OutputRequest, WriteOutputsRequest};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output {name} has an invalid type: {source}")]
    Type {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("output {name} has an invalid value: {source}")]
    Value {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Secret data for the selected outputs.
///
/// An empty selection exports every output. Entries take the form `name` or
/// `name:alias`; unknown names are logged and skipped. Strings are stored
/// raw, numbers and booleans as their JSON text, everything else as JSON.
pub fn output_secret_data(
    spec: &WriteOutputsToSecretSpec,
    outputs: &HashMap<String, OutputMeta>,
) -> Result<BTreeMap<String, Vec<u8>>, OutputError> {
    let selection: Vec<(&str, &str)> = if spec.outputs.is_empty() {
        outputs.keys().map(|name| (name.as_str(), name.as_str())).collect()
    } else {
        spec.outputs
            .iter()
            .map(|mapping| {
                mapping
                    .split_once(':')
                    .unwrap_or((mapping.as_str(), mapping.as_str()))
            })
            .collect()
    };

    let mut data = BTreeMap::new();
    for (name, key) in selection {
        let Some(meta) = outputs.get(name) else {
            error!(output = name, "output not found");
            continue;
        };
        data.insert(key.to_string(), encode_output(name, meta)?);
    }
    Ok(data)
}

fn encode_output(name: &str, meta: &OutputMeta) -> Result<Vec<u8>, OutputError> {
    let r#type: Value = serde_json::from_slice(&meta.r#type).map_err(|source| OutputError::Type {
        name: name.to_string(),
        source,
    })?;
    let value_err = |source| OutputError::Value {
        name: name.to_string(),
        source,
    };
    match r#type.as_str() {
        Some("string") => {
            let value: String = serde_json::from_slice(&meta.value).map_err(value_err)?;
            Ok(value.into_bytes())
        }
        Some("number") | Some("bool") => Ok(meta.value.clone()),
        _ => {
            let value: Value = serde_json::from_slice(&meta.value).map_err(value_err)?;
            serde_json::to_vec(&value).map_err(value_err)
        }
    }
}

/// Reads outputs from the runner and writes the configured secret.
///
/// Returns the written secret data as text, which health checks render
/// their addresses from.
pub async fn process(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    workspace: &Workspace,
) -> Result<BTreeMap<String, String>, ReconcilerError> {
    let reply = match runner
        .output(OutputRequest {
            tf_instance: workspace.instance.clone(),
        })
        .await
    {
        Ok(reply) => reply,
        Err(status) => {
            return Err(pass.fail(
                Reason::TfExecOutputFailed,
                rpc_error("error running Output", &status),
            ))
        }
    };

    if !reply.outputs.is_empty() {
        pass.record(Outcome::OutputsAvailable {
            names: reply.outputs.keys().cloned().collect(),
            msg: "Outputs available".to_string(),
        });
    }

    let Some(spec) = pass.terraform.spec.write_outputs_to_secret.clone() else {
        return Ok(BTreeMap::new());
    };
    if reply.outputs.is_empty() {
        return Ok(BTreeMap::new());
    }

    let data = match output_secret_data(&spec, &reply.outputs) {
        Ok(data) => data,
        Err(e) => return Err(pass.fail(Reason::OutputsWritingFailed, e.to_string())),
    };

    let revision = pass.revision().to_string();
    if data.is_empty() || pass.terraform.spec.destroy {
        pass.record(Outcome::OutputsWritten {
            revision,
            msg: "No Outputs written".to_string(),
        });
        return Ok(BTreeMap::new());
    }

    let written: BTreeMap<String, String> = data
        .iter()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
        .collect();
    let keys: Vec<String> = data.keys().cloned().collect();
    let request = WriteOutputsRequest {
        namespace: pass.terraform.namespace_or_default().to_string(),
        name: pass.terraform.name().to_string(),
        secret_name: spec.name.clone(),
        uuid: pass.terraform.metadata.uid.clone().unwrap_or_default(),
        data: data.into_iter().collect(),
        labels: spec.labels.into_iter().collect(),
        annotations: spec.annotations.into_iter().collect(),
    };
    let reply = match runner.write_outputs(request).await {
        Ok(reply) => reply,
        Err(status) => {
            return Err(pass.fail(
                Reason::OutputsWritingFailed,
                status.message().to_string(),
            ))
        }
    };
    info!(changed = reply.changed, "write outputs: {}", reply.message);
    if reply.changed {
        info!(secret = %spec.name, "{} output(s) written: {}", keys.len(), keys.join(", "));
    }

    pass.record_and_persist(Outcome::OutputsWritten {
        revision,
        msg: "Outputs written".to_string(),
    })
    .await?;
    Ok(written)
}

/// Whether the configured outputs secret is missing from the cluster
pub async fn outputs_secret_missing(pass: &Pass<'_>) -> Result<bool, ReconcilerError> {
    let Some(spec) = &pass.terraform.spec.write_outputs_to_secret else {
        return Ok(false);
    };
    let secret = pass
        .ctx
        .cluster
        .get_secret(pass.terraform.namespace_or_default(), &spec.name)
        .await?;
    Ok(secret.is_none())
}

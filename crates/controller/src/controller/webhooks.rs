//! # Post-planning Webhooks
//!
//! After a plan is produced each enabled `post-planning` webhook receives the
//! resource and/or the JSON plan. The webhook's JSON reply is checked with a
//! test expression; a negative result fails the plan with a message rendered
//! from the error message template.
//!
//! Templates use `${{ }}` delimiters and support field paths such as
//! `${{ .result.passed }}`. Missing fields render as `<no value>`.

use crate::constants::{TF_PLAN_FILENAME, WEBHOOK_CERTS_DIR};
use crate::crd::{Terraform, Webhook, WebhookPayloadType, WEBHOOK_STAGE_POST_PLANNING};
use crate::runner::RunnerApi;
use runner_proto::ShowPlanFileRequest;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const WEBHOOK_TIMEOUT_SECS: u64 = 30;
const TEMPLATE_OPEN: &str = "${{";
const TEMPLATE_CLOSE: &str = "}}";
const NO_VALUE: &str = "<no value>";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("failed to prepare webhook payload: {0}")]
    Payload(String),

    #[error("failed to parse webhook URL: {0}")]
    Url(String),

    #[error("failed to load webhook TLS certificate: {0}")]
    Tls(String),

    #[error("failed to send webhook: {0}")]
    Send(#[source] reqwest::Error),

    #[error("webhook {url} returned {code}: {status}")]
    Status {
        url: String,
        code: u16,
        status: String,
    },

    #[error("failed to decode webhook reply: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("failed to execute webhook {template}: {reason}")]
    Template {
        template: &'static str,
        reason: String,
    },

    #[error("webhook test expression {expression:?} returned unexpected result: {result}")]
    UnexpectedResult { expression: String, result: String },

    /// The webhook rejected the plan; carries the rendered error message
    #[error("{0}")]
    Rejected(String),
}

/// Delivers post-planning webhooks
#[derive(Debug, Clone)]
pub struct WebhookInvoker {
    disable_tls_verify: bool,
    certs_dir: PathBuf,
}

impl WebhookInvoker {
    pub fn new(disable_tls_verify: bool) -> Self {
        Self {
            disable_tls_verify,
            certs_dir: PathBuf::from(WEBHOOK_CERTS_DIR),
        }
    }

    /// Directory holding `{hostname}/ca.crt`, `tls.crt` and `tls.key`
    pub fn with_certs_dir(mut self, certs_dir: impl Into<PathBuf>) -> Self {
        self.certs_dir = certs_dir.into();
        self
    }

    pub fn has_post_planning(terraform: &Terraform) -> bool {
        terraform
            .spec
            .webhooks
            .iter()
            .any(|w| w.stage == WEBHOOK_STAGE_POST_PLANNING)
    }

    /// Runs every enabled post-planning webhook in order, stopping at the first failure
    pub async fn run_post_planning(
        &self,
        terraform: &Terraform,
        runner: &dyn RunnerApi,
        tf_instance: &str,
    ) -> Result<(), WebhookError> {
        let hooks = terraform
            .spec
            .webhooks
            .iter()
            .filter(|w| w.stage == WEBHOOK_STAGE_POST_PLANNING && w.enabled);

        for webhook in hooks {
            info!(webhook = %webhook.url, "Processing post-planning webhook");
            let payload = self
                .payload(terraform, runner, tf_instance, webhook.payload_type)
                .await?;
            let reply = self.send(webhook, &payload).await?;
            evaluate_reply(webhook, &reply)?;
            info!(webhook = %webhook.url, "Webhook test expression passed");
        }
        Ok(())
    }

    async fn payload(
        &self,
        terraform: &Terraform,
        runner: &dyn RunnerApi,
        tf_instance: &str,
        payload_type: WebhookPayloadType,
    ) -> Result<Value, WebhookError> {
        let resource = serde_json::to_value(terraform)
            .map_err(|e| WebhookError::Payload(format!("failed to marshal Terraform resource: {e}")))?;
        let plan = if payload_type == WebhookPayloadType::SpecOnly {
            Value::Null
        } else {
            let reply = runner
                .show_plan_file(ShowPlanFileRequest {
                    tf_instance: tf_instance.to_string(),
                    filename: TF_PLAN_FILENAME.to_string(),
                })
                .await
                .map_err(|s| WebhookError::Payload(format!("failed to get plan file: {}", s.message())))?;
            serde_json::from_slice(&reply.json_output)
                .map_err(|e| WebhookError::Payload(format!("failed to parse plan file: {e}")))?
        };
        Ok(build_payload(resource, plan, payload_type))
    }

    fn client_for(&self, url: &reqwest::Url) -> Result<reqwest::Client, WebhookError> {
        let builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS));
        if self.disable_tls_verify {
            return builder
                .build()
                .map_err(|e| WebhookError::Tls(format!("failed to create HTTP client: {e}")));
        }

        let host = url.host_str().unwrap_or_default();
        let dir = self.certs_dir.join(host);
        let mut builder = builder;
        // The CA bundle is optional, the client key pair is not
        if let Ok(ca) = std::fs::read(dir.join("ca.crt")) {
            let ca = reqwest::Certificate::from_pem(&ca).map_err(|e| WebhookError::Tls(e.to_string()))?;
            builder = builder.add_root_certificate(ca);
        }
        let read = |file: &str| {
            let path = dir.join(file);
            std::fs::read(&path).map_err(|e| WebhookError::Tls(format!("{}: {e}", path.display())))
        };
        let mut identity = read("tls.crt")?;
        identity.extend_from_slice(b"\n");
        identity.extend_from_slice(&read("tls.key")?);
        let identity =
            reqwest::Identity::from_pem(&identity).map_err(|e| WebhookError::Tls(e.to_string()))?;
        builder
            .identity(identity)
            .build()
            .map_err(|e| WebhookError::Tls(format!("failed to create HTTP client: {e}")))
    }

    async fn send(&self, webhook: &Webhook, payload: &Value) -> Result<Value, WebhookError> {
        let url = reqwest::Url::parse(&webhook.url).map_err(|e| WebhookError::Url(e.to_string()))?;
        let client = self.client_for(&url)?;
        let response = client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(WebhookError::Send)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(WebhookError::Status {
                url: webhook.url.clone(),
                code: status.as_u16(),
                status: status.to_string(),
            });
        }
        debug!(code = status.as_u16(), "Webhook replied");
        response.json().await.map_err(WebhookError::Decode)
    }
}

/// Builds the body posted to a webhook. The resource's status is dropped;
/// `SpecAndPlan` nests the plan under `status.tfplan`.
pub fn build_payload(mut resource: Value, plan: Value, payload_type: WebhookPayloadType) -> Value {
    match payload_type {
        WebhookPayloadType::PlanOnly => plan,
        WebhookPayloadType::SpecOnly => {
            if let Some(object) = resource.as_object_mut() {
                object.remove("status");
            }
            resource
        }
        WebhookPayloadType::SpecAndPlan => {
            if let Some(object) = resource.as_object_mut() {
                object.insert("status".to_string(), serde_json::json!({ "tfplan": plan }));
            }
            resource
        }
    }
}

/// Applies the test expression to a webhook reply
pub fn evaluate_reply(webhook: &Webhook, reply: &Value) -> Result<(), WebhookError> {
    let result = render_template(&webhook.test_expression, reply).map_err(|reason| {
        WebhookError::Template {
            template: "test expression",
            reason,
        }
    })?;
    match result.trim() {
        "true" | "yes" => Ok(()),
        "false" | "no" => {
            let message = render_template(&webhook.error_message_template, reply).map_err(
                |reason| WebhookError::Template {
                    template: "error message template",
                    reason,
                },
            )?;
            Err(WebhookError::Rejected(message))
        }
        other => Err(WebhookError::UnexpectedResult {
            expression: webhook.test_expression.clone(),
            result: other.to_string(),
        }),
    }
}

/// Renders `${{ .field.path }}` actions against a JSON value
pub fn render_template(template: &str, data: &Value) -> Result<String, String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(TEMPLATE_OPEN) {
        rendered.push_str(&rest[..start]);
        let action = &rest[start + TEMPLATE_OPEN.len()..];
        let end = action
            .find(TEMPLATE_CLOSE)
            .ok_or_else(|| format!("unclosed action in {template:?}"))?;
        rendered.push_str(&render_field(action[..end].trim(), data)?);
        rest = &action[end + TEMPLATE_CLOSE.len()..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn render_field(expression: &str, data: &Value) -> Result<String, String> {
    if expression == "." {
        return Ok(display_value(data));
    }
    let path = expression
        .strip_prefix('.')
        .ok_or_else(|| format!("unsupported expression {expression:?}"))?;

    let mut current = Some(data);
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(format!("bad field path {expression:?}"));
        }
        current = current.and_then(|value| value.get(segment));
    }
    Ok(current.map_or_else(|| NO_VALUE.to_string(), display_value))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => NO_VALUE.to_string(),
        other => other.to_string(),
    }
}

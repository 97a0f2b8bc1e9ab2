//! Runner pod template and live-state classification.

use super::RunnerError;
use crate::config::RunnerConfig;
use crate::constants::{
    DEFAULT_RUNNER_TERMINATION_GRACE_PERIOD_SECS, RUNNER_CONTAINER_NAME, RUNNER_LABEL,
    RUNNER_POD_NAME_SUFFIX, RUNNER_SUBDOMAIN, RUNNER_TLS_SECRET_LABEL, RUNNER_USER_ID,
};
use crate::crd::{RunnerPodSpec, Terraform};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    ObjectFieldSelector, Pod, PodSpec, SeccompProfile, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Live state of a runner pod relative to the current TLS secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodState {
    NotFound,
    /// The pod is stale and must be replaced
    MustBeDeleted { grace_period_seconds: i64 },
    Terminating,
    Running,
    /// Exists with the right identity but is not running yet
    Pending,
}

pub fn runner_pod_name(terraform_name: &str) -> String {
    format!("{}{}", terraform_name, RUNNER_POD_NAME_SUFFIX)
}

/// `tf-runner-{sha[..8]}` from a `ref@algo:sha` or `algo:sha` revision
pub fn instance_label(revision: &str) -> Result<String, RunnerError> {
    let invalid = || RunnerError::InvalidRevision(revision.to_string());
    let (_, sha) = revision.split_once(':').ok_or_else(invalid)?;
    let short = sha.get(..8).ok_or_else(invalid)?;
    Ok(format!("tf-runner-{}", short))
}

pub fn termination_grace_period(terraform: &Terraform) -> i64 {
    terraform
        .spec
        .runner_termination_grace_period_seconds
        .unwrap_or(DEFAULT_RUNNER_TERMINATION_GRACE_PERIOD_SECS)
}

/// Classifies the live pod against the TLS secret it should be labelled with
pub fn classify_pod(pod: Option<&Pod>, tls_secret_name: &str, spec_grace_period: i64) -> PodState {
    let Some(pod) = pod else {
        return PodState::NotFound;
    };

    let label = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(RUNNER_TLS_SECRET_LABEL));
    match label {
        // Same name, created by something else
        None => PodState::MustBeDeleted {
            grace_period_seconds: 1,
        },
        Some(label) if label != tls_secret_name => PodState::MustBeDeleted {
            grace_period_seconds: spec_grace_period,
        },
        Some(_) if pod.metadata.deletion_timestamp.is_some() => PodState::Terminating,
        Some(_) => {
            let running = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running");
            if running {
                PodState::Running
            } else {
                PodState::Pending
            }
        }
    }
}

pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

fn value_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..EnvVar::default()
    }
}

fn runner_env(config: &RunnerConfig, template: &RunnerPodSpec) -> Vec<EnvVar> {
    let mut env = vec![
        field_ref_env("POD_NAME", "metadata.name"),
        field_ref_env("POD_NAMESPACE", "metadata.namespace"),
    ];
    for (name, value) in [
        ("HTTP_PROXY", &config.http_proxy),
        ("HTTPS_PROXY", &config.https_proxy),
        ("NO_PROXY", &config.no_proxy),
    ] {
        if let Some(value) = value {
            env.push(value_env(name, value));
        }
    }

    for var in &template.env {
        match env.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => *existing = var.clone(),
            None => env.push(var.clone()),
        }
    }
    env
}

fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Capabilities::default()
        }),
        privileged: Some(false),
        read_only_root_filesystem: Some(true),
        run_as_non_root: Some(true),
        run_as_user: Some(RUNNER_USER_ID),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..SeccompProfile::default()
        }),
        ..SecurityContext::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Volume::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..VolumeMount::default()
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Builds the runner pod for `terraform`, labelled with the TLS secret it trusts
pub fn runner_pod(
    terraform: &Terraform,
    config: &RunnerConfig,
    tls_secret_name: &str,
    revision: &str,
) -> Result<Pod, RunnerError> {
    let namespace = terraform.runner_namespace();
    let template = terraform.spec.runner_pod_template.clone().unwrap_or_default();
    let spec = &template.spec;

    let mut labels = BTreeMap::from([
        (
            "app.kubernetes.io/created-by".to_string(),
            "tf-controller".to_string(),
        ),
        ("app.kubernetes.io/name".to_string(), "tf-runner".to_string()),
        (
            "app.kubernetes.io/instance".to_string(),
            instance_label(revision)?,
        ),
        (RUNNER_LABEL.to_string(), namespace.to_string()),
        (
            RUNNER_TLS_SECRET_LABEL.to_string(),
            tls_secret_name.to_string(),
        ),
    ]);
    labels.extend(template.metadata.labels.clone());

    let mut volumes = vec![empty_dir("temp"), empty_dir("home")];
    volumes.extend(spec.volumes.iter().cloned());
    let mut volume_mounts = vec![mount("temp", "/tmp"), mount("home", "/home/runner")];
    volume_mounts.extend(spec.volume_mounts.iter().cloned());

    let container = Container {
        name: RUNNER_CONTAINER_NAME.to_string(),
        image: Some(spec.image.clone().unwrap_or_else(|| config.image.clone())),
        image_pull_policy: spec.image_pull_policy.clone(),
        args: Some(vec![
            "--grpc-port".to_string(),
            config.grpc_port.to_string(),
            "--tls-secret-name".to_string(),
            tls_secret_name.to_string(),
            "--grpc-max-message-size".to_string(),
            config.grpc_max_message_size_mb.to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("grpc".to_string()),
            container_port: i32::from(config.grpc_port),
            ..ContainerPort::default()
        }]),
        env: Some(runner_env(config, spec)),
        env_from: non_empty(spec.env_from.clone()),
        security_context: Some(
            spec.security_context
                .clone()
                .unwrap_or_else(restricted_security_context),
        ),
        resources: spec.resources.clone(),
        volume_mounts: Some(volume_mounts),
        ..Container::default()
    };

    let mut pod_spec = PodSpec {
        containers: vec![container],
        init_containers: non_empty(spec.init_containers.clone()),
        service_account_name: Some(terraform.spec.service_account_name.clone()),
        termination_grace_period_seconds: Some(termination_grace_period(terraform)),
        volumes: Some(volumes),
        node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
        tolerations: non_empty(spec.tolerations.clone()),
        affinity: spec.affinity.clone(),
        host_aliases: non_empty(spec.host_aliases.clone()),
        priority_class_name: spec.priority_class_name.clone(),
        ..PodSpec::default()
    };
    if config.use_pod_subdomain_resolution {
        pod_spec.hostname = Some(terraform.name().to_string());
        pod_spec.subdomain = Some(RUNNER_SUBDOMAIN.to_string());
    }

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(runner_pod_name(terraform.name())),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: (!template.metadata.annotations.is_empty())
                .then(|| template.metadata.annotations.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(pod_spec),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{RunnerPodTemplate, TerraformSpec};
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    const REVISION: &str = "main@sha1:0123456789abcdef0123456789abcdef01234567";

    fn terraform() -> Terraform {
        let mut tf = Terraform::new("infra", TerraformSpec::default());
        tf.metadata.namespace = Some("flux-system".to_string());
        tf
    }

    fn live_pod(label: Option<&str>, phase: &str) -> Pod {
        let mut pod = Pod::default();
        if let Some(label) = label {
            pod.metadata.labels = Some(BTreeMap::from([(
                RUNNER_TLS_SECRET_LABEL.to_string(),
                label.to_string(),
            )]));
        }
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            ..PodStatus::default()
        });
        pod
    }

    #[test]
    fn test_instance_label() {
        assert_eq!(instance_label(REVISION).unwrap(), "tf-runner-01234567");
        assert_eq!(
            instance_label("sha256:abcdef0123").unwrap(),
            "tf-runner-abcdef01"
        );
        assert!(instance_label("main").is_err());
        assert!(instance_label("main@sha1:abc").is_err());
    }

    #[test]
    fn test_classify_missing_pod() {
        assert_eq!(classify_pod(None, "tls-1", 30), PodState::NotFound);
    }

    #[test]
    fn test_classify_foreign_pod_force_deleted() {
        let pod = live_pod(None, "Running");
        assert_eq!(
            classify_pod(Some(&pod), "tls-1", 30),
            PodState::MustBeDeleted {
                grace_period_seconds: 1
            }
        );
    }

    #[test]
    fn test_classify_stale_pod_honours_grace_period() {
        let pod = live_pod(Some("tls-0"), "Running");
        assert_eq!(
            classify_pod(Some(&pod), "tls-1", 30),
            PodState::MustBeDeleted {
                grace_period_seconds: 30
            }
        );
    }

    #[test]
    fn test_classify_terminating_running_pending() {
        let mut terminating = live_pod(Some("tls-1"), "Running");
        terminating.metadata.deletion_timestamp =
            Some(serde_json::from_value::<Time>(serde_json::json!("2026-01-01T00:00:00Z")).unwrap());
        assert_eq!(
            classify_pod(Some(&terminating), "tls-1", 30),
            PodState::Terminating
        );

        let running = live_pod(Some("tls-1"), "Running");
        assert_eq!(classify_pod(Some(&running), "tls-1", 30), PodState::Running);

        let pending = live_pod(Some("tls-1"), "Pending");
        assert_eq!(classify_pod(Some(&pending), "tls-1", 30), PodState::Pending);
    }

    #[test]
    fn test_runner_pod_template() {
        let mut tf = terraform();
        tf.spec.runner_pod_template = Some(RunnerPodTemplate {
            metadata: crate::crd::RunnerPodMetadata {
                labels: BTreeMap::from([("team".to_string(), "a".to_string())]),
                annotations: BTreeMap::new(),
            },
            spec: RunnerPodSpec {
                env: vec![value_env("POD_NAME", "override")],
                ..RunnerPodSpec::default()
            },
        });
        let config = RunnerConfig {
            http_proxy: Some("http://proxy:3128".to_string()),
            ..RunnerConfig::default()
        };

        let pod = runner_pod(&tf, &config, "terraform-runner.tls-123", REVISION).unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("infra-tf-runner"));
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[RUNNER_LABEL], "flux-system");
        assert_eq!(labels[RUNNER_TLS_SECRET_LABEL], "terraform-runner.tls-123");
        assert_eq!(labels["app.kubernetes.io/instance"], "tf-runner-01234567");
        assert_eq!(labels["team"], "a");

        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.termination_grace_period_seconds, Some(30));
        assert!(spec.hostname.is_none());
        let container = &spec.containers[0];
        let args = container.args.as_ref().unwrap();
        assert_eq!(
            args,
            &vec![
                "--grpc-port".to_string(),
                "30000".to_string(),
                "--tls-secret-name".to_string(),
                "terraform-runner.tls-123".to_string(),
                "--grpc-max-message-size".to_string(),
                "4".to_string(),
            ]
        );
        let env = container.env.as_ref().unwrap();
        let pod_name = env.iter().find(|e| e.name == "POD_NAME").unwrap();
        assert_eq!(pod_name.value.as_deref(), Some("override"));
        assert!(env.iter().any(|e| e.name == "HTTP_PROXY"));
        let security = container.security_context.as_ref().unwrap();
        assert_eq!(security.run_as_user, Some(RUNNER_USER_ID));
        assert_eq!(security.read_only_root_filesystem, Some(true));
    }

    #[test]
    fn test_runner_pod_subdomain() {
        let config = RunnerConfig {
            use_pod_subdomain_resolution: true,
            ..RunnerConfig::default()
        };
        let pod = runner_pod(&terraform(), &config, "tls", REVISION).unwrap();
        let spec = pod.spec.unwrap();
        assert_eq!(spec.hostname.as_deref(), Some("infra"));
        assert_eq!(spec.subdomain.as_deref(), Some("tf-runner"));
    }

    #[test]
    fn test_runner_pod_rejects_invalid_revision() {
        assert!(matches!(
            runner_pod(&terraform(), &RunnerConfig::default(), "tls", "main"),
            Err(RunnerError::InvalidRevision(_))
        ));
    }
}

// Translation of a proc execution request into a cluster Job object

use crate::cluster::objects::{
    Container, EnvVar, JobSpec, ObjectMeta, PodSpec, PodTemplateSpec, ResourceSpec,
};
use crate::cluster::Job;
use crate::config::JobConfig;
use crate::models::{ExecutionRequest, ProcDefinition};
use crate::naming;
use std::collections::BTreeMap;

pub const PROC_ANNOTATION: &str = "procyard.io/proc";
pub const REQUESTER_ANNOTATION: &str = "procyard.io/requester";

const RESTART_POLICY_NEVER: &str = "Never";

/// Proc defaults overlaid by request overrides; the request wins on conflicts
pub fn merge_env(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = defaults.clone();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Built-in annotations, then configured ones, then per-request ones
pub fn merge_annotations(
    proc_def: &ProcDefinition,
    request: &ExecutionRequest,
    configured: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::from([(PROC_ANNOTATION.to_string(), proc_def.name.clone())]);
    if !request.requester.is_empty() {
        annotations.insert(REQUESTER_ANNOTATION.to_string(), request.requester.clone());
    }
    annotations.extend(configured.iter().map(|(k, v)| (k.clone(), v.clone())));
    annotations.extend(request.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
    annotations
}

/// The command a request runs: its own override, or the proc default
pub fn effective_command(proc_def: &ProcDefinition, request: &ExecutionRequest) -> Vec<String> {
    if request.command.is_empty() {
        proc_def.command.clone()
    } else {
        request.command.clone()
    }
}

/// Build the Job for `execution_name`. Deadline and backoff limit are copied
/// from `config` here and never touched again.
pub fn build_job(
    execution_name: &str,
    namespace: &str,
    proc_def: &ProcDefinition,
    request: &ExecutionRequest,
    config: &JobConfig,
) -> Job {
    let labels = naming::label_set_for(execution_name);
    let annotations = merge_annotations(proc_def, request, &config.pod_annotations);

    let env = merge_env(&proc_def.env_vars, &request.env)
        .into_iter()
        .map(|(name, value)| EnvVar { name, value })
        .collect();

    let resources = (!proc_def.resources.is_empty()).then(|| ResourceSpec {
        requests: proc_def.resources.requests.clone(),
        limits: proc_def.resources.limits.clone(),
    });

    let container = Container {
        name: execution_name.to_string(),
        image: proc_def.image.clone(),
        command: effective_command(proc_def, request),
        env,
        resources,
    };

    Job {
        api_version: Job::api_version(),
        kind: Job::kind(),
        metadata: ObjectMeta {
            name: Some(execution_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: labels.clone(),
            annotations: annotations.clone(),
            creation_timestamp: None,
        },
        spec: JobSpec {
            active_deadline_seconds: Some(config.active_deadline_seconds),
            backoff_limit: Some(config.backoff_limit),
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    name: Some(execution_name.to_string()),
                    labels,
                    annotations,
                    ..Default::default()
                },
                spec: PodSpec {
                    restart_policy: Some(RESTART_POLICY_NEVER.to_string()),
                    containers: vec![container],
                },
            },
        },
        status: None,
    }
}

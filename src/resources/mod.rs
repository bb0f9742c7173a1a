//! Typed builders for every resource the operator manages. The decision
//! table mapping topology, TLS and auth settings to concrete field sets
//! lives in [`profile`] as a pure function.

pub mod configmap;
pub mod deployment;
pub mod job;
pub mod lite;
pub mod profile;
pub mod service;

use crate::api::{WorkflowService, WorkflowServiceSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, EnvVar, EnvVarSource, ResourceRequirements, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use std::collections::BTreeMap;

/// Owner reference adopting a resource into the CR, so deleting the CR
/// garbage-collects it.
pub fn owner_ref(cr: &WorkflowService) -> Option<OwnerReference> {
    cr.controller_owner_ref(&())
}

/// Standard label set plus any extra labels carried on the spec.
pub fn labels(spec: &WorkflowServiceSpec, app: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("app".to_string(), app.to_string()),
        ("app.kubernetes.io/managed-by".to_string(), "workflow-operator".to_string()),
    ]);
    if let Some(extra) = &spec.labels {
        labels.extend(extra.clone());
    }
    labels
}

pub fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_string()),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn configmap_env(name: &str, configmap: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            config_map_key_ref: Some(ConfigMapKeySelector {
                name: Some(configmap.to_string()),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn literal_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub fn requirements(cpu: &str, memory: &str) -> ResourceRequirements {
    let quantities = BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ]);
    ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    }
}

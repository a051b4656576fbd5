//! Orchestrator Client (OC) — thin capability layer over the Kubernetes API.
//!
//! Exposes exactly the operations the activation controller and reaper need:
//! read/patch deployment replicas, list pod readiness, and create/read/replace
//! coordination leases. Every fallible call returns an [`OrchestratorError`]
//! classified into not-found/conflict/forbidden/other, never a raw `kube`
//! error, so callers can branch on meaning instead of status text.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use serde_json::json;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Outcome of a lease acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The lease is held by this process (possibly via the forbidden
    /// degradation — see [`crate::activation`]).
    Ok,
    /// The existing lease could not be taken over.
    Failed,
}

/// The subset of Kubernetes operations the activation controller and reaper
/// depend on, as a trait so tests can substitute an in-memory fake.
#[async_trait]
pub trait OrchestratorOps: Send + Sync {
    async fn read_replicas(&self, namespace: &str, name: &str) -> OrchestratorResult<Option<i32>>;
    async fn patch_replicas(&self, namespace: &str, name: &str, replicas: i32) -> OrchestratorResult<()>;
    async fn list_pod_ready(&self, namespace: &str, selector: &str) -> OrchestratorResult<Vec<(String, bool)>>;
    async fn lease_create(&self, namespace: &str, name: &str, holder: &str) -> OrchestratorResult<LeaseOutcome>;
}

/// Real orchestrator client, backed by `kube::Client`.
pub struct OrchestratorClient {
    client: kube::Client,
}

impl OrchestratorClient {
    /// Build a client from the in-cluster config, falling back to the local
    /// kubeconfig when run outside a cluster (standard kube-rs bootstrap).
    pub async fn try_default() -> anyhow::Result<Self> {
        let client = kube::Client::try_default().await?;
        Ok(Self { client })
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn leases(&self, namespace: &str) -> Api<Lease> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Name of the coordination lease for a given service.
    pub fn lease_name(service: &str) -> String {
        format!("{service}-scaler-lock")
    }

    /// Read the current lease, if it exists.
    pub async fn lease_read(&self, namespace: &str, name: &str) -> OrchestratorResult<Option<Lease>> {
        match self.leases(namespace).get(name).await {
            Ok(lease) => Ok(Some(lease)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite `holder_identity` on an existing lease and replace it.
    /// Optimistic: no resource-version check. The lease is a coarse
    /// advisory, not a strict mutex.
    pub async fn lease_replace(&self, namespace: &str, name: &str, mut lease: Lease, holder: &str) -> OrchestratorResult<()> {
        lease.spec.get_or_insert_with(LeaseSpec::default).holder_identity = Some(holder.to_string());
        self.leases(namespace)
            .replace(name, &PostParams::default(), &lease)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}

#[async_trait]
impl OrchestratorOps for OrchestratorClient {
    async fn read_replicas(&self, namespace: &str, name: &str) -> OrchestratorResult<Option<i32>> {
        match self.deployments(namespace).get(name).await {
            Ok(dep) => Ok(dep.spec.and_then(|s| s.replicas)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_replicas(&self, namespace: &str, name: &str, replicas: i32) -> OrchestratorResult<()> {
        let patch = Patch::Merge(json!({ "spec": { "replicas": replicas } }));
        self.deployments(namespace)
            .patch_scale(name, &PatchParams::default(), &patch)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }

    async fn list_pod_ready(&self, namespace: &str, selector: &str) -> OrchestratorResult<Vec<(String, bool)>> {
        let params = kube::api::ListParams::default().labels(selector);
        let pods = self.pods(namespace).list(&params).await?;
        Ok(pods
            .items
            .into_iter()
            .map(|pod| {
                let name = pod.metadata.name.clone().unwrap_or_default();
                let ready = pod_is_ready(&pod);
                (name, ready)
            })
            .collect())
    }

    async fn lease_create(&self, namespace: &str, name: &str, holder: &str) -> OrchestratorResult<LeaseOutcome> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(holder.to_string()),
                ..Default::default()
            }),
        };

        match self.leases(namespace).create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(LeaseOutcome::Ok),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                match self.lease_read(namespace, name).await? {
                    Some(existing) => match self.lease_replace(namespace, name, existing, holder).await {
                        Ok(()) => Ok(LeaseOutcome::Ok),
                        Err(_) => Ok(LeaseOutcome::Failed),
                    },
                    None => Ok(LeaseOutcome::Failed),
                }
            }
            Err(kube::Error::Api(resp)) if resp.code == 403 => {
                tracing::warn!(%namespace, lease = %name, "lease create forbidden, continuing without mutual exclusion");
                Ok(LeaseOutcome::Ok)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A pod qualifies as ready iff its phase is `Running` and it has a `Ready`
/// condition with value `True`.
fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else { return false };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .as_ref()
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// The three label selectors tried, in priority order, when looking for a
/// service's pods.
pub fn selectors_for(service: &str) -> [String; 3] {
    [
        format!("io.kompose.service={service}"),
        format!("app={service}"),
        format!("app.kubernetes.io/name={service}"),
    ]
}

//! Activation Controller (ACTL) — drives a group of services from zero
//! replicas to ready, with lease-based mutual exclusion and bounded wait.
//!
//! Per-service failures are absorbed (logged, never propagated): the only
//! signal ACTL surfaces to its caller is whether the primary became ready
//! within `max_scaleup_wait`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::orchestrator::{selectors_for, LeaseOutcome, OrchestratorOps};

/// Per-service readiness poll budget before `wait_ready` takes over for the
/// primary — best-effort, capped well under the primary's own wait budget.
const PER_SERVICE_WAIT_BUDGET_SECS: u64 = 30;

/// Grace period after patching replicas, before polling for readiness —
/// gives the orchestrator time to create pods.
const POST_SCALE_GRACE: Duration = Duration::from_secs(1);

pub struct ActivationController<O: OrchestratorOps> {
    orchestrator: Arc<O>,
    scale_up_replicas: i32,
    max_scaleup_wait: u64,
    proxy_identity: String,
}

impl<O: OrchestratorOps + 'static> ActivationController<O> {
    pub fn new(orchestrator: Arc<O>, scale_up_replicas: i32, max_scaleup_wait: u64, proxy_identity: String) -> Self {
        Self {
            orchestrator,
            scale_up_replicas,
            max_scaleup_wait,
            proxy_identity,
        }
    }

    /// Drive `services` to `scale_up_replicas` and return whether `primary`
    /// reported at least one ready pod within `max_scaleup_wait`.
    pub async fn activate(&self, namespace: &str, services: &[String], primary: &str) -> bool {
        let wakes = services.iter().map(|service| {
            let orchestrator = Arc::clone(&self.orchestrator);
            let namespace = namespace.to_string();
            let service = service.clone();
            let scale_up_replicas = self.scale_up_replicas;
            let proxy_identity = self.proxy_identity.clone();
            tokio::spawn(async move {
                wake_service(&*orchestrator, &namespace, &service, scale_up_replicas, &proxy_identity).await;
            })
        });

        // Join all wake tasks; a panicking task must not prevent attempts on
        // siblings or the final primary readiness wait (failure isolation).
        for result in futures::future::join_all(wakes).await {
            if let Err(e) = result {
                warn!(error = %e, "wake task panicked, continuing");
            }
        }

        wait_ready(&*self.orchestrator, namespace, primary, self.max_scaleup_wait).await
    }
}

/// Per-service wake: idempotent scale-up plus lease-gated mutual exclusion,
/// followed by a short best-effort local readiness poll.
///
/// State machine:
/// `IDLE -> READ_REPLICAS -> {ALREADY_SCALED -> DONE_OK}
///        | {ACQUIRE_LEASE -> {FAIL -> DONE_SKIPPED} | {OK -> PATCH -> WAIT_LOCAL -> DONE_OK}}`
async fn wake_service<O: OrchestratorOps + ?Sized>(
    orchestrator: &O,
    namespace: &str,
    service: &str,
    scale_up_replicas: i32,
    proxy_identity: &str,
) {
    let replicas = match orchestrator.read_replicas(namespace, service).await {
        Ok(replicas) => replicas,
        Err(e) => {
            warn!(%namespace, %service, error = %e, "error reading replicas, skipping this cycle");
            return;
        }
    };

    // Idempotent wake: never mutate a service already at or above target.
    if let Some(r) = replicas {
        if r >= scale_up_replicas {
            info!(%namespace, %service, replicas = r, "already scaled, skipping");
            return;
        }
    }

    let lease_name = crate::orchestrator::OrchestratorClient::lease_name(service);
    match orchestrator.lease_create(namespace, &lease_name, proxy_identity).await {
        Ok(LeaseOutcome::Ok) => {}
        Ok(LeaseOutcome::Failed) => {
            warn!(%namespace, %service, "failed to acquire lease, skipping this cycle");
            return;
        }
        Err(e) => {
            warn!(%namespace, %service, error = %e, "error acquiring lease, skipping this cycle");
            return;
        }
    }

    info!(%namespace, %service, scale_up_replicas, "scaling up");
    if let Err(e) = orchestrator.patch_replicas(namespace, service, scale_up_replicas).await {
        warn!(%namespace, %service, error = %e, "error patching replicas");
        return;
    }

    tokio::time::sleep(POST_SCALE_GRACE).await;

    // Best-effort: only improves behavior when a sibling is slow but the
    // primary is healthy. The result is not surfaced.
    let _ = wait_ready(orchestrator, namespace, service, PER_SERVICE_WAIT_BUDGET_SECS).await;
}

/// Poll pods at 1 Hz, trying each selector in priority order every round,
/// until some pod reports ready or `timeout_secs` elapses.
async fn wait_ready<O: OrchestratorOps + ?Sized>(orchestrator: &O, namespace: &str, service: &str, timeout_secs: u64) -> bool {
    let selectors = selectors_for(service);
    let mut waited = 0u64;

    info!(%namespace, %service, timeout_secs, "waiting for pod ready");

    loop {
        for selector in &selectors {
            match orchestrator.list_pod_ready(namespace, selector).await {
                Ok(pods) => {
                    if let Some((pod_name, _)) = pods.iter().find(|(_, ready)| *ready) {
                        info!(%namespace, %service, pod = %pod_name, waited, "pod ready");
                        return true;
                    }
                }
                Err(e) => {
                    warn!(%namespace, %service, error = %e, "error listing pods");
                }
            }
        }

        if waited >= timeout_secs {
            warn!(%namespace, %service, timeout_secs, "pods did not become ready within timeout");
            return false;
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        waited += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestratorError, OrchestratorResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Injected outcome for a fake lease acquisition, keyed by service name.
    #[derive(Clone, Copy)]
    enum FakeLeaseResult {
        Ok,
        Failed,
        Err,
    }

    /// In-memory fake satisfying [`OrchestratorOps`] for activation tests.
    #[derive(Default)]
    struct FakeOrchestrator {
        replicas: Mutex<HashMap<String, i32>>,
        ready_after_patch: bool,
        patch_calls: AtomicUsize,
        lease_results: Mutex<HashMap<String, FakeLeaseResult>>,
    }

    impl FakeOrchestrator {
        fn fail_lease_for(&self, service: &str, result: FakeLeaseResult) {
            let lease_name = crate::orchestrator::OrchestratorClient::lease_name(service);
            self.lease_results.lock().unwrap().insert(lease_name, result);
        }
    }

    #[async_trait]
    impl OrchestratorOps for FakeOrchestrator {
        async fn read_replicas(&self, _namespace: &str, name: &str) -> OrchestratorResult<Option<i32>> {
            Ok(self.replicas.lock().unwrap().get(name).copied())
        }

        async fn patch_replicas(&self, _namespace: &str, name: &str, replicas: i32) -> OrchestratorResult<()> {
            self.patch_calls.fetch_add(1, Ordering::SeqCst);
            self.replicas.lock().unwrap().insert(name.to_string(), replicas);
            Ok(())
        }

        async fn list_pod_ready(&self, _namespace: &str, _selector: &str) -> OrchestratorResult<Vec<(String, bool)>> {
            if self.ready_after_patch {
                Ok(vec![("pod-0".to_string(), true)])
            } else {
                Ok(vec![])
            }
        }

        async fn lease_create(&self, _namespace: &str, name: &str, _holder: &str) -> OrchestratorResult<LeaseOutcome> {
            match self.lease_results.lock().unwrap().get(name) {
                Some(FakeLeaseResult::Failed) => Ok(LeaseOutcome::Failed),
                Some(FakeLeaseResult::Err) => Err(OrchestratorError::Conflict(format!("{name} lease replace failed"))),
                Some(FakeLeaseResult::Ok) | None => Ok(LeaseOutcome::Ok),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_scales_and_reports_ready() {
        let fake = Arc::new(FakeOrchestrator {
            ready_after_patch: true,
            ..Default::default()
        });
        let actl = ActivationController::new(fake.clone(), 1, 5, "test-proxy".to_string());
        let services = vec!["manager".to_string(), "accessor".to_string(), "engine".to_string()];

        let ready = actl.activate("default", &services, "manager").await;

        assert!(ready);
        assert_eq!(fake.patch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn idempotent_when_already_scaled() {
        let fake = Arc::new(FakeOrchestrator {
            ready_after_patch: true,
            ..Default::default()
        });
        fake.replicas.lock().unwrap().insert("manager".to_string(), 1);
        fake.replicas.lock().unwrap().insert("accessor".to_string(), 1);
        fake.replicas.lock().unwrap().insert("engine".to_string(), 1);

        let actl = ActivationController::new(fake.clone(), 1, 5, "test-proxy".to_string());
        let services = vec!["manager".to_string(), "accessor".to_string(), "engine".to_string()];

        let ready = actl.activate("default", &services, "manager").await;

        assert!(ready);
        assert_eq!(fake.patch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_never_ready_returns_false() {
        let fake = Arc::new(FakeOrchestrator {
            ready_after_patch: false,
            ..Default::default()
        });
        let actl = ActivationController::new(fake.clone(), 1, 2, "test-proxy".to_string());
        let services = vec!["manager".to_string()];

        let ready = actl.activate("default", &services, "manager").await;

        assert!(!ready);
    }

    #[tokio::test(start_paused = true)]
    async fn sibling_with_unresolvable_lease_conflict_does_not_block_primary() {
        let fake = Arc::new(FakeOrchestrator {
            ready_after_patch: true,
            ..Default::default()
        });
        fake.fail_lease_for("accessor", FakeLeaseResult::Failed);

        let actl = ActivationController::new(fake.clone(), 1, 5, "test-proxy".to_string());
        let services = vec!["manager".to_string(), "accessor".to_string()];

        let ready = actl.activate("default", &services, "manager").await;

        assert!(ready);
        // accessor's lease acquisition failed, so it is never patched.
        assert!(!fake.replicas.lock().unwrap().contains_key("accessor"));
        assert_eq!(*fake.replicas.lock().unwrap().get("manager").unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_with_lease_error_is_never_patched_and_activation_fails() {
        let fake = Arc::new(FakeOrchestrator {
            ready_after_patch: true,
            ..Default::default()
        });
        fake.fail_lease_for("manager", FakeLeaseResult::Err);

        let actl = ActivationController::new(fake.clone(), 1, 2, "test-proxy".to_string());
        let services = vec!["manager".to_string()];

        let ready = actl.activate("default", &services, "manager").await;

        assert!(!ready);
        assert_eq!(fake.patch_calls.load(Ordering::SeqCst), 0);
    }
}

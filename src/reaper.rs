//! Reaper (REAP) — periodically scales idle namespaces back to zero.
//!
//! Spawned once at process init. After an initial settle delay, loops
//! forever: sleep `check_interval`, scale down every namespace idle beyond
//! `inactivity_timeout`, and evict its Activity Clock entry in the same pass
//! regardless of partial scale-down failure — the next request re-triggers
//! a full activation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::activity_clock::ActivityClock;
use crate::orchestrator::OrchestratorOps;

const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Spawn the reaper as a background task. Returns its `JoinHandle`, though
/// the caller is not expected to await it — the loop runs for the life of
/// the process and only ends when the Tokio runtime shuts down.
pub fn spawn_reaper<O: OrchestratorOps + 'static>(
    orchestrator: Arc<O>,
    activity_clock: Arc<ActivityClock>,
    group_services: Vec<String>,
    scale_down_replicas: i32,
    inactivity_timeout: Duration,
    check_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(SETTLE_DELAY).await;
        info!("reaper started");

        loop {
            tokio::time::sleep(check_interval).await;

            if let Err(e) = sweep(
                &*orchestrator,
                &activity_clock,
                &group_services,
                scale_down_replicas,
                inactivity_timeout,
            )
            .await
            {
                // No iteration of the loop is allowed to terminate it; log
                // and continue.
                error!(error = %e, "error in reaper iteration");
            }
        }
    })
}

async fn sweep<O: OrchestratorOps + ?Sized>(
    orchestrator: &O,
    activity_clock: &ActivityClock,
    group_services: &[String],
    scale_down_replicas: i32,
    inactivity_timeout: Duration,
) -> anyhow::Result<()> {
    let now = std::time::Instant::now();

    for (namespace, last_access) in activity_clock.snapshot() {
        if now.duration_since(last_access) < inactivity_timeout {
            continue;
        }

        info!(%namespace, "inactivity timeout reached, scaling down");

        let scales = group_services.iter().map(|service| {
            scale_down_one(orchestrator, &namespace, service, scale_down_replicas)
        });
        futures::future::join_all(scales).await;

        // Evicted even on partial scale-down failure.
        activity_clock.evict(&namespace);
    }

    Ok(())
}

async fn scale_down_one<O: OrchestratorOps + ?Sized>(orchestrator: &O, namespace: &str, service: &str, scale_down_replicas: i32) {
    match orchestrator.read_replicas(namespace, service).await {
        Ok(Some(replicas)) if replicas == scale_down_replicas => {
            info!(%namespace, %service, replicas, "already at target, skipping scale-down");
        }
        Ok(_) => {
            if let Err(e) = orchestrator.patch_replicas(namespace, service, scale_down_replicas).await {
                warn!(%namespace, %service, error = %e, "error during scale-down");
            } else {
                info!(%namespace, %service, scale_down_replicas, "scaled down");
            }
        }
        Err(e) => {
            warn!(%namespace, %service, error = %e, "error reading replicas during scale-down");
        }
    }
}

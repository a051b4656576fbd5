use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use scaler_proxy::activation::ActivationController;
use scaler_proxy::activity_clock::ActivityClock;
use scaler_proxy::config::ProxyConfig;
use scaler_proxy::forward::Forwarder;
use scaler_proxy::orchestrator::OrchestratorClient;
use scaler_proxy::reaper::spawn_reaper;
use scaler_proxy::routes::{router, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(ProxyConfig::from_env()?);

    info!(namespace = %config.namespace, primary = %config.primary_service, group = ?config.group_services, "starting scaler proxy");
    info!(identity = %config.proxy_identity, "proxy identity");

    let k8s_ready = Arc::new(AtomicBool::new(false));

    let orchestrator = Arc::new(OrchestratorClient::try_default().await?);
    k8s_ready.store(true, Ordering::Release);
    info!("Kubernetes client initialized");

    let activity_clock = Arc::new(ActivityClock::new());
    let activation = Arc::new(ActivationController::new(
        orchestrator.clone(),
        config.scale_up_replicas,
        config.max_scaleup_wait,
        config.proxy_identity.clone(),
    ));
    let forwarder = Arc::new(Forwarder::new(config.forward_timeout)?);

    spawn_reaper(
        orchestrator.clone(),
        activity_clock.clone(),
        config.group_services.clone(),
        config.scale_down_replicas,
        std::time::Duration::from_secs(config.inactivity_timeout),
        std::time::Duration::from_secs(config.check_interval),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        activity_clock,
        activation,
        forwarder,
        k8s_ready,
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

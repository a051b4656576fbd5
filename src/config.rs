//! Process configuration, assembled once from the environment at startup.
//!
//! One source, no layering: every field maps 1:1 to an environment variable.
//! `ProxyConfig` is built once in `main` and shared behind an `Arc` for the
//! life of the process — one namespace, one group, fixed at start.

use std::time::Duration;

/// Immutable, process-wide configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Ordered set of deployment names composing the group.
    pub group_services: Vec<String>,
    /// The single name whose readiness gates forwarding. Always a member of
    /// `group_services`, checked in [`ProxyConfig::from_env`].
    pub primary_service: String,
    /// The one namespace all operations target.
    pub namespace: String,
    /// TCP port on the primary service.
    pub target_port: u16,
    /// Per-attempt HTTP timeout for the upstream forward.
    pub forward_timeout: Duration,
    /// Desired replicas when waking a service.
    pub scale_up_replicas: i32,
    /// Desired replicas when reaping a service.
    pub scale_down_replicas: i32,
    /// Upper bound, in seconds, for readiness polling of the primary.
    pub max_scaleup_wait: u64,
    /// Seconds of idleness before the reaper scales a namespace down.
    pub inactivity_timeout: u64,
    /// Reaper loop period, in seconds.
    pub check_interval: u64,
    /// Address the admission surface binds to.
    pub listen_addr: String,
    /// Opaque identity this process writes into leases it acquires.
    pub proxy_identity: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ProxyConfig {
    /// Load configuration from the process environment, applying the
    /// documented defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let group_services: Vec<String> = env_or("TARGET_SERVICE_NAME", "manager,accessor,engine")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        anyhow::ensure!(!group_services.is_empty(), "TARGET_SERVICE_NAME must name at least one service");

        let primary_service = env_or("FORWARD_TO_SERVICE", "manager");
        anyhow::ensure!(
            group_services.contains(&primary_service),
            "FORWARD_TO_SERVICE ({primary_service}) must be a member of TARGET_SERVICE_NAME ({group_services:?})"
        );

        let forward_timeout_secs: u64 = env_parse("FORWARD_TIMEOUT", 60);

        let proxy_identity = format!(
            "{}-{}",
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "scaler-proxy".to_string()),
            std::process::id()
        );

        Ok(Self {
            group_services,
            primary_service,
            namespace: env_or("NAMESPACE", "default"),
            target_port: env_parse("TARGET_SERVICE_PORT", 80),
            forward_timeout: Duration::from_secs(forward_timeout_secs),
            scale_up_replicas: env_parse("SCALE_UP_REPLICAS", 1),
            scale_down_replicas: env_parse("SCALE_DOWN_REPLICAS", 0),
            max_scaleup_wait: env_parse("MAX_SCALEUP_WAIT", 150),
            inactivity_timeout: env_parse("INACTIVITY_TIMEOUT", 300),
            check_interval: env_parse("CHECK_INTERVAL", 30),
            listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:8080"),
            proxy_identity,
        })
    }

    /// DNS name of the primary service inside the cluster.
    pub fn primary_upstream_base(&self) -> String {
        format!(
            "http://{}.{}.svc.cluster.local:{}",
            self.primary_service, self.namespace, self.target_port
        )
    }
}

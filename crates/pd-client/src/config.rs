use std::path::PathBuf;
use std::time::Duration;

/// Mutual TLS material. All paths are optional; mTLS is enabled once both
/// `client_cert` and `client_key` are present.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl TlsOptions {
    pub fn is_enabled(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }
}

/// Tunable constants for the client's background loops and timeouts.
///
/// Defaults match the values a cluster operator should expect from a
/// conservative PD deployment.
#[derive(Debug, Clone)]
pub struct PdClientConfig {
    /// Per-call timeout applied to every unary RPC.
    pub rpc_timeout: Duration,
    /// Timeout applied to the `GetMembers` call the leader loop issues.
    pub leader_update_timeout: Duration,
    /// Number of attempts for the bootstrap retry wrapper.
    pub bootstrap_retry_count: u32,
    /// Delay between bootstrap retry attempts.
    pub bootstrap_retry_interval: Duration,
    /// Capacity of the TSO submission queue.
    pub tso_batch_queue_capacity: usize,
    /// Interval of the leader loop's periodic wake timer.
    pub leader_loop_period: Duration,
    /// Deadline applied to a single TSO batch round trip.
    pub tso_batch_deadline: Duration,
    /// mTLS material, if any.
    pub tls: TlsOptions,
}

impl Default for PdClientConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(3),
            leader_update_timeout: Duration::from_secs(1),
            bootstrap_retry_count: 100,
            bootstrap_retry_interval: Duration::from_secs(1),
            tso_batch_queue_capacity: 10_000,
            leader_loop_period: Duration::from_secs(60),
            tso_batch_deadline: Duration::from_secs(3),
            tls: TlsOptions::default(),
        }
    }
}

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::config::TlsOptions;
use crate::error::{Error, Result};

/// Normalizes a user-supplied endpoint into a URL carrying an explicit scheme.
pub(crate) fn normalize_url(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    }
}

struct RegistryState {
    channels: HashMap<String, Channel>,
    leader_url: String,
}

/// Maps endpoint URLs to open gRPC channels and tracks which one is the
/// current leader. Channel creation is idempotent: concurrent callers asking
/// for the same URL converge on a single cached channel.
pub(crate) struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    tls: TlsOptions,
}

impl ConnectionRegistry {
    pub(crate) fn new(tls: TlsOptions) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                channels: HashMap::new(),
                leader_url: String::new(),
            }),
            tls,
        }
    }

    /// Returns a channel to `url`, dialing it if no cached channel exists.
    /// If two callers race on the same new URL, both dial but only the
    /// first to acquire the write lock is kept; the loser's channel is
    /// simply dropped.
    pub(crate) async fn get_or_create(&self, url: &str) -> Result<Channel> {
        {
            let guard = self.state.read().await;
            if let Some(channel) = guard.channels.get(url) {
                return Ok(channel.clone());
            }
        }

        let dialed = self.dial(url).await?;

        let mut guard = self.state.write().await;
        if let Some(existing) = guard.channels.get(url) {
            return Ok(existing.clone());
        }
        guard.channels.insert(url.to_string(), dialed.clone());
        Ok(dialed)
    }

    /// Returns the channel for the current leader, or `NoLeader` if none has
    /// been observed yet. Reads the leader pointer and the channel map
    /// under the same lock so a non-empty pointer always resolves.
    pub(crate) async fn leader_channel(&self) -> Result<Channel> {
        let guard = self.state.read().await;
        if guard.leader_url.is_empty() {
            return Err(Error::NoLeader);
        }
        guard
            .channels
            .get(&guard.leader_url)
            .cloned()
            .ok_or(Error::NoLeader)
    }

    pub(crate) async fn leader_url(&self) -> String {
        self.state.read().await.leader_url.clone()
    }

    /// Opens (or reuses) a channel to `url`, then flips the leader pointer.
    /// The channel must exist before the pointer moves so that no reader
    /// ever observes a leader pointer without a corresponding channel.
    pub(crate) async fn switch_leader(&self, url: &str) -> Result<()> {
        let channel = self.get_or_create(url).await?;
        let mut guard = self.state.write().await;
        guard.channels.entry(url.to_string()).or_insert(channel);
        guard.leader_url = url.to_string();
        Ok(())
    }

    pub(crate) async fn close_all(&self) {
        let mut guard = self.state.write().await;
        guard.channels.clear();
        guard.leader_url.clear();
    }

    async fn dial(&self, url: &str) -> Result<Channel> {
        let mut endpoint = Endpoint::from_shared(url.to_string())
            .map_err(|e| Error::StreamOpen(e.to_string()))?
            .timeout(Duration::from_secs(3));

        if self.tls.is_enabled() {
            let mut tls = ClientTlsConfig::new();
            if let Some(ca) = &self.tls.ca_cert {
                let pem = std::fs::read(ca).map_err(|e| Error::StreamOpen(e.to_string()))?;
                tls = tls.ca_certificate(tonic::transport::Certificate::from_pem(pem));
            }
            if let (Some(cert_path), Some(key_path)) =
                (&self.tls.client_cert, &self.tls.client_key)
            {
                let cert = std::fs::read(cert_path).map_err(|e| Error::StreamOpen(e.to_string()))?;
                let key = std::fs::read(key_path).map_err(|e| Error::StreamOpen(e.to_string()))?;
                tls = tls.identity(tonic::transport::Identity::from_pem(cert, key));
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| Error::StreamOpen(e.to_string()))?;
        }

        log::debug!("dialing pd endpoint {url}");
        endpoint.connect().await.map_err(Error::from)
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use pd_client_proto::{pd_client::PdClient as PdGrpcClient, GetMembersRequest, RequestHeader};

use crate::error::{Error, Result};
use crate::registry::{normalize_url, ConnectionRegistry};

/// Periodically and on-demand refreshes the endpoint set and leader pointer.
/// Runs as its own task; never exits except on shutdown.
pub(crate) struct LeaderLoop {
    registry: Arc<ConnectionRegistry>,
    endpoints: Arc<RwLock<Vec<String>>>,
    recheck_rx: mpsc::Receiver<()>,
    period: Duration,
    update_timeout: Duration,
    cluster_id: u64,
    shutdown: CancellationToken,
}

impl LeaderLoop {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        endpoints: Arc<RwLock<Vec<String>>>,
        recheck_rx: mpsc::Receiver<()>,
        period: Duration,
        update_timeout: Duration,
        cluster_id: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            endpoints,
            recheck_rx,
            period,
            update_timeout,
            cluster_id,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.recheck_rx.recv() => {
                    if let Err(err) = self.update_leader().await {
                        log::warn!("leader update failed: {err}");
                    }
                }
                _ = interval.tick() => {
                    if let Err(err) = self.update_leader().await {
                        log::warn!("leader update failed: {err}");
                    }
                }
            }
        }
    }

    /// Iterates the current endpoint list in order, issuing a short-timeout
    /// `GetMembers` against each, and switches leader on the first usable
    /// response.
    pub(crate) async fn update_leader(&self) -> Result<()> {
        let endpoints = self.endpoints.read().await.clone();
        for url in &endpoints {
            let channel = match self.registry.get_or_create(url).await {
                Ok(channel) => channel,
                Err(err) => {
                    log::debug!("dialing {url} during leader update failed: {err}");
                    continue;
                }
            };
            let mut client = PdGrpcClient::new(channel);
            let request = tonic::Request::new(GetMembersRequest {
                header: Some(RequestHeader {
                    cluster_id: self.cluster_id,
                }),
            });
            let response = match tokio::time::timeout(self.update_timeout, client.get_members(request)).await {
                Ok(Ok(response)) => response.into_inner(),
                Ok(Err(err)) => {
                    log::debug!("get_members on {url} failed: {err}");
                    continue;
                }
                Err(_) => {
                    log::debug!("get_members on {url} timed out");
                    continue;
                }
            };

            let Some(leader) = response.leader else {
                continue;
            };
            if leader.client_urls.is_empty() {
                continue;
            }

            let mut member_urls: Vec<String> = response
                .members
                .iter()
                .flat_map(|member| member.client_urls.iter().cloned())
                .map(|url| normalize_url(&url))
                .collect();
            member_urls.sort();
            member_urls.dedup();
            if !member_urls.is_empty() {
                let mut current = self.endpoints.write().await;
                if *current != member_urls {
                    *current = member_urls;
                }
            }

            self.switch_leader(&leader.client_urls).await?;
            return Ok(());
        }
        Err(Error::Bootstrap(
            "no endpoint yielded a usable GetMembers response".into(),
        ))
    }

    /// Picks `urls[0]` as the new leader; the protocol does not expose
    /// multiple leader URLs in a form that is comparable for preference.
    async fn switch_leader(&self, urls: &[String]) -> Result<()> {
        let Some(new_leader) = urls.first().map(|url| normalize_url(url)) else {
            return Ok(());
        };
        if self.registry.leader_url().await == new_leader {
            return Ok(());
        }
        self.registry.switch_leader(&new_leader).await
    }
}

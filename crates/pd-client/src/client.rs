use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use pd_client_proto::{
    pd_client::PdClient as PdGrpcClient, ErrorType, GetAllStoresRequest, GetAllStoresResponse,
    GetMembersRequest, GetOperatorRequest, GetOperatorResponse, GetRegionByIdRequest,
    GetRegionRequest, GetRegionResponse, GetStoreRequest, Peer, RequestHeader, Region,
    ResponseHeader, ScanRegionsRequest, ScanRegionsResponse, ScatterRegionRequest,
    ScatterRegionResponse, Store, StoreState, UpdateGcSafePointRequest,
    UpdateGcSafePointResponse,
};

use crate::config::PdClientConfig;
use crate::error::{Error, Result};
use crate::leader::LeaderLoop;
use crate::registry::{normalize_url, ConnectionRegistry};
use crate::retry;
use crate::tso::{TsoPipeline, TsoRequestFuture};

/// Responses that carry a `ResponseHeader`, and so can embed a server-side
/// error even when the transport call itself succeeded.
trait HasHeader {
    fn response_header(&self) -> &Option<ResponseHeader>;
}

impl HasHeader for GetRegionResponse {
    fn response_header(&self) -> &Option<ResponseHeader> {
        &self.header
    }
}

impl HasHeader for ScanRegionsResponse {
    fn response_header(&self) -> &Option<ResponseHeader> {
        &self.header
    }
}

impl HasHeader for GetAllStoresResponse {
    fn response_header(&self) -> &Option<ResponseHeader> {
        &self.header
    }
}

impl HasHeader for UpdateGcSafePointResponse {
    fn response_header(&self) -> &Option<ResponseHeader> {
        &self.header
    }
}

impl HasHeader for ScatterRegionResponse {
    fn response_header(&self) -> &Option<ResponseHeader> {
        &self.header
    }
}

impl HasHeader for GetOperatorResponse {
    fn response_header(&self) -> &Option<ResponseHeader> {
        &self.header
    }
}

/// Extracts a server-embedded error from a response header, if any is set.
fn header_error(header: &Option<ResponseHeader>) -> Option<Error> {
    let error = header.as_ref()?.error.as_ref()?;
    if error.r#type == ErrorType::Ok as i32 {
        return None;
    }
    Some(Error::Rpc(format!(
        "server error {}: {}",
        error.r#type, error.message
    )))
}

struct Loops {
    leader: JoinHandle<()>,
    tso_sender: JoinHandle<()>,
    tso_watcher: JoinHandle<()>,
}

struct Inner {
    cluster_id: u64,
    registry: Arc<ConnectionRegistry>,
    tso: TsoPipeline,
    leader_recheck_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
    config: PdClientConfig,
    loops: Mutex<Option<Loops>>,
}

/// The public facade: owns cluster identity, the connection registry, and
/// the leader/TSO-sender/deadline-watcher loops, and exposes the
/// request/response operations callers actually use.
#[derive(Clone)]
pub struct PdClient {
    inner: Arc<Inner>,
}

impl PdClient {
    /// Normalizes endpoints, establishes cluster identity and the initial
    /// leader, then starts the background loops.
    pub async fn new(endpoints: Vec<String>, config: PdClientConfig) -> Result<Self> {
        let endpoints: Vec<String> = endpoints.iter().map(|url| normalize_url(url)).collect();
        if endpoints.is_empty() {
            return Err(Error::Bootstrap("no endpoints supplied".into()));
        }

        let registry = Arc::new(ConnectionRegistry::new(config.tls.clone()));
        let shutdown = CancellationToken::new();

        let cluster_id = retry::retry(
            config.bootstrap_retry_count,
            config.bootstrap_retry_interval,
            &shutdown,
            || Self::init_cluster_id(&registry, &endpoints),
        )
        .await?;

        let endpoints_lock = Arc::new(RwLock::new(endpoints));
        let (leader_recheck_tx, leader_recheck_rx) = mpsc::channel(1);

        let leader_loop = LeaderLoop::new(
            registry.clone(),
            endpoints_lock.clone(),
            leader_recheck_rx,
            config.leader_loop_period,
            config.leader_update_timeout,
            cluster_id,
            shutdown.clone(),
        );

        retry::retry(
            config.bootstrap_retry_count,
            config.bootstrap_retry_interval,
            &shutdown,
            || leader_loop.update_leader(),
        )
        .await?;

        let leader_handle = tokio::spawn(leader_loop.run());

        let (tso, tso_handles) = TsoPipeline::spawn(
            registry.clone(),
            cluster_id,
            config.tso_batch_queue_capacity,
            config.tso_batch_deadline,
            leader_recheck_tx.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                cluster_id,
                registry,
                tso,
                leader_recheck_tx,
                shutdown,
                config,
                loops: Mutex::new(Some(Loops {
                    leader: leader_handle,
                    tso_sender: tso_handles.sender,
                    tso_watcher: tso_handles.watcher,
                })),
            }),
        })
    }

    async fn init_cluster_id(registry: &ConnectionRegistry, endpoints: &[String]) -> Result<u64> {
        for url in endpoints {
            let channel = match registry.get_or_create(url).await {
                Ok(channel) => channel,
                Err(err) => {
                    log::debug!("dialing {url} during cluster-id init failed: {err}");
                    continue;
                }
            };
            let mut client = PdGrpcClient::new(channel);
            let request = tonic::Request::new(GetMembersRequest { header: None });
            match client.get_members(request).await {
                Ok(response) => {
                    if let Some(header) = response.into_inner().header {
                        return Ok(header.cluster_id);
                    }
                }
                Err(err) => {
                    log::debug!("get_members on {url} during cluster-id init failed: {err}");
                }
            }
        }
        Err(Error::Bootstrap(
            "failed to obtain cluster id from any endpoint".into(),
        ))
    }

    /// No RPC: the cluster ID observed once at bootstrap.
    pub fn cluster_id(&self) -> u64 {
        self.inner.cluster_id
    }

    /// Synchronous timestamp acquisition: submits then waits inline.
    pub async fn get_ts(&self) -> Result<(i64, i64)> {
        self.get_ts_async().await?.wait().await
    }

    /// Like `get_ts`, but also races the supplied cancellation handle so a
    /// caller can abandon the wait without affecting other in-flight
    /// requests.
    pub async fn get_ts_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(i64, i64)> {
        self.get_ts_async().await?.wait_with_cancel(cancel).await
    }

    /// Submits a timestamp request without waiting for the result.
    pub async fn get_ts_async(&self) -> Result<TsoRequestFuture> {
        self.inner.tso.request_tso().await
    }

    pub async fn get_region(&self, key: Vec<u8>) -> Result<(Option<Region>, Option<Peer>)> {
        let request = GetRegionRequest {
            header: Some(self.header()),
            region_key: key,
        };
        let response = self
            .call(request, |mut client, request| async move {
                client.get_region(request).await
            })
            .await?;
        Ok((response.region, response.leader))
    }

    pub async fn get_prev_region(&self, key: Vec<u8>) -> Result<(Option<Region>, Option<Peer>)> {
        let request = GetRegionRequest {
            header: Some(self.header()),
            region_key: key,
        };
        let response = self
            .call(request, |mut client, request| async move {
                client.get_prev_region(request).await
            })
            .await?;
        Ok((response.region, response.leader))
    }

    pub async fn get_region_by_id(
        &self,
        region_id: u64,
    ) -> Result<(Option<Region>, Option<Peer>)> {
        let request = GetRegionByIdRequest {
            header: Some(self.header()),
            region_id,
        };
        let response = self
            .call(request, |mut client, request| async move {
                client.get_region_by_id(request).await
            })
            .await?;
        Ok((response.region, response.leader))
    }

    /// Leader has id 0 in a `RegionResult` entry when the region currently
    /// has no known leader peer.
    pub async fn scan_regions(
        &self,
        start_key: Vec<u8>,
        limit: i32,
    ) -> Result<Vec<(Region, Peer)>> {
        let request = ScanRegionsRequest {
            header: Some(self.header()),
            start_key,
            limit,
        };
        let response = self
            .call(request, |mut client, request| async move {
                client.scan_regions(request).await
            })
            .await?;
        Ok(response
            .region_results
            .into_iter()
            .filter_map(|result| Some((result.region?, result.leader.unwrap_or_default())))
            .collect())
    }

    /// Returns `None` when the store exists but is in the tombstone state.
    /// Fails with `StoreNotFound` when the header reports the store is
    /// unknown, or when the response carries no store at all.
    pub async fn get_store(&self, store_id: u64) -> Result<Option<Store>> {
        let request = GetStoreRequest {
            header: Some(self.header()),
            store_id,
        };
        let response = self
            .call_raw(request, |mut client, request| async move {
                client.get_store(request).await
            })
            .await?;

        let is_store_not_found = response
            .header
            .as_ref()
            .and_then(|h| h.error.as_ref())
            .is_some_and(|e| e.r#type == ErrorType::StoreNotFound as i32);
        if is_store_not_found {
            return Err(Error::StoreNotFound(store_id));
        }
        if let Some(err) = header_error(&response.header) {
            self.schedule_leader_recheck();
            return Err(err);
        }

        match response.store {
            Some(store) if store.state == StoreState::Tombstone as i32 => Ok(None),
            Some(store) => Ok(Some(store)),
            None => Err(Error::StoreNotFound(store_id)),
        }
    }

    pub async fn get_all_stores(&self, exclude_tombstone_stores: bool) -> Result<Vec<Store>> {
        let request = GetAllStoresRequest {
            header: Some(self.header()),
            exclude_tombstone_stores,
        };
        let response = self
            .call(request, |mut client, request| async move {
                client.get_all_stores(request).await
            })
            .await?;
        Ok(response.stores)
    }

    /// The server enforces monotonicity: a value lower than its current
    /// safe point is ignored and the prior value is returned.
    pub async fn update_gc_safe_point(&self, safe_point: u64) -> Result<u64> {
        let request = UpdateGcSafePointRequest {
            header: Some(self.header()),
            safe_point,
        };
        let response = self
            .call(request, |mut client, request| async move {
                client.update_gc_safe_point(request).await
            })
            .await?;
        Ok(response.new_safe_point)
    }

    pub async fn scatter_region(&self, region_id: u64) -> Result<()> {
        let request = ScatterRegionRequest {
            header: Some(self.header()),
            region_id,
        };
        self.call(request, |mut client, request| async move {
            client.scatter_region(request).await
        })
        .await?;
        Ok(())
    }

    pub async fn get_operator(&self, region_id: u64) -> Result<i32> {
        let request = GetOperatorRequest {
            header: Some(self.header()),
            region_id,
        };
        let response = self
            .call(request, |mut client, request| async move {
                client.get_operator(request).await
            })
            .await?;
        Ok(response.status)
    }

    /// Signals shutdown, joins all three loops, and closes every registry
    /// channel. Any request still queued in the TSO pipeline is revoked by
    /// the sender loop with a closing error as part of its own exit path.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let loops = self.inner.loops.lock().await.take();
        if let Some(loops) = loops {
            let _ = loops.leader.await;
            let _ = loops.tso_sender.await;
            let _ = loops.tso_watcher.await;
        }
        self.inner.registry.close_all().await;
    }

    fn header(&self) -> RequestHeader {
        RequestHeader {
            cluster_id: self.inner.cluster_id,
        }
    }

    fn schedule_leader_recheck(&self) {
        let _ = self.inner.leader_recheck_tx.try_send(());
    }

    /// Like `call_raw`, but also surfaces a server-embedded header error as
    /// `Error::Rpc` instead of returning a transport-successful response
    /// that the caller has to inspect itself.
    async fn call<Req, Resp, F, Fut>(&self, request: Req, f: F) -> Result<Resp>
    where
        F: FnOnce(PdGrpcClient<Channel>, tonic::Request<Req>) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<Resp>, tonic::Status>>,
        Resp: HasHeader,
    {
        let response = self.call_raw(request, f).await?;
        if let Some(err) = header_error(response.response_header()) {
            self.schedule_leader_recheck();
            return Err(err);
        }
        Ok(response)
    }

    /// Applies the standard per-call timeout, routes to the leader channel,
    /// and schedules a leader re-check on any transport error before
    /// propagating it. Does not inspect the response header.
    async fn call_raw<Req, Resp, F, Fut>(&self, request: Req, f: F) -> Result<Resp>
    where
        F: FnOnce(PdGrpcClient<Channel>, tonic::Request<Req>) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<Resp>, tonic::Status>>,
    {
        let channel = self.inner.registry.leader_channel().await?;
        let client = PdGrpcClient::new(channel);
        let wrapped = tonic::Request::new(request);
        match tokio::time::timeout(self.inner.config.rpc_timeout, f(client, wrapped)).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => {
                self.schedule_leader_recheck();
                Err(Error::from(status))
            }
            Err(_) => {
                self.schedule_leader_recheck();
                Err(Error::Rpc("rpc call timed out".into()))
            }
        }
    }
}

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use pd_client_proto::{
    GetAllStoresRequest, GetAllStoresResponse, GetMembersRequest, GetMembersResponse,
    GetOperatorRequest, GetOperatorResponse, GetRegionByIdRequest, GetRegionRequest,
    GetRegionResponse, GetStoreRequest, GetStoreResponse, Member, Pd, PdServer,
    ResponseHeader, ScanRegionsRequest, ScanRegionsResponse, ScatterRegionRequest,
    ScatterRegionResponse, Timestamp, TsoRequest, TsoResponse, UpdateGcSafePointRequest,
    UpdateGcSafePointResponse,
};

pub const CLUSTER_ID: u64 = 42;

struct State {
    leader_url: Mutex<String>,
    tso_script: Mutex<VecDeque<(u32, i64, i64)>>,
    gc_safe_point: Mutex<u64>,
}

/// Scriptable in-process mock of a single PD node, used to drive the
/// end-to-end scenarios without a real cluster.
#[derive(Clone)]
pub struct MockPd {
    state: Arc<State>,
}

impl MockPd {
    pub fn new(leader_url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(State {
                leader_url: Mutex::new(leader_url.into()),
                tso_script: Mutex::new(VecDeque::new()),
                gc_safe_point: Mutex::new(0),
            }),
        }
    }

    pub fn set_leader_url(&self, url: impl Into<String>) {
        *self.state.leader_url.lock() = url.into();
    }

    /// Queues a scripted `(count, physical, logical)` TSO response to be
    /// returned for the next batch received.
    pub fn push_tso_response(&self, count: u32, physical: i64, logical: i64) {
        self.state
            .tso_script
            .lock()
            .push_back((count, physical, logical));
    }

    fn header(&self) -> ResponseHeader {
        ResponseHeader {
            cluster_id: CLUSTER_ID,
            error: None,
        }
    }
}

type RpcResult<T> = Result<Response<T>, Status>;

#[tonic::async_trait]
impl Pd for MockPd {
    async fn get_members(
        &self,
        _request: Request<GetMembersRequest>,
    ) -> RpcResult<GetMembersResponse> {
        let leader_url = self.state.leader_url.lock().clone();
        let member = Member {
            member_id: 1,
            name: "mock-pd-0".into(),
            peer_urls: vec![],
            client_urls: vec![leader_url],
        };
        Ok(Response::new(GetMembersResponse {
            header: Some(self.header()),
            members: vec![member.clone()],
            leader: Some(member),
        }))
    }

    type TsoStream =
        Pin<Box<dyn Stream<Item = Result<TsoResponse, Status>> + Send + 'static>>;

    async fn tso(
        &self,
        request: Request<Streaming<TsoRequest>>,
    ) -> RpcResult<Self::TsoStream> {
        let mut inbound = request.into_inner();
        let state = self.state.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            while let Ok(Some(req)) = inbound.message().await {
                let scripted = state.tso_script.lock().pop_front();
                let response = match scripted {
                    Some((count, physical, logical)) => TsoResponse {
                        header: Some(ResponseHeader {
                            cluster_id: CLUSTER_ID,
                            error: None,
                        }),
                        count,
                        timestamp: Some(Timestamp { physical, logical }),
                    },
                    None => TsoResponse {
                        header: Some(ResponseHeader {
                            cluster_id: CLUSTER_ID,
                            error: None,
                        }),
                        count: req.count,
                        timestamp: Some(Timestamp {
                            physical: 0,
                            logical: req.count as i64,
                        }),
                    },
                };
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_region(
        &self,
        _request: Request<GetRegionRequest>,
    ) -> RpcResult<GetRegionResponse> {
        Ok(Response::new(GetRegionResponse {
            header: Some(self.header()),
            region: None,
            leader: None,
        }))
    }

    async fn get_prev_region(
        &self,
        _request: Request<GetRegionRequest>,
    ) -> RpcResult<GetRegionResponse> {
        Ok(Response::new(GetRegionResponse {
            header: Some(self.header()),
            region: None,
            leader: None,
        }))
    }

    async fn get_region_by_id(
        &self,
        _request: Request<GetRegionByIdRequest>,
    ) -> RpcResult<GetRegionResponse> {
        Ok(Response::new(GetRegionResponse {
            header: Some(self.header()),
            region: None,
            leader: None,
        }))
    }

    async fn scan_regions(
        &self,
        _request: Request<ScanRegionsRequest>,
    ) -> RpcResult<ScanRegionsResponse> {
        Ok(Response::new(ScanRegionsResponse {
            header: Some(self.header()),
            region_results: vec![],
        }))
    }

    async fn get_store(&self, _request: Request<GetStoreRequest>) -> RpcResult<GetStoreResponse> {
        Ok(Response::new(GetStoreResponse {
            header: Some(self.header()),
            store: None,
        }))
    }

    async fn get_all_stores(
        &self,
        _request: Request<GetAllStoresRequest>,
    ) -> RpcResult<GetAllStoresResponse> {
        Ok(Response::new(GetAllStoresResponse {
            header: Some(self.header()),
            stores: vec![],
        }))
    }

    async fn update_gc_safe_point(
        &self,
        request: Request<UpdateGcSafePointRequest>,
    ) -> RpcResult<UpdateGcSafePointResponse> {
        let requested = request.into_inner().safe_point;
        let mut current = self.state.gc_safe_point.lock();
        if requested > *current {
            *current = requested;
        }
        Ok(Response::new(UpdateGcSafePointResponse {
            header: Some(self.header()),
            new_safe_point: *current,
        }))
    }

    async fn scatter_region(
        &self,
        _request: Request<ScatterRegionRequest>,
    ) -> RpcResult<ScatterRegionResponse> {
        Ok(Response::new(ScatterRegionResponse {
            header: Some(self.header()),
        }))
    }

    async fn get_operator(
        &self,
        _request: Request<GetOperatorRequest>,
    ) -> RpcResult<GetOperatorResponse> {
        Ok(Response::new(GetOperatorResponse {
            header: Some(self.header()),
            region_id: 0,
            desc: vec![],
            status: 0,
        }))
    }
}

/// Binds `mock` to an ephemeral local port and serves it on a background
/// task. Returns the `http://` URL callers should connect to.
pub async fn spawn_mock_pd(mock: MockPd) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

    tokio::spawn(async move {
        Server::builder()
            .add_service(PdServer::new(mock))
            .serve_with_incoming(incoming)
            .await
            .ok();
    });

    format!("http://{addr}")
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;

use pd_client_proto::{pd_client::PdClient as PdGrpcClient, RequestHeader, Timestamp, TsoRequest as WireTsoRequest, TsoResponse};

use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::tso::request::QueuedTsoRequest;
use crate::tso::watcher::DeadlineRecord;

enum State {
    Disconnected,
    Ready {
        outbound: mpsc::Sender<WireTsoRequest>,
        inbound: Streaming<TsoResponse>,
    },
}

pub(crate) struct SenderLoop {
    registry: Arc<ConnectionRegistry>,
    cluster_id: u64,
    queue_rx: mpsc::Receiver<QueuedTsoRequest>,
    deadline_tx: mpsc::Sender<DeadlineRecord>,
    leader_recheck_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
    batch_deadline: Duration,
}

impl SenderLoop {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        cluster_id: u64,
        queue_rx: mpsc::Receiver<QueuedTsoRequest>,
        deadline_tx: mpsc::Sender<DeadlineRecord>,
        leader_recheck_tx: mpsc::Sender<()>,
        shutdown: CancellationToken,
        batch_deadline: Duration,
    ) -> Self {
        Self {
            registry,
            cluster_id,
            queue_rx,
            deadline_tx,
            leader_recheck_tx,
            shutdown,
            batch_deadline,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut state = State::Disconnected;
        loop {
            state = match state {
                State::Disconnected => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    match self.open_stream().await {
                        Ok((outbound, inbound)) => State::Ready { outbound, inbound },
                        Err(err) => {
                            log::warn!("failed to open tso stream: {err}");
                            let _ = self.leader_recheck_tx.try_send(());
                            self.revoke_queued(err).await;
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                                _ = self.shutdown.cancelled() => break,
                            }
                            State::Disconnected
                        }
                    }
                }
                State::Ready { outbound, inbound } => {
                    self.run_ready(outbound, inbound).await
                }
            };
        }
        self.revoke_queued(Error::Closing).await;
    }

    async fn run_ready(
        &mut self,
        outbound: mpsc::Sender<WireTsoRequest>,
        mut inbound: Streaming<TsoResponse>,
    ) -> State {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                State::Disconnected
            }
            first = self.queue_rx.recv() => {
                let Some(first) = first else {
                    return State::Disconnected;
                };
                let mut batch = vec![first];
                let drained_at_entry = self.queue_rx.len();
                for _ in 0..drained_at_entry {
                    match self.queue_rx.try_recv() {
                        Ok(req) => batch.push(req),
                        Err(_) => break,
                    }
                }

                let (timeout_tx, timeout_rx) = oneshot::channel();
                let (done_tx, done_rx) = oneshot::channel();
                let _ = self.deadline_tx.send(DeadlineRecord { timeout_tx, done_rx }).await;

                let result = Self::process_batch(
                    self.cluster_id,
                    &outbound,
                    &mut inbound,
                    batch,
                    timeout_rx,
                ).await;
                let _ = done_tx.send(());

                match result {
                    Ok(()) => State::Ready { outbound, inbound },
                    Err(err) => {
                        log::warn!("tso batch failed: {err}");
                        let _ = self.leader_recheck_tx.try_send(());
                        State::Disconnected
                    }
                }
            }
        }
    }

    async fn process_batch(
        cluster_id: u64,
        outbound: &mpsc::Sender<WireTsoRequest>,
        inbound: &mut Streaming<TsoResponse>,
        requests: Vec<QueuedTsoRequest>,
        mut timeout_rx: oneshot::Receiver<()>,
    ) -> Result<()> {
        let count = requests.len() as u32;
        let wire_request = WireTsoRequest {
            header: Some(RequestHeader { cluster_id }),
            count,
        };

        let send_result = tokio::select! {
            biased;
            _ = &mut timeout_rx => Err(Error::BatchTimeout),
            result = outbound.send(wire_request) => result.map_err(|e| Error::StreamSend(e.to_string())),
        };
        if let Err(err) = send_result {
            Self::fail_all(requests, err.clone());
            return Err(err);
        }

        let recv_result = tokio::select! {
            biased;
            _ = &mut timeout_rx => Err(Error::BatchTimeout),
            result = inbound.message() => result.map_err(Error::from),
        };

        let response = match recv_result {
            Ok(Some(response)) => response,
            Ok(None) => {
                let err = Error::StreamRecv("tso stream closed by server".into());
                Self::fail_all(requests, err.clone());
                return Err(err);
            }
            Err(err) => {
                Self::fail_all(requests, err.clone());
                return Err(err);
            }
        };

        if response.count != count {
            let err = Error::BatchLengthMismatch {
                sent: count,
                got: response.count,
            };
            Self::fail_all(requests, err.clone());
            return Err(err);
        }

        let Timestamp { physical, logical } = response.timestamp.unwrap_or_default();
        for (i, request) in requests.into_iter().enumerate() {
            let assigned = logical - count as i64 + 1 + i as i64;
            let _ = request.result_tx.send(Ok((physical, assigned)));
        }
        Ok(())
    }

    fn fail_all(requests: Vec<QueuedTsoRequest>, err: Error) {
        for request in requests {
            let _ = request.result_tx.send(Err(err.clone()));
        }
    }

    async fn revoke_queued(&mut self, err: Error) {
        let pending = self.queue_rx.len();
        for _ in 0..pending {
            match self.queue_rx.try_recv() {
                Ok(request) => {
                    let _ = request.result_tx.send(Err(err.clone()));
                }
                Err(_) => break,
            }
        }
    }

    async fn open_stream(
        &self,
    ) -> Result<(mpsc::Sender<WireTsoRequest>, Streaming<TsoResponse>)> {
        let channel = self.registry.leader_channel().await?;
        let mut client = PdGrpcClient::new(channel);
        let (tx, rx) = mpsc::channel(16);
        let outbound_stream = ReceiverStream::new(rx);
        let response = client
            .tso(tonic::Request::new(outbound_stream))
            .await
            .map_err(Error::from)?;
        Ok((tx, response.into_inner()))
    }
}

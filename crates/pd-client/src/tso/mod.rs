mod request;
mod sender;
mod watcher;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use request::TsoRequestFuture;
use request::{FreeList, QueuedTsoRequest};
use watcher::DeadlineRecord;

use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;

/// Owns the submission queue and hands out futures for individual timestamp
/// requests. The sender loop and deadline watcher run as independent tasks
/// and are joined by the facade at shutdown.
pub(crate) struct TsoPipeline {
    queue_tx: mpsc::Sender<QueuedTsoRequest>,
    free_list: Arc<FreeList>,
}

pub(crate) struct TsoPipelineHandles {
    pub sender: tokio::task::JoinHandle<()>,
    pub watcher: tokio::task::JoinHandle<()>,
}

impl TsoPipeline {
    pub(crate) fn spawn(
        registry: Arc<ConnectionRegistry>,
        cluster_id: u64,
        queue_capacity: usize,
        batch_deadline: Duration,
        leader_recheck_tx: mpsc::Sender<()>,
        shutdown: CancellationToken,
    ) -> (Self, TsoPipelineHandles) {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        let (deadline_tx, deadline_rx) = mpsc::channel::<DeadlineRecord>(1);

        let sender_loop = sender::SenderLoop::new(
            registry,
            cluster_id,
            queue_rx,
            deadline_tx,
            leader_recheck_tx,
            shutdown.clone(),
            batch_deadline,
        );
        let sender = tokio::spawn(sender_loop.run());
        let watcher = tokio::spawn(watcher::run(deadline_rx, batch_deadline, shutdown));

        (
            Self {
                queue_tx,
                free_list: Arc::new(FreeList::new(queue_capacity)),
            },
            TsoPipelineHandles { sender, watcher },
        )
    }

    /// Submits a timestamp request and returns a future resolving once the
    /// sender loop has assigned (or failed to assign) a timestamp.
    pub(crate) async fn request_tso(&self) -> Result<TsoRequestFuture> {
        let slot = self.free_list.acquire();
        let (result_tx, result_rx) = oneshot::channel();
        self.queue_tx
            .send(QueuedTsoRequest { result_tx })
            .await
            .map_err(|_| Error::Closing)?;
        Ok(TsoRequestFuture::new(
            result_rx,
            self.free_list.clone(),
            slot,
        ))
    }
}

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Handed from the sender loop to the watcher for a single in-flight batch.
pub(crate) struct DeadlineRecord {
    /// Fired by the watcher if the deadline elapses first; the sender loop
    /// races a `recv` against this to unblock.
    pub timeout_tx: oneshot::Sender<()>,
    /// Fired by the sender loop once the batch completes, so the watcher
    /// stops waiting on this record.
    pub done_rx: oneshot::Receiver<()>,
}

/// Consumes deadline records one at a time and enforces the batch deadline.
/// Runs as its own task because the sender loop is blocked inside the TSO
/// stream's `recv` while a batch is outstanding; only a separate task can
/// apply a deadline without folding a timeout into the RPC layer itself.
pub(crate) async fn run(
    mut deadline_rx: mpsc::Receiver<DeadlineRecord>,
    deadline: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            record = deadline_rx.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = record.done_rx => {}
            _ = tokio::time::sleep(deadline) => {
                log::warn!("tso batch deadline of {:?} exceeded, cancelling stream", deadline);
                let _ = record.timeout_tx.send(());
            }
        }
    }
}

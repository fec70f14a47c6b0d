use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Retries `f` up to `attempts` times with `interval` between tries, bailing
/// out early if `shutdown` fires. Used for the two bootstrap steps: cluster
/// ID initialization and the first leader update.
pub(crate) async fn retry<F, Fut, T>(
    attempts: u32,
    interval: Duration,
    shutdown: &CancellationToken,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = Error::Bootstrap("no attempts configured".into());
    for attempt in 1..=attempts {
        if shutdown.is_cancelled() {
            return Err(Error::Closing);
        }
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                log::warn!("bootstrap attempt {attempt}/{attempts} failed: {err}");
                last_err = err;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.cancelled() => return Err(Error::Closing),
                }
            }
        }
    }
    Err(Error::Bootstrap(format!(
        "exhausted {attempts} retries, last error: {last_err}"
    )))
}

//! Best-effort broadcast with bounded concurrency and per-send timeouts.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::transport::SendError;

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Limits applied to every broadcast.
#[derive(Debug, Clone, Copy)]
pub struct FanOutLimits {
    pub concurrency: usize,
    pub send_timeout: Duration,
}

impl Default for FanOutLimits {
    fn default() -> Self {
        Self {
            concurrency: 8,
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Run `send` for every recipient. A failure or timeout on one recipient
/// never cancels the others; only confirmed sends are counted as delivered.
pub async fn fan_out<F, Fut>(recipients: Vec<i64>, limits: FanOutLimits, send: F) -> FanOutReport
where
    F: Fn(i64) -> Fut,
    Fut: Future<Output = Result<(), SendError>>,
{
    let send = &send;
    let results: Vec<(i64, Result<(), SendError>)> = stream::iter(recipients)
        .map(|to| async move {
            let result = match tokio::time::timeout(limits.send_timeout, send(to)).await {
                Ok(result) => result,
                Err(_) => Err(SendError::Timeout),
            };
            (to, result)
        })
        .buffer_unordered(limits.concurrency.max(1))
        .collect()
        .await;

    let mut report = FanOutReport::default();
    for (to, result) in results {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!("Delivery to {} failed: {e}", to);
                report.failed += 1;
            }
        }
    }
    debug!("Fan-out finished: {} delivered, {} failed", report.delivered, report.failed);
    report
}

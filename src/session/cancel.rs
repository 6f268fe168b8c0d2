//! Cancellation
//!
//! A cloneable handle over a shared cancellation token. Caller cancellation
//! and the request timeout trip the same token; the recorded reason is only
//! used for the final notification.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Why an in-flight request stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled through its handle
    Caller,

    /// The request timeout fired
    Timeout,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Caller => write!(f, "cancelled by caller"),
            CancelReason::Timeout => write!(f, "cancelled by timeout"),
        }
    }
}

/// A handle that can be used to request cancellation
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<CancelReason>>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Caller);
    }

    /// Cancel with an explicit reason. The first reason recorded wins.
    pub fn cancel_with(&self, reason: CancelReason) {
        {
            let mut current = self.reason.lock();
            if current.is_none() {
                *current = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason recorded at cancellation, if cancelled
    pub fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock()
    }

    /// Drive `fut` until it completes, the handle is cancelled, or `deadline`
    /// passes. A passed deadline cancels the handle with
    /// [`CancelReason::Timeout`]. Cancellation is checked before polling `fut`.
    pub async fn run_until<F: Future>(
        &self,
        fut: F,
        deadline: Option<Instant>,
    ) -> Result<F::Output, CancelReason> {
        let timer = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.current_reason()),
            _ = timer => {
                info!("request timed out");
                self.cancel_with(CancelReason::Timeout);
                Err(self.current_reason())
            }
            out = fut => Ok(out),
        }
    }

    fn current_reason(&self) -> CancelReason {
        self.reason().unwrap_or(CancelReason::Caller)
    }
}

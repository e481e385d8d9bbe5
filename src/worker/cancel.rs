//! Settle-once cancellation for one in-flight request.

use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Who cancelled a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Caller,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Completed,
    Cancelled(CancelReason),
}

/// Pairs a [`CancellationToken`] with a first-writer-wins settlement.
///
/// The request loop, the timer and the abort path all race to settle the same
/// handle. Exactly one of them wins; a timer that fires after the loop has
/// completed is a no-op, and so is an abort that arrives too late.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
    settled: Arc<OnceLock<Settlement>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel unless already settled. Returns whether this call won.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let won = self.settled.set(Settlement::Cancelled(reason)).is_ok();
        if won {
            self.token.cancel();
        }
        won
    }

    /// Mark the request as finished by its own loop.
    ///
    /// Fails with the reason if a cancellation got there first.
    pub fn complete(&self) -> Result<(), CancelReason> {
        match self.settled.set(Settlement::Completed) {
            Ok(()) => Ok(()),
            Err(_) => match self.settled.get() {
                Some(Settlement::Cancelled(reason)) => Err(*reason),
                _ => Ok(()),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

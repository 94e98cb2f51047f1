//! Per-call cancellation and deadline tracking.
//!
//! Handlers build a [`CallContext`] from the request metadata and call
//! [`CallContext::check`] before each unit of work, so a call whose client has
//! gone away or whose deadline has passed stops early instead of running to
//! completion.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::metadata::MetadataMap;

use crate::error::StoreError;

/// Metadata key carrying the caller's timeout, as sent by gRPC clients.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Cancellation state of one in-flight call.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context with no deadline that is cancelled only explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Builds a context from request metadata, honoring `grpc-timeout` when present.
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map_or_else(Self::new, Self::with_timeout)
    }

    /// Marks the call as cancelled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The instant after which the call is considered timed out, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with `Canceled` or `DeadlineExceeded` once either condition holds.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.token.is_cancelled() {
            return Err(StoreError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Cancels this context when every receiver of `tx` has been dropped.
    ///
    /// The watcher holds a clone of `tx`, so it must be released when the
    /// producer finishes: keep the returned guard alive for exactly as long as
    /// the producer runs.
    pub fn cancel_on_close<T: Send + 'static>(&self, tx: &mpsc::Sender<T>) -> DropGuard {
        let tx = tx.clone();
        let token = self.token.clone();
        let finished = CancellationToken::new();
        let guard = finished.clone().drop_guard();

        tokio::spawn(async move {
            tokio::select! {
                () = tx.closed() => token.cancel(),
                () = finished.cancelled() => {}
            }
        });

        guard
    }
}

/// Parses a `grpc-timeout` value: at most eight ASCII digits followed by one of
/// `H`, `M`, `S`, `m`, `u` or `n`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len().checked_sub(1)?);
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 60 * 60)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

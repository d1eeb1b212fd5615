//! Publish queue abstraction (§5 "Shared state: Publish queue", §6).
//!
//! Grounded on this codebase's `persistent_queue.rs`: a bounded `flume`
//! channel is the transport, with metrics recorded at each send outcome.
//! Two differences from that reference, both driven by §5 of this core's
//! concurrency model (synchronous OS threads via `rayon::scope`, not
//! tokio tasks): posts block the calling worker thread instead of
//! `.await`ing, and there is no file-backed slow path — a disconnected
//! consumer is a hard transport error here, not something to buffer to
//! disk, since this core has no durable-queue requirement in its scope.

use std::time::{Duration, Instant};

use tracing::warn;

/// Outcome of a [`PublishQueue::post`] call, matching the `>0` / `0` /
/// `negative` convention in §6 ("returns >0 on success, 0 on timeout,
/// negative on error").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Ok,
    Timeout,
    Error,
}

impl PostOutcome {
    pub fn as_code(&self) -> i32 {
        match self {
            PostOutcome::Ok => 1,
            PostOutcome::Timeout => 0,
            PostOutcome::Error => -1,
        }
    }
}

/// A bounded, many-producer publish queue. Each beam worker and the
/// dispatcher post byte-blobs (already-encoded records); the consumer is
/// an external formatter/sink that owns the receiving end of the channel
/// returned alongside this handle by [`PublishQueue::new`].
pub struct PublishQueue {
    name: String,
    tx: flume::Sender<bytes::Bytes>,
}

impl PublishQueue {
    /// Build a queue and hand back the consumer's receiving end. The
    /// receiver is deliberately not retained on `PublishQueue` itself —
    /// per §5, the consumer is an external formatter, not this type.
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, flume::Receiver<bytes::Bytes>) {
        let (tx, rx) = flume::bounded(capacity);
        (PublishQueue { name: name.into(), tx }, rx)
    }

    /// Post a single record, retrying internally until `timeout` elapses.
    /// `postCopy`/`postRef` in §6 both funnel through here: callers
    /// choose whether to clone or move their buffer into `bytes::Bytes`
    /// before calling, this method doesn't distinguish the two.
    pub fn post(&self, payload: bytes::Bytes, timeout: Duration) -> PostOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            match self.tx.try_send(payload.clone()) {
                Ok(()) => {
                    metrics::counter!(format!("queue.{}.posted", self.name)).increment(1);
                    return PostOutcome::Ok;
                }
                Err(flume::TrySendError::Disconnected(_)) => {
                    metrics::counter!(format!("queue.{}.post_dropped", self.name)).increment(1);
                    return PostOutcome::Error;
                }
                Err(flume::TrySendError::Full(_)) => {
                    if Instant::now() >= deadline {
                        metrics::counter!(format!("queue.{}.post_timeouts", self.name)).increment(1);
                        return PostOutcome::Timeout;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Retry `post` indefinitely, polling `active` so a cancelled worker
    /// can unwind instead of blocking forever on a full queue (§5
    /// "Cancellation"). Only a hard transport error returns `post_dropped`.
    pub fn post_until_delivered_or_cancelled(
        &self,
        payload: bytes::Bytes,
        retry_timeout: Duration,
        active: &std::sync::atomic::AtomicBool,
    ) -> PostOutcome {
        loop {
            if !active.load(std::sync::atomic::Ordering::Relaxed) {
                return PostOutcome::Error;
            }
            match self.post(payload.clone(), retry_timeout) {
                PostOutcome::Ok => return PostOutcome::Ok,
                PostOutcome::Error => return PostOutcome::Error,
                PostOutcome::Timeout => {
                    warn!("queue '{}' backpressure, retrying", self.name);
                    continue;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn sender(&self) -> flume::Sender<bytes::Bytes> {
        self.tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_succeeds_when_capacity_available() {
        let (queue, _rx) = PublishQueue::new("test", 4);
        let outcome = queue.post(bytes::Bytes::from_static(b"hello"), Duration::from_millis(50));
        assert_eq!(outcome, PostOutcome::Ok);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn post_times_out_when_full_and_undrained() {
        let (queue, _rx) = PublishQueue::new("test", 1);
        queue.post(bytes::Bytes::from_static(b"a"), Duration::from_millis(10));
        let outcome = queue.post(bytes::Bytes::from_static(b"b"), Duration::from_millis(10));
        assert_eq!(outcome, PostOutcome::Timeout);
    }

    #[test]
    fn post_errors_once_receiver_is_dropped() {
        let (queue, rx) = PublishQueue::new("test", 1);
        drop(rx);
        let outcome = queue.post(bytes::Bytes::from_static(b"a"), Duration::from_millis(10));
        assert_eq!(outcome, PostOutcome::Error);
    }

    #[test]
    fn recv_timeout_returns_posted_payload() {
        let (queue, rx) = PublishQueue::new("test", 4);
        queue.post(bytes::Bytes::from_static(b"payload"), Duration::from_millis(10));
        let received = rx.recv_timeout(Duration::from_millis(50));
        assert_eq!(received, Ok(bytes::Bytes::from_static(b"payload")));
    }

    #[test]
    fn post_until_delivered_or_cancelled_stops_when_active_flag_clears() {
        let (queue, _rx) = PublishQueue::new("test", 1);
        queue.post(bytes::Bytes::from_static(b"a"), Duration::from_millis(1)).as_code();
        let active = std::sync::atomic::AtomicBool::new(false);
        let outcome = queue.post_until_delivered_or_cancelled(
            bytes::Bytes::from_static(b"b"),
            Duration::from_millis(1),
            &active,
        );
        assert_eq!(outcome, PostOutcome::Error);
    }
}

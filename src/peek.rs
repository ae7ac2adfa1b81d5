//! Peek coordinator: the bounded-wait handshake between an operator's peek
//! request and a worker's asynchronous payload reply.
//!
//! An operator request registers interest in a hash and waits on a oneshot
//! channel; the worker's reply stores the payload and wakes every waiter.
//! The wait is bounded by `tokio::time::timeout`, so only the calling
//! request suspends. A reply arriving after the timeout is still stored and
//! satisfies the next call.

use dashmap::{DashMap, DashSet};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

#[derive(Default)]
pub struct PeekCoordinator {
    /// Hashes workers are currently being told to capture
    pending: DashSet<String>,
    /// Most recent capture per hash; overwritten on each new reply
    payloads: DashMap<String, Vec<u8>>,
    /// Requests waiting for a capture, woken on reply
    waiters: DashMap<String, Vec<oneshot::Sender<Vec<u8>>>>,
}

impl PeekCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently mark a hash for capture.
    pub fn request_peek(&self, message_hash: &str) {
        self.pending.insert(message_hash.to_string());
    }

    /// Should a worker reporting this hash send us its payload?
    pub fn is_pending(&self, message_hash: &str) -> bool {
        self.pending.contains(message_hash)
    }

    /// Store a worker's capture, stop asking for more, wake all waiters.
    pub fn submit_reply(&self, message_hash: &str, payload: Vec<u8>) {
        self.payloads
            .insert(message_hash.to_string(), payload.clone());

        // Workers stop being told to capture once one capture has arrived
        self.pending.remove(message_hash);

        if let Some((_, waiters)) = self.waiters.remove(message_hash) {
            for waiter in waiters {
                // A waiter that already timed out has dropped its receiver
                let _ = waiter.send(payload.clone());
            }
        }
    }

    /// The most recent capture for a hash, if any.
    pub fn get_payload(&self, message_hash: &str) -> Option<Vec<u8>> {
        self.payloads.get(message_hash).map(|p| p.value().clone())
    }

    /// Register interest and wait until a payload arrives or `wait` elapses.
    ///
    /// First reply wins; `None` on timeout. A late reply does not
    /// retroactively satisfy a timed-out call but remains visible to the
    /// next one.
    pub async fn await_peek(&self, message_hash: &str, wait: Duration) -> Option<Vec<u8>> {
        self.request_peek(message_hash);

        if let Some(payload) = self.get_payload(message_hash) {
            return Some(payload);
        }

        let (tx, rx) = oneshot::channel();
        self.waiters
            .entry(message_hash.to_string())
            .or_default()
            .push(tx);

        // A reply may have landed between the store check and registration
        if let Some(payload) = self.get_payload(message_hash) {
            return Some(payload);
        }

        match timeout(wait, rx).await {
            Ok(Ok(payload)) => Some(payload),
            _ => {
                // Drop our abandoned waiter slot so the list cannot grow
                // unbounded for a hash that never gets a reply
                if let Some(mut waiters) = self.waiters.get_mut(message_hash) {
                    waiters.retain(|w| !w.is_closed());
                }
                None
            }
        }
    }

    /// Forget all pending requests, captures and waiters.
    pub fn clear(&self) {
        self.pending.clear();
        self.payloads.clear();
        // Dropping the senders makes any in-flight waits resolve to timeout
        self.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::sleep;

    #[tokio::test]
    async fn await_times_out_without_a_reply() {
        let coordinator = PeekCoordinator::new();
        let result = coordinator
            .await_peek("h1", Duration::from_millis(50))
            .await;
        assert!(result.is_none());
        // Interest was registered even though the wait timed out
        assert!(coordinator.is_pending("h1"));
    }

    #[tokio::test]
    async fn reply_within_the_window_satisfies_the_wait() {
        let coordinator = Arc::new(PeekCoordinator::new());

        let replier = coordinator.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            replier.submit_reply("h1", b"payload".to_vec());
        });

        let result = coordinator
            .await_peek("h1", Duration::from_millis(500))
            .await;
        assert_eq!(result, Some(b"payload".to_vec()));
        // One capture is enough; workers are no longer asked
        assert!(!coordinator.is_pending("h1"));
    }

    #[tokio::test]
    async fn late_reply_is_visible_to_the_next_call() {
        let coordinator = PeekCoordinator::new();

        let timed_out = coordinator
            .await_peek("h1", Duration::from_millis(20))
            .await;
        assert!(timed_out.is_none());

        coordinator.submit_reply("h1", b"late".to_vec());

        let retry = coordinator
            .await_peek("h1", Duration::from_millis(20))
            .await;
        assert_eq!(retry, Some(b"late".to_vec()));
    }

    #[tokio::test]
    async fn newest_capture_overwrites_the_previous_one() {
        let coordinator = PeekCoordinator::new();
        coordinator.submit_reply("h1", b"first".to_vec());
        coordinator.submit_reply("h1", b"second".to_vec());
        assert_eq!(coordinator.get_payload("h1"), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn concurrent_waiters_all_receive_the_payload() {
        let coordinator = Arc::new(PeekCoordinator::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let waiter = coordinator.clone();
            handles.push(tokio::spawn(async move {
                waiter.await_peek("h1", Duration::from_millis(500)).await
            }));
        }

        sleep(Duration::from_millis(10)).await;
        coordinator.submit_reply("h1", b"shared".to_vec());

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(b"shared".to_vec()));
        }
    }

    #[tokio::test]
    async fn clear_forgets_pending_and_captures() {
        let coordinator = PeekCoordinator::new();
        coordinator.request_peek("h1");
        coordinator.submit_reply("h2", b"x".to_vec());

        coordinator.clear();

        assert!(!coordinator.is_pending("h1"));
        assert!(coordinator.get_payload("h2").is_none());
    }
}

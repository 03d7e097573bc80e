//! Broadcast dispatcher. Fans one message out to every registered client
//! except an optional excluded sender.
//!
//! Deliveries run concurrently and are each bounded by the configured send
//! timeout. Clients whose delivery fails are unregistered once the fan-out
//! pass has finished; failures never reach the caller.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use super::messages::OutboundMessage;
use super::registry::{ClientId, Frame, Registry};

/// Outcome of a single broadcast, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serialize `message` once and deliver it to everyone except `exclude`.
    pub async fn broadcast(
        &self,
        message: &OutboundMessage,
        exclude: Option<ClientId>,
    ) -> BroadcastReport {
        self.broadcast_frame(message.to_json().into(), exclude).await
    }

    /// Deliver an already serialized frame to everyone except `exclude`.
    pub async fn broadcast_frame(
        &self,
        frame: Frame,
        exclude: Option<ClientId>,
    ) -> BroadcastReport {
        let recipients: Vec<_> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|h| Some(h.id()) != exclude)
            .collect();

        if recipients.is_empty() {
            debug!("broadcast with no recipients");
            return BroadcastReport::default();
        }

        let timeout = self.send_timeout;
        let attempts = recipients.iter().map(|handle| {
            let frame = Arc::clone(&frame);
            async move { (handle.id(), handle.send(frame, timeout).await) }
        });
        let results = join_all(attempts).await;

        let mut report = BroadcastReport::default();
        let mut stale: Vec<ClientId> = Vec::new();
        for (client_id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(client_id, error = %e, "delivery failed, dropping client");
                    stale.push(client_id);
                }
            }
        }
        report.failed = stale.len();

        for client_id in stale {
            self.registry.remove(client_id).await;
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Registry::new(), Duration::from_millis(100))
    }

    async fn join(d: &Dispatcher) -> (ClientId, mpsc::Receiver<Frame>) {
        let (handle, rx) = d.registry().open(8);
        let id = handle.id();
        d.registry().add(handle).await;
        (id, rx)
    }

    fn payload(frame: &Frame) -> String {
        let v: serde_json::Value = serde_json::from_str(frame).unwrap();
        v["message"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn broadcast_with_no_clients_is_noop() {
        let d = dispatcher();
        let report = d.broadcast(&OutboundMessage::new("idle"), None).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let d = dispatcher();
        let (a, mut rx_a) = join(&d).await;
        let (_b, mut rx_b) = join(&d).await;
        let (_c, mut rx_c) = join(&d).await;

        let report = d.broadcast(&OutboundMessage::new("hello"), Some(a)).await;
        assert_eq!(report.delivered, 2);

        assert_eq!(payload(&rx_b.recv().await.unwrap()), "hello");
        assert_eq!(payload(&rx_c.recv().await.unwrap()), "hello");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_without_exclusion_reaches_everyone() {
        let d = dispatcher();
        let (_a, mut rx_a) = join(&d).await;
        let (_b, mut rx_b) = join(&d).await;

        d.broadcast(&OutboundMessage::new("all"), None).await;

        assert_eq!(payload(&rx_a.recv().await.unwrap()), "all");
        assert_eq!(payload(&rx_b.recv().await.unwrap()), "all");
    }

    #[tokio::test]
    async fn failed_client_is_removed_others_still_receive() {
        let d = dispatcher();
        let (_a, mut rx_a) = join(&d).await;
        let (b, rx_b) = join(&d).await;
        drop(rx_b);

        let report = d.broadcast(&OutboundMessage::new("x"), None).await;

        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(payload(&rx_a.recv().await.unwrap()), "x");
        assert!(!d.registry().contains(b).await);
        assert_eq!(d.registry().count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_client_times_out_without_blocking_others() {
        let d = dispatcher();
        let (_fast, mut rx_fast) = join(&d).await;

        let (slow_handle, _rx_slow) = d.registry().open(1);
        let slow = slow_handle.id();
        d.registry().add(slow_handle).await;

        // First broadcast fills the slow client's single-slot buffer.
        d.broadcast(&OutboundMessage::new("one"), None).await;
        let report = d.broadcast(&OutboundMessage::new("two"), None).await;

        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert!(!d.registry().contains(slow).await);
        assert_eq!(payload(&rx_fast.recv().await.unwrap()), "one");
        assert_eq!(payload(&rx_fast.recv().await.unwrap()), "two");
    }

    #[tokio::test]
    async fn all_recipients_share_one_timestamp() {
        let d = dispatcher();
        let (_a, mut rx_a) = join(&d).await;
        let (_b, mut rx_b) = join(&d).await;

        d.broadcast(&OutboundMessage::new("t"), None).await;

        let fa: serde_json::Value = serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
        let fb: serde_json::Value = serde_json::from_str(&rx_b.recv().await.unwrap()).unwrap();
        assert_eq!(fa["timestamp"], fb["timestamp"]);
    }

    #[tokio::test]
    async fn concurrent_senders_reach_every_recipient() {
        let d = dispatcher();
        let (s1, _rx_s1) = join(&d).await;
        let (s2, _rx_s2) = join(&d).await;
        let mut receivers = Vec::new();
        for _ in 0..5 {
            receivers.push(join(&d).await.1);
        }

        let d1 = d.clone();
        let d2 = d.clone();
        let t1 = tokio::spawn(async move {
            d1.broadcast(&OutboundMessage::new("from-1"), Some(s1)).await
        });
        let t2 = tokio::spawn(async move {
            d2.broadcast(&OutboundMessage::new("from-2"), Some(s2)).await
        });
        t1.await.unwrap();
        t2.await.unwrap();

        for rx in &mut receivers {
            let mut got = vec![
                payload(&rx.recv().await.unwrap()),
                payload(&rx.recv().await.unwrap()),
            ];
            got.sort();
            assert_eq!(got, vec!["from-1", "from-2"]);
        }
    }

    #[tokio::test]
    async fn identical_payloads_from_different_senders_both_delivered() {
        let d = dispatcher();
        let (a, mut rx_a) = join(&d).await;
        let (b, mut rx_b) = join(&d).await;

        d.broadcast(&OutboundMessage::new("same"), Some(a)).await;
        d.broadcast(&OutboundMessage::new("same"), Some(b)).await;

        assert_eq!(payload(&rx_a.recv().await.unwrap()), "same");
        assert_eq!(payload(&rx_b.recv().await.unwrap()), "same");
    }
}

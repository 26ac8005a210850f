// Out-of-band redirect capture.
//
// The embedder's network layer (a browser webRequest listener, a proxy) may
// see the custom-scheme token redirect before — or instead of — the flow's
// own HTTP responses do. This broker is the hand-off point: the embedder
// publishes observed redirects, the orchestrator waits on them with a
// deadline.
//
// One attempt at a time: a single buffered value and a single waiter.
// Delivery is exactly-once; a value published after the waiter timed out is
// dropped until the next `reset`.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use moodle_sso_core::urls::get_host;

#[derive(Default)]
struct Slot {
    allowed_hosts: Vec<String>,
    buffered: Option<String>,
    waiter: Option<oneshot::Sender<String>>,
    stale: bool,
}

/// Single-slot rendezvous between redirect observation and the login flow.
pub struct RedirectCaptureBroker {
    scheme_prefix: String,
    slot: Mutex<Slot>,
}

impl RedirectCaptureBroker {
    /// `scheme_prefix` is the full prefix a capture must carry, e.g.
    /// `moodlemobile://`.
    pub fn new(scheme_prefix: impl Into<String>) -> Self {
        Self {
            scheme_prefix: scheme_prefix.into(),
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Arm the broker for a new attempt: discard any buffered value, stale
    /// marker, and leftover waiter, and install the attempt's host
    /// allow-list. An empty list allows any host.
    pub fn reset(&self, allowed_hosts: &[String]) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Slot {
            allowed_hosts: allowed_hosts.to_vec(),
            ..Slot::default()
        };
    }

    /// Offer an observed redirect. `request_url` is the URL whose response
    /// redirected; `redirect_url` is where it pointed. Returns whether the
    /// value was accepted (delivered or buffered).
    pub fn publish(&self, request_url: &str, redirect_url: &str) -> bool {
        if !redirect_url.starts_with(&self.scheme_prefix) {
            return false;
        }
        let mut slot = self.slot.lock().unwrap();
        if slot.stale || !host_allowed(&slot.allowed_hosts, request_url) {
            return false;
        }
        if let Some(waiter) = slot.waiter.take() {
            // Receiver may already be gone if the race was won elsewhere
            let _ = waiter.send(redirect_url.to_string());
        } else if slot.buffered.is_none() {
            slot.buffered = Some(redirect_url.to_string());
        }
        true
    }

    /// Wait up to `timeout` for a capture. A value buffered before the call
    /// resolves immediately. On timeout the waiter is cleared and the broker
    /// goes stale so late captures cannot leak into a later attempt.
    pub async fn wait_for_capture(&self, timeout: Duration) -> Option<String> {
        let receiver = {
            let mut slot = self.slot.lock().unwrap();
            if let Some(buffered) = slot.buffered.take() {
                return Some(buffered);
            }
            let (tx, rx) = oneshot::channel();
            slot.waiter = Some(tx);
            rx
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(url)) => Some(url),
            _ => {
                let mut slot = self.slot.lock().unwrap();
                slot.waiter = None;
                slot.stale = true;
                None
            }
        }
    }
}

fn host_allowed(allowed: &[String], request_url: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(host) = get_host(request_url) else {
        return false;
    };
    allowed
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const CAPTURE: &str = "moodlemobile://token=QUJDOjo6WFlaOjo6c2ln";

    fn broker() -> RedirectCaptureBroker {
        let broker = RedirectCaptureBroker::new("moodlemobile://");
        broker.reset(&[]);
        broker
    }

    #[tokio::test]
    async fn test_buffered_before_wait() {
        let broker = broker();
        assert!(broker.publish("https://folio.example.my/launch", CAPTURE));
        let captured = broker.wait_for_capture(Duration::from_secs(1)).await;
        assert_eq!(captured.as_deref(), Some(CAPTURE));
    }

    #[tokio::test]
    async fn test_delivery_to_pending_waiter() {
        let broker = Arc::new(broker());
        let publisher = broker.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("https://folio.example.my/launch", CAPTURE);
        });
        let captured = broker.wait_for_capture(Duration::from_secs(1)).await;
        assert_eq!(captured.as_deref(), Some(CAPTURE));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_exactly_once() {
        let broker = broker();
        broker.publish("https://folio.example.my/launch", CAPTURE);
        assert!(broker.wait_for_capture(Duration::from_secs(1)).await.is_some());
        // Second wait must not see the same value again
        assert!(broker
            .wait_for_capture(Duration::from_millis(20))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_wrong_scheme_rejected() {
        let broker = broker();
        assert!(!broker.publish(
            "https://folio.example.my/launch",
            "https://folio.example.my/next"
        ));
    }

    #[tokio::test]
    async fn test_host_allow_list() {
        let broker = RedirectCaptureBroker::new("moodlemobile://");
        broker.reset(&["example.my".to_string()]);
        assert!(broker.publish("https://folio.example.my/launch", CAPTURE));
        broker.reset(&["example.my".to_string()]);
        assert!(!broker.publish("https://evil.example.com/launch", CAPTURE));
    }

    #[tokio::test]
    async fn test_wait_runs_out_the_full_window() {
        let broker = broker();
        let started = std::time::Instant::now();
        assert!(broker
            .wait_for_capture(Duration::from_millis(100))
            .await
            .is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "elapsed: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_stale_after_timeout() {
        let broker = broker();
        assert!(broker
            .wait_for_capture(Duration::from_millis(10))
            .await
            .is_none());
        // Late capture is dropped
        assert!(!broker.publish("https://folio.example.my/launch", CAPTURE));
        // Until the next attempt re-arms the broker
        broker.reset(&[]);
        assert!(broker.publish("https://folio.example.my/launch", CAPTURE));
    }

    #[tokio::test]
    async fn test_reset_discards_buffered() {
        let broker = broker();
        broker.publish("https://folio.example.my/launch", CAPTURE);
        broker.reset(&[]);
        assert!(broker
            .wait_for_capture(Duration::from_millis(20))
            .await
            .is_none());
    }
}

//! Background expiry sweep over the session store.
//!
//! Errors here never reach request handlers; a failed sweep is logged and
//! the next tick tries again.

use super::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Window used when reporting sessions that are close to expiring.
const EXPIRY_WARNING_WINDOW: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub cleaned: usize,
    pub expiring_soon: usize,
}

/// One pass over the store: unregister everything past its expiry and
/// report how many sessions are inside the warning window.
pub fn sweep(store: &SessionStore) -> SweepStats {
    let expired = store.expired_ids();
    for id in &expired {
        store.unregister(id);
        info!(session = %id, "Cleaned expired session");
    }

    let stats = SweepStats {
        cleaned: expired.len(),
        expiring_soon: store.expiring_within(EXPIRY_WARNING_WINDOW),
    };

    if stats.cleaned > 0 || stats.expiring_soon > 0 {
        info!(
            cleaned = stats.cleaned,
            expiring_soon = stats.expiring_soon,
            live = store.len(),
            "Session sweep complete"
        );
    } else {
        debug!(live = store.len(), "Session sweep found nothing to clean");
    }

    stats
}

/// Run the sweep on a fixed interval until cancelled. The transport holds
/// the matching [`CancellationToken`] and bounds its shutdown wait.
pub async fn run_cleanup_loop(
    store: Arc<SessionStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Session cleanup loop stopping");
                break;
            },
            _ = ticker.tick() => {
                sweep(&store);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, DEFAULT_SESSION_TTL};
    use std::collections::HashMap;

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = SessionStore::new();
        store
            .register(Session::new("live", DEFAULT_SESSION_TTL, HashMap::new()))
            .unwrap();
        store
            .register(Session::new("dead", Duration::ZERO, HashMap::new()))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let stats = sweep(&store);
        assert_eq!(stats.cleaned, 1);
        assert!(store.contains("live"));
        assert!(!store.contains("dead"));
    }

    #[tokio::test]
    async fn test_loop_exits_on_cancellation() {
        let store = Arc::new(SessionStore::new());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_cleanup_loop(
            store,
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cleanup loop did not stop in time")
            .unwrap();
    }
}

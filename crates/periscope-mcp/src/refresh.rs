//! Debounced re-fetching of discovery lists.
//!
//! Each `(server, list)` pair is an independent state machine:
//!
//! ```text
//! Idle --list_changed--> PendingRefresh --list_changed--> PendingRefresh (deadline moved)
//!                              |
//!                        deadline passes
//!                              v
//!                   Idle (refresh runs, outcome reported)
//! ```
//!
//! A burst of notifications therefore costs one fetch, issued one debounce
//! window after the last notification of the burst.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::McpResult;
use crate::notification::{ListKind, Notification};

/// Something that can re-fetch one list of one server.
#[async_trait]
pub trait ListRefresher: Send + Sync {
    /// Re-fetch `kind` for `server_id` and return the new item count.
    async fn refresh(&self, server_id: &str, kind: ListKind) -> McpResult<usize>;
}

/// State of one `(server, list)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Nothing scheduled.
    Idle,
    /// A refresh will run once the debounce window passes quietly.
    PendingRefresh,
}

/// Result of one debounced refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// The last notification of the burst.
    pub trigger: Notification,
    /// Server that was refreshed.
    pub server_id: String,
    /// List that was refreshed.
    pub kind: ListKind,
    /// Item count, or the error message.
    pub result: Result<usize, String>,
}

type Key = (String, ListKind);

#[derive(Debug)]
struct Pending {
    deadline: Instant,
    trigger: Notification,
}

/// Coalesces list-changed notifications and runs one refresh per burst.
pub struct AutoRefreshController {
    debounce: Duration,
    refresher: Arc<dyn ListRefresher>,
    pending: Arc<Mutex<HashMap<Key, Pending>>>,
    outcomes: mpsc::UnboundedSender<RefreshOutcome>,
}

impl std::fmt::Debug for AutoRefreshController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRefreshController")
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl AutoRefreshController {
    /// Create a controller. Outcomes are delivered on `outcomes`.
    #[must_use]
    pub fn new(
        debounce: Duration,
        refresher: Arc<dyn ListRefresher>,
        outcomes: mpsc::UnboundedSender<RefreshOutcome>,
    ) -> Self {
        Self {
            debounce,
            refresher,
            pending: Arc::new(Mutex::new(HashMap::new())),
            outcomes,
        }
    }

    /// Debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Feed a notification. Anything other than a list-changed notification
    /// is ignored.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn notify(&self, notification: &Notification) {
        let Some(kind) = notification.list_kind() else {
            return;
        };
        let key = (notification.server_id.clone(), kind);
        let deadline = Instant::now()
            .checked_add(self.debounce)
            .unwrap_or_else(Instant::now);

        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = pending.get_mut(&key) {
                entry.deadline = deadline;
                entry.trigger = notification.clone();
                debug!(server = %key.0, list = %kind, "Refresh postponed");
                return;
            }
            pending.insert(
                key.clone(),
                Pending {
                    deadline,
                    trigger: notification.clone(),
                },
            );
        }

        debug!(server = %key.0, list = %kind, "Refresh scheduled");
        tokio::spawn(run_timer(
            key,
            deadline,
            Arc::clone(&self.pending),
            Arc::clone(&self.refresher),
            self.outcomes.clone(),
        ));
    }

    /// Current state of one pair.
    #[must_use]
    pub fn state(&self, server_id: &str, kind: ListKind) -> RefreshState {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.contains_key(&(server_id.to_string(), kind)) {
            RefreshState::PendingRefresh
        } else {
            RefreshState::Idle
        }
    }

    /// Forget every pending refresh of one server.
    pub fn cancel_server(&self, server_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(server, _), _| server != server_id);
    }
}

/// Sleep until the (possibly moving) deadline, then refresh once.
async fn run_timer(
    key: Key,
    mut deadline: Instant,
    pending: Arc<Mutex<HashMap<Key, Pending>>>,
    refresher: Arc<dyn ListRefresher>,
    outcomes: mpsc::UnboundedSender<RefreshOutcome>,
) {
    let trigger = loop {
        tokio::time::sleep_until(deadline).await;
        let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get(&key).map(|entry| entry.deadline) {
            // Cancelled while we slept.
            None => return,
            Some(moved) if moved > deadline => deadline = moved,
            Some(_) => match map.remove(&key) {
                Some(entry) => break entry.trigger,
                None => return,
            },
        }
    };

    let (server_id, kind) = key;
    debug!(server = %server_id, list = %kind, "Refreshing list");
    let result = refresher
        .refresh(&server_id, kind)
        .await
        .map_err(|e| e.to_string());
    if let Err(e) = &result {
        warn!(server = %server_id, list = %kind, error = %e, "List refresh failed");
    }

    let outcome = RefreshOutcome {
        trigger,
        server_id,
        kind,
        result,
    };
    if outcomes.send(outcome).is_err() {
        debug!("Refresh outcome dropped; router is gone");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::McpError;

    #[derive(Default)]
    struct CountingRefresher {
        calls: Mutex<Vec<(String, ListKind, Instant)>>,
        fail: bool,
        count: AtomicUsize,
    }

    #[async_trait]
    impl ListRefresher for CountingRefresher {
        async fn refresh(&self, server_id: &str, kind: ListKind) -> McpResult<usize> {
            self.calls
                .lock()
                .unwrap()
                .push((server_id.to_string(), kind, Instant::now()));
            if self.fail {
                return Err(McpError::NotConnected {
                    server: server_id.to_string(),
                });
            }
            Ok(self.count.fetch_add(1, Ordering::SeqCst).saturating_add(3))
        }
    }

    fn tools_changed(server: &str) -> Notification {
        Notification::from_text(
            server,
            r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#.to_string(),
        )
    }

    fn prompts_changed(server: &str) -> Notification {
        Notification::from_text(
            server,
            r#"{"jsonrpc":"2.0","method":"notifications/prompts/list_changed"}"#.to_string(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced_into_one_refresh() {
        let refresher = Arc::new(CountingRefresher::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller =
            AutoRefreshController::new(Duration::from_millis(50), refresher.clone(), tx);

        let start = Instant::now();
        for _ in 0..3 {
            controller.notify(&tools_changed("fs"));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(controller.state("fs", ListKind::Tools), RefreshState::PendingRefresh);

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.kind, ListKind::Tools);
        assert_eq!(outcome.result, Ok(3));
        assert_eq!(controller.state("fs", ListKind::Tools), RefreshState::Idle);

        let calls = refresher.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        // Last push at +20ms, window 50ms.
        assert_eq!(calls[0].2.duration_since(start), Duration::from_millis(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairs_are_independent() {
        let refresher = Arc::new(CountingRefresher::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller =
            AutoRefreshController::new(Duration::from_millis(50), refresher.clone(), tx);

        controller.notify(&tools_changed("fs"));
        controller.notify(&prompts_changed("fs"));
        controller.notify(&tools_changed("web"));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let outcome = rx.recv().await.unwrap();
            seen.push((outcome.server_id, outcome.kind));
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("fs".to_string(), ListKind::Tools),
                ("fs".to_string(), ListKind::Prompts),
                ("web".to_string(), ListKind::Tools),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_reported_without_retry() {
        let refresher = Arc::new(CountingRefresher {
            fail: true,
            ..CountingRefresher::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller =
            AutoRefreshController::new(Duration::from_millis(20), refresher.clone(), tx);

        controller.notify(&tools_changed("fs"));
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.result.unwrap_err().contains("not connected"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(refresher.calls.lock().unwrap().len(), 1);
        assert_eq!(controller.state("fs", ListKind::Tools), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_notifications_are_ignored() {
        let refresher = Arc::new(CountingRefresher::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let controller = AutoRefreshController::new(Duration::from_millis(20), refresher, tx);

        let log = Notification::from_text(
            "fs",
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#.to_string(),
        );
        controller.notify(&log);
        assert_eq!(controller.state("fs", ListKind::Tools), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_server_drops_pending_refresh() {
        let refresher = Arc::new(CountingRefresher::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let controller =
            AutoRefreshController::new(Duration::from_millis(20), refresher.clone(), tx);

        controller.notify(&tools_changed("fs"));
        controller.cancel_server("fs");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(refresher.calls.lock().unwrap().is_empty());
    }
}

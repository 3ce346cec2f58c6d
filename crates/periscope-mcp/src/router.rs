//! Fan-out of canonical notifications to the rest of the inspector.
//!
//! One task drains the bridges' shared channel. For each notification it
//! records the raw push, then either schedules a debounced refresh
//! (list-changed) or forwards it to the UI log (everything else). Refresh
//! outcomes come back on a second channel and are turned into a result
//! event plus, unless suppressed, a toast. Toast text is therefore always
//! built from a known outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::ServerConnection;
use crate::notification::{ListKind, Notification};
use crate::recorder::{Direction, InteractionRecorder};
use crate::refresh::{AutoRefreshController, ListRefresher, RefreshOutcome, RefreshState};
use crate::toast::{Tab, Toast, suppress};

/// Something the presentation layer should show.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UiEvent {
    /// A push for the notification log.
    Log(Notification),
    /// A list was re-fetched.
    Refreshed {
        /// Server id.
        server_id: String,
        /// Refreshed list.
        kind: ListKind,
        /// New item count.
        count: usize,
    },
    /// A list re-fetch failed. Not retried.
    RefreshFailed {
        /// Server id.
        server_id: String,
        /// List that failed.
        kind: ListKind,
        /// Rendered error.
        error: String,
    },
    /// A toast to show.
    Toast(Toast),
}

impl UiEvent {
    /// Server the event concerns.
    #[must_use]
    pub fn server_id(&self) -> &str {
        match self {
            Self::Log(n) => &n.server_id,
            Self::Refreshed { server_id, .. } | Self::RefreshFailed { server_id, .. } => server_id,
            Self::Toast(t) => &t.server_id,
        }
    }
}

/// Subscriber callback. Runs on the router task and must not block.
pub type EventCallback = Arc<dyn Fn(&UiEvent) + Send + Sync>;

/// Handle returned by [`NotificationRouter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Read access to connection snapshots, needed by the toast policy.
pub trait ConnectionDirectory: Send + Sync {
    /// Latest snapshot of `server_id`, if known.
    fn connection(&self, server_id: &str) -> Option<ServerConnection>;
}

struct Subscribers {
    by_server: HashMap<String, Vec<(SubscriptionId, EventCallback)>>,
    next_id: u64,
}

struct RouterContext {
    subscribers: RwLock<Subscribers>,
    active_tab: RwLock<Option<Tab>>,
    recorder: Arc<InteractionRecorder>,
    directory: Arc<dyn ConnectionDirectory>,
    refresh: AutoRefreshController,
    routed: AtomicU64,
}

/// Dispatches notifications from every connection.
pub struct NotificationRouter {
    ctx: Arc<RouterContext>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("routed", &self.routed())
            .finish_non_exhaustive()
    }
}

impl NotificationRouter {
    /// Start the router task draining `notifications`.
    ///
    /// The task ends when every sender of `notifications` is dropped or the
    /// router is shut down. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        notifications: mpsc::Receiver<Notification>,
        recorder: Arc<InteractionRecorder>,
        directory: Arc<dyn ConnectionDirectory>,
        refresher: Arc<dyn ListRefresher>,
        debounce: Duration,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(RouterContext {
            subscribers: RwLock::new(Subscribers {
                by_server: HashMap::new(),
                next_id: 0,
            }),
            active_tab: RwLock::new(None),
            recorder,
            directory,
            refresh: AutoRefreshController::new(debounce, refresher, outcome_tx),
            routed: AtomicU64::new(0),
        });
        let task = tokio::spawn(run(notifications, outcome_rx, Arc::clone(&ctx)));
        Self {
            ctx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Register a callback for events about `server_id`.
    pub fn subscribe(&self, server_id: impl Into<String>, callback: EventCallback) -> SubscriptionId {
        let mut subs = self
            .ctx
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(subs.next_id);
        subs.next_id = subs.next_id.wrapping_add(1);
        subs.by_server
            .entry(server_id.into())
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .ctx
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        subs.by_server.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(sid, _)| *sid != id);
            removed |= callbacks.len() != before;
            !callbacks.is_empty()
        });
        removed
    }

    /// Tell the toast policy which tab the user is looking at.
    pub fn set_active_tab(&self, tab: Option<Tab>) {
        *self
            .ctx
            .active_tab
            .write()
            .unwrap_or_else(PoisonError::into_inner) = tab;
    }

    /// Tab the user is looking at.
    #[must_use]
    pub fn active_tab(&self) -> Option<Tab> {
        *self
            .ctx
            .active_tab
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh state of one `(server, list)` pair.
    #[must_use]
    pub fn refresh_state(&self, server_id: &str, kind: ListKind) -> RefreshState {
        self.ctx.refresh.state(server_id, kind)
    }

    /// Drop pending refreshes of a server that went away.
    pub fn forget_server(&self, server_id: &str) {
        self.ctx.refresh.cancel_server(server_id);
    }

    /// Notifications handled so far.
    #[must_use]
    pub fn routed(&self) -> u64 {
        self.ctx.routed.load(Ordering::Relaxed)
    }

    /// Stop the router task.
    pub async fn shutdown(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
            // Cancellation is the expected outcome.
            let _ = task.await;
            debug!("Notification router stopped");
        }
    }
}

impl Drop for NotificationRouter {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn run(
    mut notifications: mpsc::Receiver<Notification>,
    mut outcomes: mpsc::UnboundedReceiver<RefreshOutcome>,
    ctx: Arc<RouterContext>,
) {
    loop {
        tokio::select! {
            next = notifications.recv() => match next {
                Some(notification) => ctx.on_notification(notification),
                None => break,
            },
            Some(outcome) = outcomes.recv() => ctx.on_outcome(&outcome),
        }
    }
    info!("Notification channel closed; router exiting");
}

impl RouterContext {
    fn on_notification(&self, notification: Notification) {
        self.routed.fetch_add(1, Ordering::Relaxed);
        debug!(notification = %notification.summary(), "Routing notification");

        let payload = serde_json::from_str::<Value>(&notification.raw)
            .unwrap_or_else(|_| Value::String(notification.raw.clone()));
        self.recorder
            .record(Direction::Received, &notification.server_id, payload);

        if notification.list_kind().is_some() {
            self.refresh.notify(&notification);
        } else {
            self.publish(&UiEvent::Log(notification));
        }
    }

    fn on_outcome(&self, outcome: &RefreshOutcome) {
        let event = match &outcome.result {
            Ok(count) => UiEvent::Refreshed {
                server_id: outcome.server_id.clone(),
                kind: outcome.kind,
                count: *count,
            },
            Err(error) => UiEvent::RefreshFailed {
                server_id: outcome.server_id.clone(),
                kind: outcome.kind,
                error: error.clone(),
            },
        };
        self.publish(&event);

        let Some(connection) = self.directory.connection(&outcome.server_id) else {
            debug!(server = %outcome.server_id, "Refresh finished for unknown server");
            return;
        };
        let active_tab = *self.active_tab.read().unwrap_or_else(PoisonError::into_inner);
        if suppress(&connection, active_tab, &outcome.trigger) {
            debug!(server = %outcome.server_id, list = %outcome.kind, "Toast suppressed");
            return;
        }
        self.publish(&UiEvent::Toast(Toast::for_outcome(&connection, outcome)));
    }

    fn publish(&self, event: &UiEvent) {
        let callbacks: Vec<EventCallback> = {
            let subs = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            subs.by_server
                .get(event.server_id())
                .map(|cbs| cbs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(event);
        }
    }
}

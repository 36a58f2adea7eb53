//! Credits synchronizer task.
//!
//! A single task owns the balance (single-writer pattern). It reacts to token
//! changes, poll ticks, push events, manual refreshes and completed
//! resolutions, and publishes `CreditsSnapshot`s over a watch channel.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::resolve::resolve_balance;
use super::types::{BalanceState, CreditsSnapshot, SyncError};
use crate::api::PortalApi;
use crate::metrics::{ErrorRecord, SyncMetrics, SyncSummary};
use crate::push::{PushConnector, PushError, PushEvent, PushSubscription};

/// Background refresh period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
}

/// A finished resolution cycle, tagged with the generation and sequence
/// number it was started under.
struct Resolution {
    generation: u64,
    seq: u64,
    result: Result<BalanceState, SyncError>,
}

/// Outcome of a background push connection attempt.
struct PushReady {
    generation: u64,
    result: Result<PushSubscription, PushError>,
}

/// Handle to a running synchronizer.
///
/// Dropping the handle stops the task, closing the push channel and the
/// poll timer.
pub struct CreditsHandle {
    snapshots: watch::Receiver<CreditsSnapshot>,
    commands: mpsc::Sender<Command>,
    metrics: Arc<Mutex<SyncMetrics>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CreditsHandle {
    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<CreditsSnapshot> {
        self.snapshots.clone()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> CreditsSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Request a background resolution (does not toggle `loading`).
    pub async fn refresh(&self) {
        if self.commands.send(Command::Refresh).await.is_err() {
            log::warn!("Credits: refresh requested after synchronizer stopped");
        }
    }

    pub async fn metrics(&self) -> SyncSummary {
        self.metrics.lock().await.get_summary()
    }

    /// Recent resolution and push errors, most recent first.
    pub async fn errors(&self) -> Vec<ErrorRecord> {
        self.metrics.lock().await.get_errors()
    }

    /// Stop the task and wait for it to tear down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Credits: synchronizer task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CreditsHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Entry point for starting credits synchronization.
pub struct CreditsSynchronizer;

impl CreditsSynchronizer {
    /// Spawn the synchronizer on the current tokio runtime.
    ///
    /// `tokens` carries the current auth token; `push` is `None` when no
    /// push endpoint is configured, in which case only polling is used.
    pub fn spawn(
        api: Arc<dyn PortalApi>,
        push: Option<Arc<dyn PushConnector>>,
        tokens: watch::Receiver<Option<String>>,
        config: SyncConfig,
    ) -> CreditsHandle {
        let (snapshot_tx, snapshot_rx) = watch::channel(CreditsSnapshot::default());
        let (command_tx, command_rx) = mpsc::channel(8);
        let metrics = Arc::new(Mutex::new(SyncMetrics::new()));
        let cancel = CancellationToken::new();

        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        let (push_ready_tx, push_ready_rx) = mpsc::unbounded_channel();

        let state = SyncState {
            api,
            push,
            config,
            snapshot_tx,
            metrics: metrics.clone(),
            resolved_tx,
            push_ready_tx,
            token: None,
            generation: 0,
            next_seq: 0,
            applied_seq: 0,
            loading_seq: None,
            subscription: None,
            poll: None,
        };

        let task = tokio::spawn(state.run(
            tokens,
            command_rx,
            resolved_rx,
            push_ready_rx,
            cancel.clone(),
        ));

        CreditsHandle {
            snapshots: snapshot_rx,
            commands: command_tx,
            metrics,
            cancel,
            task: Some(task),
        }
    }
}

struct SyncState {
    api: Arc<dyn PortalApi>,
    push: Option<Arc<dyn PushConnector>>,
    config: SyncConfig,
    snapshot_tx: watch::Sender<CreditsSnapshot>,
    metrics: Arc<Mutex<SyncMetrics>>,
    resolved_tx: mpsc::UnboundedSender<Resolution>,
    push_ready_tx: mpsc::UnboundedSender<PushReady>,

    token: Option<String>,
    /// Bumped on every token change; results from older generations are dropped
    generation: u64,
    next_seq: u64,
    /// Sequence number of the last update applied to the balance
    applied_seq: u64,
    /// Foreground resolution currently holding the `loading` flag
    loading_seq: Option<u64>,
    subscription: Option<PushSubscription>,
    poll: Option<Interval>,
}

/// Next event from the push channel; pends forever when not subscribed.
async fn next_push_event(subscription: &mut Option<PushSubscription>) -> Option<PushEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => pending().await,
    }
}

/// Next poll tick; pends forever when polling is stopped.
async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

impl SyncState {
    async fn run(
        mut self,
        mut tokens: watch::Receiver<Option<String>>,
        mut commands: mpsc::Receiver<Command>,
        mut resolved: mpsc::UnboundedReceiver<Resolution>,
        mut push_ready: mpsc::UnboundedReceiver<PushReady>,
        cancel: CancellationToken,
    ) {
        log::info!("Credits: synchronizer started");

        let initial = tokens.borrow_and_update().clone();
        if initial.is_some() {
            self.on_token(initial).await;
        }

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                changed = tokens.changed() => {
                    if changed.is_err() {
                        log::info!("Credits: token source closed");
                        break;
                    }
                    let token = tokens.borrow_and_update().clone();
                    self.on_token(token).await;
                }

                Some(resolution) = resolved.recv() => self.on_resolved(resolution).await,

                Some(ready) = push_ready.recv() => self.on_push_ready(ready).await,

                event = next_push_event(&mut self.subscription) => self.on_push_event(event).await,

                Some(command) = commands.recv() => match command {
                    Command::Refresh => self.start_resolution(false).await,
                },

                _ = next_tick(&mut self.poll) => self.start_resolution(false).await,
            }
        }

        self.stop_session();
        self.publish(|s| {
            *s = CreditsSnapshot::default();
        });
        log::info!("Credits: synchronizer stopped");
    }

    async fn on_token(&mut self, token: Option<String>) {
        if token == self.token {
            return;
        }

        self.generation += 1;
        self.stop_session();
        self.token = token;

        let Some(token) = self.token.clone() else {
            log::info!("Credits: token cleared, balance reset");
            self.publish(|s| {
                *s = CreditsSnapshot::default();
            });
            return;
        };

        log::info!("Credits: token available, starting synchronization");
        self.start_resolution(true).await;

        let period = self.config.poll_interval;
        let mut poll = interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll = Some(poll);

        if let Some(connector) = self.push.clone() {
            let generation = self.generation;
            let ready_tx = self.push_ready_tx.clone();
            tokio::spawn(async move {
                let result = connector.connect(&token).await;
                let _ = ready_tx.send(PushReady { generation, result });
            });
        }
    }

    /// Tear down everything bound to the current token.
    fn stop_session(&mut self) {
        if self.subscription.take().is_some() {
            log::info!("Credits: push channel closed");
            self.publish(|s| s.push_connected = false);
        }
        self.poll = None;
        self.loading_seq = None;
    }

    fn take_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Start a resolution cycle. Foreground cycles raise the `loading` flag;
    /// background (poll/refresh) cycles leave it alone.
    async fn start_resolution(&mut self, foreground: bool) {
        let Some(token) = self.token.clone() else {
            self.publish(|s| {
                s.balance = Ok(BalanceState::Unknown);
                s.loading = false;
            });
            return;
        };

        let seq = self.take_seq();
        let generation = self.generation;
        self.metrics.lock().await.resolution_started();

        if foreground {
            self.loading_seq = Some(seq);
            self.publish(|s| s.loading = true);
        }

        let api = self.api.clone();
        let resolved_tx = self.resolved_tx.clone();
        tokio::spawn(async move {
            let result = resolve_balance(api.as_ref(), &token).await;
            let _ = resolved_tx.send(Resolution {
                generation,
                seq,
                result,
            });
        });
    }

    async fn on_resolved(&mut self, resolution: Resolution) {
        let Resolution {
            generation,
            seq,
            result,
        } = resolution;

        let ends_loading = self.loading_seq == Some(seq);
        if ends_loading {
            self.loading_seq = None;
        }

        if generation != self.generation || seq <= self.applied_seq {
            log::debug!(
                "Credits: discarding stale resolution (gen {} seq {}, current gen {} applied seq {})",
                generation,
                seq,
                self.generation,
                self.applied_seq
            );
            self.metrics.lock().await.stale_discarded();
            if ends_loading {
                self.publish(|s| s.loading = false);
            }
            return;
        }

        self.applied_seq = seq;
        {
            let mut metrics = self.metrics.lock().await;
            match &result {
                Ok(_) => metrics.resolution_applied(),
                Err(e) => metrics.resolution_failed(e.kind(), e.to_string()),
            }
        }
        if let Err(e) = &result {
            log::warn!("Credits: resolution failed: {}", e);
        }

        self.publish(move |s| {
            s.balance = result;
            if ends_loading {
                s.loading = false;
            }
        });
    }

    async fn on_push_ready(&mut self, ready: PushReady) {
        if ready.generation != self.generation {
            log::debug!("Credits: dropping push channel opened for a previous token");
            return;
        }

        match ready.result {
            Ok(subscription) => {
                self.subscription = Some(subscription);
            }
            Err(e) => {
                log::warn!("Credits: push channel unavailable, polling only: {}", e);
                self.metrics
                    .lock()
                    .await
                    .record_error("push", e.to_string());
            }
        }
    }

    async fn on_push_event(&mut self, event: Option<PushEvent>) {
        match event {
            Some(PushEvent::Connected) => {
                log::info!("Credits: push channel connected");
                self.publish(|s| s.push_connected = true);
            }
            Some(PushEvent::Disconnected) => {
                log::warn!("Credits: push channel disconnected, polling only");
                self.publish(|s| s.push_connected = false);
            }
            Some(PushEvent::CreditsUpdated(update)) => {
                let seq = self.take_seq();
                self.applied_seq = seq;
                self.metrics.lock().await.push_update();

                let state = update.into_state();
                log::debug!("Credits: push update {:?}", state);
                self.publish(move |s| s.balance = Ok(state));
            }
            None => {
                self.subscription = None;
                self.publish(|s| s.push_connected = false);
            }
        }
    }

    /// Apply `f` to the published snapshot, notifying subscribers only on change.
    fn publish(&self, f: impl FnOnce(&mut CreditsSnapshot)) {
        self.snapshot_tx.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            f(snapshot);
            *snapshot != before
        });
    }
}

//! Drives fetch → extract → select → dispatch cycles for active sessions.
//!
//! One task per active session, so cycles are serialized within a session
//! and fully parallel across sessions. A central reconcile loop keeps the
//! task set in step with the Session Manager's active list. Cancellation is
//! a token check: pausing or terminating a session cancels its run token,
//! which interrupts any backoff sleep and suppresses the next schedule. A
//! cycle already dispatching when the token is cancelled completes its
//! dispatch; the state re-check before the next cycle stops the loop.

use crate::cursor::FailureKind;
use crate::dispatch::{ActionDispatcher, ClipAction, DispatchError};
use crate::select::select_latest;
use crate::session::{CycleContext, FailureDisposition, SessionManager};
use cm_chat::{ChatError, LiveChatClient, StreamId};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between successful cycles, dispatch or not.
    pub poll_interval: Duration,
    /// Flat delay after a transient failure.
    pub retry_delay: Duration,
    /// Extended delay after the upstream rate-limits us.
    pub rate_limit_delay: Duration,
    /// Bound on each page fetch; a timeout counts as transient.
    pub fetch_timeout: Duration,
    /// Consecutive transient failures before the session pauses itself.
    pub error_cap: u32,
    /// Default clip lookback; routing may override per channel.
    pub lookback: Duration,
    /// Cadence of the reconcile loop that attaches poll tasks to newly
    /// active sessions.
    pub reconcile_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            retry_delay: Duration::from_secs(30),
            rate_limit_delay: Duration::from_secs(120),
            fetch_timeout: Duration::from_secs(10),
            error_cap: 5,
            lookback: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(1),
        }
    }
}

/// How a finished cycle affects the session's schedule.
#[derive(Debug, PartialEq, Eq)]
enum CycleOutcome {
    /// Run the next cycle after this delay.
    Scheduled(Duration),
    /// Session is gone, paused, or cancelled; stop the loop.
    Stop,
}

pub struct PollScheduler {
    manager: Arc<SessionManager>,
    chat: Arc<dyn LiveChatClient>,
    dispatcher: Arc<dyn ActionDispatcher>,
    cfg: SchedulerConfig,
    shutdown: CancellationToken,
    tasks: tokio::sync::Mutex<HashMap<StreamId, JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(
        manager: Arc<SessionManager>,
        chat: Arc<dyn LiveChatClient>,
        dispatcher: Arc<dyn ActionDispatcher>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            manager,
            chat,
            dispatcher,
            cfg,
            shutdown: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Start the reconcile loop. Poll tasks for sessions activated later are
    /// picked up within one reconcile interval.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.cfg.reconcile_interval);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => {
                        tracing::info!("poll scheduler received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {}
                }
                scheduler.reconcile().await;
            }
        })
    }

    /// Number of sessions with a live poll task right now.
    pub async fn running_sessions(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, handle)| handle).collect()
        };
        match tokio::time::timeout(Duration::from_secs(5), join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "poll task join failed during shutdown");
                    }
                }
            }
            Err(_) => {
                tracing::warn!("timed out waiting for poll tasks to stop");
            }
        }
    }

    async fn reconcile(self: &Arc<Self>) {
        let active = self.manager.list_active();
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());
        for summary in active {
            if tasks.contains_key(&summary.stream_id) {
                continue;
            }
            tracing::debug!(stream_id = %summary.stream_id, "attaching poll task");
            let scheduler = Arc::clone(self);
            let stream_id = summary.stream_id.clone();
            let handle = tokio::spawn(scheduler.session_loop(summary.stream_id));
            tasks.insert(stream_id, handle);
        }
    }

    async fn session_loop(self: Arc<Self>, stream_id: StreamId) {
        loop {
            // State is re-checked here, immediately before each cycle; a
            // session paused or terminated mid-sleep never runs again.
            let Some(ctx) = self.manager.cycle_context(&stream_id) else {
                break;
            };
            if ctx.cancel.is_cancelled() {
                break;
            }

            let delay = match self.run_cycle(&ctx).await {
                CycleOutcome::Scheduled(delay) => delay,
                CycleOutcome::Stop => break,
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!(stream_id = %stream_id, "poll task ended");
    }

    #[tracing::instrument(level = "debug", skip_all, fields(stream_id = %ctx.stream_id))]
    async fn run_cycle(&self, ctx: &CycleContext) -> CycleOutcome {
        let fetch = tokio::time::timeout(
            self.cfg.fetch_timeout,
            self.chat.fetch_page(&ctx.live_chat_id, ctx.cursor.as_ref()),
        )
        .await;
        let page = match fetch {
            Ok(Ok(page)) => page,
            Ok(Err(error)) => return self.handle_chat_failure(&ctx.stream_id, error),
            Err(_) => {
                return self.handle_chat_failure(
                    &ctx.stream_id,
                    ChatError::Transient(format!(
                        "fetch timed out after {:?}",
                        self.cfg.fetch_timeout
                    )),
                );
            }
        };

        // Cursor advances on every successful fetch, zero-message pages
        // included; losing the advance would only re-read one page, which
        // the ledger absorbs.
        self.manager.record_fetch_success(
            &ctx.stream_id,
            page.next_cursor.clone(),
            page.messages.len(),
        );
        let normal_delay = page
            .retry_after
            .map_or(self.cfg.poll_interval, |hint| {
                hint.max(self.cfg.poll_interval)
            });

        let Some(extraction) = self.manager.extract_page(&ctx.stream_id, &page.messages) else {
            return CycleOutcome::Stop;
        };

        let lookback = ctx
            .routing
            .lookback_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.cfg.lookback);
        let Some(selection) = select_latest(extraction.clips, lookback, ctx.created_at) else {
            self.manager.commit_cycle(&ctx.stream_id, Vec::new(), false);
            return CycleOutcome::Scheduled(normal_delay);
        };

        if !ctx.routing.auto_clip {
            tracing::debug!(
                stream_id = %ctx.stream_id,
                candidates = selection.considered.len(),
                "auto clip disabled for channel; marking commands seen without dispatch"
            );
            self.manager
                .commit_cycle(&ctx.stream_id, selection.considered, false);
            return CycleOutcome::Scheduled(normal_delay);
        }

        let action = ClipAction::from_selection(
            ctx.stream_id.clone(),
            &selection.winner,
            selection.target_event_time,
            ctx.routing.clone(),
        );
        match self.dispatcher.dispatch(&action).await {
            Ok(()) => {
                tracing::info!(
                    stream_id = %ctx.stream_id,
                    message_id = %action.message_id,
                    moderator = %action.moderator,
                    event_time = %action.event_time,
                    target_time = %action.target_time,
                    passed_over = selection.considered.len() - 1,
                    "clip action dispatched"
                );
                self.manager
                    .commit_cycle(&ctx.stream_id, selection.considered, true);
                CycleOutcome::Scheduled(normal_delay)
            }
            // No ledger commit on failure: the same candidates are
            // re-extracted next cycle and the selection is deterministic.
            Err(DispatchError::Transient(message)) => {
                self.handle_failure(&ctx.stream_id, FailureKind::Transient, message, None)
            }
            Err(DispatchError::Permanent(message)) => {
                self.handle_failure(&ctx.stream_id, FailureKind::Permanent, message, None)
            }
        }
    }

    fn handle_chat_failure(&self, stream_id: &StreamId, error: ChatError) -> CycleOutcome {
        match error {
            ChatError::Transient(message) => {
                self.handle_failure(stream_id, FailureKind::Transient, message, None)
            }
            ChatError::RateLimited { retry_after } => self.handle_failure(
                stream_id,
                FailureKind::RateLimited,
                "rate limited by upstream".to_string(),
                retry_after,
            ),
            ChatError::Permanent(message) => {
                self.handle_failure(stream_id, FailureKind::Permanent, message, None)
            }
        }
    }

    fn handle_failure(
        &self,
        stream_id: &StreamId,
        kind: FailureKind,
        message: String,
        retry_hint: Option<Duration>,
    ) -> CycleOutcome {
        tracing::warn!(stream_id = %stream_id, ?kind, %message, "poll cycle failed");
        match self
            .manager
            .record_poll_failure(stream_id, kind, message, self.cfg.error_cap)
        {
            FailureDisposition::Paused => CycleOutcome::Stop,
            FailureDisposition::RateLimit => {
                let delay = retry_hint.map_or(self.cfg.rate_limit_delay, |hint| {
                    hint.max(self.cfg.rate_limit_delay)
                });
                CycleOutcome::Scheduled(delay)
            }
            FailureDisposition::Retry => CycleOutcome::Scheduled(self.cfg.retry_delay),
        }
    }
}

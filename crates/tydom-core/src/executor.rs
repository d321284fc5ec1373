// ── Effect executor and poll scheduler ──
//
// A single-consumer worker drains decoder effects in FIFO order; no two
// effects ever run concurrently. Send failures are logged and swallowed
// so a flaky socket cannot poison the message stream. The poll scheduler
// runs beside it, re-sending URLs on an interval and doubling as the
// pong watchdog.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tydom_api::Connection;

use crate::command::{Command, TransactionIds};
use crate::config::PollingConfig;
use crate::model::Effect;

const EFFECT_CHANNEL_SIZE: usize = 128;

/// Where encoded command frames go.
///
/// [`Connection`] implements this; tests substitute a recorder.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_command(&self, frame: String) -> Result<(), tydom_api::Error>;
}

#[async_trait]
impl CommandSink for Connection {
    async fn send_command(&self, frame: String) -> Result<(), tydom_api::Error> {
        self.send_text(&frame).await
    }
}

/// Injected "is somebody watching" probe for activity-gated polling.
pub type ActiveProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// The schedule currently driving the poll task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSchedule {
    pub urls: Vec<String>,
    pub interval: Duration,
}

// ── Executor ────────────────────────────────────────────────────────

struct ExecutorShared {
    last_pong: StdMutex<Option<Instant>>,
    /// In-flight cdata replies, keyed by transaction id.
    replies: DashMap<String, Vec<Vec<u8>>>,
    /// Fully reassembled replies awaiting pickup.
    completed: DashMap<String, Vec<u8>>,
    schedule: watch::Sender<Option<PollSchedule>>,
}

/// Handle to the running executor. Cheap to clone.
#[derive(Clone)]
pub struct EffectHandle {
    tx: mpsc::Sender<Effect>,
    shared: Arc<ExecutorShared>,
}

impl EffectHandle {
    /// Enqueue one effect. FIFO with everything enqueued before it.
    pub async fn enqueue(&self, effect: Effect) {
        if self.tx.send(effect).await.is_err() {
            warn!("effect executor is gone; effect dropped");
        }
    }

    /// Enqueue a batch as a contiguous block, preserving order.
    pub async fn enqueue_all(&self, effects: Vec<Effect>) {
        for effect in effects {
            self.enqueue(effect).await;
        }
    }

    /// When the last ping answer arrived.
    pub fn last_pong(&self) -> Option<Instant> {
        *self.shared.last_pong.lock().unwrap()
    }

    /// Age of the last pong; a watchdog compares this to its threshold.
    pub fn pong_age(&self) -> Option<Duration> {
        self.last_pong().map(|t| t.elapsed())
    }

    /// Take a fully reassembled cdata reply, if one completed.
    pub fn take_cdata_reply(&self, transac_id: &str) -> Option<Vec<u8>> {
        self.shared.completed.remove(transac_id).map(|(_, v)| v)
    }

    /// The schedule currently in force.
    pub fn current_schedule(&self) -> Option<PollSchedule> {
        self.shared.schedule.borrow().clone()
    }
}

/// Spawns the executor worker and the poll scheduler.
pub struct EffectExecutor;

impl EffectExecutor {
    pub fn spawn(
        sink: Arc<dyn CommandSink>,
        polling: PollingConfig,
        is_active: Option<ActiveProbe>,
        cancel: CancellationToken,
    ) -> (EffectHandle, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(EFFECT_CHANNEL_SIZE);
        let (schedule, schedule_rx) = watch::channel(None);

        let shared = Arc::new(ExecutorShared {
            last_pong: StdMutex::new(None),
            replies: DashMap::new(),
            completed: DashMap::new(),
            schedule,
        });
        let ids = Arc::new(TransactionIds::new());

        let worker = tokio::spawn(executor_task(
            rx,
            Arc::clone(&sink),
            polling.clone(),
            Arc::clone(&shared),
            Arc::clone(&ids),
            cancel.clone(),
        ));
        let poller = tokio::spawn(poll_task(
            sink,
            polling,
            is_active,
            schedule_rx,
            Arc::clone(&shared),
            ids,
            cancel,
        ));

        (EffectHandle { tx, shared }, vec![worker, poller])
    }
}

// ── Worker ──────────────────────────────────────────────────────────

async fn executor_task(
    mut rx: mpsc::Receiver<Effect>,
    sink: Arc<dyn CommandSink>,
    polling: PollingConfig,
    shared: Arc<ExecutorShared>,
    ids: Arc<TransactionIds>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            effect = rx.recv() => {
                let Some(effect) = effect else { break };
                apply_effect(effect, &*sink, &polling, &shared, &ids).await;
            }
        }
    }
    debug!("effect executor stopped");
}

/// Apply one effect. Never fails: command errors are logged and dropped.
async fn apply_effect(
    effect: Effect,
    sink: &dyn CommandSink,
    polling: &PollingConfig,
    shared: &ExecutorShared,
    ids: &TransactionIds,
) {
    match effect {
        Effect::SendCommands(frames) => {
            for frame in frames {
                if let Err(e) = sink.send_command(frame).await {
                    warn!(error = %e, "command send failed");
                }
            }
        }

        Effect::SchedulePoll {
            urls,
            interval_secs,
        } => {
            if polling.is_enabled() && interval_secs > 0 {
                debug!(?urls, interval_secs, "poll schedule updated");
                // send_replace stores the schedule even if the poll task
                // already exited.
                shared.schedule.send_replace(Some(PollSchedule {
                    urls,
                    interval: Duration::from_secs(interval_secs),
                }));
            } else {
                trace!("polling disabled; schedule ignored");
            }
        }

        Effect::RefreshAll => {
            let frame = Command::refresh_all().encode(&ids.next());
            if let Err(e) = sink.send_command(frame).await {
                warn!(error = %e, "refresh_all send failed");
            }
            // One immediate round of the scheduled polls.
            let urls = shared
                .schedule
                .borrow()
                .as_ref()
                .map(|s| s.urls.clone())
                .unwrap_or_default();
            send_poll_round(sink, &urls, ids).await;
        }

        Effect::PongReceived => {
            *shared.last_pong.lock().unwrap() = Some(Instant::now());
            trace!("pong recorded");
        }

        Effect::CDataReplyChunk(chunk) => {
            let complete = {
                let mut entry = shared.replies.entry(chunk.transac_id.clone()).or_default();
                entry.push(chunk.payload);
                chunk.end_of_reply
            };
            if complete {
                if let Some((transac_id, chunks)) = shared.replies.remove(&chunk.transac_id) {
                    let reply = chunks.concat();
                    debug!(%transac_id, bytes = reply.len(), "cdata reply reassembled");
                    shared.completed.insert(transac_id, reply);
                }
            }
        }
    }
}

async fn send_poll_round(sink: &dyn CommandSink, urls: &[String], ids: &TransactionIds) {
    for url in urls {
        let frame = Command::poll_device_data(url.clone()).encode(&ids.next());
        if let Err(e) = sink.send_command(frame).await {
            warn!(error = %e, url, "poll send failed");
        }
    }
}

// ── Poll scheduler ──────────────────────────────────────────────────

/// Re-send the scheduled URLs every interval.
///
/// Pauses while the activity probe reports idle (when configured) and
/// warns when the pong age grows past three intervals.
async fn poll_task(
    sink: Arc<dyn CommandSink>,
    polling: PollingConfig,
    is_active: Option<ActiveProbe>,
    mut schedule_rx: watch::Receiver<Option<PollSchedule>>,
    shared: Arc<ExecutorShared>,
    ids: Arc<TransactionIds>,
    cancel: CancellationToken,
) {
    loop {
        let schedule = schedule_rx.borrow_and_update().clone();
        let Some(schedule) = schedule else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = schedule_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        };

        let mut ticker = tokio::time::interval(schedule.interval);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = schedule_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break; // re-read the schedule
                }
                _ = ticker.tick() => {
                    if polling.only_when_active {
                        if let Some(probe) = &is_active {
                            if !probe() {
                                trace!("idle; poll round skipped");
                                continue;
                            }
                        }
                    }

                    send_poll_round(&*sink, &schedule.urls, &ids).await;

                    let stale_after = schedule.interval * 3;
                    if let Some(age) = shared.last_pong.lock().unwrap().map(|t| t.elapsed()) {
                        if age > stale_after {
                            warn!(age_secs = age.as_secs(), "no pong from gateway recently");
                        }
                    }
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

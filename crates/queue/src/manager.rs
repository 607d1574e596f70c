//! The generation event bus.
//!
//! One bounded channel per run: the worker publishes through
//! [`AppQueueManager`], the response pipeline drains [`QueueListener`].
//! The listener's poll loop is where out-of-band stop requests and the
//! elapsed-time ceiling are observed; both synthesize a terminal `Stop`
//! and cancel the shared token so the worker winds down at its next
//! checkpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use skein_domain::config::QueueConfig;
use skein_domain::stream::BoxStream;

use crate::cancel::CancelToken;
use crate::events::{QueueEvent, QueueMessage, StopReason};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stop flags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Out-of-band stop requests keyed by task id, with a TTL so stale
/// flags cannot stop an unrelated later run. The flag is how an HTTP
/// stop endpoint reaches a run without sharing memory with its worker.
pub struct StopFlagStore {
    ttl: Duration,
    flags: Mutex<HashMap<String, (Instant, String)>>,
}

impl StopFlagStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            flags: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, task_id: &str, user_id: &str) {
        self.flags
            .lock()
            .insert(task_id.to_owned(), (Instant::now(), user_id.to_owned()));
    }

    /// Whether a live stop flag exists for this task. Expired flags are
    /// removed as a side effect.
    pub fn is_set(&self, task_id: &str) -> bool {
        let mut flags = self.flags.lock();
        match flags.get(task_id) {
            Some((at, _)) if at.elapsed() < self.ttl => true,
            Some(_) => {
                flags.remove(task_id);
                false
            }
            None => false,
        }
    }

    /// The flag only counts when set by the run's own user.
    pub fn is_set_by(&self, task_id: &str, user_id: &str) -> bool {
        let mut flags = self.flags.lock();
        match flags.get(task_id) {
            Some((at, by)) if at.elapsed() < self.ttl => by == user_id,
            Some(_) => {
                flags.remove(task_id);
                false
            }
            None => false,
        }
    }

    pub fn clear(&self, task_id: &str) {
        self.flags.lock().remove(task_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Publisher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Worker-side handle: publishes typed events for one task.
pub struct AppQueueManager {
    task_id: String,
    tx: mpsc::Sender<QueueMessage>,
    terminal_published: AtomicBool,
}

impl AppQueueManager {
    /// Publish one event. After a terminal event has gone out, further
    /// publishes are dropped so the single-terminal guarantee holds even
    /// when a worker keeps going briefly after a stop.
    pub async fn publish(&self, event: QueueEvent) {
        if self.terminal_published.load(Ordering::Acquire) {
            tracing::debug!(task_id = %self.task_id, "event dropped after terminal");
            return;
        }
        if event.is_terminal() {
            self.terminal_published.store(true, Ordering::Release);
        }

        let message = QueueMessage {
            task_id: self.task_id.clone(),
            published_at: Utc::now(),
            event,
        };
        if self.tx.send(message).await.is_err() {
            tracing::debug!(task_id = %self.task_id, "listener gone, event dropped");
        }
    }

    /// The worker's catch-all error path. Guarantees the listening side
    /// observes a terminal event even when the run crashed.
    pub async fn publish_error(&self, error: impl std::fmt::Display) {
        self.publish(QueueEvent::Error {
            message: error.to_string(),
        })
        .await;
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listener
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Consumer-side handle: drains events for one task.
pub struct QueueListener {
    task_id: String,
    rx: mpsc::Receiver<QueueMessage>,
    config: QueueConfig,
    stop_flags: Arc<StopFlagStore>,
    cancel: CancelToken,
}

impl QueueListener {
    /// Drain events until the terminal one.
    ///
    /// Poll policy per timeout tick: stop flag, then the elapsed-time
    /// ceiling, then a keepalive ping on its own cadence. A stop from
    /// either source cancels the shared token before being yielded.
    pub fn listen(self) -> BoxStream<'static, QueueMessage> {
        let QueueListener {
            task_id,
            mut rx,
            config,
            stop_flags,
            cancel,
        } = self;

        let poll_timeout = Duration::from_millis(config.poll_timeout_ms);
        let ping_interval = Duration::from_secs(config.ping_interval_secs);
        let hard_limit = Duration::from_secs(config.hard_limit_secs);

        let stream = async_stream::stream! {
            let started = Instant::now();
            let mut last_ping = Instant::now();

            loop {
                match tokio::time::timeout(poll_timeout, rx.recv()).await {
                    Ok(Some(message)) => {
                        let terminal = message.event.is_terminal();
                        yield message;
                        if terminal {
                            break;
                        }
                    }
                    Ok(None) => {
                        // Worker dropped its handle without a terminal
                        // event. publish_error should make this
                        // unreachable; synthesize so the guarantee holds.
                        tracing::error!(task_id = %task_id, "queue closed without terminal event");
                        yield QueueMessage {
                            task_id: task_id.clone(),
                            published_at: Utc::now(),
                            event: QueueEvent::Error {
                                message: "generation worker exited unexpectedly".into(),
                            },
                        };
                        break;
                    }
                    Err(_) => {
                        if stop_flags.is_set(&task_id) {
                            stop_flags.clear(&task_id);
                            cancel.cancel();
                            yield QueueMessage {
                                task_id: task_id.clone(),
                                published_at: Utc::now(),
                                event: QueueEvent::Stop {
                                    reason: StopReason::UserManual,
                                },
                            };
                            break;
                        }
                        if started.elapsed() >= hard_limit {
                            tracing::warn!(task_id = %task_id, "run exceeded the time ceiling");
                            cancel.cancel();
                            // Ceiling stops share the user-stop reason:
                            // downstream both mean an interrupted run
                            // whose partial answer gets its tokens
                            // re-estimated.
                            yield QueueMessage {
                                task_id: task_id.clone(),
                                published_at: Utc::now(),
                                event: QueueEvent::Stop {
                                    reason: StopReason::UserManual,
                                },
                            };
                            break;
                        }
                        if last_ping.elapsed() >= ping_interval {
                            last_ping = Instant::now();
                            yield QueueMessage {
                                task_id: task_id.clone(),
                                published_at: Utc::now(),
                                event: QueueEvent::Ping,
                            };
                        }
                    }
                }
            }
        };

        Box::pin(stream)
    }
}

/// Build the publisher/listener pair for one task. The returned token
/// is shared with the listener; hand it to the worker as well.
pub fn channel(
    task_id: impl Into<String>,
    config: QueueConfig,
    stop_flags: Arc<StopFlagStore>,
) -> (AppQueueManager, QueueListener, CancelToken) {
    let task_id = task_id.into();
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let cancel = CancelToken::new();

    let manager = AppQueueManager {
        task_id: task_id.clone(),
        tx,
        terminal_published: AtomicBool::new(false),
    };
    let listener = QueueListener {
        task_id,
        rx,
        config,
        stop_flags,
        cancel: cancel.clone(),
    };
    (manager, listener, cancel)
}

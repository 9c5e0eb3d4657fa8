//! Background task runtime
//!
//! Workers never touch presentation state. They report through [`Event`]s
//! on a channel that the control loop drains, run under a bounded
//! [`TaskPool`], and can be cancelled through a shared token tree.

pub mod processor;
pub mod state;

pub use processor::{BatchProcessor, BatchSummary};
pub use state::{BatchState, ItemStatus};

use crate::mods::ModEntry;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "OK",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Messages from workers to the control loop
#[derive(Debug, Clone)]
pub enum Event {
    Log { level: LogLevel, message: String },
    /// Number of running tasks changed
    Busy(usize),
    /// Download progress; `overall` is the batch fraction in 0..=1
    Progress { id: String, percent: f32, overall: f32 },
    ItemStatus { id: String, status: ItemStatus, detail: Option<String> },
    /// A mod entry was refreshed (metadata, staleness, deployed state)
    EntryUpdated(ModEntry),
}

/// Cloneable sending half of the event channel. Sends never fail; events
/// sent after the control loop is gone are dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.send(Event::Log { level, message });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into());
    }

    pub fn status(&self, id: &str, status: ItemStatus, detail: Option<String>) {
        self.send(Event::ItemStatus {
            id: id.to_string(),
            status,
            detail,
        });
    }
}

/// Count of in-flight tasks, reported on every change
#[derive(Debug, Clone)]
pub struct BusyCounter {
    count: Arc<Mutex<usize>>,
    events: EventSender,
}

impl BusyCounter {
    pub fn new(events: EventSender) -> Self {
        Self {
            count: Arc::new(Mutex::new(0)),
            events,
        }
    }

    pub fn current(&self) -> usize {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Increment now, decrement when the guard drops (including on panic).
    pub fn enter(&self) -> BusyGuard {
        self.adjust(true);
        BusyGuard {
            counter: self.clone(),
        }
    }

    fn adjust(&self, up: bool) {
        let now = {
            let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
            if up {
                *count += 1;
            } else {
                *count = count.saturating_sub(1);
            }
            *count
        };
        self.events.send(Event::Busy(now));
    }
}

#[must_use]
pub struct BusyGuard {
    counter: BusyCounter,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.counter.adjust(false);
    }
}

/// Bounded pool for background work. Every task gets a child of the pool's
/// root token, so cancelling the pool cancels all of them.
#[derive(Debug, Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    busy: BusyCounter,
    root: CancellationToken,
}

impl TaskPool {
    pub fn new(max_concurrent: usize, events: EventSender, root: CancellationToken) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            busy: BusyCounter::new(events),
            root,
        }
    }

    pub fn busy(&self) -> &BusyCounter {
        &self.busy
    }

    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Queue `task`. It waits for a slot, then runs with its own token.
    /// Yields `None` if cancelled before it got a slot.
    pub fn spawn<F, Fut, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let token = self.root.child_token();
        let semaphore = Arc::clone(&self.semaphore);
        let busy = self.busy.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = task_token.cancelled() => return None,
                permit = semaphore.acquire_owned() => permit.ok()?,
            };
            let _guard = busy.enter();
            Some(task(task_token).await)
        });

        TaskHandle { token, handle }
    }
}

pub struct TaskHandle<T> {
    token: CancellationToken,
    handle: JoinHandle<Option<T>>,
}

impl<T> TaskHandle<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `None` when the task never ran or panicked.
    pub async fn join(self) -> Option<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Background task failed: {}", e);
                None
            }
        }
    }
}

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Run states, matching the source project's `AgentState` enumeration
/// exactly — every sync/simulation run's lifecycle is one of these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    Authenticating,
    FetchingAccounts,
    FetchingResources,
    FetchingTags,
    Mapping,
    Writing,
    Complete,
    Error,
    Cancelled,
}

impl RunState {
    #[must_use]
    pub fn is_running(self) -> bool {
        !matches!(
            self,
            RunState::Idle | RunState::Complete | RunState::Error | RunState::Cancelled
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Complete | RunState::Error | RunState::Cancelled
        )
    }
}

/// Full JSON-serializable snapshot delivered to subscribers, mirroring the
/// source project's `ProgressTracker.to_dict()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub state: RunState,
    pub progress_pct: f64,
    pub message: String,
    pub sub_progress_pct: Option<f64>,
    pub sub_message: Option<String>,
    pub step: u32,
    pub total_steps: u32,
    pub stats: HashMap<String, Value>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub elapsed_seconds: Option<f64>,
    pub error: Option<String>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        ProgressSnapshot {
            state: RunState::Idle,
            progress_pct: 0.0,
            message: String::new(),
            sub_progress_pct: None,
            sub_message: None,
            step: 0,
            total_steps: 0,
            stats: HashMap::new(),
            started_at: None,
            completed_at: None,
            elapsed_seconds: None,
            error: None,
        }
    }
}

const QUEUE_DEPTH: usize = 64;

struct Inner {
    snapshot: ProgressSnapshot,
    subscribers: Vec<mpsc::Sender<ProgressSnapshot>>,
}

/// In-memory pub/sub broadcaster for run progress. A full subscriber queue
/// is dropped rather than awaited — the publisher must never stall on a
/// slow consumer.
pub struct Broadcaster {
    inner: Mutex<Inner>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Broadcaster {
            inner: Mutex::new(Inner {
                snapshot: ProgressSnapshot::default(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Subscribe, receiving the current snapshot as the first delivered item.
    pub async fn subscribe(self: &Arc<Self>) -> mpsc::Receiver<ProgressSnapshot> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let mut inner = self.inner.lock().await;
        let _ = tx.try_send(inner.snapshot.clone());
        inner.subscribers.push(tx);
        rx
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.snapshot = ProgressSnapshot::default();
        self.broadcast_locked(&mut inner);
    }

    pub async fn set_state(&self, state: RunState) {
        let mut inner = self.inner.lock().await;
        if matches!(state, RunState::Starting) {
            let was_stats = std::mem::take(&mut inner.snapshot.stats);
            inner.snapshot = ProgressSnapshot {
                started_at: Some(chrono::Utc::now()),
                ..ProgressSnapshot::default()
            };
            drop(was_stats);
        }
        inner.snapshot.state = state;
        if state.is_terminal() {
            inner.snapshot.completed_at = Some(chrono::Utc::now());
        }
        self.recompute_elapsed(&mut inner.snapshot);
        self.broadcast_locked(&mut inner);
    }

    pub async fn set_progress(&self, pct: f64, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.progress_pct = pct;
        inner.snapshot.message = message.into();
        self.recompute_elapsed(&mut inner.snapshot);
        self.broadcast_locked(&mut inner);
    }

    pub async fn set_sub_progress(&self, pct: f64, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.sub_progress_pct = Some(pct);
        inner.snapshot.sub_message = Some(message.into());
        self.broadcast_locked(&mut inner);
    }

    pub async fn set_total_steps(&self, total: u32) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.total_steps = total;
        self.broadcast_locked(&mut inner);
    }

    pub async fn increment_step(&self) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.step = inner.snapshot.step.saturating_add(1);
        if inner.snapshot.total_steps > 0 {
            inner.snapshot.progress_pct = 100.0 * f64::from(inner.snapshot.step)
                / f64::from(inner.snapshot.total_steps);
        }
        self.broadcast_locked(&mut inner);
    }

    pub async fn set_stat(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.stats.insert(key.into(), value.into());
        self.broadcast_locked(&mut inner);
    }

    /// Re-broadcasts the current snapshot unchanged. Callers drive this on a
    /// timer (≤30s) so idle SSE subscribers see a heartbeat even when no
    /// state transition or stat update has happened in the meantime.
    pub async fn keepalive(&self) {
        let mut inner = self.inner.lock().await;
        self.broadcast_locked(&mut inner);
    }

    pub async fn set_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.error = Some(message.into());
        inner.snapshot.state = RunState::Error;
        inner.snapshot.completed_at = Some(chrono::Utc::now());
        self.recompute_elapsed(&mut inner.snapshot);
        self.broadcast_locked(&mut inner);
    }

    fn recompute_elapsed(&self, snapshot: &mut ProgressSnapshot) {
        if let Some(started) = snapshot.started_at {
            let end = snapshot.completed_at.unwrap_or_else(chrono::Utc::now);
            snapshot.elapsed_seconds = Some((end - started).num_milliseconds() as f64 / 1000.0);
        }
    }

    fn broadcast_locked(&self, inner: &mut Inner) {
        let snapshot = inner.snapshot.clone();
        inner.subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("dropping slow progress subscriber: queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

mod session;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

use crate::config::FailoverSection;
use crate::metrics::{self, EngineMetrics, MetricsHandle};

pub use session::{
    CountdownTicket, FailoverError, FailoverSession, FailoverSnapshot, PlaybackState, Tick,
};

struct Shared {
    session: Mutex<FailoverSession>,
    snapshots: watch::Sender<FailoverSnapshot>,
    metrics: MetricsHandle,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, FailoverSession> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply<T>(&self, change: impl FnOnce(&mut FailoverSession) -> T) -> T {
        let (result, snapshot) = {
            let mut session = self.session();
            let result = change(&mut session);
            (result, session.snapshot())
        };
        self.snapshots.send_replace(snapshot);
        result
    }
}

/// The one outstanding countdown task. Dropping it aborts the task.
struct PendingAdvance {
    handle: JoinHandle<()>,
}

impl Drop for PendingAdvance {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Drives a [`FailoverSession`] in real time: player signals come in through
/// the methods, state goes out through [`FailoverController::subscribe`].
///
/// Must be used from within a tokio runtime; `on_error` spawns the
/// countdown task.
pub struct FailoverController {
    shared: Arc<Shared>,
    pending: Mutex<Option<PendingAdvance>>,
    tick: Duration,
}

impl std::fmt::Debug for FailoverController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverController")
            .field("snapshot", &self.snapshot())
            .field("tick", &self.tick)
            .finish()
    }
}

impl FailoverController {
    pub fn new(source_count: usize, config: &FailoverSection) -> Self {
        Self::with_tick(source_count, config.countdown_seconds, Duration::from_secs(1))
    }

    pub fn with_tick(source_count: usize, countdown_seconds: u32, tick: Duration) -> Self {
        let session = FailoverSession::new(source_count, countdown_seconds);
        let (snapshots, _) = watch::channel(session.snapshot());
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                snapshots,
                metrics: EngineMetrics::handle(),
            }),
            pending: Mutex::new(None),
            tick,
        }
    }

    /// Must be called before the first `on_error`; a running countdown keeps
    /// the previous handle.
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.metrics = metrics;
        }
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<FailoverSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> FailoverSnapshot {
        self.shared.session().snapshot()
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingAdvance>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_pending(&self) {
        self.pending().take();
    }

    pub fn has_pending_advance(&self) -> bool {
        self.pending()
            .as_ref()
            .map(|pending| !pending.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn select_source(&self, index: usize) -> Result<(), FailoverError> {
        self.shared.apply(|session| session.select_source(index))?;
        self.cancel_pending();
        debug!(index, "source selected");
        Ok(())
    }

    pub fn manual_select(&self, index: usize) -> Result<(), FailoverError> {
        self.shared.apply(|session| session.manual_select(index))?;
        self.cancel_pending();
        metrics::lock(&self.shared.metrics).record_manual_selection();
        info!(index, "source pinned manually, automatic failover disabled");
        Ok(())
    }

    pub fn on_loaded(&self) {
        self.shared.apply(FailoverSession::on_loaded);
        self.cancel_pending();
    }

    pub fn on_error(&self) {
        let Some(ticket) = self.shared.apply(FailoverSession::on_error) else {
            let snapshot = self.snapshot();
            debug!(
                index = snapshot.current_index,
                manual = snapshot.manual,
                "playback error, no automatic failover"
            );
            return;
        };
        info!(
            index = self.snapshot().current_index,
            seconds = ticket.seconds,
            "playback error, failover countdown started"
        );
        let handle = tokio::spawn(run_countdown(Arc::clone(&self.shared), ticket, self.tick));
        *self.pending() = Some(PendingAdvance { handle });
    }

    /// Switches to a new media item's source list.
    pub fn reset(&self, source_count: usize) {
        self.shared.apply(|session| session.reset(source_count));
        self.cancel_pending();
    }
}

async fn run_countdown(shared: Arc<Shared>, ticket: CountdownTicket, tick: Duration) {
    let mut ticks = interval_at(Instant::now() + tick, tick);
    loop {
        ticks.tick().await;
        match shared.apply(|session| session.tick(ticket)) {
            Tick::Stale => return,
            Tick::Remaining(_) => {}
            Tick::Advanced(index) => {
                metrics::lock(&shared.metrics).record_failover_advance();
                info!(index, "failover advanced to next source");
                return;
            }
        }
    }
}

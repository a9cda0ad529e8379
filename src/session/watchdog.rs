use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::SessionEvent;

/// Single-shot processing deadline.
///
/// Every `arm` and `cancel` bumps the generation, and a fire event only
/// counts if it carries the current one. A timer that already fired but
/// whose event is still queued is therefore dead once superseded.
pub(crate) struct Watchdog {
    timeout: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
    tx: UnboundedSender<SessionEvent>,
}

impl Watchdog {
    pub(crate) fn new(timeout: Duration, tx: UnboundedSender<SessionEvent>) -> Self {
        Self {
            timeout,
            generation: 0,
            task: None,
            tx,
        }
    }

    /// Starts a new deadline, replacing any previous one.
    pub(crate) fn arm(&mut self) {
        self.abort();
        self.generation += 1;
        let generation = self.generation;
        let timeout = self.timeout;
        let tx = self.tx.clone();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(SessionEvent::WatchdogFired(generation));
        }));
        tracing::debug!("watchdog #{} armed for {:?}", generation, timeout);
    }

    pub(crate) fn cancel(&mut self) {
        if self.task.is_some() {
            tracing::debug!("watchdog #{} cancelled", self.generation);
        }
        self.abort();
        self.generation += 1;
    }

    /// Consumes a fire event. True only for the live deadline, and only once.
    pub(crate) fn take_fired(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.task.is_none() {
            return false;
        }
        self.task = None;
        true
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.abort();
    }
}

//! Host-visible progress: the processing flag and the current event.

use crate::types::WorkflowEvent;
use std::sync::Arc;
use tokio::sync::watch;

/// Counter of operations in flight, published through `watch`.
///
/// The host sees `count > 0` as "processing". An aborted operation that
/// releases its guard late only decrements its own share, so it cannot clear
/// the flag of the operation that superseded it.
#[derive(Clone, Debug)]
pub struct ProcessingFlag {
    count: Arc<watch::Sender<usize>>,
}

impl Default for ProcessingFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            count: Arc::new(tx),
        }
    }

    pub fn acquire(&self) -> ProcessingGuard {
        self.count.send_modify(|count| *count += 1);
        ProcessingGuard {
            flag: self.clone(),
            released: false,
        }
    }

    pub fn is_processing(&self) -> bool {
        *self.count.borrow() > 0
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Receiver of the in-flight count; processing while the value is above zero.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Resolves once no operation holds a guard.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        // sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn release_one(&self) {
        self.count
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// One share of the processing flag. Released exactly once, on `release()`
/// or on drop, whichever comes first.
#[derive(Debug)]
pub struct ProcessingGuard {
    flag: ProcessingFlag,
    released: bool,
}

impl ProcessingGuard {
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.flag.release_one();
        }
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Most recent `step_*` event, for the host's "now doing" line.
#[derive(Clone, Debug)]
pub struct CurrentEventCell {
    tx: Arc<watch::Sender<Option<WorkflowEvent>>>,
}

impl Default for CurrentEventCell {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentEventCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, event: WorkflowEvent) {
        self.tx.send_replace(Some(event));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn get(&self) -> Option<WorkflowEvent> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<WorkflowEvent>> {
        self.tx.subscribe()
    }
}

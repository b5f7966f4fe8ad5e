//! Task queue between the interactive context and the render worker

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender};
use log::debug;

use crate::task::TileTask;

/// What the worker pulls off the queue
///
/// Render messages carry the pass epoch current at submit time. The
/// worker compares that stamp against the live epoch, so a task dequeued
/// concurrently with `cancel_all` is still recognized as stale even
/// though the drain missed it.
pub(crate) enum WorkerMessage {
    Render { task: TileTask, epoch: u64 },
    Shutdown,
}

/// Interactive-side handle: submit, cancel, shut down
///
/// We use flume because its Receiver is cloneable (MPMC). std::sync::mpsc
/// and tokio::sync::mpsc are MPSC only. Cancellation here is drain-based:
/// the interactive side holds its own Receiver clone and empties the
/// channel instead of interrupting the worker thread, so both ends need to
/// consume from the same queue.
pub(crate) struct TaskQueue {
    tx: Sender<WorkerMessage>,
    drain_rx: Receiver<WorkerMessage>,
    epoch: Arc<AtomicU64>,
}

/// Worker-side handle: blocking recv plus the pass epoch
pub(crate) struct WorkerQueue {
    rx: Receiver<WorkerMessage>,
    epoch: Arc<AtomicU64>,
}

pub(crate) fn task_queue() -> (TaskQueue, WorkerQueue) {
    let (tx, rx) = flume::unbounded();
    let epoch = Arc::new(AtomicU64::new(0));
    (
        TaskQueue {
            tx,
            drain_rx: rx.clone(),
            epoch: Arc::clone(&epoch),
        },
        WorkerQueue { rx, epoch },
    )
}

impl TaskQueue {
    pub fn submit(&self, task: TileTask) {
        let epoch = self.epoch.load(Ordering::Acquire);
        let _ = self.tx.send(WorkerMessage::Render { task, epoch });
    }

    /// Drop every pending task and invalidate in-flight work
    ///
    /// The epoch bump happens first so a render finishing concurrently
    /// observes a stale epoch and discards its result. A queued Shutdown
    /// survives the drain. The queue is empty of render tasks on return.
    pub fn cancel_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let mut dropped = 0usize;
        let mut shutdown_seen = false;
        while let Ok(message) = self.drain_rx.try_recv() {
            match message {
                WorkerMessage::Render { .. } => dropped += 1,
                WorkerMessage::Shutdown => shutdown_seen = true,
            }
        }
        if shutdown_seen {
            let _ = self.tx.send(WorkerMessage::Shutdown);
        }
        if dropped > 0 {
            debug!("cancelled {dropped} pending tile tasks");
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerMessage::Shutdown);
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.drain_rx.len()
    }
}

impl WorkerQueue {
    /// Block until the next message; Err means all senders are gone
    pub fn recv(&self) -> Result<WorkerMessage, flume::RecvError> {
        self.rx.recv()
    }

    /// Pass epoch at this instant; compared before publishing a render
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

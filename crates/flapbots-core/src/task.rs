//! Task handoff between evaluation bridges and the simulation controller.
//!
//! A bridge creates a [`Task`] holding the candidate's decision and a single-use
//! result handle, submits it to the controller's bounded inbox, and awaits the
//! paired receiver.

use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::controller::Mode;
use crate::scoring::Score;
use crate::{Candidate, CandidateId, Decision};

/// Errors returned when the controller inbox rejects a task.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("controller inbox is full (capacity {capacity})")]
    Full { capacity: usize },
    #[error("controller is no longer accepting tasks")]
    Closed,
}

/// Single-use sender for a task's score.
#[derive(Debug)]
pub struct ResultHandle {
    tx: oneshot::Sender<Score>,
}

impl ResultHandle {
    /// Send the score; returns `false` when the receiver is gone.
    pub fn deliver(self, score: Score) -> bool {
        self.tx.send(score).is_ok()
    }
}

/// One pending evaluation.
pub struct Task {
    pub id: CandidateId,
    pub decision: Box<dyn Decision>,
    pub(crate) result: ResultHandle,
}

impl Task {
    /// Build a task and the receiver its score will arrive on.
    #[must_use]
    pub fn new(candidate: Candidate) -> (Self, oneshot::Receiver<Score>) {
        let (tx, rx) = oneshot::channel();
        let task = Self {
            id: candidate.id,
            decision: candidate.decision,
            result: ResultHandle { tx },
        };
        (task, rx)
    }

    pub(crate) fn into_parts(self) -> (CandidateId, Box<dyn Decision>, ResultHandle) {
        (self.id, self.decision, self.result)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("decision", &self.decision.kind())
            .finish_non_exhaustive()
    }
}

/// Cloneable producer side of the controller inbox.
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: mpsc::Sender<Task>,
    capacity: usize,
    mode: watch::Receiver<Mode>,
}

impl TaskSender {
    /// Enqueue without waiting.
    pub fn submit(&self, task: Task) -> Result<(), SubmitError> {
        self.tx.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Enqueue, waiting for capacity.
    pub async fn send(&self, task: Task) -> Result<(), SubmitError> {
        self.tx.send(task).await.map_err(|_| SubmitError::Closed)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Last mode the controller reported; kept after the controller is gone.
    #[must_use]
    pub fn controller_mode(&self) -> Mode {
        *self.mode.borrow()
    }
}

/// Consumer side of the controller inbox.
#[derive(Debug)]
pub(crate) struct TaskInbox {
    rx: mpsc::Receiver<Task>,
    mode: watch::Sender<Mode>,
}

impl TaskInbox {
    pub(crate) fn try_next(&mut self) -> Option<Task> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub(crate) fn publish_mode(&self, mode: Mode) {
        self.mode.send_if_modified(|current| {
            let changed = *current != mode;
            *current = mode;
            changed
        });
    }
}

pub(crate) fn task_inbox(capacity: usize) -> (TaskSender, TaskInbox) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let (mode_tx, mode_rx) = watch::channel(Mode::Setup);
    (
        TaskSender {
            tx,
            capacity,
            mode: mode_rx,
        },
        TaskInbox { rx, mode: mode_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Constant;

    fn sample_task(id: u64) -> (Task, oneshot::Receiver<Score>) {
        Task::new(Candidate::new(CandidateId(id), Constant(false)))
    }

    #[test]
    fn full_inbox_rejects_without_blocking() {
        let (sender, mut inbox) = task_inbox(2);
        sender.submit(sample_task(1).0).expect("first");
        sender.submit(sample_task(2).0).expect("second");
        assert_eq!(
            sender.submit(sample_task(3).0),
            Err(SubmitError::Full { capacity: 2 })
        );
        assert_eq!(inbox.try_next().map(|task| task.id), Some(CandidateId(1)));
        assert_eq!(inbox.try_next().map(|task| task.id), Some(CandidateId(2)));
        assert!(inbox.try_next().is_none());
    }

    #[test]
    fn dropped_inbox_reports_closed() {
        let (sender, inbox) = task_inbox(1);
        drop(inbox);
        assert_eq!(sender.submit(sample_task(1).0), Err(SubmitError::Closed));
    }

    #[test]
    fn controller_mode_outlives_inbox() {
        let (sender, inbox) = task_inbox(1);
        assert_eq!(sender.controller_mode(), Mode::Setup);
        inbox.publish_mode(Mode::Terminal);
        drop(inbox);
        assert_eq!(sender.controller_mode(), Mode::Terminal);
    }

    #[test]
    fn result_handle_delivers_once() {
        let (task, mut rx) = sample_task(9);
        let (_, _, handle) = task.into_parts();
        let score = Score {
            fitness: 3.5,
            cleared: false,
        };
        assert!(handle.deliver(score));
        assert_eq!(rx.try_recv().expect("score"), score);
    }

    #[test]
    fn delivery_to_dropped_receiver_is_reported() {
        let (task, rx) = sample_task(9);
        drop(rx);
        let (_, _, handle) = task.into_parts();
        assert!(!handle.deliver(Score {
            fitness: 0.0,
            cleared: false,
        }));
    }
}

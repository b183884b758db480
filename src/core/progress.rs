//! Ordered, terminating update stream from a run to its observer.
//!
//! Single writer (the run's controller task), single reader. The writer
//! can send any number of progress snapshots and exactly one terminal
//! update; sending the terminal update consumes the writer, which closes
//! the stream.

use tokio::sync::mpsc;

use crate::domain::{ProgressEvent, RunError, RunResult, RunUpdate};

/// Create a connected sender/stream pair
pub fn channel() -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressSender { tx },
        ProgressStream {
            rx,
            finished: false,
        },
    )
}

/// Writing half, owned by the run
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<RunUpdate>,
}

impl ProgressSender {
    /// Publish a progress snapshot. Never blocks; dropped if nobody listens.
    pub fn progress(&self, event: ProgressEvent) {
        let _ = self.tx.send(RunUpdate::Progress(event));
    }

    /// Publish the success outcome and close the stream
    pub fn complete(self, result: RunResult) {
        let _ = self.tx.send(RunUpdate::Completed(result));
    }

    /// Publish the failure outcome and close the stream
    pub fn fail(self, error: RunError) {
        let _ = self.tx.send(RunUpdate::Failed(error));
    }
}

/// Reading half, handed to the caller
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<RunUpdate>,
    finished: bool,
}

impl ProgressStream {
    /// Next update, `None` once the terminal update has been returned or
    /// the run went away without one.
    pub async fn recv(&mut self) -> Option<RunUpdate> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(update) => {
                if update.is_terminal() {
                    self.finished = true;
                    self.rx.close();
                }
                Some(update)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Whether the stream has ended
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, Stage};
    use chrono::Utc;
    use uuid::Uuid;

    fn event(completed: usize) -> ProgressEvent {
        ProgressEvent {
            run_id: Uuid::nil(),
            stage: Stage::Capturing,
            total: 5,
            completed,
            active: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_updates_arrive_in_order_then_close() {
        let (tx, mut rx) = channel();
        tx.progress(event(0));
        tx.progress(event(3));
        tx.fail(RunError::new(ErrorKind::DeliveryFailed, "refused"));

        assert_eq!(rx.recv().await.unwrap().as_progress().unwrap().completed, 0);
        assert_eq!(rx.recv().await.unwrap().as_progress().unwrap().completed, 3);
        assert!(rx.recv().await.unwrap().is_terminal());
        assert!(rx.is_finished());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_sender_ends_stream() {
        let (tx, mut rx) = channel();
        tx.progress(event(1));
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        assert!(rx.is_finished());
    }

    #[tokio::test]
    async fn test_sender_survives_missing_reader() {
        let (tx, rx) = channel();
        drop(rx);
        tx.progress(event(0));
        tx.fail(RunError::cancelled());
    }
}

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::observer::DownloadObserver;
use super::{DownloadEvent, DownloadOutcome, State};

/// Stop signal of a download. Clones share it, so any task can cancel, and the engine
/// awaits it next to every network wait.
pub use tokio_util::sync::CancellationToken;

/// Owner side of a running download.
/// Dropping the handle does not stop the download, call [`DownloadHandle::cancel`] for that.
#[derive(Debug)]
pub struct DownloadHandle {
    pub id: Uuid,
    cancel: CancellationToken,
    events: mpsc::Receiver<DownloadEvent>,
    state: watch::Receiver<State>,
    task: JoinHandle<()>,
}

impl DownloadHandle {
    pub(crate) fn new(
        id: Uuid,
        cancel: CancellationToken,
        events: mpsc::Receiver<DownloadEvent>,
        state: watch::Receiver<State>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            cancel,
            events,
            state,
            task,
        }
    }

    pub fn cancel(&self) {
        log::info!("Cancel requested for download {}", self.id);
        self.cancel.cancel();
    }

    /// Token that cancels this download, for handing to other tasks
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Next event of the download, `None` once the outcome has been received.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await
    }

    /// Waits for the outcome, discarding progress.
    pub async fn wait(self) -> DownloadOutcome {
        self.observe(&mut ()).await
    }

    /// Forwards every event to the observer and returns the outcome.
    pub async fn observe(mut self, observer: &mut dyn DownloadObserver) -> DownloadOutcome {
        while let Some(event) = self.events.recv().await {
            match event {
                DownloadEvent::Progress(progress) => observer.on_progress(&progress),
                DownloadEvent::Finished(outcome) => {
                    observer.on_outcome(&outcome);
                    return outcome;
                }
            }
        }
        // Sender dropped without an outcome, the task panicked or was aborted
        let reason = match (&mut self.task).await {
            Err(e) => e.to_string(),
            Ok(()) => "no outcome reported".to_owned(),
        };
        log::error!("Download {} ended unexpectedly: {}", self.id, reason);
        let outcome = DownloadOutcome::Failed {
            status_code: None,
            message: format!("download task ended unexpectedly: {}", reason),
        };
        observer.on_outcome(&outcome);
        outcome
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test(tokio::test)]
    async fn dead_task_is_reported_as_failure() {
        let (tx, events) = mpsc::channel(1);
        let (_state_tx, state) = watch::channel(State::Idle);
        let task = tokio::spawn(async move {
            drop(tx);
            panic!("download blew up");
        });
        let handle = DownloadHandle::new(Uuid::new_v4(), CancellationToken::new(), events, state, task);
        match handle.wait().await {
            DownloadOutcome::Failed { status_code, message } => {
                assert_eq!(status_code, None);
                assert!(message.contains("ended unexpectedly"), "{}", message);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

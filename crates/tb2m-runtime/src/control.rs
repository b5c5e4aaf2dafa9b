//! Hand-off between the command dispatch loop and the poll loop
//!
//! The dispatch loop pauses polling around every command so commands and
//! polls never talk to the proxy at the same time. A pause is acknowledged
//! by the poll loop once its in-flight cycle has been dropped.

use crate::error::RuntimeError;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

const CONTROL_CAPACITY: usize = 8;

#[derive(Debug)]
pub(crate) enum Control {
    /// Forget what was published so the next cycle publishes everything
    ClearStale,
    /// Abort the current cycle and wait; acknowledged once aborted
    Pause(oneshot::Sender<()>),
    Resume,
}

/// Dispatch-side handle on a device's poll loop
#[derive(Debug, Clone)]
pub struct PollHandle {
    tx: mpsc::Sender<Control>,
}

impl PollHandle {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Control>) {
        let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Ask the next cycle to republish every topic
    pub async fn clear_stale(&self) {
        let _ = self.tx.send(Control::ClearStale).await;
    }

    /// Stop polling until the returned guard is dropped
    pub async fn pause(&self) -> Result<Paused, RuntimeError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Control::Pause(ack_tx))
            .await
            .map_err(|_| RuntimeError::PollStopped)?;
        ack_rx.await.map_err(|_| RuntimeError::PollStopped)?;
        Ok(Paused {
            tx: self.tx.clone(),
        })
    }
}

/// Polling stays paused while this is alive
#[derive(Debug)]
pub struct Paused {
    tx: mpsc::Sender<Control>,
}

impl Drop for Paused {
    fn drop(&mut self) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(Control::Resume) {
            warn!("Control channel full, poll loop not resumed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_resume_round_trip() {
        let (handle, mut rx) = PollHandle::channel();
        let poll = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(control) = rx.recv().await {
                match control {
                    Control::Pause(ack) => {
                        seen.push("pause");
                        let _ = ack.send(());
                    }
                    Control::Resume => {
                        seen.push("resume");
                        break;
                    }
                    Control::ClearStale => seen.push("clear"),
                }
            }
            seen
        });

        handle.clear_stale().await;
        let paused = handle.pause().await.unwrap();
        drop(paused);
        assert_eq!(poll.await.unwrap(), vec!["clear", "pause", "resume"]);
    }

    #[tokio::test]
    async fn test_pause_without_poll_loop() {
        let (handle, rx) = PollHandle::channel();
        drop(rx);
        assert!(matches!(handle.pause().await, Err(RuntimeError::PollStopped)));
    }
}

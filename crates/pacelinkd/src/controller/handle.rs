//! Client interface for interacting with the ControllerActor.
//!
//! The `ControllerHandle` provides a cheap-to-clone interface for sending
//! commands to the controller actor and subscribing to session events.

use tokio::sync::{broadcast, mpsc, oneshot};

use pacelink_core::{Command, Session, SessionState};

use super::commands::{ControllerCommand, ControllerError, SessionEvent};

/// Handle for interacting with the controller actor.
///
/// Cheap to clone and share across tasks. All methods are async and
/// communicate with the actor via channels.
#[derive(Clone)]
pub struct ControllerHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<ControllerCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<SessionEvent>,
}

impl ControllerHandle {
    /// Create a new controller handle.
    pub fn new(
        sender: mpsc::Sender<ControllerCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Apply a workout command, returning the resulting lifecycle state.
    ///
    /// # Errors
    ///
    /// - `ControllerError::ChannelClosed` if the actor has shut down
    pub async fn apply(&self, command: Command) -> Result<SessionState, ControllerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(ControllerCommand::Apply {
                command,
                respond_to: tx,
            })
            .await
            .map_err(|_| ControllerError::ChannelClosed)?;

        rx.await.map_err(|_| ControllerError::ChannelClosed)?
    }

    /// Get a snapshot of the current session.
    ///
    /// Returns `None` if no session exists or if communication with the
    /// actor fails.
    pub async fn snapshot(&self) -> Option<Session> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(ControllerCommand::Snapshot { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Subscribe to session events.
    ///
    /// Returns a broadcast receiver that will receive all session events
    /// (state changes, telemetry, reconciliation outcomes) published by
    /// the controller actor.
    ///
    /// This is a synchronous operation - it doesn't communicate with
    /// the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    ///
    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacelink_core::ActivityKind;

    fn create_test_handle() -> (ControllerHandle, mpsc::Receiver<ControllerCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = ControllerHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
        // Compiles = test passes
    }

    #[tokio::test]
    async fn test_apply_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(ControllerCommand::Apply {
                command,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(
                    command,
                    Command::Start {
                        activity_kind: ActivityKind::Running
                    }
                );
                let _ = respond_to.send(Ok(SessionState::Starting));
                return true;
            }
            false
        });

        let result = handle
            .apply(Command::Start {
                activity_kind: ActivityKind::Running,
            })
            .await;
        assert_eq!(result.ok(), Some(SessionState::Starting));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.apply(Command::Stop).await;
        assert!(matches!(result, Err(ControllerError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_snapshot_returns_none_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.snapshot().await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_returns_receiver() {
        let (handle, _rx) = create_test_handle();

        let _subscriber = handle.subscribe();
        // Compiles and returns = test passes
    }
}

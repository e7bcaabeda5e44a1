//! Last-value-wins delivery to the companion link.
//!
//! Telemetry pushes are fire-and-forget and individually expendable: each
//! full update supersedes the last, so when the link is unreachable or slow
//! only the single latest update is kept. Lifecycle notices (state changes,
//! final metrics, reconciliation outcomes) are queued in order and always
//! drain ahead of telemetry, so a burst of metric pushes can never crowd
//! out a session-ended notice.
//!
//! Memory is bounded regardless of how long the companion stays away: one
//! telemetry slot plus a small capped notice queue.

use std::collections::VecDeque;

use pacelink_protocol::{TelemetryUpdate, WearableMessage};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

/// Channel buffer for delivery commands from the controller.
const COMMAND_BUFFER: usize = 32;

/// Maximum queued lifecycle notices while the link is unreachable.
const MAX_PENDING_NOTICES: usize = 64;

/// Commands accepted by the delivery worker.
#[derive(Debug)]
enum DeliveryCommand {
    /// A full telemetry update; replaces any parked update.
    Telemetry(TelemetryUpdate),
    /// An ordered lifecycle notice; queued, never overwritten.
    Notice(WearableMessage),
}

/// Cheap-to-clone sender half used by the controller actor.
#[derive(Clone)]
pub struct DeliveryChannel {
    sender: mpsc::Sender<DeliveryCommand>,
}

impl DeliveryChannel {
    /// Offers a telemetry update for delivery. Latest wins; never blocks
    /// the caller on link availability.
    pub async fn send_telemetry(&self, update: TelemetryUpdate) {
        if self
            .sender
            .send(DeliveryCommand::Telemetry(update))
            .await
            .is_err()
        {
            debug!("Delivery worker gone, dropping telemetry update");
        }
    }

    /// Queues a lifecycle notice for ordered delivery.
    pub async fn send_notice(&self, message: WearableMessage) {
        if self
            .sender
            .send(DeliveryCommand::Notice(message))
            .await
            .is_err()
        {
            debug!("Delivery worker gone, dropping notice");
        }
    }
}

/// Spawns the delivery worker.
///
/// `frames_tx` feeds the link writer; `reachable_rx` flips true while a
/// companion connection is up. Frames are only handed to the link while
/// reachable; otherwise they park in the worker's slots.
pub fn spawn_delivery(
    frames_tx: mpsc::Sender<WearableMessage>,
    reachable_rx: watch::Receiver<bool>,
) -> DeliveryChannel {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let worker = DeliveryWorker {
        cmd_rx,
        reachable_rx,
        frames_tx,
        telemetry_slot: None,
        notices: VecDeque::new(),
    };
    tokio::spawn(worker.run());

    DeliveryChannel { sender: cmd_tx }
}

/// Owns the parked state between the controller and the link writer.
struct DeliveryWorker {
    cmd_rx: mpsc::Receiver<DeliveryCommand>,
    reachable_rx: watch::Receiver<bool>,
    frames_tx: mpsc::Sender<WearableMessage>,
    telemetry_slot: Option<TelemetryUpdate>,
    notices: VecDeque<WearableMessage>,
}

impl DeliveryWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(DeliveryCommand::Telemetry(update)) => {
                            if self.telemetry_slot.replace(update).is_some() {
                                trace!("Superseded parked telemetry update");
                            }
                        }
                        Some(DeliveryCommand::Notice(message)) => {
                            if self.notices.len() >= MAX_PENDING_NOTICES {
                                warn!("Notice queue full, dropping oldest notice");
                                self.notices.pop_front();
                            }
                            self.notices.push_back(message);
                        }
                        None => {
                            debug!("Delivery worker stopping: controller channel closed");
                            break;
                        }
                    }
                }

                changed = self.reachable_rx.changed() => {
                    if changed.is_err() {
                        debug!("Delivery worker stopping: link gone");
                        break;
                    }
                }
            }

            if *self.reachable_rx.borrow() {
                self.flush();
            }
        }
    }

    /// Hands parked frames to the link writer, notices first.
    ///
    /// Uses try_send so a slow link backs frames up here (where telemetry
    /// collapses to the latest value) instead of in the socket buffer.
    fn flush(&mut self) {
        while let Some(notice) = self.notices.pop_front() {
            match self.frames_tx.try_send(notice) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(notice)) => {
                    self.notices.push_front(notice);
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(notice)) => {
                    self.notices.push_front(notice);
                    return;
                }
            }
        }

        if let Some(update) = self.telemetry_slot.take() {
            let session_id = update.session_id.clone();
            if let Err(err) = self
                .frames_tx
                .try_send(WearableMessage::Telemetry { update })
            {
                match err {
                    mpsc::error::TrySendError::Full(WearableMessage::Telemetry { update })
                    | mpsc::error::TrySendError::Closed(WearableMessage::Telemetry { update }) => {
                        self.telemetry_slot = Some(update);
                    }
                    _ => {}
                }
                trace!(session_id = %session_id, "Link busy, telemetry re-parked");
            }
        }
    }
}

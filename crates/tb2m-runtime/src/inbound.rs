//! Inbound path from a device's MQTT session to its dispatch loop
//!
//! Messages go through a bounded queue and the sender waits for room, so a
//! slow command holds back further deliveries instead of losing them. The
//! connect notification travels beside the queue on a watch flag: it is never
//! dropped and repeated connects collapse into one re-announce.

use crate::error::RuntimeError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Message delivered to a device by its MQTT session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The session (re)connected to the broker
    Connected,
    Message { topic: String, payload: String },
}

/// Create the inbound path of one device with room for `capacity` messages
pub fn inbound_channel(capacity: usize) -> (InboundSender, InboundReceiver) {
    let (messages_tx, messages_rx) = mpsc::channel(capacity.max(1));
    let (connected_tx, connected_rx) = watch::channel(());
    (
        InboundSender {
            messages: messages_tx,
            connected: Arc::new(connected_tx),
        },
        InboundReceiver {
            messages: messages_rx,
            connected: connected_rx,
            connected_open: true,
        },
    )
}

/// Session side of the inbound path
#[derive(Debug, Clone)]
pub struct InboundSender {
    messages: mpsc::Sender<Inbound>,
    connected: Arc<watch::Sender<()>>,
}

impl InboundSender {
    /// Flag a (re)connect; never blocks
    pub fn connected(&self) {
        self.connected.send_modify(|_| {});
    }

    /// Queue a message, waiting while the queue is full
    pub async fn message(&self, topic: String, payload: String) -> Result<(), RuntimeError> {
        self.messages
            .send(Inbound::Message { topic, payload })
            .await
            .map_err(|_| RuntimeError::InboundClosed)
    }
}

/// Dispatch side of the inbound path
#[derive(Debug)]
pub struct InboundReceiver {
    messages: mpsc::Receiver<Inbound>,
    connected: watch::Receiver<()>,
    connected_open: bool,
}

impl InboundReceiver {
    /// Next event, a pending connect first. `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        loop {
            tokio::select! {
                biased;
                changed = self.connected.changed(), if self.connected_open => match changed {
                    Ok(()) => return Some(Inbound::Connected),
                    Err(_) => self.connected_open = false,
                },
                message = self.messages.recv() => return message,
            }
        }
    }
}

// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

enum Inbound {
    Message(Vec<u8>),
    Shutdown,
}

/// Single-consumer blocking hand-off for messages delegated from the
/// connection state machine into a driver's `run`.  The producer side
/// never blocks and is safe to use concurrently with a blocked `take`.
pub struct InboundQueue {
    tx: Sender<Inbound>,
    rx: Receiver<Inbound>,
    running: Arc<AtomicBool>,
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            tx,
            rx,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Endpoint for the connection state machine's receive path.
    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            tx: self.tx.clone(),
            running: self.running.clone(),
        }
    }

    /// Block until the next delegated message arrives.  Returns `None` if
    /// the wait was interrupted by [`DriverHandle::cancel`]; messages are
    /// consumed strictly in delegation order.
    pub fn take(&self) -> Option<Vec<u8>> {
        match self.rx.recv() {
            Ok(Inbound::Message(m)) => Some(m),
            Ok(Inbound::Shutdown) | Err(_) => None,
        }
    }

    /// False once the driver has been cancelled by the owning connection.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Cloneable endpoint through which the connection state machine feeds
/// peer messages into a driver and tears it down.
#[derive(Clone)]
pub struct DriverHandle {
    tx: Sender<Inbound>,
    running: Arc<AtomicBool>,
}

impl DriverHandle {
    /// Enqueue one message received from the remote peer.  Never blocks;
    /// a message delegated after the driver terminated is silently
    /// dropped.
    pub fn delegate(&self, message: Vec<u8>) {
        let _ = self.tx.send(Inbound::Message(message));
    }

    /// Cancel the driver: clears the running flag and interrupts a
    /// `take` blocked inside `run`.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.tx.send(Inbound::Shutdown);
    }
}

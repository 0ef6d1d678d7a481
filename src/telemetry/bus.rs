//! In-process event bus for telemetry events.
//!
//! Each subscriber gets its own channel. Sequence assignment and fan-out happen under one lock,
//! so every subscriber sees events in emission order.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::telemetry::events::{ConductorEvent, EventEnvelope};
use crate::types::{format_timestamp, now};

struct BusState {
    next_seq: u64,
    subscribers: Vec<Sender<EventEnvelope>>,
}

#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_seq: 1,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Register a new observer. Events emitted before subscription are not replayed.
    pub fn subscribe(&self) -> Receiver<EventEnvelope> {
        let (sender, receiver) = channel();
        self.state.lock().subscribers.push(sender);
        receiver
    }

    /// Emit an event to every live subscriber; returns the assigned sequence number.
    pub fn emit(&self, session: Option<&str>, event: impl Into<ConductorEvent>) -> u64 {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let envelope = EventEnvelope {
            seq,
            ts: format_timestamp(&now()),
            session: session.map(str::to_string),
            event: event.into(),
        };
        // disconnected receivers are dropped here
        state
            .subscribers
            .retain(|subscriber| subscriber.send(envelope.clone()).is_ok());
        seq
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect everything currently buffered on a receiver without blocking.
pub fn drain(receiver: &Receiver<EventEnvelope>) -> Vec<EventEnvelope> {
    receiver.try_iter().collect()
}

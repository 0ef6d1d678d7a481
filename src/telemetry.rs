//! Telemetry domain: typed events and the ordered in-process bus.

pub mod bus;
pub mod events;

pub use bus::{drain, EventBus};
pub use events::{
    ConductorEvent, EventEnvelope, GateEvent, InstructionEvent, MonitorEvent, RecoveryEvent,
};

//! Motion command sinks.
//!
//! The controller never talks to a simulator or a motor driver directly; it
//! hands each [`VelocityCommand`] to a [`MotionSink`].  [`BusMotionSink`]
//! routes commands onto [`Topic::CmdVel`] tagged with the consumer's
//! `<agent>/cmd_vel` channel, where any adapter can pick them up.

use std::sync::Arc;

use tfchase_types::{ChaseError, Event, EventPayload, VelocityCommand};
use tracing::trace;

use crate::bus::{EventBus, Topic};

/// Receives velocity commands for one agent.
pub trait MotionSink: Send + Sync {
    fn send(&self, command: VelocityCommand) -> Result<(), ChaseError>;
}

/// [`MotionSink`] that publishes commands on the event bus.
#[derive(Debug, Clone)]
pub struct BusMotionSink {
    bus: Arc<EventBus>,
    channel: String,
}

impl BusMotionSink {
    /// Sink for the agent named `agent`; commands go out on `<agent>/cmd_vel`.
    pub fn new(bus: Arc<EventBus>, agent: &str) -> Self {
        Self {
            bus,
            channel: format!("{agent}/cmd_vel"),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl MotionSink for BusMotionSink {
    fn send(&self, command: VelocityCommand) -> Result<(), ChaseError> {
        let delivered = self.bus.publish_to(
            Topic::CmdVel,
            Event::new(format!("tfchase::{}", self.channel), EventPayload::Velocity(command)),
        )?;
        trace!(channel = %self.channel, delivered, "velocity command published");
        Ok(())
    }
}

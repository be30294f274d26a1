//! Small capability interfaces wiring the four subsystems together
//! without inheritance or hidden globals (see "callback web" in the
//! design notes): the Teletask link only needs something to hand
//! decoded events to, the cover controller only needs something that
//! can move an actuator and publish a position, and so on.

use async_trait::async_trait;

use crate::asset::TeletaskType;
use crate::teletask::codec::Value;

/// Receives decoded Teletask REPORT events, in arrival order.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, unit: u8, teletask_type: TeletaskType, id: u16, value: Value);
}

/// Sends a Teletask SET command for a given asset.
#[async_trait]
pub trait ActuatorSink: Send + Sync {
    async fn send_set(&self, unit: u8, teletask_type: TeletaskType, id: u16, value: u8) -> anyhow::Result<()>;
}

/// Publishes a cover's current position to MQTT.
#[async_trait]
pub trait PositionSink: Send + Sync {
    async fn publish_position(&self, key: &str, position: u8);
}

pub mod codec;
pub mod link;

pub use link::TeletaskLink;

use async_trait::async_trait;

use crate::asset::TeletaskType;
use crate::traits::ActuatorSink;

#[async_trait]
impl ActuatorSink for TeletaskLink {
    async fn send_set(&self, unit: u8, teletask_type: TeletaskType, id: u16, value: u8) -> anyhow::Result<()> {
        TeletaskLink::send_set(self, unit, teletask_type, id, value).await
    }
}

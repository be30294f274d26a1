pub mod client;
pub mod discovery;
pub mod value;

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::QoS;
use tracing::warn;

use crate::asset::AssetRegistry;
use crate::config::HomeAssistantConfig;
use crate::traits::PositionSink;
use client::MqttBridge;

/// Binds the wire-level `MqttBridge` to this bridge's topic/payload
/// conventions and the asset registry, so callers publish by asset key
/// instead of building topics by hand.
pub struct Translator {
    bridge: MqttBridge,
    registry: Arc<AssetRegistry>,
    discovery_prefix: String,
    node_id: String,
}

impl Translator {
    pub fn new(bridge: MqttBridge, registry: Arc<AssetRegistry>, cfg: &HomeAssistantConfig) -> Translator {
        Translator {
            bridge,
            registry,
            discovery_prefix: cfg.discovery_prefix.clone(),
            node_id: cfg.device_id.clone(),
        }
    }

    /// Publishes a retained discovery config topic for every asset,
    /// including the synthetic calibrate buttons. Only the first
    /// publish carries the device manufacturer/model fields.
    pub async fn publish_discovery(&self) -> anyhow::Result<()> {
        let mut first = true;
        for asset in self.registry.all() {
            let base = discovery::base_topic(&self.discovery_prefix, asset, &self.node_id);
            let topic = discovery::config_topic(&self.discovery_prefix, asset, &self.node_id);
            let payload = discovery::build_payload(asset, &base, first);
            self.bridge
                .publish(topic, QoS::AtLeastOnce, true, serde_json::to_vec(&payload)?)
                .await?;
            first = false;
        }
        Ok(())
    }

    /// Subscribes to the command topics every asset can receive on:
    /// `set`/`setbri` always, `setpos`/`exec` only when this
    /// installation has covers, matching the distilled spec's
    /// subscription table exactly.
    pub async fn subscribe_commands(&self) -> anyhow::Result<()> {
        let set_filter = format!("{}/+/{}/+/set", self.discovery_prefix, self.node_id);
        let setbri_filter = format!("{}/+/{}/+/setbri", self.discovery_prefix, self.node_id);
        self.bridge.subscribe(set_filter, QoS::AtMostOnce).await?;
        self.bridge.subscribe(setbri_filter, QoS::AtMostOnce).await?;

        if self.registry.has_covers() {
            let setpos_filter = format!("{}/+/{}/+/setpos", self.discovery_prefix, self.node_id);
            let exec_filter = format!("{}/+/{}/+/exec", self.discovery_prefix, self.node_id);
            self.bridge.subscribe(setpos_filter, QoS::AtMostOnce).await?;
            self.bridge.subscribe(exec_filter, QoS::AtMostOnce).await?;
        }
        Ok(())
    }

    /// Publishes the state message(s) for a decoded Teletask value.
    pub async fn publish_state(&self, asset: &crate::asset::Asset, value: &crate::teletask::codec::Value) {
        let base = discovery::base_topic(&self.discovery_prefix, asset, &self.node_id);
        for message in value::encode_state(asset, value) {
            let topic = format!("{}/{}", base, message.topic_suffix);
            if let Err(e) = self
                .bridge
                .publish(topic, QoS::AtMostOnce, false, message.payload.into_bytes())
                .await
            {
                warn!(error = %e, key = %asset.key(), "failed to publish state");
            }
        }
    }

    pub fn registry(&self) -> &Arc<AssetRegistry> {
        &self.registry
    }

    fn cover_position_topic(&self, key: &str) -> Option<String> {
        let asset = self.registry.get(key)?;
        Some(format!("{}/pos", discovery::base_topic(&self.discovery_prefix, asset, &self.node_id)))
    }
}

#[async_trait]
impl PositionSink for Translator {
    async fn publish_position(&self, key: &str, position: u8) {
        let Some(topic) = self.cover_position_topic(key) else {
            warn!(key, "publish_position for unknown asset key");
            return;
        };
        if let Err(e) = self
            .bridge
            .publish(topic, QoS::AtMostOnce, false, position.to_string().into_bytes())
            .await
        {
            warn!(error = %e, key, "failed to publish cover position");
        }
    }
}

//! `rumqttc` wiring: connect, discovery publish, subscriptions, and
//! the receiver task that turns incoming `Publish` packets into a
//! channel the composition root reads from.
//!
//! The split client/eventloop + receiver-task shape mirrors the other
//! MQTT bridges in this ecosystem (e.g. the `AsyncClient`/`EventLoop`
//! pairing and `tokio::select!`-guarded poll loop used for inverter
//! command bridging elsewhere in this codebase family).

use std::time::Duration;

use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HomeAssistantConfig;

const MQTT_PORT: u16 = 1883;
const CAP: usize = 100;

#[derive(Debug, Clone)]
pub struct IncomingCommand {
    pub topic: String,
    pub payload: String,
}

pub struct MqttBridge {
    pub client: AsyncClient,
}

impl MqttBridge {
    pub fn connect(cfg: &HomeAssistantConfig) -> (MqttBridge, rumqttc::EventLoop) {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.broker_host.clone(), MQTT_PORT);
        options.set_keep_alive(Duration::from_secs(60));
        let (client, eventloop) = AsyncClient::new(options, CAP);
        (MqttBridge { client }, eventloop)
    }

    pub async fn publish(&self, topic: impl Into<String>, qos: QoS, retain: bool, payload: Vec<u8>) -> anyhow::Result<()> {
        let topic = topic.into();
        debug!(topic = %topic, "publishing");
        self.client.publish(topic, qos, retain, payload).await?;
        Ok(())
    }

    pub async fn subscribe(&self, filter: impl Into<String>, qos: QoS) -> anyhow::Result<()> {
        let filter = filter.into();
        info!(filter = %filter, "subscribing");
        self.client.subscribe(filter, qos).await?;
        Ok(())
    }
}

/// Polls the event loop, forwarding `Publish` packets as
/// `IncomingCommand`s. Reconnects are left to `rumqttc`'s own internal
/// policy; a poll error is logged and retried after a short backoff
/// rather than torn down, matching the open reconnect question in the
/// design notes (the broker side, unlike the Teletask side, is
/// expected to reconnect transparently).
pub async fn run_receiver(
    mut eventloop: rumqttc::EventLoop,
    tx: mpsc::Sender<IncomingCommand>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("mqtt receiver stopping");
                return;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).to_string();
                        let command = IncomingCommand { topic: publish.topic, payload };
                        if tx.send(command).await.is_err() {
                            warn!("command channel closed, stopping mqtt receiver");
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt eventloop error, retrying shortly");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

//! Teletask ⇄ MQTT bridge
//!
//! Composition root: loads config, connects to the Teletask central
//! unit and the MQTT broker, wires the translation and cover-control
//! layers together, publishes discovery, and runs until SIGINT/SIGTERM.

mod asset;
mod config;
mod cover;
mod error;
mod mqtt;
mod teletask;
mod traits;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use asset::{AssetRegistry, Component, TeletaskType};
use cover::CoverController;
use mqtt::client::{IncomingCommand, MqttBridge};
use mqtt::value;
use mqtt::Translator;
use teletask::codec::Value;
use teletask::TeletaskLink;
use traits::{ActuatorSink, EventSink, PositionSink};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bridges a Teletask domotics bus to Home Assistant over MQTT")]
struct Cli {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    #[arg(long, default_value = "covers.json")]
    covers_file: PathBuf,
}

/// Receives decoded Teletask events, publishes MQTT state for every
/// asset, and additionally feeds MOTOR reports for cover assets into
/// the cover controller. Mirrors `handle_teletask_event` in `main.py`.
struct Bridge {
    registry: Arc<AssetRegistry>,
    translator: Arc<Translator>,
    cover_controller: Arc<CoverController>,
}

#[async_trait]
impl EventSink for Bridge {
    async fn on_event(&self, unit: u8, teletask_type: TeletaskType, id: u16, value: Value) {
        let Some(asset) = self.registry.lookup(unit, teletask_type.as_str(), id as i32) else {
            return;
        };

        self.translator.publish_state(asset, &value).await;

        if asset.component == Component::Cover {
            if let Value::Motor { up, moving } = value {
                self.cover_controller.handle_motor_event(&asset.key(), asset, up, moving).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let cfg = config::load(&cli.config).context("loading configuration")?;
    let cover_states = cover::state::load(&cli.covers_file).context("loading cover state")?;

    let registry = Arc::new(AssetRegistry::build(cfg.assets.clone()));
    let token = CancellationToken::new();

    let addr = format!("{}:{}", cfg.teletask.ip, cfg.teletask.port);
    let (link, read_half) = TeletaskLink::connect(&addr, token.clone())
        .await
        .context("connecting to teletask central unit")?;

    let (mqtt_bridge, eventloop) = MqttBridge::connect(&cfg.home_assistant);
    let translator = Arc::new(Translator::new(mqtt_bridge, registry.clone(), &cfg.home_assistant));

    let actuator: Arc<dyn ActuatorSink> = link.clone();
    let position_sink: Arc<dyn PositionSink> = translator.clone();
    let cover_controller = Arc::new(CoverController::new(
        cover_states,
        registry.clone(),
        actuator,
        position_sink,
        cli.covers_file.clone(),
    ));

    let bridge: Arc<dyn EventSink> = Arc::new(Bridge {
        registry: registry.clone(),
        translator: translator.clone(),
        cover_controller: cover_controller.clone(),
    });

    tokio::spawn(teletask::link::run_read_loop(read_half, link.pending_ack_handle(), link.token(), bridge));
    tokio::spawn(link.clone().run_keepalive());

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<IncomingCommand>(100);
    tokio::spawn(mqtt::client::run_receiver(eventloop, cmd_tx, token.clone()));

    translator.publish_discovery().await.context("publishing mqtt discovery")?;
    translator.subscribe_commands().await.context("subscribing to mqtt command topics")?;
    link.prime(&registry).await.context("priming teletask state")?;

    for (key, position) in cover_controller.snapshot_positions().await {
        translator.publish_position(&key, position).await;
    }

    let command_token = token.clone();
    let command_registry = registry.clone();
    let command_controller = cover_controller.clone();
    let command_link = link.clone();
    let command_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = command_token.cancelled() => break,
                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => {
                            handle_command(&command_registry, &command_controller, &command_link, cmd).await;
                        }
                        None => break,
                    }
                }
            }
        }
    });

    info!("bridge running, waiting for shutdown signal");
    wait_for_shutdown_signal(&token).await;

    token.cancel();
    link.close().await;
    command_task.await.ok();
    cover_controller.persist_snapshot().await;

    info!("bridge stopped");
    Ok(())
}

/// Routes one inbound MQTT publish to a Teletask command. The verb
/// segment of the topic (`set`/`setbri`/`setpos`/`exec`) is not used to
/// decide behavior — same as the original bridge, which dispatches
/// purely on the asset key and payload shape: a numeric payload for a
/// cover asset is a position move, a calibrate-button key triggers
/// calibration, and anything else is a plain value SET.
async fn handle_command(
    registry: &AssetRegistry,
    controller: &CoverController,
    link: &TeletaskLink,
    cmd: IncomingCommand,
) {
    let routed = match value::route(&cmd.topic, &cmd.payload) {
        Ok(r) => r,
        Err(e) => {
            warn!(topic = %cmd.topic, error = %e, "dropping command on malformed topic");
            return;
        }
    };

    let Some(asset) = registry.get(&routed.key) else {
        warn!(key = %routed.key, "command for unknown asset, skipping");
        return;
    };

    if asset.teletask_type == TeletaskType::Calibrate {
        if asset.teletask_id == -1 {
            controller.calibrate_all().await;
        } else {
            controller.calibrate_one(asset.teletask_id).await;
        }
        return;
    }

    if asset.component == Component::Cover {
        if let Ok(position) = routed.payload.parse::<u8>() {
            controller.move_to(&routed.key, asset, position).await;
            return;
        }
    }

    match value::decode_command_value(&routed.payload) {
        Ok(v) => {
            if let Err(e) = link.send_set(asset.central_unit, asset.teletask_type, asset.teletask_id as u16, v).await {
                warn!(error = %e, key = %routed.key, "failed to send teletask command");
            }
        }
        Err(e) => warn!(key = %routed.key, error = %e, "dropping invalid command value"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal(token: &CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
        _ = token.cancelled() => info!("shutdown requested internally"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(token: &CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
        _ = token.cancelled() => info!("shutdown requested internally"),
    }
}

//! Calibration FSM, position integration and move-to-target.
//!
//! Ported from `roller_shutters.py` (`calibrate`, `calculate_pos`,
//! `handle_cover_event`, `move_to`). The whole cover-data map is held
//! behind one `tokio::sync::Mutex`, mirroring the single-task
//! serialization the Python source gets for free from asyncio: one
//! cover event is fully processed (including any awaits it performs)
//! before the next one starts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::asset::{Asset, AssetRegistry, TeletaskType};
use crate::cover::state::{self, CoverState};
use crate::teletask::codec;
use crate::traits::{ActuatorSink, PositionSink};

/// Pause between calibrating successive covers, and between the
/// closing and reopening legs of a single cover's calibration — just
/// longer than the ACK timeout so the central unit's electrics aren't
/// asked to do two things at once.
const INTER_MOVE_PAUSE: Duration = Duration::from_millis(2100);

struct Inner {
    covers: HashMap<String, CoverState>,
    /// Present only for the keys currently mid-calibration; resolved
    /// (and removed) once that cover reports its final "reopened to
    /// top" stop event.
    pending_calibration: HashMap<String, oneshot::Sender<()>>,
    is_calibrating: bool,
}

pub struct CoverController {
    inner: Mutex<Inner>,
    registry: Arc<AssetRegistry>,
    actuator: Arc<dyn ActuatorSink>,
    position_sink: Arc<dyn PositionSink>,
    persist_path: PathBuf,
}

impl CoverController {
    pub fn new(
        covers: HashMap<String, CoverState>,
        registry: Arc<AssetRegistry>,
        actuator: Arc<dyn ActuatorSink>,
        position_sink: Arc<dyn PositionSink>,
        persist_path: PathBuf,
    ) -> CoverController {
        CoverController {
            inner: Mutex::new(Inner { covers, pending_calibration: HashMap::new(), is_calibrating: false }),
            registry,
            actuator,
            position_sink,
            persist_path,
        }
    }

    /// Every cover's last known position, for the startup state publish.
    pub async fn snapshot_positions(&self) -> Vec<(String, u8)> {
        let inner = self.inner.lock().await;
        inner.covers.iter().map(|(k, c)| (k.clone(), c.position)).collect()
    }

    pub async fn persist_snapshot(&self) {
        let inner = self.inner.lock().await;
        self.persist(&inner.covers);
    }

    fn persist(&self, covers: &HashMap<String, CoverState>) {
        if let Err(e) = state::save(&self.persist_path, covers) {
            warn!(error = %e, path = %self.persist_path.display(), "failed to persist cover state");
        }
    }

    async fn send_motor(&self, asset: &Asset, value: u8) {
        if let Err(e) = self
            .actuator
            .send_set(asset.central_unit, TeletaskType::Motor, asset.teletask_id as u16, value)
            .await
        {
            warn!(error = %e, key = %asset.key(), "failed to send motor command");
        }
    }

    /// Handles a decoded MOTOR report for a cover asset: movement
    /// start bookkeeping, position integration on a non-calibrating
    /// stop, or calibration-FSM advancement on a calibrating stop.
    pub async fn handle_motor_event(&self, key: &str, asset: &Asset, up: bool, moving: bool) {
        let mut inner = self.inner.lock().await;

        if !inner.covers.contains_key(key) {
            debug!(key, asset = %asset.name, "event for uncalibrated cover, skipping");
            return;
        }

        if moving {
            let cover = inner.covers.get_mut(key).unwrap();
            if cover.move_start_at.is_none() {
                cover.move_start_at = Some(Instant::now());
                debug!(key, "move started");
            } else {
                debug!(key, "duplicate move-start event");
            }
            return;
        }

        let calibrating_this_cover = inner.is_calibrating && inner.pending_calibration.contains_key(key);
        if calibrating_this_cover {
            self.advance_calibration(&mut inner, key, asset, up).await;
            return;
        }

        let cover = inner.covers.get_mut(key).unwrap();
        if let Some(new_position) = calculate_pos(cover, !up) {
            self.persist(&inner.covers);
            drop(inner);
            self.position_sink.publish_position(key, new_position).await;
        }
    }

    /// `direction_up == true` with `duration_down` already recorded
    /// means this is the cover's *second* trip to the top — the
    /// calibration run for this cover is complete. `direction_up ==
    /// true` with no `duration_down` yet means the cover just reached
    /// the top for the *first* time (the initial "make certain it's
    /// fully open" leg) and closing should begin. A stop in the
    /// downward direction with `duration_down` already set is the
    /// duplicate stop event the bus is known to emit and is ignored.
    async fn advance_calibration(&self, inner: &mut Inner, key: &str, asset: &Asset, up: bool) {
        let duration_down_known = inner.covers.get(key).unwrap().duration_down.is_some();

        if up {
            if duration_down_known {
                let cover = inner.covers.get_mut(key).unwrap();
                let duration_up = cover.move_start_at.take().map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
                cover.duration_up = Some(duration_up);
                cover.position = 100;
                info!(key, asset = %asset.name, duration_up, "calibration complete for cover");
                if let Some(tx) = inner.pending_calibration.remove(key) {
                    let _ = tx.send(());
                }
            } else {
                inner.covers.get_mut(key).unwrap().move_start_at = Some(Instant::now());
                info!(key, "cover fully open, closing to begin full-travel measurement");
                self.send_motor(asset, codec::setvalue::MTR_DOWN).await;
            }
            return;
        }

        if duration_down_known {
            return;
        }

        let duration_down = inner.covers.get_mut(key).unwrap().move_start_at.take().map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        {
            let cover = inner.covers.get_mut(key).unwrap();
            cover.duration_down = Some(duration_down);
            cover.position = 0;
        }
        info!(key, duration_down, "cover fully closed, reopening to measure up-travel");
        tokio::time::sleep(INTER_MOVE_PAUSE).await;
        inner.covers.get_mut(key).unwrap().move_start_at = Some(Instant::now());
        self.send_motor(asset, codec::setvalue::MTR_UP).await;
    }

    /// Calibrates every cover in the registry. Triggered by the
    /// synthetic `"calibrate covers"` (id `-1`) button.
    pub async fn calibrate_all(&self) {
        let covers: Vec<Asset> = self.registry.covers().cloned().collect();
        self.run_calibration(covers).await;
    }

    /// Calibrates a single cover, looked up by its own Teletask id.
    /// Triggered by the synthetic `"calibrate cover {name}"` button.
    pub async fn calibrate_one(&self, teletask_id: i32) {
        let covers: Vec<Asset> = self.registry.covers().filter(|c| c.teletask_id == teletask_id).cloned().collect();
        if covers.len() != 1 {
            warn!(teletask_id, "calibrate request for unknown or ambiguous cover id");
            return;
        }
        self.run_calibration(covers).await;
    }

    async fn run_calibration(&self, covers: Vec<Asset>) {
        if covers.is_empty() {
            return;
        }

        let mut waiters = Vec::with_capacity(covers.len());
        {
            let mut inner = self.inner.lock().await;
            inner.is_calibrating = true;
            for cover in &covers {
                let key = cover.key();
                let (tx, rx) = oneshot::channel();
                inner.covers.insert(key.clone(), CoverState::default());
                inner.pending_calibration.insert(key, tx);
                waiters.push(rx);
            }
        }

        info!(count = covers.len(), "beginning calibration");
        for cover in &covers {
            info!(key = %cover.key(), "preparing cover for calibration");
            self.send_motor(cover, codec::setvalue::MTR_UP).await;
            tokio::time::sleep(INTER_MOVE_PAUSE).await;
        }

        info!("waiting for calibration to complete");
        for rx in waiters {
            let _ = rx.await;
        }
        info!("calibration done");

        {
            let mut inner = self.inner.lock().await;
            inner.is_calibrating = false;
            self.persist(&inner.covers);
        }

        for cover in &covers {
            self.position_sink.publish_position(&cover.key(), 0).await;
        }
    }

    /// Moves a cover to an absolute position via an open-loop
    /// proportional sleep: no feedback from the bus corrects the
    /// estimate mid-move, matching the Python source exactly. Leaves
    /// `move_start_at` set after the explicit `STOP`, so the bus's own
    /// asynchronous stop report still runs through the ordinary
    /// position-integration path afterwards — a known double-accounting
    /// quirk inherited unchanged from the original (see DESIGN.md).
    pub async fn move_to(&self, key: &str, asset: &Asset, target: u8) {
        let (current, duration_up, duration_down) = {
            let inner = self.inner.lock().await;
            match inner.covers.get(key) {
                Some(cover) => (cover.position, cover.duration_up, cover.duration_down),
                None => {
                    warn!(key, asset = %asset.name, "move request for uncalibrated cover, skipping");
                    return;
                }
            }
        };

        if current == target {
            debug!(key, target, "already at requested position");
            return;
        }

        let dif = (target as i32 - current as i32).unsigned_abs() as f64;
        {
            let mut inner = self.inner.lock().await;
            if let Some(cover) = inner.covers.get_mut(key) {
                cover.move_start_at = Some(Instant::now());
            }
        }

        let (duration, value) = if target > current {
            (duration_up.unwrap_or(0.0) / 100.0 * dif, codec::setvalue::MTR_UP)
        } else {
            (duration_down.unwrap_or(0.0) / 100.0 * dif, codec::setvalue::MTR_DOWN)
        };

        info!(key, target, duration, "moving cover to requested position");
        self.send_motor(asset, value).await;
        tokio::time::sleep(Duration::from_secs_f64(duration.max(0.0))).await;
        self.send_motor(asset, codec::setvalue::MTR_STOP).await;

        {
            let mut inner = self.inner.lock().await;
            if let Some(cover) = inner.covers.get_mut(key) {
                cover.position = target;
            }
            self.persist(&inner.covers);
        }
        self.position_sink.publish_position(key, target).await;
    }
}

/// `calculate_pos`: integrates elapsed move duration into a position
/// delta using the calibrated full-travel time, and clears
/// `move_start_at`. Returns `None` (instead of panicking on a missing
/// calibration) when the cover has no `move_start_at` or no duration
/// for the observed direction — this can only happen if a stop event
/// arrives for a cover that was never actually set in motion by this
/// bridge, which the bus should not produce.
fn calculate_pos(cover: &mut CoverState, is_closing: bool) -> Option<u8> {
    let move_start_at = cover.move_start_at.take()?;
    let total_time = if is_closing { cover.duration_down? } else { cover.duration_up? };
    if total_time <= 0.0 {
        return None;
    }
    let duration = move_start_at.elapsed().as_secs_f64();
    let change = (100.0 / total_time * duration).round() as i32;
    let mut new_value = cover.position as i32;
    if is_closing {
        new_value -= change;
    } else {
        new_value += change;
    }
    cover.position = new_value.clamp(0, 100) as u8;
    Some(cover.position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Duration as TokioDuration;

    struct RecordingActuator {
        calls: StdMutex<Vec<(u8, TeletaskType, u16, u8)>>,
    }

    #[async_trait]
    impl ActuatorSink for RecordingActuator {
        async fn send_set(&self, unit: u8, teletask_type: TeletaskType, id: u16, value: u8) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push((unit, teletask_type, id, value));
            Ok(())
        }
    }

    struct RecordingPositionSink {
        positions: StdMutex<Vec<(String, u8)>>,
    }

    #[async_trait]
    impl PositionSink for RecordingPositionSink {
        async fn publish_position(&self, key: &str, position: u8) {
            self.positions.lock().unwrap().push((key.to_string(), position));
        }
    }

    fn cover_asset(name: &str, id: i32) -> Asset {
        Asset {
            name: name.to_string(),
            component: crate::asset::Component::Cover,
            teletask_type: TeletaskType::Motor,
            central_unit: 1,
            teletask_id: id,
            device_class: None,
            unit_of_measurement: None,
        }
    }

    fn controller_with(covers: HashMap<String, CoverState>) -> (CoverController, Arc<RecordingActuator>, Arc<RecordingPositionSink>) {
        let registry = Arc::new(AssetRegistry::build(vec![cover_asset("Blind", 3)]));
        let actuator = Arc::new(RecordingActuator { calls: StdMutex::new(Vec::new()) });
        let position_sink = Arc::new(RecordingPositionSink { positions: StdMutex::new(Vec::new()) });
        let path = std::env::temp_dir().join(format!("controller_test_{}_{}.json", std::process::id(), rand_suffix()));
        let controller = CoverController::new(covers, registry, actuator.clone(), position_sink.clone(), path);
        (controller, actuator, position_sink)
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    #[tokio::test]
    async fn position_integration_clamps_to_range() {
        let mut covers = HashMap::new();
        covers.insert(
            "1_motor_3".to_string(),
            CoverState { position: 5, duration_up: Some(10.0), duration_down: Some(10.0), move_start_at: Some(Instant::now() - TokioDuration::from_secs(20)) },
        );
        let (controller, _actuator, position_sink) = controller_with(covers);
        let asset = cover_asset("Blind", 3);
        controller.handle_motor_event("1_motor_3", &asset, false, false).await;
        let positions = position_sink.positions.lock().unwrap();
        assert_eq!(positions.last().unwrap().1, 0);
    }

    #[tokio::test]
    async fn move_to_same_position_sends_no_commands() {
        let mut covers = HashMap::new();
        covers.insert(
            "1_motor_3".to_string(),
            CoverState { position: 40, duration_up: Some(10.0), duration_down: Some(10.0), move_start_at: None },
        );
        let (controller, actuator, _position_sink) = controller_with(covers);
        let asset = cover_asset("Blind", 3);
        controller.move_to("1_motor_3", &asset, 40).await;
        assert!(actuator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_closing_stop_event_is_ignored() {
        let mut covers = HashMap::new();
        covers.insert(
            "1_motor_3".to_string(),
            CoverState { position: 0, duration_down: Some(5.0), duration_up: None, move_start_at: Some(Instant::now()) },
        );
        let (controller, actuator, _position_sink) = controller_with(covers);
        let asset = cover_asset("Blind", 3);

        {
            let mut inner = controller.inner.lock().await;
            inner.is_calibrating = true;
            let (tx, _rx) = oneshot::channel();
            inner.pending_calibration.insert("1_motor_3".to_string(), tx);
        }

        controller.handle_motor_event("1_motor_3", &asset, false, false).await;
        assert!(actuator.calls.lock().unwrap().is_empty());
    }
}

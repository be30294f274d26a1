//! The Teletask TCP link: ACK-gated send, 15 s keepalive filler, and
//! the greedy read/dispatch loop.
//!
//! Ported from `teletask.py` (`start`, `run_keep_alive`, `send`,
//! `read_block`, `read_messages`, `read`).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asset::{AssetRegistry, TeletaskType};
use crate::teletask::codec::{self, RawItem};
use crate::traits::EventSink;

const ACK_TIMEOUT: Duration = Duration::from_secs(1);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const READ_CHUNK: usize = 100;

/// Owns the write half and the pending-ACK slot. The read half is
/// handed to `spawn_read_loop` separately since `tokio::net::TcpStream`
/// splits into independently-owned halves.
pub struct TeletaskLink {
    write: Mutex<OwnedWriteHalf>,
    /// Guards "at most one in-flight SET/GET/LOG frame"; a send holds
    /// this for its whole lifetime (write + ack-wait), so a second
    /// concurrent `send` naturally suspends until the first completes
    /// or times out.
    send_lock: Mutex<()>,
    pending_ack: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    token: CancellationToken,
}

impl TeletaskLink {
    pub async fn connect(addr: &str, token: CancellationToken) -> anyhow::Result<(Arc<Self>, OwnedReadHalf)> {
        info!(addr, "connecting to teletask central unit");
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();
        let link = Arc::new(TeletaskLink {
            write: Mutex::new(write),
            send_lock: Mutex::new(()),
            pending_ack: Arc::new(Mutex::new(None)),
            token,
        });
        Ok((link, read))
    }

    /// Sends a payload wrapped in the frame envelope and waits (up to
    /// 1.0 s) for the central unit's ACK. A timeout is logged, not
    /// fatal — the pending slot is cleared and the next send proceeds.
    pub async fn send(&self, payload: &[u8]) -> anyhow::Result<()> {
        let _guard = self.send_lock.lock().await;
        let frame = codec::encode_frame(payload);

        let (tx, rx) = oneshot::channel();
        *self.pending_ack.lock().await = Some(tx);

        {
            let mut write = self.write.lock().await;
            write.write_all(&frame).await?;
            write.flush().await?;
        }

        match tokio::time::timeout(ACK_TIMEOUT, rx).await {
            Ok(Ok(())) => debug!("frame acked"),
            Ok(Err(_)) => warn!("ack channel closed before response"),
            Err(_) => warn!("message ack timed out"),
        }
        self.pending_ack.lock().await.take();
        Ok(())
    }

    /// Writes a payload directly, bypassing the ACK wait entirely —
    /// used only for the `KEEP_ALIVE` filler, which the protocol does
    /// not ACK.
    async fn send_unacked(&self, payload: &[u8]) -> anyhow::Result<()> {
        let frame = codec::encode_frame(payload);
        let mut write = self.write.lock().await;
        write.write_all(&frame).await?;
        write.flush().await?;
        Ok(())
    }

    pub async fn send_set(&self, unit: u8, teletask_type: TeletaskType, id: u16, value: u8) -> anyhow::Result<()> {
        self.send(&codec::build_set(unit, teletask_type, id, value)).await
    }

    pub async fn send_get(&self, unit: u8, teletask_type: TeletaskType, id: u16) -> anyhow::Result<()> {
        self.send(&codec::build_get(unit, teletask_type, id)).await
    }

    pub async fn subscribe_log(&self, teletask_type: TeletaskType) -> anyhow::Result<()> {
        self.send(&codec::build_log_subscribe(teletask_type)).await
    }

    /// Sends `LOG fnc ON` for every monitored function, then `GET` for
    /// every asset in the registry, priming Home Assistant with
    /// current state. Mirrors `teletask.py::load_assets`.
    pub async fn prime(&self, registry: &AssetRegistry) -> anyhow::Result<()> {
        info!("subscribing to teletask function classes");
        for &fnc in codec::MONITORED_FUNCTIONS {
            self.subscribe_log(fnc).await?;
        }
        info!("requesting current teletask state for all assets");
        for asset in registry.wire_assets() {
            self.send_get(asset.central_unit, asset.teletask_type, asset.teletask_id as u16)
                .await?;
        }
        Ok(())
    }

    /// Background task: emits `KEEP_ALIVE` every 15 s, but only when
    /// no ACK is currently pending (a filler, not a serialized send).
    pub async fn run_keepalive(self: Arc<Self>) {
        let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    info!("keepalive task stopping");
                    return;
                }
                _ = interval.tick() => {
                    if self.pending_ack.lock().await.is_none() {
                        if let Err(e) = self.send_unacked(&[codec::command::KEEP_ALIVE]).await {
                            warn!(error = %e, "keepalive write failed");
                        }
                    }
                }
            }
        }
    }

    pub fn pending_ack_handle(&self) -> Arc<Mutex<Option<oneshot::Sender<()>>>> {
        self.pending_ack.clone()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn close(&self) {
        let mut write = self.write.lock().await;
        let _ = write.shutdown().await;
        info!("teletask connection closed");
    }
}

/// Background task: reads up to `READ_CHUNK` bytes at a time, parses
/// ACKs/frames greedily, resolves the pending-ACK slot, verifies
/// checksums, and dispatches REPORT events to `sink` in arrival order.
/// Exits cleanly on peer close (`Ok(0)`) or on cancellation.
pub async fn run_read_loop(
    mut read: OwnedReadHalf,
    pending_ack: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    token: CancellationToken,
    sink: Arc<dyn EventSink>,
) {
    use tokio::io::AsyncReadExt;

    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            _ = token.cancelled() => {
                info!("read loop stopping on cancellation");
                return;
            }
            result = read.read(&mut buf) => {
                match result {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "teletask read error");
                        token.cancel();
                        return;
                    }
                }
            }
        };

        if n == 0 {
            info!("teletask peer closed the connection");
            token.cancel();
            return;
        }

        for item in codec::parse_buffer(&buf[..n]) {
            match item {
                RawItem::Ack => {
                    if let Some(tx) = pending_ack.lock().await.take() {
                        let _ = tx.send(());
                    }
                }
                RawItem::Frame(frame) => match codec::decode_frame(&frame) {
                    Ok(payload) => dispatch(payload, &sink).await,
                    Err(e) => warn!(error = %e, "dropping frame with bad checksum"),
                },
            }
        }
    }
}

async fn dispatch(payload: &[u8], sink: &Arc<dyn EventSink>) {
    if payload.is_empty() || payload[0] != codec::command::REPORT {
        return;
    }
    match codec::decode_report(payload) {
        Ok(event) => {
            sink.on_event(event.unit, event.teletask_type, event.id, event.value).await;
        }
        Err(e) => warn!(error = %e, "dropping unparseable report"),
    }
}

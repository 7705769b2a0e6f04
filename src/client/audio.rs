use crate::event::{EventSender, SessionEvent};
use crate::media::bridge::AudioBridge;
use crate::media::AudioDevice;
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct AudioSlot {
    /// Connected but not yet streaming; waits for START_AUDIO_BRIDGE.
    pending: Option<TcpStream>,
    bridge: Option<AudioBridge>,
}

/// Client half of the audio bridge: dials the host audio port with bounded
/// retries, parks the socket until the handshake completes, then runs the
/// same pump pair as the host. Audio failures never touch the control
/// channel connection.
pub struct AudioLink {
    addr: SocketAddr,
    retry_count: u32,
    retry_delay: Duration,
    device: Arc<dyn AudioDevice>,
    token: CancellationToken,
    event_sender: EventSender,
    slot: Mutex<AudioSlot>,
}

impl AudioLink {
    pub fn new(
        addr: SocketAddr,
        retry_count: u32,
        retry_delay: Duration,
        device: Arc<dyn AudioDevice>,
        token: CancellationToken,
        event_sender: EventSender,
    ) -> Self {
        Self {
            addr,
            retry_count,
            retry_delay,
            device,
            token,
            event_sender,
            slot: Mutex::new(AudioSlot::default()),
        }
    }

    /// Dial the host audio port; on success the socket is parked until the
    /// host confirms the handshake.
    pub async fn connect(&self) -> Result<()> {
        for attempt in 1..=self.retry_count {
            if self.token.is_cancelled() {
                return Err(anyhow!("audio connect cancelled"));
            }
            match TcpStream::connect(self.addr).await {
                Ok(socket) => {
                    debug!(addr = %self.addr, attempt, "audio socket connected");
                    socket.set_nodelay(true).ok();
                    let mut slot = self.slot.lock().await;
                    if let Some(bridge) = slot.bridge.take() {
                        bridge.stop().await;
                        self.event_sender.send(SessionEvent::AudioStopped).ok();
                    }
                    slot.pending = Some(socket);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, "audio connect to {} failed: {}", self.addr, e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
        Err(anyhow!(
            "audio connection failed after {} attempts",
            self.retry_count
        ))
    }

    /// Client half of the handshake: START_AUDIO_BRIDGE arrived, start
    /// pumping over the parked socket.
    pub async fn start_bridge(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.bridge.is_some() {
            debug!("audio bridge already running");
            return Ok(());
        }
        let socket = slot
            .pending
            .take()
            .ok_or_else(|| anyhow!("audio socket is not connected"))?;
        let bridge = AudioBridge::start(socket, self.device.as_ref(), &self.token)?;
        info!(id = bridge.id(), "audio bridge started");
        slot.bridge = Some(bridge);
        self.event_sender.send(SessionEvent::AudioStarted).ok();
        Ok(())
    }

    /// Idempotent; a second call while torn down is a no-op.
    pub async fn stop_bridge(&self) {
        let bridge = self.slot.lock().await.bridge.take();
        if let Some(bridge) = bridge {
            bridge.stop().await;
            self.event_sender.send(SessionEvent::AudioStopped).ok();
        }
    }

    /// Drop the bridge and any parked socket.
    pub async fn teardown(&self) {
        self.stop_bridge().await;
        self.slot.lock().await.pending = None;
    }
}

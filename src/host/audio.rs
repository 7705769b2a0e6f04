use crate::event::{EventSender, SessionEvent};
use crate::media::bridge::AudioBridge;
use crate::media::AudioDevice;
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long the handshake waits for the accept loop to hand over a socket.
const PENDING_ACCEPT_WAIT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct AudioSlot {
    /// Connected but not yet streaming; waits for the AUDIO_READY handshake.
    pending: Option<TcpStream>,
    bridge: Option<AudioBridge>,
}

/// Dedicated audio listener, one peer per call. A newcomer replaces the
/// current peer; streaming starts only on the explicit handshake and stops
/// on call end, replacement or fault.
pub struct AudioServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    device: Arc<dyn AudioDevice>,
    token: CancellationToken,
    event_sender: EventSender,
    slot: Mutex<AudioSlot>,
}

impl AudioServer {
    pub async fn bind(
        addr: SocketAddr,
        device: Arc<dyn AudioDevice>,
        token: CancellationToken,
        event_sender: EventSender,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow!("Failed to bind audio listener on {}: {}", addr, e))?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            device,
            token,
            event_sender,
            slot: Mutex::new(AudioSlot::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(&self) -> Result<()> {
        select! {
            _ = self.token.cancelled() => {
                info!("audio server cancelled");
            }
            result = self.accept_loop() => {
                if let Err(e) = result {
                    info!("audio accept loop error: {:?}", e);
                }
            }
        }
        self.stop_bridge().await;
        Ok(())
    }

    async fn accept_loop(&self) -> Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            info!(%peer, "audio client connected");
            let mut slot = self.slot.lock().await;
            if slot.bridge.is_some() || slot.pending.is_some() {
                debug!("replacing existing audio peer");
                if let Some(bridge) = slot.bridge.take() {
                    bridge.stop().await;
                    self.event_sender.send(SessionEvent::AudioStopped).ok();
                }
                slot.pending = None;
            }
            socket.set_nodelay(true).ok();
            slot.pending = Some(socket);
        }
    }

    /// Host half of the handshake: AUDIO_READY arrived, start pumping over
    /// the pending peer socket. The command can overtake the accept loop by
    /// a few milliseconds, so the pending socket gets a bounded grace period
    /// to land before the handshake is rejected.
    pub async fn start_bridge(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + PENDING_ACCEPT_WAIT;
        loop {
            {
                let mut slot = self.slot.lock().await;
                if slot.bridge.is_some() {
                    debug!("audio bridge already running");
                    return Ok(());
                }
                if let Some(socket) = slot.pending.take() {
                    let bridge = AudioBridge::start(socket, self.device.as_ref(), &self.token)?;
                    info!(id = bridge.id(), "audio bridge started");
                    slot.bridge = Some(bridge);
                    self.event_sender.send(SessionEvent::AudioStarted).ok();
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!("No audio client connected"));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Idempotent; a second call while torn down is a no-op.
    pub async fn stop_bridge(&self) {
        let bridge = self.slot.lock().await.bridge.take();
        if let Some(bridge) = bridge {
            bridge.stop().await;
            self.event_sender.send(SessionEvent::AudioStopped).ok();
        }
    }
}

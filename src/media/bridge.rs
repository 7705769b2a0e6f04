use super::{
    bytes_to_samples, samples_to_bytes, AudioDevice, AudioSink, AudioSource, AUDIO_READ_TIMEOUT,
    FRAME_BYTES, SHUTDOWN_TIMEOUT,
};
use crate::get_timestamp;
use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Two independent pump tasks relaying raw PCM frames between the device
/// audio handles and the peer socket. A blocked direction never blocks the
/// other; stopping cancels both pumps and closes the socket halves.
pub struct AudioBridge {
    id: String,
    token: CancellationToken,
    capture: JoinHandle<()>,
    playback: JoinHandle<()>,
    started_at: u64,
}

impl AudioBridge {
    pub fn start(
        socket: TcpStream,
        device: &dyn AudioDevice,
        parent: &CancellationToken,
    ) -> Result<AudioBridge> {
        socket.set_nodelay(true).ok();
        let source = device.open_source()?;
        let sink = device.open_sink()?;
        let id = format!("audio:{}", uuid::Uuid::new_v4());
        let token = parent.child_token();
        let (rd, wr) = socket.into_split();
        debug!(id = %id, "starting audio bridge");
        let capture = tokio::spawn(capture_to_peer(source, wr, token.clone(), id.clone()));
        let playback = tokio::spawn(peer_to_playback(rd, sink, token.clone(), id.clone()));
        Ok(AudioBridge {
            id,
            token,
            capture,
            playback,
            started_at: get_timestamp(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancel both pumps and wait out the bounded shutdown window.
    pub async fn stop(self) {
        self.token.cancel();
        let drained = timeout(SHUTDOWN_TIMEOUT, async {
            self.capture.await.ok();
            self.playback.await.ok();
        })
        .await;
        if drained.is_err() {
            warn!(id = %self.id, "audio pumps did not exit within the shutdown window");
        }
        debug!(
            id = %self.id,
            elapsed_ms = get_timestamp().saturating_sub(self.started_at),
            "audio bridge stopped"
        );
    }
}

async fn capture_to_peer(
    mut source: Box<dyn AudioSource>,
    mut wr: OwnedWriteHalf,
    token: CancellationToken,
    id: String,
) {
    debug!(id = %id, "capture pump started");
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = source.read_frame() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = %id, "audio source error: {}", e);
                break;
            }
        };
        if frame.is_empty() {
            continue;
        }
        let buf = samples_to_bytes(&frame);
        if let Err(e) = wr.write_all(&buf).await {
            debug!(id = %id, "peer write failed: {}", e);
            break;
        }
    }
    wr.shutdown().await.ok();
    debug!(id = %id, "capture pump stopped");
}

async fn peer_to_playback(
    mut rd: OwnedReadHalf,
    mut sink: Box<dyn AudioSink>,
    token: CancellationToken,
    id: String,
) {
    debug!(id = %id, "playback pump started");
    let mut buf = vec![0u8; FRAME_BYTES];
    // carries an unaligned trailing byte into the next read
    let mut pending: Option<u8> = None;
    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = timeout(AUDIO_READ_TIMEOUT, rd.read(&mut buf)) => read,
        };
        let n = match read {
            Err(_) => continue,
            Ok(Ok(0)) => {
                debug!(id = %id, "peer half-closed");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!(id = %id, "peer read failed: {}", e);
                break;
            }
        };
        let mut chunk = Vec::with_capacity(n + 1);
        if let Some(byte) = pending.take() {
            chunk.push(byte);
        }
        chunk.extend_from_slice(&buf[..n]);
        if chunk.len() % 2 == 1 {
            pending = chunk.pop();
        }
        let samples = bytes_to_samples(&chunk);
        if let Err(e) = sink.write_frame(&samples).await {
            warn!(id = %id, "audio sink error: {}", e);
            break;
        }
    }
    debug!(id = %id, "playback pump stopped");
}

use super::{AudioDevice, AudioSink, AudioSource, FRAME_SAMPLES};
use crate::{PcmBuf, Sample};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Produces silent frames at the real-time rate and discards playback; used
/// by role binaries that have no platform audio glue wired in.
pub struct SilenceDevice;

impl AudioDevice for SilenceDevice {
    fn open_source(&self) -> Result<Box<dyn AudioSource>> {
        let mut ticker = interval(Duration::from_millis(20));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Box::new(SilenceSource { ticker }))
    }

    fn open_sink(&self) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(NullSink))
    }
}

struct SilenceSource {
    ticker: Interval,
}

#[async_trait]
impl AudioSource for SilenceSource {
    async fn read_frame(&mut self) -> Result<PcmBuf> {
        self.ticker.tick().await;
        Ok(vec![0; FRAME_SAMPLES])
    }
}

struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn write_frame(&mut self, _samples: &[Sample]) -> Result<()> {
        Ok(())
    }
}

/// Frame-channel device: capture frames are fed in through an mpsc sender
/// and playback frames drain out of an mpsc receiver, so an embedder can
/// pump audio programmatically. The capture feed is single-shot; a second
/// `open_source` fails until a new device is built.
pub struct ChannelDevice {
    capture_rx: Mutex<Option<mpsc::UnboundedReceiver<PcmBuf>>>,
    playback_tx: mpsc::UnboundedSender<PcmBuf>,
}

impl ChannelDevice {
    pub fn new() -> (
        Self,
        mpsc::UnboundedSender<PcmBuf>,
        mpsc::UnboundedReceiver<PcmBuf>,
    ) {
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let device = Self {
            capture_rx: Mutex::new(Some(capture_rx)),
            playback_tx,
        };
        (device, capture_tx, playback_rx)
    }
}

impl AudioDevice for ChannelDevice {
    fn open_source(&self) -> Result<Box<dyn AudioSource>> {
        let rx = self
            .capture_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("capture feed already taken"))?;
        Ok(Box::new(ChannelSource { rx }))
    }

    fn open_sink(&self) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(ChannelSink {
            tx: self.playback_tx.clone(),
        }))
    }
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<PcmBuf>,
}

#[async_trait]
impl AudioSource for ChannelSource {
    async fn read_frame(&mut self) -> Result<PcmBuf> {
        match self.rx.recv().await {
            Some(frame) => Ok(frame),
            // feed dropped: park until the bridge cancels the pump
            None => std::future::pending().await,
        }
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<PcmBuf>,
}

#[async_trait]
impl AudioSink for ChannelSink {
    async fn write_frame(&mut self, samples: &[Sample]) -> Result<()> {
        self.tx.send(samples.to_vec()).ok();
        Ok(())
    }
}

use crate::{PcmBuf, Sample};
use anyhow::Result;
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;

pub mod bridge;
pub mod device;

pub const SAMPLE_RATE: u32 = 16000;
pub const CHANNELS: u16 = 1;
/// Samples per frame, 20ms of mono audio at 16kHz.
pub const FRAME_SAMPLES: usize = 320;
/// Frame size on the wire, 16-bit little-endian PCM.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;
/// Socket reads re-check the stop signal at this cadence.
pub const AUDIO_READ_TIMEOUT: Duration = Duration::from_millis(1500);
/// Both pump tasks must exit within this window after a stop.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Capture side of the device audio stack. A short or empty frame is allowed.
#[async_trait]
pub trait AudioSource: Send {
    async fn read_frame(&mut self) -> Result<PcmBuf>;
}

/// Playback side of the device audio stack.
#[async_trait]
pub trait AudioSink: Send {
    async fn write_frame(&mut self, samples: &[Sample]) -> Result<()>;
}

/// Per-call factory for capture and playback handles. Implementations wrap
/// the platform audio stack; dropping a handle must release the hardware.
pub trait AudioDevice: Send + Sync {
    fn open_source(&self) -> Result<Box<dyn AudioSource>>;
    fn open_sink(&self) -> Result<Box<dyn AudioSink>>;
}

pub fn samples_to_bytes(samples: &[Sample]) -> Vec<u8> {
    let mut buf = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut buf);
    buf
}

pub fn bytes_to_samples(buf: &[u8]) -> PcmBuf {
    let mut samples = vec![0i16; buf.len() / 2];
    LittleEndian::read_i16_into(&buf[..samples.len() * 2], &mut samples);
    samples
}

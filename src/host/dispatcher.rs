use super::audio::AudioServer;
use super::control::ControlServer;
use crate::call::{Correlator, TelephonyActions};
use crate::event::{EventSender, SessionEvent};
use crate::proto::{Command, Event};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Maps inbound control-channel commands to telephony and audio actions.
/// Every action is fire-and-forget from the client's point of view; call
/// state changes come back asynchronously through the correlator.
pub struct CommandDispatcher {
    telephony: Arc<dyn TelephonyActions>,
    correlator: Arc<Mutex<Correlator>>,
    control: Arc<ControlServer>,
    audio: Arc<AudioServer>,
    event_sender: EventSender,
}

impl CommandDispatcher {
    pub fn new(
        telephony: Arc<dyn TelephonyActions>,
        correlator: Arc<Mutex<Correlator>>,
        control: Arc<ControlServer>,
        audio: Arc<AudioServer>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            telephony,
            correlator,
            control,
            audio,
            event_sender,
        }
    }

    pub async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Some(command) = Command::parse(line) else {
            warn!(line, "ignoring unknown command");
            return;
        };
        debug!(?command, "dispatching");
        self.dispatch(command).await;
    }

    async fn dispatch(&self, command: Command) {
        let result = match command {
            Command::Answer => self.telephony.answer().await,
            Command::EndCall => self.telephony.end_call().await,
            Command::Mute => self.telephony.set_mute(true).await,
            Command::Unmute => self.telephony.set_mute(false).await,
            Command::Hold => self.telephony.set_hold(true).await,
            Command::Unhold => self.telephony.set_hold(false).await,
            Command::SpeakerOn => self.telephony.set_speaker(true).await,
            Command::SpeakerOff => self.telephony.set_speaker(false).await,
            Command::Dial(number) => self.dial(&number).await,
            Command::AudioReady => self.audio_ready().await,
        };
        if let Err(e) = result {
            warn!("command failed: {}", e);
            let status = format!("Host: {}", e);
            self.control.broadcast(&Event::Status(status.clone()));
            self.event_sender.send(SessionEvent::Status(status)).ok();
        }
    }

    async fn dial(&self, number: &str) -> Result<()> {
        // The context must be primed before the call is placed so the
        // resulting Offhook cannot race past it.
        let context = self.correlator.lock().await.dial_requested(number);
        self.event_sender
            .send(SessionEvent::Status(format!(
                "Host: Placing call for {}",
                context.display_name
            )))
            .ok();
        self.telephony
            .place_call(&context.number, &context.display_name)
            .await
    }

    async fn audio_ready(&self) -> Result<()> {
        self.audio.start_bridge().await?;
        self.control.broadcast(&Event::StartAudioBridge);
        Ok(())
    }
}

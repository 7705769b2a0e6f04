use crate::call::{
    ContactResolver, Correlator, NullTelephony, StaticResolver, TelephonyActions,
    TransitionReceiver, TransitionSender,
};
use crate::config::HostConfig;
use crate::event::{EventReceiver, EventSender, SessionEvent};
use crate::media::device::SilenceDevice;
use crate::media::AudioDevice;
use crate::proto::Event;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

mod audio;
mod control;
mod dispatcher;
pub use audio::AudioServer;
pub use control::ControlServer;
pub use dispatcher::CommandDispatcher;
use control::LineReceiver;
#[cfg(test)]
mod tests;

pub struct HostBuilder {
    config: Option<HostConfig>,
    token: Option<CancellationToken>,
    resolver: Option<Arc<dyn ContactResolver>>,
    telephony: Option<Arc<dyn TelephonyActions>>,
    device: Option<Arc<dyn AudioDevice>>,
}

/// The host engine: control channel server, call state correlator, command
/// dispatcher and audio server wired together. The device telephony stack
/// feeds transitions through [`Host::transition_sender`]; everything else
/// arrives over the network.
pub struct Host {
    pub config: HostConfig,
    token: CancellationToken,
    control: Arc<ControlServer>,
    audio: Arc<AudioServer>,
    correlator: Arc<Mutex<Correlator>>,
    dispatcher: CommandDispatcher,
    event_sender: EventSender,
    transition_tx: TransitionSender,
    transition_rx: Mutex<Option<TransitionReceiver>>,
    line_rx: Mutex<Option<LineReceiver>>,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            token: None,
            resolver: None,
            telephony: None,
            device: None,
        }
    }

    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ContactResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_telephony(mut self, telephony: Arc<dyn TelephonyActions>) -> Self {
        self.telephony = Some(telephony);
        self
    }

    pub fn with_device(mut self, device: Arc<dyn AudioDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub async fn build(self) -> Result<Host> {
        let config = self.config.unwrap_or_default();
        let token = self.token.unwrap_or_else(CancellationToken::new);
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(StaticResolver::new(HashMap::new())));
        let telephony = self
            .telephony
            .unwrap_or_else(|| Arc::new(NullTelephony));
        let device = self
            .device
            .unwrap_or_else(|| Arc::new(SilenceDevice));

        let (event_sender, _) = tokio::sync::broadcast::channel(64);
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (transition_tx, transition_rx) = mpsc::unbounded_channel();

        let control_addr: SocketAddr = format!("{}:{}", config.addr, config.control_port)
            .parse()
            .map_err(|e| anyhow!("Invalid control address: {}", e))?;
        let audio_addr: SocketAddr = format!("{}:{}", config.addr, config.audio_port)
            .parse()
            .map_err(|e| anyhow!("Invalid audio address: {}", e))?;

        let control = Arc::new(
            ControlServer::bind(
                control_addr,
                token.child_token(),
                event_sender.clone(),
                line_tx,
            )
            .await?,
        );
        let audio = Arc::new(
            AudioServer::bind(
                audio_addr,
                device,
                token.child_token(),
                event_sender.clone(),
            )
            .await?,
        );
        let correlator = Arc::new(Mutex::new(Correlator::new(resolver)));
        let dispatcher = CommandDispatcher::new(
            telephony,
            correlator.clone(),
            control.clone(),
            audio.clone(),
            event_sender.clone(),
        );

        Ok(Host {
            config,
            token,
            control,
            audio,
            correlator,
            dispatcher,
            event_sender,
            transition_tx,
            transition_rx: Mutex::new(Some(transition_rx)),
            line_rx: Mutex::new(Some(line_rx)),
        })
    }
}

impl Host {
    pub fn subscribe(&self) -> EventReceiver {
        self.event_sender.subscribe()
    }

    /// Feed for the device telephony stack's call-state callbacks.
    pub fn transition_sender(&self) -> TransitionSender {
        self.transition_tx.clone()
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control.local_addr()
    }

    pub fn audio_addr(&self) -> SocketAddr {
        self.audio.local_addr()
    }

    pub fn correlator(&self) -> Arc<Mutex<Correlator>> {
        self.correlator.clone()
    }

    /// Forward an already-extracted one-time passcode to every client.
    pub fn forward_otp(&self, code: &str) {
        self.control.broadcast(&Event::Otp(code.to_string()));
        self.event_sender
            .send(SessionEvent::Status("Host: OTP forwarded.".to_string()))
            .ok();
    }

    /// Mirror a device notification to every client.
    pub fn mirror_notification(&self, app: &str, title: &str, text: &str) {
        self.control.broadcast(&Event::Notification {
            app: app.to_string(),
            title: title.to_string(),
            text: text.to_string(),
        });
    }

    /// Push a free-text status line to every client.
    pub fn send_status(&self, text: &str) {
        self.control.broadcast(&Event::Status(text.to_string()));
    }

    pub async fn serve(&self) -> Result<()> {
        let mut transition_rx = self
            .transition_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("host already running"))?;
        let mut line_rx = self
            .line_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("host already running"))?;

        tracing::info!(
            control = %self.control.local_addr(),
            audio = %self.audio.local_addr(),
            "host engine started"
        );
        select! {
            _ = self.token.cancelled() => {}
            result = self.control.serve() => {
                if let Err(e) = result {
                    tracing::info!("control server error: {:?}", e);
                }
            }
            result = self.audio.serve() => {
                if let Err(e) = result {
                    tracing::info!("audio server error: {:?}", e);
                }
            }
            _ = self.run_transitions(&mut transition_rx) => {}
            _ = self.run_commands(&mut line_rx) => {}
        }
        self.audio.stop_bridge().await;
        tracing::info!("host engine stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    async fn run_transitions(&self, transition_rx: &mut TransitionReceiver) {
        while let Some(transition) = transition_rx.recv().await {
            let event = self.correlator.lock().await.on_transition(transition);
            if let Some(event) = event {
                self.emit_session_event(&event);
                self.control.broadcast(&event);
                if matches!(event, Event::CallIdle) {
                    self.audio.stop_bridge().await;
                }
            }
        }
    }

    async fn run_commands(&self, line_rx: &mut LineReceiver) {
        while let Some(line) = line_rx.recv().await {
            self.dispatcher.handle_line(&line).await;
        }
    }

    fn emit_session_event(&self, event: &Event) {
        let session_event = match event {
            Event::Ringing { number, name } => SessionEvent::IncomingCall {
                number: number.clone(),
                name: name.clone(),
            },
            Event::CallStarted { number, name } => SessionEvent::CallStarted {
                number: number.clone(),
                name: name.clone(),
            },
            Event::CallIdle => SessionEvent::CallEnded,
            _ => return,
        };
        self.event_sender.send(session_event).ok();
    }
}

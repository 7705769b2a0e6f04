use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

mod correlator;
pub use correlator::{Correlator, PhoneState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Which raw event created the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    None,
    Ringing,
    Dialing,
}

/// Transient record correlating a number and name to the in-flight call.
/// Owned exclusively by the correlator, at most one alive at a time.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub number: String,
    pub display_name: String,
    pub direction: Direction,
    pub origin: CallOrigin,
}

/// Raw call-state transitions delivered by the device telephony stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Ring(String),
    Offhook,
    Idle,
}

pub type TransitionSender = tokio::sync::mpsc::UnboundedSender<Transition>;
pub type TransitionReceiver = tokio::sync::mpsc::UnboundedReceiver<Transition>;

/// Synchronous external lookup of a display name; `None` renders as "Unknown".
pub trait ContactResolver: Send + Sync {
    fn resolve(&self, number: &str) -> Option<String>;
}

/// In-memory number to name table, fed from the `[contacts]` config section.
pub struct StaticResolver {
    entries: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }
}

impl ContactResolver for StaticResolver {
    fn resolve(&self, number: &str) -> Option<String> {
        self.entries.get(number).cloned()
    }
}

/// Call control surface of the device telephony stack. Answer/end results
/// arrive asynchronously as [`Transition`]s, never as return values here.
#[async_trait]
pub trait TelephonyActions: Send + Sync {
    async fn answer(&self) -> Result<()>;
    async fn end_call(&self) -> Result<()>;
    async fn place_call(&self, number: &str, display_name: &str) -> Result<()>;
    async fn set_mute(&self, muted: bool) -> Result<()>;
    async fn set_hold(&self, on_hold: bool) -> Result<()>;
    async fn set_speaker(&self, enabled: bool) -> Result<()>;
}

/// Accepts every action and only logs it; for hosts running without a
/// telephony stack wired in.
pub struct NullTelephony;

#[async_trait]
impl TelephonyActions for NullTelephony {
    async fn answer(&self) -> Result<()> {
        info!("answer call");
        Ok(())
    }

    async fn end_call(&self) -> Result<()> {
        info!("end call");
        Ok(())
    }

    async fn place_call(&self, number: &str, display_name: &str) -> Result<()> {
        info!(number, display_name, "place call");
        Ok(())
    }

    async fn set_mute(&self, muted: bool) -> Result<()> {
        info!("microphone mute is now {}", if muted { "ON" } else { "OFF" });
        Ok(())
    }

    async fn set_hold(&self, on_hold: bool) -> Result<()> {
        info!("call {}", if on_hold { "put on hold" } else { "resumed from hold" });
        Ok(())
    }

    async fn set_speaker(&self, enabled: bool) -> Result<()> {
        info!("speakerphone is now {}", if enabled { "ON" } else { "OFF" });
        Ok(())
    }
}

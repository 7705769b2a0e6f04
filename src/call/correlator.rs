use super::{CallContext, CallOrigin, ContactResolver, Direction, Transition};
use crate::proto::{Event, UNKNOWN};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneState {
    Idle,
    Ringing,
    Connected,
}

/// Turns raw telephony transitions into protocol events, holding short-lived
/// call context to tell an answered incoming call from a connected outgoing
/// one. A new Ring or dial request while a context is live supersedes it
/// (counted, never fatal).
pub struct Correlator {
    resolver: Arc<dyn ContactResolver>,
    state: PhoneState,
    context: Option<CallContext>,
    replaced: u64,
    unmatched_offhook: u64,
}

impl Correlator {
    pub fn new(resolver: Arc<dyn ContactResolver>) -> Self {
        Self {
            resolver,
            state: PhoneState::Idle,
            context: None,
            replaced: 0,
            unmatched_offhook: 0,
        }
    }

    pub fn state(&self) -> PhoneState {
        self.state
    }

    pub fn context(&self) -> Option<&CallContext> {
        self.context.as_ref()
    }

    /// How many times a live context was overwritten without resolving first.
    pub fn replaced_without_resolution(&self) -> u64 {
        self.replaced
    }

    /// How many Offhook transitions arrived with no stored context.
    pub fn unmatched_offhook(&self) -> u64 {
        self.unmatched_offhook
    }

    /// Feed one raw transition; returns the event to broadcast, if any.
    pub fn on_transition(&mut self, transition: Transition) -> Option<Event> {
        match transition {
            Transition::Ring(number) => self.on_ring(number),
            Transition::Offhook => self.on_offhook(),
            Transition::Idle => self.on_idle(),
        }
    }

    /// Prime an outgoing call so the next Offhook resolves to it. Must be
    /// called before the place-call action is invoked.
    pub fn dial_requested(&mut self, number: &str) -> CallContext {
        self.note_replacement("dial request");
        let number = normalize_number(number);
        let context = CallContext {
            display_name: self.resolve_name(&number),
            number,
            direction: Direction::Outgoing,
            origin: CallOrigin::Dialing,
        };
        debug!(
            number = %context.number,
            name = %context.display_name,
            "dial requested, context primed"
        );
        self.context = Some(context.clone());
        context
    }

    fn on_ring(&mut self, number: String) -> Option<Event> {
        self.note_replacement("ring");
        let number = normalize_number(&number);
        let name = self.resolve_name(&number);
        self.context = Some(CallContext {
            number: number.clone(),
            display_name: name.clone(),
            direction: Direction::Incoming,
            origin: CallOrigin::Ringing,
        });
        self.state = PhoneState::Ringing;
        Some(Event::Ringing { number, name })
    }

    fn on_offhook(&mut self) -> Option<Event> {
        if self.state == PhoneState::Connected {
            debug!("duplicate offhook ignored");
            return None;
        }
        self.state = PhoneState::Connected;
        match self.context.as_mut() {
            Some(context) => {
                context.origin = CallOrigin::None;
                Some(Event::CallStarted {
                    number: context.number.clone(),
                    name: context.display_name.clone(),
                })
            }
            None => {
                // Offhook raced past any dial request and carries no number of
                // its own: report a best-effort event rather than staying
                // silent, and keep the degraded path observable.
                self.unmatched_offhook += 1;
                warn!("offhook with no call context, reporting unknown call");
                Some(Event::CallStarted {
                    number: UNKNOWN.to_string(),
                    name: UNKNOWN.to_string(),
                })
            }
        }
    }

    fn on_idle(&mut self) -> Option<Event> {
        let was_in_call = self.state != PhoneState::Idle;
        self.state = PhoneState::Idle;
        self.context = None;
        if was_in_call {
            Some(Event::CallIdle)
        } else {
            debug!("idle with no live call ignored");
            None
        }
    }

    fn note_replacement(&mut self, cause: &str) {
        if let Some(old) = self.context.as_ref() {
            self.replaced += 1;
            warn!(
                cause,
                old_number = %old.number,
                replaced = self.replaced,
                "live call context replaced without resolution"
            );
        }
    }

    fn resolve_name(&self, number: &str) -> String {
        self.resolver
            .resolve(number)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

fn normalize_number(number: &str) -> String {
    let number = number.trim();
    if number.is_empty() {
        UNKNOWN.to_string()
    } else {
        number.to_string()
    }
}

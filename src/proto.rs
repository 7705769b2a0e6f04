use std::fmt;

/// Sentinel for a number or name the host could not determine.
pub const UNKNOWN: &str = "Unknown";

/// Host to client protocol event. One event per line, fields separated by `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ringing { number: String, name: String },
    CallStarted { number: String, name: String },
    CallIdle,
    StartAudioBridge,
    Otp(String),
    Notification {
        app: String,
        title: String,
        text: String,
    },
    Status(String),
}

/// Client to host command. One command per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Answer,
    EndCall,
    Mute,
    Unmute,
    Hold,
    Unhold,
    SpeakerOn,
    SpeakerOff,
    Dial(String),
    AudioReady,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Ringing { number, name } => write!(f, "RINGING:{}|{}", number, name),
            Event::CallStarted { number, name } => write!(f, "CALL_STARTED:{}|{}", number, name),
            Event::CallIdle => write!(f, "CALL_IDLE"),
            Event::StartAudioBridge => write!(f, "START_AUDIO_BRIDGE"),
            Event::Otp(code) => write!(f, "OTP:{}", code),
            Event::Notification { app, title, text } => {
                write!(f, "NOTIFICATION:{}|{}|{}", app, title, text)
            }
            Event::Status(text) => write!(f, "STATUS:{}", text),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Answer => write!(f, "ANSWER"),
            Command::EndCall => write!(f, "END_CALL"),
            Command::Mute => write!(f, "MUTE"),
            Command::Unmute => write!(f, "UNMUTE"),
            Command::Hold => write!(f, "HOLD"),
            Command::Unhold => write!(f, "UNHOLD"),
            Command::SpeakerOn => write!(f, "SPEAKER_ON"),
            Command::SpeakerOff => write!(f, "SPEAKER_OFF"),
            Command::Dial(number) => write!(f, "DIAL:{}", number),
            Command::AudioReady => write!(f, "AUDIO_READY"),
        }
    }
}

impl Event {
    /// Parse one line received from the host. Unknown lines return `None`,
    /// the caller decides whether to surface or drop them.
    pub fn parse(line: &str) -> Option<Event> {
        if let Some(rest) = line.strip_prefix("RINGING:") {
            let (number, name) = split_number_name(rest);
            return Some(Event::Ringing { number, name });
        }
        if let Some(rest) = line.strip_prefix("CALL_STARTED:") {
            let (number, name) = split_number_name(rest);
            return Some(Event::CallStarted { number, name });
        }
        if let Some(code) = line.strip_prefix("OTP:") {
            return Some(Event::Otp(code.to_string()));
        }
        if let Some(rest) = line.strip_prefix("NOTIFICATION:") {
            // text is parsed greedily so a `|` in the body survives
            let mut fields = rest.splitn(3, '|');
            let app = fields.next().unwrap_or_default().to_string();
            let title = fields.next().unwrap_or_default().to_string();
            let text = fields.next().unwrap_or_default().to_string();
            return Some(Event::Notification { app, title, text });
        }
        if let Some(text) = line.strip_prefix("STATUS:") {
            return Some(Event::Status(text.to_string()));
        }
        match line {
            "CALL_IDLE" => Some(Event::CallIdle),
            "START_AUDIO_BRIDGE" => Some(Event::StartAudioBridge),
            _ => None,
        }
    }
}

impl Command {
    /// Parse one line received from a client. Unknown commands return `None`.
    pub fn parse(line: &str) -> Option<Command> {
        match line {
            "ANSWER" => Some(Command::Answer),
            "END_CALL" => Some(Command::EndCall),
            "MUTE" => Some(Command::Mute),
            "UNMUTE" => Some(Command::Unmute),
            "HOLD" => Some(Command::Hold),
            "UNHOLD" => Some(Command::Unhold),
            "SPEAKER_ON" => Some(Command::SpeakerOn),
            "SPEAKER_OFF" => Some(Command::SpeakerOff),
            "AUDIO_READY" => Some(Command::AudioReady),
            _ => line
                .strip_prefix("DIAL:")
                .map(|number| Command::Dial(number.to_string())),
        }
    }
}

/// Split `<number>|<name>`; a missing or empty name defaults to "Unknown".
fn split_number_name(rest: &str) -> (String, String) {
    match rest.split_once('|') {
        Some((number, name)) if !name.is_empty() => (number.to_string(), name.to_string()),
        Some((number, _)) => (number.to_string(), UNKNOWN.to_string()),
        None => (rest.to_string(), UNKNOWN.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ringing() {
        assert_eq!(
            Event::parse("RINGING:+15551234567|Alice"),
            Some(Event::Ringing {
                number: "+15551234567".to_string(),
                name: "Alice".to_string(),
            })
        );
        // missing name field defaults to Unknown
        assert_eq!(
            Event::parse("RINGING:+15551234567"),
            Some(Event::Ringing {
                number: "+15551234567".to_string(),
                name: UNKNOWN.to_string(),
            })
        );
        assert_eq!(
            Event::parse("RINGING:+15551234567|"),
            Some(Event::Ringing {
                number: "+15551234567".to_string(),
                name: UNKNOWN.to_string(),
            })
        );
    }

    #[test]
    fn test_notification_keeps_pipes_in_text() {
        let event = Event::parse("NOTIFICATION:Mail|New message|Hello | world").unwrap();
        assert_eq!(
            event,
            Event::Notification {
                app: "Mail".to_string(),
                title: "New message".to_string(),
                text: "Hello | world".to_string(),
            }
        );
        assert_eq!(
            event.to_string(),
            "NOTIFICATION:Mail|New message|Hello | world"
        );
    }

    #[test]
    fn test_bare_events() {
        assert_eq!(Event::parse("CALL_IDLE"), Some(Event::CallIdle));
        assert_eq!(
            Event::parse("START_AUDIO_BRIDGE"),
            Some(Event::StartAudioBridge)
        );
        assert_eq!(Event::parse("OTP:123456"), Some(Event::Otp("123456".to_string())));
        assert_eq!(Event::parse("RING"), None);
        assert_eq!(Event::parse(""), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("ANSWER"), Some(Command::Answer));
        assert_eq!(Command::parse("AUDIO_READY"), Some(Command::AudioReady));
        assert_eq!(
            Command::parse("DIAL:+15557654321"),
            Some(Command::Dial("+15557654321".to_string()))
        );
        assert_eq!(Command::parse("REMOTE_CALL:+1555"), None);
        assert_eq!(Command::parse("answer"), None);
    }

    #[test]
    fn test_command_lines_round_trip() {
        for command in [
            Command::Answer,
            Command::EndCall,
            Command::Mute,
            Command::Unmute,
            Command::Hold,
            Command::Unhold,
            Command::SpeakerOn,
            Command::SpeakerOff,
            Command::Dial("+15557654321".to_string()),
            Command::AudioReady,
        ] {
            assert_eq!(Command::parse(&command.to_string()), Some(command));
        }
    }
}

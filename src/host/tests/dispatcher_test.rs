use crate::call::{StaticResolver, TelephonyActions, Transition};
use crate::config::HostConfig;
use crate::host::{Host, HostBuilder};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Default)]
struct RecordingTelephony {
    actions: Mutex<Vec<String>>,
    fail_answer: bool,
}

impl RecordingTelephony {
    fn record(&self, action: String) {
        self.actions.lock().unwrap().push(action);
    }

    fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelephonyActions for RecordingTelephony {
    async fn answer(&self) -> Result<()> {
        if self.fail_answer {
            return Err(anyhow!("Missing answer-calls capability"));
        }
        self.record("answer".to_string());
        Ok(())
    }

    async fn end_call(&self) -> Result<()> {
        self.record("end_call".to_string());
        Ok(())
    }

    async fn place_call(&self, number: &str, display_name: &str) -> Result<()> {
        self.record(format!("place_call:{}|{}", number, display_name));
        Ok(())
    }

    async fn set_mute(&self, muted: bool) -> Result<()> {
        self.record(format!("mute:{}", muted));
        Ok(())
    }

    async fn set_hold(&self, on_hold: bool) -> Result<()> {
        self.record(format!("hold:{}", on_hold));
        Ok(())
    }

    async fn set_speaker(&self, enabled: bool) -> Result<()> {
        self.record(format!("speaker:{}", enabled));
        Ok(())
    }
}

async fn start_host(telephony: Arc<RecordingTelephony>) -> Arc<Host> {
    let mut contacts = HashMap::new();
    contacts.insert("+15557654321".to_string(), "Bob".to_string());
    let host = Arc::new(
        HostBuilder::new()
            .with_config(HostConfig {
                addr: "127.0.0.1".to_string(),
                control_port: 0,
                audio_port: 0,
            })
            .with_resolver(Arc::new(StaticResolver::new(contacts)))
            .with_telephony(telephony)
            .build()
            .await
            .unwrap(),
    );
    let serve = host.clone();
    tokio::spawn(async move { serve.serve().await });
    host
}

async fn wait_for_action(telephony: &RecordingTelephony, expected: &str) {
    timeout(Duration::from_secs(2), async {
        loop {
            if telephony.actions().iter().any(|a| a == expected) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("action {} never recorded", expected));
}

async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("no line from host")
        .unwrap();
    line.trim_end().to_string()
}

#[tokio::test]
async fn test_dial_primes_the_call_started_event() {
    let telephony = Arc::new(RecordingTelephony::default());
    let host = start_host(telephony.clone()).await;

    let mut client = BufReader::new(TcpStream::connect(host.control_addr()).await.unwrap());
    client
        .get_mut()
        .write_all(b"DIAL:+15557654321\n")
        .await
        .unwrap();
    wait_for_action(&telephony, "place_call:+15557654321|Bob").await;

    // the telephony stack reports the outgoing call connecting
    host.transition_sender().send(Transition::Offhook).unwrap();
    assert_eq!(read_line(&mut client).await, "CALL_STARTED:+15557654321|Bob");

    host.stop();
}

#[tokio::test]
async fn test_routing_commands_reach_telephony() {
    let telephony = Arc::new(RecordingTelephony::default());
    let host = start_host(telephony.clone()).await;

    let mut client = TcpStream::connect(host.control_addr()).await.unwrap();
    client
        .write_all(b"MUTE\nUNMUTE\nHOLD\nUNHOLD\nSPEAKER_ON\nSPEAKER_OFF\n")
        .await
        .unwrap();

    wait_for_action(&telephony, "speaker:false").await;
    assert_eq!(
        telephony.actions(),
        vec![
            "mute:true",
            "mute:false",
            "hold:true",
            "hold:false",
            "speaker:true",
            "speaker:false",
        ]
    );

    host.stop();
}

#[tokio::test]
async fn test_unknown_command_is_ignored() {
    let telephony = Arc::new(RecordingTelephony::default());
    let host = start_host(telephony.clone()).await;

    let mut client = TcpStream::connect(host.control_addr()).await.unwrap();
    client
        .write_all(b"FROBNICATE\nanswer\nEND_CALL\n")
        .await
        .unwrap();

    // the bad lines are dropped, the connection and dispatch keep working
    wait_for_action(&telephony, "end_call").await;
    assert_eq!(telephony.actions(), vec!["end_call"]);

    host.stop();
}

#[tokio::test]
async fn test_failed_action_reports_status() {
    let telephony = Arc::new(RecordingTelephony {
        fail_answer: true,
        ..Default::default()
    });
    let host = start_host(telephony.clone()).await;

    let mut client = BufReader::new(TcpStream::connect(host.control_addr()).await.unwrap());
    client.get_mut().write_all(b"ANSWER\n").await.unwrap();

    let line = read_line(&mut client).await;
    assert_eq!(line, "STATUS:Host: Missing answer-calls capability");

    host.stop();
}

#[tokio::test]
async fn test_audio_ready_without_audio_peer_reports_status() {
    let telephony = Arc::new(RecordingTelephony::default());
    let host = start_host(telephony).await;

    let mut client = BufReader::new(TcpStream::connect(host.control_addr()).await.unwrap());
    client.get_mut().write_all(b"AUDIO_READY\n").await.unwrap();

    let line = read_line(&mut client).await;
    assert_eq!(line, "STATUS:Host: No audio client connected");

    host.stop();
}

#[tokio::test]
async fn test_incoming_ring_is_broadcast_with_resolved_name() {
    let telephony = Arc::new(RecordingTelephony::default());
    let host = start_host(telephony.clone()).await;

    // subscribe first so no registration event is missed
    let mut events = host.subscribe();
    let mut first = BufReader::new(TcpStream::connect(host.control_addr()).await.unwrap());
    let mut second = BufReader::new(TcpStream::connect(host.control_addr()).await.unwrap());
    // both clients must be registered before the ring fires
    timeout(Duration::from_secs(2), async {
        loop {
            if let crate::event::SessionEvent::ClientCount(2) = events.recv().await.unwrap() {
                break;
            }
        }
    })
    .await
    .unwrap();

    host.transition_sender()
        .send(Transition::Ring("+15557654321".to_string()))
        .unwrap();
    assert_eq!(read_line(&mut first).await, "RINGING:+15557654321|Bob");
    assert_eq!(read_line(&mut second).await, "RINGING:+15557654321|Bob");

    // answered: the stored context names the call
    first.get_mut().write_all(b"ANSWER\n").await.unwrap();
    wait_for_action(&telephony, "answer").await;
    host.transition_sender().send(Transition::Offhook).unwrap();
    assert_eq!(read_line(&mut first).await, "CALL_STARTED:+15557654321|Bob");
    assert_eq!(read_line(&mut second).await, "CALL_STARTED:+15557654321|Bob");

    host.stop();
}

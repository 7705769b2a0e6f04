use anyhow::Result;
use callbridge::call::{StaticResolver, Transition};
use callbridge::client::{Client, ClientBuilder};
use callbridge::config::{Cli, Config, Role};
use callbridge::host::{Host, HostBuilder};
use callbridge::proto::Command;
use clap::Parser;
use std::fs::File;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tracing::{info, level_filters::LevelFilter, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli
        .conf
        .as_deref()
        .filter(|conf| std::path::Path::new(conf).exists())
        .map(|conf| Config::load(conf).expect("Failed to load config"))
        .unwrap_or_default();

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file).expect("Failed to create log file");
        let (non_blocking, _guard) = tracing_appender::non_blocking(file);
        log_fmt.with_writer(non_blocking).try_init().ok();
    } else {
        log_fmt.try_init().ok();
    }

    info!("callbridge {}", callbridge::version::get_short_version());
    match cli.role {
        Role::Host => run_host(config).await,
        Role::Client { server } => run_client(config, server).await,
    }
}

async fn run_host(config: Config) -> Result<()> {
    let resolver = Arc::new(StaticResolver::new(config.contacts.clone()));
    let host = HostBuilder::new()
        .with_config(config.host)
        .with_resolver(resolver)
        .build()
        .await?;

    spawn_event_logger(host.subscribe());
    info!("Starting callbridge host on {}", host.control_addr());
    select! {
        result = host.serve() => result,
        _ = drive_host_stdin(&host) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            host.stop();
            Ok(())
        }
    }
}

async fn run_client(config: Config, server: Option<String>) -> Result<()> {
    let mut client_config = config.client;
    if server.is_some() {
        client_config.server = server;
    }
    let client = ClientBuilder::new().with_config(client_config).build()?;

    spawn_event_logger(client.subscribe());
    info!("Connecting to host at {}", client.server_addr());
    select! {
        result = client.serve() => result,
        _ = drive_client_stdin(&client) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            client.stop();
            Ok(())
        }
    }
}

fn spawn_event_logger(mut events: callbridge::event::EventReceiver) {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "session event");
        }
    });
}

/// Stand-in for the device telephony and SMS stacks: feed transitions from
/// stdin, e.g. `RING:+15551234567`, `OFFHOOK`, `IDLE`, `OTP:123456`,
/// `NOTIFY:Mail|New message|Hello`.
async fn drive_host_stdin(host: &Host) {
    let transitions = host.transition_sender();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(number) = line.strip_prefix("RING:") {
            transitions.send(Transition::Ring(number.to_string())).ok();
        } else if line == "OFFHOOK" {
            transitions.send(Transition::Offhook).ok();
        } else if line == "IDLE" {
            transitions.send(Transition::Idle).ok();
        } else if let Some(code) = line.strip_prefix("OTP:") {
            host.forward_otp(code);
        } else if let Some(rest) = line.strip_prefix("NOTIFY:") {
            let mut fields = rest.splitn(3, '|');
            let app = fields.next().unwrap_or_default();
            let title = fields.next().unwrap_or_default();
            let text = fields.next().unwrap_or_default();
            host.mirror_notification(app, title, text);
        } else {
            warn!(line, "unknown input");
        }
    }
}

/// Forward commands typed on stdin, e.g. `ANSWER` or `DIAL:+15557654321`.
async fn drive_client_stdin(client: &Client) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Command::parse(line) {
            Some(command) => client.send_command(command),
            None => warn!(line, "unknown command"),
        }
    }
}

//! castctl: command-line control for Cast v2 receivers.
//!
//! ```text
//! castctl --host 192.168.1.20 status        Receiver status as JSON
//! castctl launch CC1AD845                   Launch an application
//! castctl load <url> --title "Clip"         Load media into the running app
//! castctl watch                             Print events until Ctrl-C
//! castctl gen-config                        Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use castv2_cli::config::CliConfig;
use castv2_core::{CastDevice, CastError, ConnectionEvent, Media, SpontaneousEvent, StreamType};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "castctl", about = "Control a Cast v2 receiver", version)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "castctl.toml")]
    config: PathBuf,

    /// Device address (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Control port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Talk plain TCP instead of TLS.
    #[arg(long)]
    plaintext: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receiver status.
    Status,
    /// Whether an application can be launched.
    Available { app_id: String },
    /// Launch an application.
    Launch { app_id: String },
    /// Stop the running application.
    Stop,
    /// Set the volume level (0.0 to 1.0), stepping by the receiver's increment.
    Volume { level: f32 },
    Mute,
    Unmute,
    /// Status of the current media session.
    MediaStatus,
    /// Load media into the running application.
    Load {
        url: String,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    Play,
    Pause,
    /// Seek to a position in seconds.
    Seek { seconds: f64 },
    /// Print spontaneous and connection events until Ctrl-C.
    Watch,
    /// Print the default configuration and exit.
    GenConfig,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if matches!(cli.command, Command::GenConfig) {
        println!("{}", CliConfig::default().to_toml()?);
        return Ok(());
    }

    let mut config = CliConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.device.host = host;
    }
    if let Some(port) = cli.port {
        config.device.port = port;
    }
    if cli.plaintext {
        config.device.tls.enabled = false;
    }

    // Logs go to stderr; stdout carries the JSON output.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("castctl v{}", env!("CARGO_PKG_VERSION"));
    debug!(host = %config.device.host, port = config.device.port, "connecting");

    let device = CastDevice::new(config.device)?;
    device.connect().await?;

    let outcome = match cli.command {
        Command::Watch => watch(&device).await.map(|()| None),
        command => run(&device, command).await.map(Some),
    };
    let _ = device.disconnect().await;

    if let Some(value) = outcome? {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────

async fn run(device: &CastDevice, command: Command) -> Result<Value, CastError> {
    let value = match command {
        Command::Status => serde_json::to_value(device.status().await?)?,
        Command::Available { app_id } => {
            let available = device.is_app_available(&app_id).await?;
            json!({ "appId": app_id, "available": available })
        }
        Command::Launch { app_id } => serde_json::to_value(device.launch_app(&app_id).await?)?,
        Command::Stop => serde_json::to_value(device.stop_app().await?)?,
        Command::Volume { level } => {
            device.set_volume_by_increment(level).await?;
            serde_json::to_value(device.status().await?.volume)?
        }
        Command::Mute => serde_json::to_value(device.set_muted(true).await?.volume)?,
        Command::Unmute => serde_json::to_value(device.set_muted(false).await?.volume)?,
        Command::MediaStatus => serde_json::to_value(device.media_status().await?)?,
        Command::Load {
            url,
            content_type,
            title,
        } => {
            let mut media = Media {
                content_id: url,
                content_type,
                stream_type: Some(StreamType::Buffered),
                ..Media::default()
            };
            if let Some(title) = title {
                media = media.with_title(title);
            }
            serde_json::to_value(device.load(media).await?)?
        }
        Command::Play => serde_json::to_value(device.play().await?)?,
        Command::Pause => serde_json::to_value(device.pause().await?)?,
        Command::Seek { seconds } => serde_json::to_value(device.seek(seconds).await?)?,
        Command::Watch | Command::GenConfig => Value::Null,
    };
    Ok(value)
}

fn event_json(event: &SpontaneousEvent) -> Value {
    match event {
        SpontaneousEvent::Status(status) => json!({ "event": "status", "status": status }),
        SpontaneousEvent::MediaStatus(status) => {
            json!({ "event": "mediaStatus", "status": status })
        }
        SpontaneousEvent::Close => json!({ "event": "close" }),
        SpontaneousEvent::DeviceAdded(device) => json!({ "event": "deviceAdded", "device": device }),
        SpontaneousEvent::DeviceUpdated(device) => {
            json!({ "event": "deviceUpdated", "device": device })
        }
        SpontaneousEvent::DeviceRemoved { device_id } => {
            json!({ "event": "deviceRemoved", "deviceId": device_id })
        }
        SpontaneousEvent::AppEvent(app) => {
            let message = serde_json::from_str::<Value>(&app.message)
                .unwrap_or_else(|_| Value::String(app.message.clone()));
            json!({ "event": "app", "namespace": app.namespace, "message": message })
        }
        SpontaneousEvent::Unknown(value) => json!({ "event": "unknown", "message": value }),
    }
}

/// Stream events as JSON lines until Ctrl-C.
async fn watch(device: &CastDevice) -> Result<(), CastError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let events_tx = tx.clone();
    let events = device.on_event(move |event| {
        events_tx.send(event_json(event))?;
        Ok(())
    });
    let lifecycle = device.on_connection(move |event| {
        let name = match event {
            ConnectionEvent::Opened => "opened",
            ConnectionEvent::Closed => "closed",
        };
        tx.send(json!({ "event": "connection", "state": name }))?;
        Ok(())
    });

    // Initial snapshot.
    println!("{}", json!({ "event": "status", "status": device.status().await? }));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = rx.recv() => match line {
                Some(line) => println!("{line}"),
                None => break,
            },
        }
    }

    device.remove_event_listener(events);
    device.remove_connection_listener(lifecycle);
    Ok(())
}

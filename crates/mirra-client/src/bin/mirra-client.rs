use clap::Parser;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

use mirra_client::types::DEFAULT_ENDPOINT;
use mirra_client::{
    CameraSource, CatalogClient, ClientConfig, DummyCamera, DummySignaling, DummyTransportFactory,
    HandoffEvent, HandoffTiming, HttpSignaling, IvfFileCamera, ParameterStore, Session,
    SignalingEndpoint, TransportFactory, WebRtcTransportFactory,
};
use mirra_common::helpers::{env_bool, split_list};
use mirra_common::{Category, Color, Region};
use mirra_media::{FrameSource, Resolution, SolidColorSource};

#[derive(Parser, Debug)]
#[command(name = "mirra-client")]
struct Args {
    /// Base URL of the processing endpoint
    #[arg(long, env = "MIRRA_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
    /// ICE server URL (repeatable); falls back to MIRRA_ICE_SERVERS
    #[arg(long = "ice-server", value_name = "URL")]
    ice_servers: Vec<String>,
    /// VP8/VP9 IVF file streamed as the camera
    #[arg(long, env = "MIRRA_VIDEO_FILE")]
    video_file: Option<PathBuf>,
    #[arg(long, env = "MIRRA_PREPARE_AFTER_SECS", default_value_t = 10)]
    prepare_after_secs: u64,
    #[arg(long, env = "MIRRA_SWAP_AFTER_SECS", default_value_t = 15)]
    swap_after_secs: u64,
    /// Give up on a slot's negotiation after this many seconds
    #[arg(long, env = "MIRRA_NEGOTIATION_TIMEOUT_SECS")]
    negotiation_timeout_secs: Option<u64>,
    /// Initial blend intensity in [0, 1]
    #[arg(long)]
    intensity: Option<f32>,
    /// Use the in-process transport and endpoint; no network
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Read parameter commands from stdin, e.g. `intensity 0.6`
    #[arg(long, default_value_t = false)]
    control_stdin: bool,
}

impl Args {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig {
            endpoint: self.endpoint.clone(),
            timing: HandoffTiming {
                prepare_after: Duration::from_secs(self.prepare_after_secs),
                swap_after: Duration::from_secs(self.swap_after_secs),
            },
            negotiation_timeout: self.negotiation_timeout_secs.map(Duration::from_secs),
            ..ClientConfig::default()
        };
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers.clone();
        } else if let Ok(list) = std::env::var("MIRRA_ICE_SERVERS") {
            config.ice_servers = split_list(&list);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ControlCommand {
    Intensity(f32),
    Category(Category, Color),
    Color(Region, Color),
    Beautify,
    Products,
}

fn parse_named<T: serde::de::DeserializeOwned>(token: &str, what: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(token.to_string()))
        .map_err(|_| format!("unknown {} `{}`", what, token))
}

fn parse_control_line(line: &str) -> Result<ControlCommand, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err("empty command".into());
    }

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    let command = match parts.as_slice() {
        ["intensity", value] => ControlCommand::Intensity(
            value
                .parse::<f32>()
                .map_err(|_| "intensity must be a number".to_string())?,
        ),
        ["category", category, color] => ControlCommand::Category(
            parse_named(category, "category")?,
            color.parse::<Color>().map_err(|e| e.to_string())?,
        ),
        ["color", region, color] => ControlCommand::Color(
            parse_named(region, "region")?,
            color.parse::<Color>().map_err(|e| e.to_string())?,
        ),
        ["beautify"] => ControlCommand::Beautify,
        ["products"] => ControlCommand::Products,
        _ => {
            return Err(
                "expected `intensity <v>`, `category <name> <#RRGGBB>`, `color <REGION> <#RRGGBB>`, `beautify` or `products`"
                    .into(),
            )
        }
    };
    Ok(command)
}

fn spawn_stdin_control(tx: mpsc::UnboundedSender<ControlCommand>) {
    std::thread::spawn(move || {
        eprintln!("Control stdin enabled: `intensity 0.6`, `category Lipstick #AA0A1E`, `color LIP_UPPER #FF0000`, `beautify`, `products`");
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => match parse_control_line(&line) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        eprintln!("invalid control command `{}`: {}", line.trim(), err);
                    }
                },
                Err(err) => {
                    eprintln!("stdin read error: {}", err);
                    break;
                }
            }
        }
    });
}

async fn log_handoff_events(mut events: broadcast::Receiver<HandoffEvent>) {
    loop {
        match events.recv().await {
            Ok(HandoffEvent::Activated { label, at }) => {
                info!(slot = %label, at_ms = at.as_millis() as u64, "slot activated")
            }
            Ok(HandoffEvent::Preparing { label, cycle, at }) => {
                info!(slot = %label, cycle, at_ms = at.as_millis() as u64, "preparing")
            }
            Ok(HandoffEvent::PrepareFailed { label, cycle, .. }) => {
                warn!(slot = %label, cycle, "prepare failed")
            }
            Ok(HandoffEvent::Swapped {
                from,
                to,
                cycle,
                fallback,
                at,
            }) => info!(
                from = %from,
                to = %to,
                cycle,
                fallback,
                at_ms = at.as_millis() as u64,
                "swapped"
            ),
            Ok(HandoffEvent::Stopped { .. }) | Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("missed {} handoff events", n),
        }
    }
}

async fn handle_command(session: &Session, store: &ParameterStore, command: ControlCommand) {
    match command {
        ControlCommand::Intensity(value) => store.set_intensity(value),
        ControlCommand::Category(category, color) => store.apply_category(category, color),
        ControlCommand::Color(region, color) => store.set_color(region, color),
        ControlCommand::Beautify => {
            if !session.beautify() {
                info!("no beautify suggestion available yet");
            }
        }
        ControlCommand::Products => match session.product_recommendations().await {
            Ok(recommendations) => {
                for (category, products) in &recommendations.products {
                    info!(
                        category = %category,
                        count = products.len(),
                        first = products.first().and_then(|p| p.name()).unwrap_or("-"),
                        "product recommendations"
                    );
                }
            }
            Err(e) => warn!("product lookup failed: {}", e),
        },
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.client_config()?;
    let store = ParameterStore::default();
    if let Some(intensity) = args.intensity {
        store.set_intensity(intensity);
    }

    let factory: Arc<dyn TransportFactory>;
    let endpoint: Arc<dyn SignalingEndpoint>;
    let camera: Box<dyn CameraSource>;
    if args.dry_run {
        info!("dry run: in-process transport and endpoint");
        factory = Arc::new(DummyTransportFactory::default());
        endpoint = DummySignaling::new();
        let preview: Arc<dyn FrameSource> = Arc::new(SolidColorSource::new(
            Resolution::new(640, 480),
            [0xE0, 0xC0, 0xB0],
        ));
        camera = Box::new(DummyCamera::new(Some(preview)));
    } else {
        let rtc = WebRtcTransportFactory::new(
            config.ice_servers.clone(),
            config.channel_label.clone(),
        );
        if !rtc.decodes_remote_video() {
            warn!("no video decoder configured: remote video is not decoded and fallback stills stay blank");
        }
        factory = Arc::new(rtc);
        endpoint = Arc::new(HttpSignaling::new(&config)?);
        camera = match &args.video_file {
            Some(path) => Box::new(IvfFileCamera::new(path)),
            None => Box::new(DummyCamera::default()),
        };
    }

    let mut session = Session::new(config.clone(), factory, endpoint, store.clone());
    if !args.dry_run {
        session = session.with_catalog(CatalogClient::new(&config)?);
    }
    session.turn_on(camera.as_ref()).await?;
    if let Some(events) = session.events().await {
        tokio::spawn(log_handoff_events(events));
    }

    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    if args.control_stdin || env_bool("MIRRA_CONTROL_STDIN", false) {
        spawn_stdin_control(control_tx);
    } else {
        drop(control_tx);
    }

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                info!("run duration elapsed");
                break;
            }
            Some(command) = control_rx.recv() => handle_command(&session, &store, command).await,
        }
    }

    session.turn_off().await;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    mirra_common::init_tracing();

    let args = Args::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}

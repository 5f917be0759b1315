use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vr_link::bridge::Bridge;
use vr_link::config::{self, LinkConfig};
use vr_link::events::{BridgeEvent, StopSource};
use vr_link::telemetry::{
    ControllerState, Hand, PoseSource, Position, Quaternion, SamplerExit, TelemetrySampler,
};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// vr-link command line arguments
#[derive(Parser, Debug)]
#[command(name = "vr-link")]
#[command(version, about = "Stream VR controller telemetry over a WebRTC DataChannel", long_about = None)]
struct CliArgs {
    /// Signaling relay address (overrides config file)
    #[arg(short = 'u', long, value_name = "URL")]
    url: Option<String>,

    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// DataChannel label (overrides config file)
    #[arg(long, value_name = "NAME")]
    channel: Option<String>,

    /// STUN server URL; may be repeated (overrides config file)
    #[arg(long = "stun", value_name = "URL")]
    stun: Vec<String>,

    /// Sampling interval in milliseconds (overrides config file)
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Hands to stream, comma separated (overrides config file)
    #[arg(long, value_name = "HANDS", value_delimiter = ',')]
    hands: Vec<Hand>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting vr-link v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    tracing::info!(
        "Relay {}, channel '{}', {} ms interval",
        config.signaling_url,
        config.webrtc.channel_name,
        config.telemetry.interval_ms
    );

    let bridge = Bridge::new(&config);
    spawn_event_printer(&bridge);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, shutting down");
                shutdown.cancel();
            }
        });
    }

    bridge.connect(config.signaling_url.clone());

    loop {
        let sampler = TelemetrySampler::new(config.telemetry.clone());
        let exit = sampler
            .run(bridge.clone(), OrbitPoseSource::new(), shutdown.child_token())
            .await;

        match exit {
            SamplerExit::Cancelled => break,
            SamplerExit::StopRequested(
                StopSource::Controller | StopSource::SignalingClose | StopSource::SocketClose,
            ) => break,
            SamplerExit::StopRequested(source) => {
                // The bridge renegotiates on its own; resume once it is ready again
                tracing::info!("Sampling paused ({}), waiting for the link", source);
                if !wait_until_ready(&bridge, &shutdown).await {
                    break;
                }
            }
        }
    }

    bridge.shutdown().await;
    tracing::info!("vr-link stopped");
    Ok(())
}

fn build_config(args: &CliArgs) -> anyhow::Result<LinkConfig> {
    let mut config = config::load_or_default(args.config.as_deref())?;

    if let Some(url) = &args.url {
        config.signaling_url = url.clone();
    }
    if let Some(channel) = &args.channel {
        config.webrtc.channel_name = channel.clone();
    }
    if !args.stun.is_empty() {
        config.webrtc.stun_servers = args.stun.clone();
    }
    if let Some(interval_ms) = args.interval_ms {
        config.telemetry.interval_ms = interval_ms;
    }
    if !args.hands.is_empty() {
        config.telemetry.hands = args.hands.iter().copied().collect();
    }

    config.validate()?;
    Ok(config)
}

fn spawn_event_printer(bridge: &Bridge) {
    let mut rx = bridge.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BridgeEvent::StatusChanged { status, .. }) => {
                    tracing::info!(target: "vr_link::status", "{}", status)
                }
                // Already mirrored to tracing by the event bus
                Ok(BridgeEvent::Log { .. }) => {}
                Ok(BridgeEvent::StopRequested { source }) => {
                    tracing::info!(target: "vr_link::status", "Stop requested by {}", source)
                }
                Err(RecvError::Lagged(n)) => tracing::debug!("Event printer lagged by {}", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// `false` if shutdown was requested or the signaling session ended first
async fn wait_until_ready(bridge: &Bridge, shutdown: &CancellationToken) -> bool {
    let mut ready = bridge.ready_watch();
    let mut events = bridge.subscribe();
    let session_ended = async move {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::StopRequested {
                    source: StopSource::SignalingClose | StopSource::SocketClose,
                }) => return,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return,
            }
        }
    };

    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = session_ended => false,
        result = ready.wait_for(|ready| *ready) => result.is_ok(),
    }
}

/// Both controllers slowly orbiting in front of the user
struct OrbitPoseSource {
    started: Instant,
}

impl OrbitPoseSource {
    fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl PoseSource for OrbitPoseSource {
    fn sample(&mut self, hand: Hand) -> Option<ControllerState> {
        let t = self.started.elapsed().as_secs_f64();
        let (side, phase) = match hand {
            Hand::Left => (-1.0, 0.0),
            Hand::Right => (1.0, std::f64::consts::PI),
        };
        let angle = t * 0.5 + phase;
        let position = Position::new(
            side * 0.25 + 0.1 * angle.cos(),
            1.2 + 0.05 * (t * 0.8).sin(),
            -0.4 + 0.1 * angle.sin(),
        );
        let yaw = angle / 2.0;
        let quaternion = Quaternion::new(0.0, yaw.sin(), 0.0, yaw.cos());

        Some(
            ControllerState::new(hand, position, quaternion)
                .with_trigger(0.5 + 0.5 * (t + phase).sin())
                .with_grip((t + phase).sin() > 0.0),
        )
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "vr_link=error,webrtc=error",
        LogLevel::Warn => "vr_link=warn,webrtc=warn",
        LogLevel::Info => "vr_link=info,webrtc=warn",
        LogLevel::Verbose => "vr_link=debug,webrtc=warn",
        LogLevel::Debug => "vr_link=debug,webrtc=info",
        LogLevel::Trace => "vr_link=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

mod http;
mod mpv;
mod socket;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use piradio_core::config::{Config, EngineBackend};
use piradio_core::controller::Controller;
use piradio_core::engine::{AudioEngine, NullEngine};
use piradio_core::monitor;
use piradio_core::render::{ChannelRenderer, RenderEvent};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "piradiod", about = "Internet radio player daemon")]
struct Args {
    /// Config file (default: ~/.config/piradio/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also log to stderr
    #[arg(long)]
    log_stderr: bool,
}

/// Forwards WARN and ERROR events to connected socket clients.
struct BroadcastLayer {
    sender: broadcast::Sender<String>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No subscribers is fine.
        let _ = self.sender.send(message);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(log_tx: broadcast::Sender<String>, to_stderr: bool) -> anyhow::Result<PathBuf> {
    let data_dir = piradio_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("piradiod.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = to_stderr.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(BroadcastLayer { sender: log_tx })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,piradio_daemon=debug,piradio_core=debug")
            }),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (log_tx, _) = broadcast::channel::<String>(100);
    let log_path = init_logging(log_tx.clone(), args.log_stderr)?;
    info!("Log file: {:?}", log_path);

    let config_path = args.config.unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;
    info!(
        "Config loaded from {:?} ({} stations, profile {:?})",
        config_path,
        config.stations.len(),
        config.player.profile
    );

    let mpv = match config.engine.backend {
        EngineBackend::Mpv => Some(Arc::new(mpv::MpvEngine::new(
            mpv::MpvOptions::from_config(&config),
        ))),
        EngineBackend::Null => None,
    };
    let engine: Arc<dyn AudioEngine> = match &mpv {
        Some(mpv) => mpv.clone() as Arc<dyn AudioEngine>,
        None => {
            warn!("Audio backend disabled, commands will only be logged");
            Arc::new(NullEngine)
        }
    };

    let (render_tx, _) = broadcast::channel::<RenderEvent>(256);
    let renderer = Arc::new(ChannelRenderer::new(render_tx.clone()));

    let controller = Arc::new(
        Controller::new(&config, engine, renderer).with_settings_file(&config, config_path.clone()),
    );

    if controller.capabilities().timer {
        monitor::spawn_timer_monitor(controller.clone());
    }
    monitor::spawn_idle_monitor(controller.clone());

    let _socket_handle = socket::start_server(
        config.socket.bind_address.clone(),
        config.socket.port,
        socket::SocketContext {
            controller: controller.clone(),
            buttons: config.buttons.clone(),
            render_tx,
            log_tx,
        },
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            controller.clone(),
        );
    }

    {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start_playback().await });
    }

    info!("Daemon initialised, waiting for commands");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    controller.shutdown().await;
    if let Some(mpv) = mpv {
        mpv.shutdown().await;
    }
    Ok(())
}

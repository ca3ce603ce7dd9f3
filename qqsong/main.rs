mod api;
mod config;
mod dbus;
mod download;
mod error;
mod lyrics;
mod player;

use crate::api::{Backend, HttpBackend};
use crate::config::{Config, MediaBackend};
use crate::download::Downloader;
use crate::error::App;
use crate::player::command::CommandFactory;
use crate::player::{Controller, MediaFactory, Quality, StatusBoard};
use clap::Parser;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::watch;
use tokio::{signal, task};

#[derive(Parser)]
#[command(name = "qqsong", about = "QQ music player daemon.", version)]
struct Args {
    #[arg(short = 'c', long = "config", help = "配置文件路径")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), App> {
    let args = Args::parse();
    let home_dir = std::env::var("HOME").map_err(|e| {
        App::Io(
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Failed to get HOME environment variable: {e}"),
            )
            .to_string(),
        )
    })?;

    let log_dir = format!("{home_dir}/.config/qqsong/logs");
    fs::create_dir_all(&log_dir).await?;

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(format!("{home_dir}/.config/qqsong/config.toml")));
    let config = Config::load_or_create(&config_path).await?;

    // Logger setup; the handle has to outlive main or file output stops.
    let _logger = Logger::try_with_str(&config.log.level)?
        .log_to_file(FileSpec::default().directory(&log_dir))
        .rotate(
            Criterion::Size(1_000_000),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(3),
        )
        .duplicate_to_stderr(Duplicate::None)
        .start()?;
    info!("Using config {}", config_path.display());

    let backend = Arc::new(HttpBackend::new(
        &config.server.base_url,
        config.request_timeout(),
    )?);
    match backend.health().await {
        Ok(health) => info!("{}", dbus::describe_health(&health)),
        Err(e) => warn!("无法连接到服务器，请检查后端是否运行: {e}"),
    }

    let board = Arc::new(StatusBoard::default());
    let quality = if config.player.prefer_flac {
        Quality::Flac
    } else {
        Quality::Standard
    };
    let controller = Controller::new(
        backend,
        media_factory(&config)?,
        Arc::clone(&board) as Arc<dyn player::StatusSink>,
        quality,
        config.volume(),
        config.retry_delay(),
    );
    let downloader = Arc::new(Downloader::new(
        controller.clone(),
        Arc::clone(&board) as Arc<dyn player::StatusSink>,
        config.music_dir(&home_dir),
        config.retry_delay(),
    ));

    let (stop_sender, stop_receiver) = watch::channel(());
    task::spawn({
        let controller = controller.clone();
        let stop_sender = stop_sender.clone();
        async move {
            let result =
                dbus::run_dbus_server(controller, board, downloader, stop_sender.clone()).await;
            if let Err(e) = result {
                error!("DBus listener error: {e}");
                let _ = stop_sender.send(());
            }
        }
    });

    tokio::select! {
        () = wait_for_stop_signal(stop_receiver) => {}
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Interrupted, shutting down");
        }
    }

    controller.stop();
    Ok(())
}

async fn wait_for_stop_signal(mut stop_receiver: watch::Receiver<()>) {
    if stop_receiver.changed().await.is_err() {
        warn!("Stop channel closed");
    }
}

fn media_factory(config: &Config) -> Result<Arc<dyn MediaFactory>, App> {
    match config.player.backend {
        MediaBackend::Command => {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout())
                .build()?;
            info!("Using player command {:?}", config.player.command);
            Ok(Arc::new(CommandFactory::new(
                config.player.command.clone(),
                client,
            )))
        }
        #[cfg(feature = "gstreamer")]
        MediaBackend::Gstreamer => Ok(Arc::new(player::gst::GstFactory::new()?)),
        #[cfg(not(feature = "gstreamer"))]
        MediaBackend::Gstreamer => Err(App::Config(
            "player.backend = \"gstreamer\" requires building with the gstreamer feature"
                .to_string(),
        )),
    }
}

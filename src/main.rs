use std::sync::Arc;
use std::time::Duration;

use beam_transcode::Transcoder;
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod engine;
mod handler;
mod manager;
mod store;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("beam_transcode", log::LevelFilter::Debug)
        .filter_module("beam_engine", log::LevelFilter::Debug)
        .init();
}

fn init_transcoder() -> anyhow::Result<Transcoder> {
    let config = config::config();
    let store = store::HttpStore::new(config.store_url())?;
    let engine = engine::media_engine()?;
    Ok(Transcoder::new(
        Arc::new(store),
        engine,
        config.pipeline().clone(),
    ))
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let transcoder = init_transcoder().unwrap_or_else(|e| {
        log::error!("Error initializing transcoder: {:#}", e);
        std::process::exit(1);
    });
    if let Err(e) = manager::init_job_manager(transcoder) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    api::start_api_server(cancel_clone, config::config().port());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    if let Ok(manager) = manager::job_manager() {
        manager.shutdown(Duration::from_secs(5)).await;
    }
    std::process::exit(0);
}

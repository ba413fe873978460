mod config;
mod dispatch;
mod server;
mod session;


use std::env;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;

use crate::config::{load_config, DEFAULT_CONFIG_PATH, DEFAULT_VOLUME_PATH};
use crate::server::{run_server, ServerState};

fn usage() -> String {
    format!(
        "usage: omni_daemon [config_path] [volume_path]\n\
         defaults:\n\
         config_path {}\n\
         volume_path {}",
        DEFAULT_CONFIG_PATH, DEFAULT_VOLUME_PATH
    )
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("{}", usage());
        return;
    }
    let config_path = args
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let volume_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| DEFAULT_VOLUME_PATH.to_string());

    let config = load_config(Path::new(&config_path));

    info!("initializing volume {}", volume_path);
    let state = match ServerState::init(Path::new(&volume_path)).await {
        Ok(state) => state,
        Err(err) => {
            error!("volume init failed: {}", err);
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("bind on port {} failed: {}", config.port, err);
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(err) = run_server(state, listener, shutdown).await {
        error!("server failed: {}", err);
        std::process::exit(1);
    }
}

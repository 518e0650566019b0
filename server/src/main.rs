mod broadcaster;
mod cleanup_task;
mod message_handler;
mod room_code;
mod room_registry;
mod server_config;
mod tick_scheduler;
mod web_server;
mod ws_handler;

use std::time::Duration;

use clap::Parser;

use common::config::Validate;
use common::{log, log_error, logger};

use broadcaster::Broadcaster;
use cleanup_task::CleanupTask;
use message_handler::SessionGateway;
use room_registry::RoomRegistry;
use server_config::{get_config_manager, ServerConfig, DEFAULT_CONFIG_FILE_NAME};
use tick_scheduler::TickScheduler;
use web_server::{run_web_server, WebServerState};

#[derive(Parser)]
#[command(name = "snake_rooms_server", about = "Room-based multiplayer snake server")]
struct Args {
    /// Path to the YAML config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE_NAME)]
    config: String,

    #[arg(long)]
    use_log_prefix: bool,

    /// Write the default config to --config and exit
    #[arg(long)]
    write_default_config: bool,

    /// Override the configured listen address, e.g. 127.0.0.1:5000
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_manager = get_config_manager(&args.config);

    if args.write_default_config {
        config_manager.set_config(&ServerConfig::default())?;
        println!("Default config written to {}", args.config);
        return Ok(());
    }

    let mut config = config_manager.get_config()?;
    if let Some(listen) = args.listen {
        config.listen_address = listen;
        config.validate()?;
    }
    let addr = config.socket_addr()?;

    let prefix = if args.use_log_prefix {
        Some("Server".to_string())
    } else {
        None
    };
    logger::init_logger(prefix, config.log_level);

    let registry = RoomRegistry::new(config.room.clone());
    let broadcaster = Broadcaster::new();
    let scheduler = TickScheduler::new(
        registry.clone(),
        broadcaster.clone(),
        config.room.tick_interval(),
    );
    let gateway = SessionGateway::new(registry.clone(), broadcaster.clone(), scheduler.clone());

    let cleanup_task = CleanupTask::new(
        registry.clone(),
        broadcaster.clone(),
        scheduler.clone(),
        config.cleanup.clone(),
    );
    tokio::spawn(async move {
        cleanup_task.run().await;
    });

    log!(
        "Snake rooms server starting: {}x{} board, {} players per room, {}ms ticks",
        config.room.field_width,
        config.room.field_height,
        config.room.capacity,
        config.room.tick_interval_ms
    );

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log_error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }

        log!("Shutdown signal received, stopping rooms...");
        for code in registry.room_codes().await {
            scheduler.stop_room(&code).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    let state = WebServerState {
        gateway,
        client_buffer_size: config.client_buffer_size,
    };
    run_web_server(addr, state, config.static_files_path.clone(), shutdown_signal).await?;

    log!("Server shut down gracefully");
    Ok(())
}

//! CLI application for driving coverings through a connector bridge.
//!
//! Run with: cargo run --example bridge_cli -- --help

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use connector_bridge_rs::{
    BridgeContext, BridgeTransport, DeviceConfig, EventFilter, MessageType, Platform,
    PlatformConfig, WindowCovering,
};
use futures::StreamExt;

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Control connector bridge coverings from the command line", long_about = None)]
struct Cli {
    /// Bridge host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Bridge UDP port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Bridge access token
    #[arg(short, long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the current position of a device
    Read {
        mac: String,
        #[arg(short, long, default_value = "10000000")]
        device_type: String,
        /// Seconds to wait for the reply
        #[arg(short, long, default_value = "3")]
        wait: u64,
    },

    /// Move a device to a position (0 closed - 100 open)
    Set {
        mac: String,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        position: u8,
        #[arg(short, long, default_value = "10000000")]
        device_type: String,
    },

    /// Print every message the bridge sends, optionally for one device
    Watch {
        #[arg(short, long)]
        mac: Option<String>,
    },

    /// Run a platform from a JSON config file and print device states
    Run {
        config: std::path::PathBuf,
    },
}

/// Acquires the process-wide bridge from the global CLI options.
async fn connect(cli: &Cli) -> Result<Arc<BridgeTransport>, connector_bridge_rs::Error> {
    BridgeContext::global()
        .acquire(cli.host.as_deref(), cli.port, cli.token.as_deref())
        .await
}

async fn print_diagnostics(bridge: &BridgeTransport) -> Result<(), Box<dyn std::error::Error>> {
    let diag = bridge.diagnostics().await;
    log::debug!("{}", serde_json::to_string(&diag)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { config } => {
            let text = std::fs::read_to_string(config)?;
            let config = PlatformConfig::from_json(&text)?;
            let platform = Platform::start(&config, BridgeContext::global()).await?;
            platform.poll_all().await?;
            println!("Running {} covering(s)... (Press Ctrl+C to stop)\n", platform.len());

            loop {
                tokio::time::sleep(config.refresh_interval()).await;
                for covering in platform.coverings() {
                    let state = covering.state();
                    println!(
                        "  {:20} {:3}%  {:?}",
                        covering.name(),
                        state.position().value(),
                        state.state()
                    );
                }
            }
        }

        Commands::Read {
            mac,
            device_type,
            wait,
        } => {
            let bridge = connect(&cli).await?;
            // Subscribed before the stream, so its cache is updated first.
            let covering = WindowCovering::new(bridge.clone(), DeviceConfig::new(mac, device_type));
            let mut replies = bridge
                .router()
                .subscribe_stream(EventFilter::device(mac, MessageType::ReadDeviceAck));
            covering.poll().await?;

            match tokio::time::timeout(Duration::from_secs(*wait), replies.next()).await {
                Ok(Some(_)) => {
                    println!("\nDevice {}:", mac);
                    println!("  Position: {}%", covering.current_position().value());
                    println!("  State: {:?}", covering.position_state());
                }
                _ => eprintln!("No reply from {} within {}s", mac, wait),
            }
            print_diagnostics(&bridge).await?;
        }

        Commands::Set {
            mac,
            position,
            device_type,
        } => {
            let bridge = connect(&cli).await?;
            let covering = WindowCovering::new(bridge.clone(), DeviceConfig::new(mac, device_type));
            println!("Moving {} to {}%...", mac, position);
            match covering.set_target_position(*position).await {
                Ok(()) => println!("Command sent"),
                Err(e) => eprintln!("Error: {}", e),
            }
            print_diagnostics(&bridge).await?;
        }

        Commands::Watch { mac } => {
            let bridge = connect(&cli).await?;
            let filter = match mac {
                Some(mac) => EventFilter::new().mac(mac),
                None => EventFilter::new(),
            };
            let mut events = bridge.router().subscribe_stream(filter);
            println!("Listening on {}... (Press Ctrl+C to stop)\n", bridge.local_addr()?);
            while let Some(event) = events.next().await {
                println!("{}", serde_json::to_string_pretty(&event)?);
            }
        }
    }

    Ok(())
}

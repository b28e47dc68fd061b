use clap::Parser;
use client::input::Pattern;
use client::network::{Client, ClientConfig};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Input samples per second; each sample becomes one move
    #[arg(short = 'r', long, default_value = "60")]
    input_rate: u32,

    /// Autopilot pattern driving the ship
    #[arg(short = 'p', long, value_enum, default_value_t = Pattern::Circle)]
    pattern: Pattern,

    /// Simulated outgoing packet loss in percent
    #[arg(short = 'l', long, default_value = "0")]
    packet_loss: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let input_rate = args.input_rate.max(1);

    let config = ClientConfig {
        input_interval: Duration::from_secs_f64(1.0 / input_rate as f64),
        pattern: args.pattern,
        packet_loss: f64::from(args.packet_loss.min(100)) / 100.0,
    };

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Autopilot: {:?} at {}Hz", config.pattern, input_rate);
    if config.packet_loss > 0.0 {
        info!("Simulating {}% outgoing packet loss", args.packet_loss);
    }

    let mut client = Client::new(&args.server, config).await?;

    client.run().await?;

    Ok(())
}

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay::config::{DEFAULT_ADDR, DEFAULT_BOT_NAME};
use relay::{Gateway, LocalGateway, OverflowPolicy, RelayConfig};

#[derive(Parser)]
#[command(name = "server", about = "TCP chat relay")]
struct Args {
    /// TCP address to listen on
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,

    /// Sender name for bot messages
    #[arg(long, default_value = DEFAULT_BOT_NAME)]
    bot_name: String,

    /// Capacity of each client's outbound queue
    #[arg(long, default_value_t = 256)]
    queue: usize,

    /// What to do when a client's queue is full: drop-newest or disconnect
    #[arg(long, default_value = "drop-newest")]
    overflow: OverflowPolicy,

    /// Print joins, messages, and departures as JSON lines on stdout
    #[arg(long)]
    events: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "relay=info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RelayConfig {
        bot_name: args.bot_name,
        send_buffer: args.queue,
        overflow: args.overflow,
        ..RelayConfig::default()
    }
    .with_addr(args.addr);

    let mut gw: Box<dyn Gateway> = Box::new(LocalGateway::new(config));
    gw.start().await?;

    if let Some(mut events) = gw.events() {
        let echo = args.events;
        tokio::spawn(async move {
            while let Some(ev) = events.recv().await {
                if echo {
                    match serde_json::to_string(&ev) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!(error = %e, "event encode failed"),
                    }
                } else {
                    tracing::debug!(kind = ?ev.kind, creator = %ev.creator, "received event");
                }
            }
        });
    }

    tracing::info!("relay booted");

    // Graceful shutdown on Ctrl-C: close clients, then the listener
    tokio::signal::ctrl_c().await?;
    gw.stop().await;
    Ok(())
}

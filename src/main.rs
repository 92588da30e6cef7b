//! CLI for tcp-broadcast
//!
//! Subcommands:
//! - `server`: run the broker until Ctrl-C
//! - `client`: connect, log what arrives on the subscribed channels and
//!   optionally publish one message

use clap::Parser;
use tcp_broadcast::config::load_config;
use tcp_broadcast::transport::message_handler;
use tcp_broadcast::utils::logging;
use tcp_broadcast::{BroadcastClient, BroadcastServer, Message, TcpBroadcastClient, TcpBroadcastServer};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tcp-broadcast")]
enum Command {
    /// Start the broker
    Server {
        /// Environment variable prefix, e.g. `app` reads `APP_BROADCAST_PORT`
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Run a client against a running broker
    Client {
        #[arg(long, default_value = "")]
        prefix: String,
        /// Channel to listen to; repeatable
        #[arg(long)]
        subscribe: Vec<String>,
        /// Channel to publish `--data` to
        #[arg(long, requires = "data")]
        channel: Option<String>,
        /// JSON payload to publish once connected
        #[arg(long, requires = "channel")]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init("info");

    let result = match Command::parse() {
        Command::Server { prefix } => run_server(&prefix).await,
        Command::Client {
            prefix,
            subscribe,
            channel,
            data,
        } => run_client(&prefix, subscribe, channel.zip(data)).await,
    };

    if let Err(e) = result {
        error!("{}", e);
    }
}

async fn run_server(prefix: &str) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config(prefix)?;
    let server = TcpBroadcastServer::new(&settings)?;
    server.on_message(tcp_broadcast::transport::client_message_handler(
        |sender, message| async move {
            info!(
                client = %sender.name,
                id = %message.id,
                channel = message.channel.as_deref().unwrap_or_default(),
                "message received"
            );
        },
    ));
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    Ok(())
}

async fn run_client(
    prefix: &str,
    subscribe: Vec<String>,
    publish: Option<(String, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config(prefix)?;
    let client = TcpBroadcastClient::new(&settings)?;
    info!(name = client.name(), "starting client");

    for channel in subscribe {
        let label = channel.clone();
        client.on_message(
            &channel,
            message_handler(move |message| {
                let label = label.clone();
                async move {
                    info!(channel = %label, id = %message.id, data = %message.data, "received");
                }
            }),
        )?;
    }

    if let Some((channel, data)) = publish {
        let data: serde_json::Value = serde_json::from_str(&data)?;
        client.send_message(Message::channel_message(channel, data))?;
    }

    client.connect();
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    Ok(())
}

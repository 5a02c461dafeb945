use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lgremote::{AcceptMode, IpControlInput, RemoteKey, SessionEvent, TvClient};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::FmtSubscriber;

/// lgremote - Command line remote control for webOS televisions
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Connection string in the format [passphrase@]host[:port]
    #[arg(short, long, value_name = "CONNECTION_STRING")]
    target: Option<String>,

    /// Television hostname or IP address
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Primary channel port
    #[arg(short, long, default_value_t = lgremote::DEFAULT_PORT)]
    port: u16,

    /// Secondary channel passphrase
    #[arg(long)]
    passphrase: Option<String>,

    /// Client key from an earlier pairing
    #[arg(short = 'k', long)]
    client_key: Option<String>,

    /// MAC address used by `on`
    #[arg(long)]
    mac: Option<String>,

    /// Pairing accept mode (never, down-enter, right-enter)
    #[arg(long, default_value = "never")]
    accept: AcceptMode,

    /// Seconds to wait for the television to become ready
    #[arg(long, default_value_t = 30)]
    wait: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print session events until interrupted
    Watch,

    /// Set the volume
    Volume { level: i32 },

    /// Mute, or unmute with --off
    Mute {
        #[arg(long)]
        off: bool,
    },

    /// Switch to a channel number
    Channel { number: i32 },

    /// Show a notification on screen
    Toast { message: String },

    /// Turn the television off
    Off,

    /// Wake the television (needs --mac)
    On,

    /// Press a remote key on the key channel
    Key { key: RemoteKey },

    /// Select an input through the secondary channel (needs a passphrase)
    Input { input: IpControlInput },

    /// Launch an application by id
    App { app_id: String },

    /// Print model and serial number
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Configure logging
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // Initialize the logging subscriber
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let Some(command) = &cli.command else {
        tracing::info!("No command specified. Use --help for usage information.");
        return Ok(());
    };

    let client = build_client(&cli)?;

    match command {
        Commands::On => {
            client.turn_on().await.context("Failed to send wake-on-LAN")?;
            tracing::info!("Wake-on-LAN packet sent");
            return Ok(());
        }
        Commands::Key { key } => {
            client.press_key(*key).await.context("Failed to press key")?;
            tracing::info!("Pressed {:?}", key);
            return Ok(());
        }
        Commands::Input { input } => {
            client
                .ip_control()?
                .switch_input(*input)
                .await
                .context("Failed to switch input")?;
            tracing::info!("Selected input {}", input.as_str());
            client.disconnect().await;
            return Ok(());
        }
        _ => {}
    }

    if let Commands::Watch = command {
        return watch(&client).await;
    }

    client.connect().await;
    client
        .wait_ready(Duration::from_secs(cli.wait))
        .await
        .context("Television did not become ready")?;

    let outcome = run_command(&client, command).await;
    client.disconnect().await;
    outcome
}

fn build_client(cli: &Cli) -> Result<TvClient> {
    let mut builder = TvClient::builder();

    if let Some(target) = &cli.target {
        builder = builder
            .connection_string(target)
            .context("Failed to parse connection string")?;
        tracing::debug!("Using connection string: {}", target);
    } else {
        builder = builder.host(cli.host.clone()).port(cli.port);
    }

    if let Some(passphrase) = &cli.passphrase {
        builder = builder.passphrase(passphrase.clone());
    }
    if let Some(key) = &cli.client_key {
        builder = builder.client_key(key.clone());
    }
    if let Some(mac) = &cli.mac {
        builder = builder.mac_address(mac.clone());
    }

    Ok(builder.accept_mode(cli.accept).build())
}

async fn run_command(client: &TvClient, command: &Commands) -> Result<()> {
    match command {
        Commands::Volume { level } => client.set_volume(*level).await?,
        Commands::Mute { off } => client.set_mute(!off).await?,
        Commands::Channel { number } => client.set_channel(*number).await?,
        Commands::Toast { message } => client.show_toast(message.clone()).await?,
        Commands::Off => client.turn_off().await?,
        Commands::App { app_id } => client.launch_app(app_id.clone()).await?,
        Commands::Info => {
            let info = client.system_info().await?;
            tracing::info!("Model {} serial {}", info.model_name, info.serial_number);
        }
        Commands::Watch | Commands::On | Commands::Key { .. } | Commands::Input { .. } => {}
    }
    Ok(())
}

async fn watch(client: &TvClient) -> Result<()> {
    let mut events = client.events();
    client.connect().await;
    tracing::info!("Watching, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::RawMessage(_)) => {}
                Ok(SessionEvent::ClientKeyChanged(key)) => {
                    tracing::info!("Client key: {} (pass it with --client-key)", key);
                }
                Ok(event) => tracing::info!("{:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Received interrupt signal, disconnecting...");
    client.disconnect().await;
    Ok(())
}

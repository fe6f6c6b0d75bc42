//! Binary entrypoint for the rfbridge CLI.
//!
//! Commands:
//! - `start` - run the bridge until Ctrl-C
//! - `init [--force]` - write a starter `config.toml`
//! - `send <device> <on|off|dim> [--brightness <0-255>]` - send one command and exit
//! - `listen` - print every inbound gateway event as a JSON line
//!
//! See the library crate docs for module-level details: `rfbridge::`.
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use rfbridge::bridge::{Bridge, ConnectionState, DeviceKind};
use rfbridge::config::Config;

#[derive(Parser)]
#[command(name = "rfbridge")]
#[command(about = "Bridge between an RF gateway and logical devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge
    Start,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Send one command to a device, with its configured repetitions
    Send {
        /// Device id, e.g. newkaku_0000c6c2_1
        device: String,
        action: Action,
        /// Brightness for `dim`, 0-255
        #[arg(short, long)]
        brightness: Option<u8>,
    },
    /// Print inbound gateway events as JSON lines until interrupted
    Listen,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Action {
    On,
    Off,
    Dim,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            init_logging(&None, cli.verbose);
            if !force && tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                return Err(anyhow!(
                    "{} already exists, use --force to overwrite",
                    cli.config
                ));
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Start => {
            let config = load_config(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting rfbridge v{}", env!("CARGO_PKG_VERSION"));
            let mut bridge = Bridge::new(config)?;
            bridge.run().await?;
        }
        Commands::Send {
            device,
            action,
            brightness,
        } => {
            let mut config = load_config(&cli.config).await?;
            config.bridge.automatic_add = false;
            config.bridge.stats_interval_secs = 0;
            init_logging(&Some(config.clone()), cli.verbose);
            let mut bridge = Bridge::new(config)?;
            bridge.start().await?;
            let result = send_once(&bridge, &device, action, brightness).await;
            bridge.shutdown().await;
            result?;
        }
        Commands::Listen => {
            let mut config = load_config(&cli.config).await?;
            config.bridge.automatic_add = false;
            init_logging(&Some(config.clone()), cli.verbose);
            let mut bridge = Bridge::new(config)?;
            let mut events = bridge.subscribe_events();
            bridge.start().await?;
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => println!("{}", serde_json::to_string(&event)?),
                        Err(RecvError::Lagged(n)) => warn!("listener fell behind, {} events skipped", n),
                        Err(RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received shutdown signal");
                        break;
                    }
                }
            }
            bridge.shutdown().await;
        }
    }

    Ok(())
}

async fn load_config(path: &str) -> Result<Config> {
    let config = Config::load(path).await?;
    config.validate()?;
    Ok(config)
}

async fn send_once(
    bridge: &Bridge,
    device_id: &str,
    action: Action,
    brightness: Option<u8>,
) -> Result<()> {
    let timeout = bridge.config().gateway.connect_timeout();
    tokio::time::timeout(
        timeout,
        bridge.context().wait_for_state(ConnectionState::Connected),
    )
    .await
    .map_err(|_| anyhow!("gateway not connected within {:?}", timeout))?;

    let device = match bridge.device(device_id) {
        Some(device) => device,
        None => bridge.add_device(
            bridge
                .config()
                .device_defaults
                .settings_for(device_id, DeviceKind::Light),
        ),
    };
    let switch = device
        .as_switchable()
        .ok_or_else(|| anyhow!("{} is a sensor and takes no commands", device_id))?;

    match action {
        Action::On => switch.turn_on().await?,
        Action::Off => switch.turn_off().await?,
        Action::Dim => {
            let brightness =
                brightness.ok_or_else(|| anyhow!("dim needs --brightness <0-255>"))?;
            switch.dim(brightness).await?
        }
    }

    // Let queued repetitions go out before the link is closed.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while switch.dispatcher().pending_repeats() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    info!("sent {:?} to {}", action, device_id);
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when someone is watching
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

//! Adafruit IO MQTT command line client
//!
//! Publishes a value to a feed or topic, watches feeds until Ctrl-C, or
//! prints the effective configuration.

use adafruit_io_mqtt::config::{qos_from_level, ClientConfig, ConfigError};
use adafruit_io_mqtt::observability::{init_default_logging, mqtt_span};
use adafruit_io_mqtt::{AdafruitMqttClient, ConnectionMode, ReceivedMessageEventArgs};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn, Instrument};

/// Adafruit IO MQTT client
#[derive(Parser)]
#[command(name = "adafruit-io-mqtt")]
#[command(about = "Publish to and subscribe to Adafruit IO feeds over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ADAFRUIT_IO_CONFIG")]
    config: Option<PathBuf>,

    /// Connect over WebSocket instead of TCP
    #[arg(long, global = true)]
    websocket: bool,

    /// Connect without TLS
    #[arg(long, global = true)]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one value
    Publish {
        #[command(flatten)]
        target: PublishTarget,

        /// Value to publish
        value: String,

        /// QoS level (0, 1 or 2), defaults to the configured level
        #[arg(long)]
        qos: Option<u8>,

        /// Ask the broker to retain the value
        #[arg(long)]
        retain: bool,
    },
    /// Print messages from feeds or topics until Ctrl-C
    Subscribe {
        /// Feed key to watch (repeatable)
        #[arg(long = "feed", value_name = "FEED_KEY")]
        feeds: Vec<String>,

        /// Raw topic filter to watch (repeatable)
        #[arg(long = "topic", value_name = "TOPIC")]
        topics: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        format: OutputFormat,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct PublishTarget {
    /// Feed key to publish to
    #[arg(long)]
    feed: Option<String>,

    /// Raw topic to publish to
    #[arg(long)]
    topic: Option<String>,
}

/// Output formatting options
#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Color-coded, human-readable with timestamps (default)
    Pretty,
    /// Single line per message, minimal formatting
    Compact,
    /// JSON line per message for programmatic processing
    Json,
}

const RESET: &str = "\x1b[0m";
const FEED_COLOR: &str = "\x1b[1;32m";
const TOPIC_COLOR: &str = "\x1b[1;36m";

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Publish {
            target,
            value,
            qos,
            retain,
        } => publish(config, target, value, qos, retain).await,
        Commands::Subscribe {
            feeds,
            topics,
            format,
        } => subscribe(config, feeds, topics, format).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

/// Explicit file, then default locations, then environment variables
fn load_configuration(cli: &Cli) -> Result<ClientConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientConfig::load_from_file(path)?
        }
        None => {
            let default_path = ["adafruit.toml", "config/adafruit.toml"]
                .into_iter()
                .map(PathBuf::from)
                .find(|path| path.exists());

            match default_path {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    ClientConfig::load_from_file(&path)?
                }
                None => {
                    info!("No configuration file found, using environment variables");
                    ClientConfig::from_env()?
                }
            }
        }
    };

    if cli.websocket {
        config.connection.mode = ConnectionMode::WebSocket;
    }
    if cli.insecure {
        config.connection.secure = false;
    }
    Ok(config)
}

async fn connected_client(
    config: ClientConfig,
) -> Result<AdafruitMqttClient, Box<dyn std::error::Error>> {
    let mut client = AdafruitMqttClient::from_config(config)?;
    client.on_disconnected(|args| {
        if args.client_was_connected {
            warn!(reason = %args.reason, "Connection to Adafruit IO lost");
        }
    });
    client.init_from_config()?;
    client.connect().await?;
    Ok(client)
}

async fn publish(
    config: ClientConfig,
    target: PublishTarget,
    value: String,
    qos: Option<u8>,
    retain: bool,
) -> CliResult {
    let qos = match qos {
        Some(level) => {
            qos_from_level(level).ok_or_else(|| format!("qos must be 0, 1 or 2, got {level}"))?
        }
        None => config.qos(),
    };

    let mut client = connected_client(config).await?;
    let topic = match (target.feed, target.topic) {
        (Some(feed), _) => client.topic_for_feed(&feed),
        (None, Some(topic)) => topic,
        (None, None) => return Err("either --feed or --topic is required".into()),
    };

    let span = mqtt_span!(topic = %topic, ?qos, retain);
    let result = client
        .publish_topic_with(&topic, value, qos, retain)
        .instrument(span)
        .await?;

    if result.is_success() {
        println!("Published to {topic}");
    } else {
        warn!(?result, "Publish was not acknowledged");
    }

    client.disconnect().await?;
    Ok(())
}

async fn subscribe(
    config: ClientConfig,
    feeds: Vec<String>,
    topics: Vec<String>,
    format: OutputFormat,
) -> CliResult {
    if feeds.is_empty() && topics.is_empty() {
        return Err("nothing to subscribe to: pass --feed or --topic".into());
    }

    let mut client = connected_client(config).await?;
    let username = client.username().to_string();
    client.on_message_received(move |message| {
        println!("{}", format_message(message, &username, format));
    });

    let mut filters: Vec<String> = feeds
        .iter()
        .map(|feed| client.topic_for_feed(feed))
        .collect();
    filters.extend(topics);

    for filter in &filters {
        let span = mqtt_span!(topic = %filter);
        let result = client.subscribe_topic(filter).instrument(span).await?;
        if result.is_success() {
            println!("Subscribed to {filter}");
        } else {
            warn!(?result, "Subscription was not granted");
        }
    }

    println!("Press Ctrl+C to stop");
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");

    if client.is_connected() {
        client.unsubscribe_topics(&filters).await?;
    }
    client.disconnect().await?;
    Ok(())
}

fn format_message(
    message: &ReceivedMessageEventArgs,
    username: &str,
    format: OutputFormat,
) -> String {
    let timestamp = chrono::Utc::now().format("%H:%M:%S");
    let payload = match message.payload_str() {
        Some(text) => text.to_string(),
        None => format!("<{} bytes>", message.payload.len()),
    };
    let feed = message.feed_key(username);

    match format {
        OutputFormat::Json => {
            let json_output = serde_json::json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "topic": message.topic,
                "feed": feed,
                "payload": payload,
                "retain": message.retain,
            });
            serde_json::to_string(&json_output).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Compact => format!(
            "{} {} {}",
            timestamp,
            feed.unwrap_or(&message.topic),
            payload.replace('\n', " ").trim()
        ),
        OutputFormat::Pretty => match feed {
            Some(feed) => format!("{FEED_COLOR}[{feed}]{RESET} {timestamp}\n{payload}"),
            None => format!("{TOPIC_COLOR}[{}]{RESET} {timestamp}\n{payload}", message.topic),
        },
    }
}

fn handle_config_command(config: &ClientConfig, show: bool) -> CliResult {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

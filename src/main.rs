use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use log::{LevelFilter, info};
use mac_address::MacAddress;

use crate::adapter::btle::BtleAdapter;
use crate::indicator::{LogIndicator, StatusIndicator, SysfsLed};
use crate::report::LogReporter;

mod adapter;
mod advertisement;
mod bms;
mod config;
mod filter;
mod indicator;
mod manager;
mod messages;
mod mqtt;
mod report;
mod scanner;
mod session;

const DEFAULT_CONFIG: &str = "config.toml";

/// Scan for a BLE battery management system and poll its status.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file. Built-in defaults are used when the default file
    /// does not exist.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connect to this device instead of only reporting matches.
    #[arg(long, value_name = "MAC")]
    target_mac: Option<MacAddress>,

    /// More logging. Repeat for trace output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn load_config(cli: &Cli) -> anyhow::Result<config::AppConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG);
            if !path.exists() {
                info!("No {DEFAULT_CONFIG} found, using defaults");
                return Ok(config::AppConfig::default());
            }
            path
        }
    };

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::de::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(&cli)?;
    if let Some(mac) = cli.target_mac {
        config.target.get_or_insert_with(Default::default).mac = Some(mac);
    }

    let mqtt = config.mqtt.as_ref().map(|mqtt_config| {
        let (client, eventloop) = mqtt::MqttClient::new(mqtt_config);
        tokio::spawn(mqtt::MqttClient::event_loop(eventloop));
        client
    });

    let indicator: Box<dyn StatusIndicator> =
        match config.indicator.as_ref().and_then(|i| i.led.as_deref()) {
            Some(led) => Box::new(SysfsLed::new(led)),
            None => Box::new(LogIndicator),
        };

    let adapter = BtleAdapter::probe().await;

    let mut core = manager::Manager::new(adapter, indicator, (LogReporter, mqtt), &config);
    core.run_loop().await;

    Ok(())
}

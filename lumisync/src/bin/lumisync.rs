use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lumisync::link::{LinkManager, PortProvider, SystemPorts};
use lumisync::protocol::lookup_model;
use lumisync::{ColorSource, Config, Rgb8, Session};
use tracing::{info, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "lumisync", version, about = "Ambient lighting for serial LED strips")]
struct Args {
    /// Base log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Settings file (.yaml, .yml or .json).
    #[arg(long, short, default_value = "lumisync.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List candidate serial ports.
    Ports,
    /// Handshake every candidate port and bit rate and print what answers.
    Probe,
    /// Stream a color source to the device until Ctrl-C.
    Run {
        /// Overrides the source from the settings file.
        #[arg(long, value_enum)]
        source: Option<SourceKind>,

        /// Color for `solid` and `breathing`, as RRGGBB.
        #[arg(long, default_value = "FF8020")]
        color: String,

        /// Take zone counts from the model table of the first device found.
        #[arg(long)]
        auto_layout: bool,

        /// Write the effective settings back to the settings file.
        #[arg(long)]
        save: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceKind {
    Off,
    Solid,
    Rainbow,
    Breathing,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    common::log_setup::setup_logging(&args.log_level, &args.log_dir)?;

    let config = Config::load_or_default(&args.config)?;
    match args.command {
        Command::Ports => list_ports(),
        Command::Probe => probe(&config),
        Command::Run {
            source,
            color,
            auto_layout,
            save,
        } => {
            let mut config = config;
            if let Some(kind) = source {
                let color = Rgb8::from_hex(&color)
                    .with_context(|| format!("Invalid color '{}', expected RRGGBB", color))?;
                config.source = match kind {
                    SourceKind::Off => ColorSource::Off,
                    SourceKind::Solid => ColorSource::Solid { color },
                    SourceKind::Rainbow => ColorSource::rainbow(),
                    SourceKind::Breathing => ColorSource::breathing(color),
                };
            }
            if auto_layout {
                detect_layout(&mut config)?;
            }
            if save {
                config.save(&args.config)?;
                info!("Settings written to {}", args.config.display());
            }
            run(config).await
        }
    }
}

fn list_ports() -> Result<()> {
    let ports = SystemPorts.candidates().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn probe(config: &Config) -> Result<()> {
    let link = LinkManager::new(SystemPorts, config.link.clone());
    let found = link.scan()?;
    if found.is_empty() {
        println!("No LED device answered");
    }
    for result in found {
        let layout = lookup_model(&result.identity.model, &config.link.models);
        println!(
            "{} @ {} baud: {} {:?} layout: {:?}",
            result.path, result.baud, result.identity.model, result.identity.fields, layout
        );
    }
    Ok(())
}

/// Points the link at the first known device and adopts its layout.
fn detect_layout(config: &mut Config) -> Result<()> {
    let link = LinkManager::new(SystemPorts, config.link.clone());
    for result in link.scan()? {
        let Some(layout) = lookup_model(&result.identity.model, &config.link.models) else {
            warn!("Unknown model '{}' on {}", result.identity.model, result.path);
            continue;
        };
        info!(
            "Using {} on {} at {} baud: {:?}",
            result.identity.model, result.path, result.baud, layout
        );
        config.apply_layout(layout);
        config.link.port = Some(result.path);
        config.link.baud_rate = Some(result.baud);
        return Ok(());
    }
    bail!("No device with a known layout found")
}

async fn run(config: Config) -> Result<()> {
    let zones = config.zones.total();
    let source = config.source;
    let mut frame_timer = tokio::time::interval(config.frame_interval());
    let mut tick_timer = tokio::time::interval(TICK_INTERVAL);
    frame_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut session = Session::open(config)?;
    let started = Instant::now();
    let mut last_status = session.status();
    info!("Streaming {} to {} zones, Ctrl-C to stop", source, zones);

    loop {
        tokio::select! {
            _ = frame_timer.tick() => {
                let elapsed = started.elapsed();
                session.push_colors(source.render(zones, elapsed), elapsed);
            }
            _ = tick_timer.tick() => {
                session.tick();
                let status = session.status();
                if status != last_status {
                    info!("Status: {:?}", status);
                    last_status = status;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    session.stop();
    let stats = session.stats();
    info!(
        "Sent {} packets ({} bytes), {} deduplicated, {} dropped, {} write errors, {} reconnects",
        stats.packets_sent,
        stats.bytes_sent,
        stats.frames_deduplicated,
        stats.frames_dropped,
        stats.write_errors,
        stats.reconnects
    );
    Ok(())
}

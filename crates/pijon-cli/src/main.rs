use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use pijon_core::config::PijonConfig;
use pijon_device::{FeedError, FeederController};
use pijon_transport::{LoopbackTransport, MqttTransport, Transport};

mod commands;

use commands::{parse_line, Command, HELP};

/// Remote control for the Pijon pet feeder.
#[derive(Debug, Parser)]
#[command(name = "pijon", version, about)]
struct Cli {
    /// Path to pijon.toml (falls back to $PIJON_CONFIG, then ~/.pijon/pijon.toml).
    #[arg(long)]
    config: Option<String>,

    /// Use an in-process bus instead of the MQTT broker; device traffic is
    /// simulated with the `heartbeat` and `ack` commands.
    #[arg(long)]
    loopback: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pijon=info,pijon_device=info,pijon_scheduler=info,pijon_transport=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // load config: --config > PIJON_CONFIG > ~/.pijon/pijon.toml, env overrides on top
    let config = PijonConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        PijonConfig::default()
    });

    let loopback = cli.loopback.then(|| Arc::new(LoopbackTransport::new()));
    let transport: Arc<dyn Transport> = match &loopback {
        Some(bus) => bus.clone(),
        None => Arc::new(MqttTransport::connect(&config.broker)?),
    };
    info!(transport = transport.name(), "transport ready");

    let controller = FeederController::start(&config, Arc::clone(&transport))?;

    // Report liveness transitions as they happen.
    let mut state_rx = controller.watch_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            println!("device {}: {}", state.label(), state.detail());
        }
    });

    println!("{HELP}");
    run_session(
        BufReader::new(tokio::io::stdin()),
        &controller,
        loopback.as_deref(),
        &config,
    )
    .await;

    controller.shutdown();
    transport.disconnect().await?;
    Ok(())
}

/// Read and run commands until `quit`, end of input, a read error or Ctrl-C.
/// Command failures are printed and the session carries on.
async fn run_session<R: AsyncBufRead + Unpin>(
    input: R,
    controller: &FeederController,
    loopback: Option<&LoopbackTransport>,
    config: &PijonConfig,
) {
    let mut lines = input.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "input read failed, shutting down");
                        break;
                    }
                };
                match parse_line(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(cmd)) => {
                        if let Err(e) = execute(controller, loopback, config, cmd) {
                            println!("error: {e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }
}

fn execute(
    controller: &FeederController,
    loopback: Option<&LoopbackTransport>,
    config: &PijonConfig,
    cmd: Command,
) -> anyhow::Result<()> {
    match cmd {
        Command::Feed(portion) => match controller.feed_now(portion) {
            Ok(command) => println!("sent {command}, waiting for device"),
            Err(FeedError::Blocked { reason }) => {
                println!("{}: {reason}", controller.trigger_label())
            }
            Err(e) => println!("feed failed: {e}"),
        },
        Command::Schedule { time, portion } => match controller.add_schedule(time, portion) {
            Ok(rec) => println!(
                "scheduled {} at {} ({}) id={}",
                rec.portion,
                rec.time,
                rec.fire_at.format("%a %d %b %H:%M"),
                rec.id
            ),
            Err(e) => println!("schedule failed: {e}"),
        },
        Command::Unschedule(id) => match controller.remove_schedule(&id) {
            Some(rec) => println!("removed {} at {}", rec.portion, rec.time),
            None => println!("no pending schedule {id}"),
        },
        Command::List { json: true } => {
            println!("{}", serde_json::to_string_pretty(&controller.schedules())?)
        }
        Command::List { json: false } => {
            let schedules = controller.schedules();
            if schedules.is_empty() {
                println!("No schedules yet.");
            }
            for rec in schedules {
                println!("{}  {:<6}  {}", rec.time, rec.portion, rec.id);
            }
        }
        Command::Status { json: true } => {
            println!("{}", serde_json::to_string_pretty(&controller.snapshot())?)
        }
        Command::Status { json: false } => {
            let state = controller.connection_state();
            println!("device:  {} ({})", state.label(), state.detail());
            println!("trigger: {}", controller.trigger_label());
            if let Some(err) = controller.last_error() {
                println!("error:   {err}");
            }
            println!("pending: {}", controller.schedules().len());
        }
        Command::Heartbeat => match loopback {
            Some(bus) => {
                bus.deliver(&config.topics.status, "alive");
            }
            None => println!("heartbeat is only available with --loopback"),
        },
        Command::Ack(payload) => match loopback {
            Some(bus) => {
                bus.deliver(&config.topics.ack, &payload);
            }
            None => println!("ack is only available with --loopback"),
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

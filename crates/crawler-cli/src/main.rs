//! `crawler` – command line entry point for the steering stack.
//!
//! | Subcommand | Effect |
//! |---|---|
//! | `run` (default) | Drive the pipeline from the simulated camera until Ctrl-C or `--duration-secs`. |
//! | `check` | Validate the effective configuration and print it. |
//! | `schema` | Print the JSON Schemas of the outbound wire messages. |
//! | `init` | Write a default configuration file. |
//!
//! Configuration comes from `--config`, else `~/.crawler/config.toml`, else
//! built-in defaults, with `CRAWLER_*` environment overrides on top.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use crawler_hal::{SimCamera, SimScene};
use crawler_middleware::{EventBus, Topic, TopicReceiver};
use crawler_perception::{PerceptionBackend, UnavailableBackend};
use crawler_runtime::{
    BuilderKind, BusSink, FileLogSink, Pipeline, PipelineConfig, PipelineReport, TeeLogSink, TracingLogSink,
    init_tracing,
};
use crawler_types::{CommandMessage, CommandVerb, CrawlerError, Event, EventPayload, wire_schemas};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crawler", author, version, about = "Camera-driven steering for a crawler robot")]
struct Cli {
    /// Configuration file. Defaults to ~/.crawler/config.toml.
    #[arg(long, global = true, env = "CRAWLER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the pipeline against the simulated camera.
    Run {
        /// What the simulated camera sees.
        #[arg(long, value_enum, default_value_t = SceneArg::Open)]
        scene: SceneArg,
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Validate the configuration and print the effective values.
    Check,
    /// Print JSON Schemas of the command and group messages.
    Schema,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SceneArg {
    Open,
    Obstacle,
    Dark,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing("crawler");

    let result = match cli.command.unwrap_or(Cmd::Run {
        scene: SceneArg::Open,
        duration_secs: None,
    }) {
        Cmd::Run { scene, duration_secs } => run(cli.config, scene, duration_secs),
        Cmd::Check => check(cli.config),
        Cmd::Schema => schema(),
        Cmd::Init { force } => init(cli.config, force),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn run(config_path: Option<PathBuf>, scene: SceneArg, duration_secs: Option<u64>) -> Result<(), CrawlerError> {
    let (cfg, origin) = config::resolve(config_path.as_deref())?;
    // Geometry errors are fatal here, before anything starts.
    let pipeline = Pipeline::new(cfg)?;
    let cfg = pipeline.config().clone();

    print_banner();
    println!("  Config: {}", origin.to_string().bold());
    println!(
        "  Robot {} · builder {:?} · strategy {:?} · {} fps\n",
        cfg.robot_id.bold(),
        cfg.builder,
        cfg.strategy,
        cfg.fps
    );

    let bus = EventBus::new(256);
    let cancel = CancellationToken::new();

    let ctrlc_cancel = cancel.clone();
    let ctrlc_bus = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the pipeline …".yellow().bold());
        let stop = Event::new(
            "crawler-cli",
            EventPayload::Fault {
                component: "cli".to_string(),
                message: "operator stop".to_string(),
            },
        );
        let _ = ctrlc_bus.publish_to(Topic::SystemAlerts, stop);
        ctrlc_cancel.cancel();
    }) {
        warn!(error = %e, "Ctrl-C handler not installed; use --duration-secs to stop");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CrawlerError::Channel(format!("tokio runtime: {e}")))?;

    let report = runtime.block_on(async move {
        if let Some(secs) = duration_secs {
            let stopper = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                info!(secs, "run duration elapsed");
                stopper.cancel();
            });
        }

        // Subscribed before the pipeline starts and stopped after it, so every
        // command has a receiver.
        let echo_done = CancellationToken::new();
        let echo = tokio::spawn(echo_commands(bus.subscribe_to(Topic::Commands), echo_done.clone()));

        let (w, h) = cfg.frame_size();
        let camera = SimCamera::new("sim_front", w as u32, h as u32).with_scene(match scene {
            SceneArg::Open => SimScene::Open,
            SceneArg::Obstacle => SimScene::Obstacle {
                start_col: 0,
                end_col: w as u32 / 3,
            },
            SceneArg::Dark => SimScene::Dark,
        });

        if cfg.builder == BuilderKind::DepthFusion {
            warn!("no perception models are linked; every tick will use the unknown cost field");
        }
        let backend: Arc<dyn PerceptionBackend> = Arc::new(UnavailableBackend);

        let log_file = FileLogSink::open(cfg.log_file()).await?;
        println!("  Telemetry log: {}\n", log_file.path().display().to_string().dimmed());
        let logs = TeeLogSink::new()
            .with(log_file)
            .with(TracingLogSink)
            .with(BusSink::new(bus.clone()));

        let report = pipeline
            .run(camera, backend, Arc::new(BusSink::new(bus)), Box::new(logs), cancel)
            .await;
        echo_done.cancel();
        let _ = echo.await;
        report
    })?;

    print_report(&report);
    Ok(())
}

async fn echo_commands(mut rx: TopicReceiver, done: CancellationToken) {
    println!(
        "  {:<16} {:>6} {:>6}  {}",
        "CMD".bold(),
        "VALUE".bold(),
        "ANGLE".bold(),
        "NARROW".bold()
    );
    loop {
        let event = tokio::select! {
            _ = done.cancelled() => break,
            e = rx.recv() => e,
        };
        match event {
            Some(Event {
                payload: EventPayload::Command(msg),
                ..
            }) => println!("{}", echo_line(&msg)),
            Some(_) => {}
            None => break,
        }
    }
}

fn echo_line(msg: &CommandMessage) -> String {
    let verb = format!("{:<16}", msg.cmd.as_str());
    let verb = match msg.cmd {
        CommandVerb::Stop => verb.red().bold(),
        CommandVerb::TurnRight180 | CommandVerb::Backward => verb.yellow().bold(),
        CommandVerb::SlowForward => verb.yellow(),
        CommandVerb::Forward => verb.green(),
        CommandVerb::Left | CommandVerb::Right => verb.cyan(),
    };
    let value = msg.value.first().copied().unwrap_or(0.0);
    let narrow = if msg.is_narrow { "yes".yellow() } else { "no".dimmed() };
    format!("  {verb} {value:>6.2} {:>6}  {narrow}", msg.angle)
}

fn print_report(report: &PipelineReport) {
    println!();
    println!("{}", "  Run summary".bold());
    println!("    frames acquired    {}", report.frames_acquired);
    println!("    frames processed   {}", report.frames_processed);
    println!("    frames shed        {}", report.frames_shed);
    println!("    commands sent      {}", report.commands_dispatched.to_string().green());
    if report.dispatch_failures > 0 {
        println!("    dispatch failures  {}", report.dispatch_failures.to_string().red());
    }
    if report.safe_stops > 0 {
        println!("    safe stops         {}", report.safe_stops.to_string().yellow());
    }
    if report.reconnects > 0 {
        println!("    reconnects         {}", report.reconnects);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// check / schema / init
// ─────────────────────────────────────────────────────────────────────────────

fn check(config_path: Option<PathBuf>) -> Result<(), CrawlerError> {
    let (cfg, origin) = config::resolve(config_path.as_deref())?;
    cfg.validate()?;
    let (w, h) = cfg.frame_size();
    let corridor = cfg.corridor_params();
    println!("{} {}", "✓".green().bold(), origin);
    println!(
        "  frame {w}x{h}, corridor width {} stride {} bias {}",
        corridor.width, corridor.stride, corridor.bias_weight
    );
    println!();
    print!("{}", render_toml(&cfg)?);
    Ok(())
}

fn schema() -> Result<(), CrawlerError> {
    let schemas: serde_json::Map<String, serde_json::Value> = wire_schemas()
        .into_iter()
        .map(|(name, schema)| {
            serde_json::to_value(schema)
                .map(|v| (name.to_string(), v))
                .map_err(|e| CrawlerError::Serialization(e.to_string()))
        })
        .collect::<Result<_, _>>()?;
    let text = serde_json::to_string_pretty(&schemas).map_err(|e| CrawlerError::Serialization(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn init(config_path: Option<PathBuf>, force: bool) -> Result<(), CrawlerError> {
    let path = config_path.unwrap_or_else(config::config_path);
    if path.exists() && !force {
        return Err(CrawlerError::InvalidConfig(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    config::save_to(&PipelineConfig::default(), &path)?;
    println!("{} wrote {}", "✓".green().bold(), path.display().to_string().bold());
    Ok(())
}

fn render_toml(cfg: &PipelineConfig) -> Result<String, CrawlerError> {
    toml::to_string_pretty(cfg).map_err(|e| CrawlerError::Serialization(e.to_string()))
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                   __         "#.bold().cyan());
    println!("{}", r#"  / __|_ _ __ ___ __ __ | |___ _ _  "#.bold().cyan());
    println!("{}", r#" | (__| '_/ _` \ V  V / | / -_) '_| "#.bold().cyan());
    println!("{}", r#"  \___|_| \__,_|\_/\_/  |_\___|_|   "#.bold().cyan());
    println!();
    println!("  {} {}", "crawler".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Camera-driven steering");
    println!();
}

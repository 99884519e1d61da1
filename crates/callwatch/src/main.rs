//! `callwatch` - CLI for the call-state debouncer
//!
//! This binary feeds call events to the monitor from stdin, replays recorded
//! event streams, and inspects configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use callwatch::cli::{Cli, Command, ConfigCommand, OutputFormat, ReplayCommand, RunCommand};
use callwatch::directory::{self, StudentDirectory};
use callwatch::{
    init_logging, phone, replay, CallEvent, CallMonitor, Config, DuplicateGuard, LogPresenter,
    MonotonicClock,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // `config validate` reports load failures itself
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        handle_validate(file.clone().or_else(|| cli.config.clone()));
        return Ok(());
    }

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Run(cmd) => runtime()?.block_on(handle_run(&config, cmd)),
        Command::Replay(cmd) => runtime()?.block_on(handle_replay(&config, cmd)),
        Command::Normalize(cmd) => {
            for number in &cmd.numbers {
                println!("{}", phone::normalize(Some(number)));
            }
            Ok(())
        }
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

fn load_directory(
    config: &Config,
    fixture: Option<PathBuf>,
) -> anyhow::Result<Box<dyn StudentDirectory>> {
    let mut directory_config = config.directory.clone();
    if fixture.is_some() {
        directory_config.fixture_path = fixture;
    }
    directory::from_config(&directory_config).context("loading student directory")
}

async fn handle_run(config: &Config, cmd: RunCommand) -> anyhow::Result<()> {
    let directory: Arc<dyn StudentDirectory> = Arc::from(load_directory(config, cmd.directory)?);
    let clock = MonotonicClock::new();
    let presenter = DuplicateGuard::new(LogPresenter, clock, config.duplicate_window());

    let (monitor, handle) = CallMonitor::new(config, clock, Box::new(presenter), directory);
    let monitor = tokio::spawn(monitor.run());

    let mut display = handle.display();
    let watcher = tokio::spawn(async move {
        while display.changed().await.is_ok() {
            let current = display.borrow_and_update().clone();
            if let (true, Some(student)) = (current.modal_visible, current.student) {
                info!(
                    student = %student.student_name,
                    parent = %student.parent_name,
                    "caller identified"
                );
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<CallEvent>(line) {
            Ok(event) => handle.submit(event).await?,
            Err(e) => warn!(line = line_number, error = %e, "skipping malformed event"),
        }
    }

    let status = handle.status().await?;
    info!(
        tracked_numbers = status.tracked_numbers,
        lookups_in_flight = status.lookups_in_flight,
        "input closed, stopping monitor"
    );
    drop(handle);
    monitor.await.context("monitor task failed")?;
    watcher.abort();
    Ok(())
}

async fn handle_replay(config: &Config, cmd: ReplayCommand) -> anyhow::Result<()> {
    let directory = load_directory(config, cmd.directory)?;
    let events = replay::read_events(&cmd.file)
        .with_context(|| format!("reading {}", cmd.file.display()))?;

    let report = replay::replay(config, directory.as_ref(), &events).await;
    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            print!("{}", report.render_table());
            if !report.notifications.is_empty() {
                println!();
                println!("Notifications");
                println!("-------------");
                for notice in &report.notifications {
                    println!("{}", serde_json::to_string(notice)?);
                }
            }
        }
    }
    Ok(())
}

fn handle_validate(file: Option<PathBuf>) {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path)) {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => println!("Configuration error: {e}"),
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Debounce]");
                println!(
                    "  Same-state window:   {} ms",
                    config.debounce.same_state_window_ms
                );
                println!(
                    "  State-change window: {} ms",
                    config.debounce.state_change_window_ms
                );
                println!();
                println!("[History]");
                println!(
                    "  Eviction delay:      {} s",
                    config.history.eviction_delay_secs
                );
                println!("  Max age:             {} min", config.history.max_age_minutes);
                println!(
                    "  Sweep interval:      {} s",
                    config.history.sweep_interval_secs
                );
                println!();
                println!("[Notifications]");
                println!(
                    "  Ended clear delay:   {} s",
                    config.notifications.ended_clear_delay_secs
                );
                println!(
                    "  Duplicate window:    {} ms",
                    config.notifications.duplicate_window_ms
                );
                println!();
                println!("[Directory]");
                println!(
                    "  API URL:             {}",
                    config.directory.api_url.as_deref().unwrap_or("(not set)")
                );
                println!(
                    "  Token:               {}",
                    if config.directory.token.is_some() { "(set)" } else { "(not set)" }
                );
                println!(
                    "  Request timeout:     {} s",
                    config.directory.request_timeout_secs
                );
                println!(
                    "  Fixture:             {}",
                    config
                        .directory
                        .fixture_path
                        .as_ref()
                        .map_or_else(|| "(not set)".to_string(), |p| p.display().to_string())
                );
                println!();
                println!("[Service]");
                println!("  Queue capacity:      {}", config.service.queue_capacity);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => handle_validate(file),
    }
    Ok(())
}

//! Interactive operator console.
//!
//! The main thread reads stdin lines and turns them into monitor commands.
//! Two helper threads run beside it: one prints events, one logs status.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use guardian_monitor::{Monitor, MonitorEvent, MonitorHandle};

use crate::display;
use crate::Cli;

const EVENT_POLL: Duration = Duration::from_millis(250);

/// A line typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Clear the alarm
    Reset,
    /// Zero the step counter
    Steps,
    /// Set a new step target (validated by the monitor)
    Target(String),
    /// Print the current status table
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "reset" | "clear" => Self::Reset,
            "steps" => Self::Steps,
            "target" => match words.next() {
                Some(value) => Self::Target(value.to_string()),
                None => bail!("usage: target <n>"),
            },
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => bail!("unknown command `{other}` (try `help`)"),
        };
        Ok(Some(command))
    }
}

const HELP: &str = "\
  reset        clear the active alarm and send SAFE
  steps        reset the step counter
  target <n>   set the step target
  status       show the current status
  quit         stop monitoring";

/// Start the monitor and run the console until `quit` or end of input.
pub fn run(cli: Cli) -> Result<()> {
    let config = cli.monitor_config()?;
    let mut handle = Monitor::start(config).context("Failed to start monitor")?;

    println!(
        "{} listening on {} (alerts to port {})",
        "guardian".bold().green(),
        handle.local_addr().to_string().cyan(),
        handle.config().alert.command_port,
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let events = handle.events();
    let json = cli.json;
    let event_shutdown = Arc::clone(&shutdown);
    let printer = thread::Builder::new()
        .name("guardian-events".to_string())
        .spawn(move || loop {
            match events.recv_timeout(EVENT_POLL) {
                Ok(event) => print_event(&event, json),
                Err(RecvTimeoutError::Timeout) if !event_shutdown.load(Ordering::Relaxed) => {}
                Err(_) => break,
            }
        })
        .context("Failed to spawn event printer")?;

    let (stop_ticker, ticker_rx) = mpsc::channel::<()>();
    let ticker = if cli.status_secs > 0 {
        let snapshots = handle.snapshots();
        let period = Duration::from_secs(cli.status_secs);
        Some(
            thread::Builder::new()
                .name("guardian-status".to_string())
                .spawn(move || {
                    while let Err(RecvTimeoutError::Timeout) = ticker_rx.recv_timeout(period) {
                        display::log_status(&snapshots.get());
                    }
                })
                .context("Failed to spawn status ticker")?,
        )
    } else {
        None
    };

    let result = read_commands(&handle);

    handle.stop();
    drop(stop_ticker);
    shutdown.store(true, Ordering::Relaxed);
    if let Some(ticker) = ticker {
        let _ = ticker.join();
    }
    let _ = printer.join();

    let stats = handle.ingress_stats();
    tracing::info!(
        received = stats.received,
        accepted = stats.accepted,
        malformed = stats.malformed,
        dropped = stats.dropped,
        "Session finished"
    );
    result
}

fn read_commands(handle: &MonitorHandle) -> Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{} {e}", "error:".red());
                continue;
            }
        };

        match command {
            ConsoleCommand::Reset => {
                handle.manual_reset()?;
                println!("{}", "Alarm cleared".green());
            }
            ConsoleCommand::Steps => {
                handle.reset_steps()?;
                println!("Step counter reset");
            }
            ConsoleCommand::Target(value) => match handle.set_step_target(&value) {
                Ok(target) => println!("Step target set to {target}"),
                Err(e) => eprintln!("{} {e} (keeping the current target)", "error:".red()),
            },
            ConsoleCommand::Status => {
                println!("{}", display::status_table(&handle.snapshot(), &handle.ingress_stats()));
            }
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => break,
        }
    }
    Ok(())
}

fn print_event(event: &MonitorEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Cannot serialize event"),
        }
    } else {
        println!("{}", display::event_line(event));
    }
}

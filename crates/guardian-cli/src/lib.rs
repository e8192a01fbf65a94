//! Guardian operator console
//!
//! Starts a monitor, prints its events, logs periodic status and reads
//! operator commands from stdin.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port 5555, alerts go to the device's port 5556
//! guardian
//!
//! # Custom ports and a step goal, events as JSON lines
//! guardian --port 6000 --command-port 6001 --step-target 5000 --json
//!
//! # Load tuning from a file, flags still win
//! guardian --config monitor.json --status-secs 0
//! ```
//!
//! Console commands: `reset`, `steps`, `target <n>`, `status`, `help`, `quit`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use guardian_monitor::{parse_port, parse_step_target, MonitorConfig};

pub mod console;
pub mod display;

/// Guardian fall / SOS monitor
#[derive(Parser, Debug)]
#[command(name = "guardian")]
#[command(author, version, about = "Real-time fall and SOS monitoring for a UDP wearable")]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the listener to
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on for sensor datagrams
    #[arg(short, long, value_parser = port_arg)]
    pub port: Option<u16>,

    /// Device port that receives ALERT / SAFE commands
    #[arg(long, value_parser = port_arg)]
    pub command_port: Option<u16>,

    /// Daily step goal
    #[arg(short, long, value_parser = step_target_arg)]
    pub step_target: Option<u64>,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    pub json: bool,

    /// Seconds between status log lines (0 disables)
    #[arg(long, default_value = "5")]
    pub status_secs: u64,
}

fn port_arg(s: &str) -> std::result::Result<u16, String> {
    parse_port(s).map_err(|e| e.to_string())
}

fn step_target_arg(s: &str) -> std::result::Result<u64, String> {
    parse_step_target(s).map_err(|e| e.to_string())
}

impl Cli {
    /// Resolve the effective configuration: file (or defaults), then flags.
    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::from_json(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => MonitorConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.listener.bind_addr = bind.clone();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(port) = self.command_port {
            config.alert.command_port = port;
        }
        if let Some(target) = self.step_target {
            config.motion.step_target = Some(target);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "guardian",
            "--port",
            "6000",
            "--command-port",
            "6001",
            "--step-target",
            "2500",
            "--json",
        ]);
        let config = cli.monitor_config().unwrap();
        assert_eq!(config.listener.port, 6000);
        assert_eq!(config.alert.command_port, 6001);
        assert_eq!(config.motion.step_target, Some(2500));
        assert!(cli.json);
        assert_eq!(cli.status_secs, 5);
    }

    #[test]
    fn bad_operator_values_are_rejected_at_parse() {
        assert!(Cli::try_parse_from(["guardian", "--port", "abc"]).is_err());
        assert!(Cli::try_parse_from(["guardian", "--port", "0"]).is_err());
        assert!(Cli::try_parse_from(["guardian", "--step-target", "-5"]).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["guardian", "--config", "/nonexistent/guardian.json"]);
        assert!(cli.monitor_config().is_err());
    }
}

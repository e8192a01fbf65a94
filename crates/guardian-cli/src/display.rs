//! Human-readable rendering of events and status.

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use guardian_monitor::{GeoPoint, IngressStats, MonitorEvent, SessionSnapshot};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn format_location(location: Option<GeoPoint>) -> String {
    match location {
        Some(p) => format!("{:.5}, {:.5}", p.lat, p.lon),
        None => "no fix".to_string(),
    }
}

/// One colored line per event.
pub fn event_line(event: &MonitorEvent) -> String {
    let time = event.timestamp().format("%H:%M:%S").to_string().dimmed();
    let body = match event {
        MonitorEvent::NewDeviceConnected { addr, .. } => {
            format!("{} {}", "New device".cyan(), addr)
        }
        MonitorEvent::FallDetected {
            svm,
            repeat,
            location,
            ..
        } => {
            let label = if *repeat { "FALL (repeat)" } else { "FALL DETECTED" };
            format!(
                "{} svm={:.1} at {}",
                label.red().bold(),
                svm,
                format_location(*location)
            )
        }
        MonitorEvent::SosRaised { location, .. } => {
            format!("{} at {}", "SOS RAISED".red().bold(), format_location(*location))
        }
        MonitorEvent::FalsePositiveCleared { .. } => {
            format!("{}", "False alarm acknowledged by device".yellow())
        }
        MonitorEvent::ManualCleared { .. } => format!("{}", "Alarm cleared".green()),
        MonitorEvent::ProlongedInactivity { idle_secs, .. } => {
            format!("{} for {}s", "Inactive".yellow(), idle_secs)
        }
        MonitorEvent::StepTargetReached { steps, .. } => {
            format!("{} {} steps", "Step goal reached:".green().bold(), steps)
        }
    };
    format!("[{time}] {body}")
}

/// Status table for the `status` console command.
pub fn status_table(snapshot: &SessionSnapshot, stats: &IngressStats) -> String {
    let rows = vec![
        StatusRow {
            field: "State",
            value: or_dash(snapshot.state.map(|s| s.as_str())),
        },
        StatusRow {
            field: "Activity",
            value: or_dash(snapshot.activity.map(|a| a.as_str())),
        },
        StatusRow {
            field: "Steps",
            value: match snapshot.step_target {
                Some(target) => format!("{} / {}", snapshot.steps, target),
                None => snapshot.steps.to_string(),
            },
        },
        StatusRow {
            field: "SVM",
            value: or_dash(snapshot.latest_svm.map(|v| format!("{v:.2}"))),
        },
        StatusRow {
            field: "Dominant freq",
            value: or_dash(
                snapshot
                    .history
                    .spectrum
                    .as_ref()
                    .and_then(|s| s.dominant_frequency())
                    .map(|f| format!("{f:.2} Hz")),
            ),
        },
        StatusRow {
            field: "Battery",
            value: or_dash(snapshot.battery.map(|b| format!("{b}%"))),
        },
        StatusRow {
            field: "Location",
            value: format_location(snapshot.last_location),
        },
        StatusRow {
            field: "Peer",
            value: or_dash(snapshot.peer),
        },
        StatusRow {
            field: "Datagrams",
            value: format!(
                "{} received, {} accepted, {} malformed, {} dropped",
                stats.received, stats.accepted, stats.malformed, stats.dropped
            ),
        },
    ];
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Periodic one-line status log.
pub fn log_status(snapshot: &SessionSnapshot) {
    if snapshot.updated_at.is_none() {
        tracing::info!("Waiting for sensor data");
        return;
    }
    tracing::info!(
        state = snapshot.state.map(|s| s.as_str()),
        activity = snapshot.activity.map(|a| a.as_str()),
        steps = snapshot.steps,
        svm = snapshot.latest_svm,
        battery = snapshot.battery,
        samples = snapshot.samples_processed,
        "Status"
    );
}
